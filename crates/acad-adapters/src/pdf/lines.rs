use super::tokens::PositionedToken;

/// Tokens whose baselines differ by at most this many units share a line.
pub const Y_TOLERANCE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedLine {
    pub page: usize,
    pub y: f64,
    pub text: String,
}

impl ReconstructedLine {
    pub fn new(page: usize, y: f64, text: impl Into<String>) -> Self {
        Self {
            page,
            y,
            text: text.into(),
        }
    }
}

/// Group a page's tokens into lines, top to bottom.
pub fn cluster_lines(page: usize, tokens: &[PositionedToken], tolerance: f64) -> Vec<ReconstructedLine> {
    let mut sorted: Vec<&PositionedToken> = tokens.iter().collect();
    sorted.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut groups: Vec<Vec<&PositionedToken>> = Vec::new();
    let mut prev_y: Option<f64> = None;
    for token in sorted {
        match (prev_y, groups.last_mut()) {
            (Some(y), Some(group)) if (y - token.y).abs() <= tolerance => group.push(token),
            _ => groups.push(vec![token]),
        }
        prev_y = Some(token.y);
    }

    groups
        .into_iter()
        .filter_map(|mut group| {
            group.sort_by(|a, b| a.x.total_cmp(&b.x));
            let y = group.first()?.y;
            let text = group
                .iter()
                .flat_map(|t| t.text.split_whitespace())
                .collect::<Vec<_>>()
                .join(" ");
            (!text.is_empty()).then(|| ReconstructedLine::new(page, y, text))
        })
        .collect()
}
