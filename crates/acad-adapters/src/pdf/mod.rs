//! Student roster reconstruction from PDF text geometry.
//!
//! Passes run in order: tokens, line clustering, continuation merge, then
//! classification and field extraction.

mod classify;
mod extract;
mod lines;
mod merge;
mod tokens;

use std::collections::BTreeMap;

use acad_core::{normalize_id, ExtractedStudentRow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use classify::{classify_line, LineKind};
pub use lines::{cluster_lines, ReconstructedLine, Y_TOLERANCE};
pub use merge::merge_continuations;
pub use tokens::{extract_tokens, tokens_from_content, PositionedToken};

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("pdf parse failed: {0}")]
    Lopdf(#[from] lopdf::Error),
    #[error("pdf extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructConfig {
    /// Student-id prefix to program code. Prefixes compare on normalized ids;
    /// the longest matching prefix wins.
    pub program_codes: BTreeMap<String, String>,
}

impl ReconstructConfig {
    pub fn program_code_for(&self, student_id: &str) -> Option<&str> {
        let id = normalize_id(student_id);
        self.program_codes
            .iter()
            .map(|(prefix, code)| (normalize_id(prefix), code))
            .filter(|(prefix, _)| !prefix.is_empty() && id.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, code)| code.as_str())
    }
}

/// Rows from already-positioned tokens, one inner vector per page.
pub fn reconstruct(pages: &[Vec<PositionedToken>], config: &ReconstructConfig) -> Vec<ExtractedStudentRow> {
    let lines: Vec<ReconstructedLine> = pages
        .iter()
        .enumerate()
        .flat_map(|(page, tokens)| cluster_lines(page, tokens, Y_TOLERANCE))
        .collect();
    let merged = merge_continuations(&lines);
    debug!(lines = lines.len(), merged = merged.len(), "clustered pdf lines");
    extract::extract_rows(&merged, config)
}

/// Parse PDF bytes on the blocking pool and reconstruct the roster.
pub async fn reconstruct_pdf(bytes: Vec<u8>, config: &ReconstructConfig) -> Result<Vec<ExtractedStudentRow>, PdfError> {
    let pages = tokio::task::spawn_blocking(move || extract_tokens(&bytes)).await??;
    let rows = reconstruct(&pages, config);
    info!(pages = pages.len(), rows = rows.len(), "reconstructed pdf roster");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(text: &str, x: f64, y: f64) -> PositionedToken {
        PositionedToken::new(text, x, y)
    }

    #[test]
    fn id_split_across_page_boundary_becomes_one_row() {
        let page_one = vec![
            tok("Program: 15", 40.0, 780.0),
            tok("1", 40.0, 740.0),
            tok("221-15-4567", 70.0, 740.0),
            tok("Rahim Uddin", 160.0, 741.0),
            tok("MALE", 300.0, 740.0),
            tok("01712345678", 360.0, 739.0),
            tok("2", 40.0, 60.0),
            tok("221-15-45", 70.0, 60.0),
            tok("Page 1 of 2", 280.0, 20.0),
        ];
        let page_two = vec![
            tok("12/05/2024", 40.0, 810.0),
            tok("68", 70.0, 780.0),
            tok("Karim Hasan", 160.0, 780.0),
            tok("MAL E", 300.0, 781.0),
            tok("01812345678", 360.0, 780.0),
            tok("karim4568@diu.edu.bd", 460.0, 780.0),
        ];

        let rows = reconstruct(&[page_one, page_two], &ReconstructConfig::default());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].student_id, "221-15-4568");
        assert_eq!(rows[1].sl, "2");
        assert_eq!(rows[1].student_name, "Karim Hasan");
        assert_eq!(rows[1].sex, "Male");
        assert_eq!(rows[1].mobile, "01812345678");
        assert_eq!(rows[1].email, "karim4568@diu.edu.bd");
        assert_eq!(rows[1].pid, "15");
    }

    #[test]
    fn longest_program_prefix_wins() {
        let mut config = ReconstructConfig::default();
        config.program_codes.insert("02".into(), "GEN".into());
        config.program_codes.insert("0242".into(), "CSE".into());
        assert_eq!(config.program_code_for("0242220005"), Some("CSE"));
        assert_eq!(config.program_code_for("0211000001"), Some("GEN"));
        assert_eq!(config.program_code_for("221-15-4567"), None);
    }

    #[tokio::test]
    async fn unreadable_bytes_surface_as_pdf_error() {
        let err = reconstruct_pdf(b"%PDF-garbage".to_vec(), &ReconstructConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PdfError::Lopdf(_)));
    }
}
