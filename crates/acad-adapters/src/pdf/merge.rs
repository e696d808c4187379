//! Re-join records whose identifier tail wrapped onto a later line.
//!
//! The "is this a new record" test is a pair of shape guesses (short serial
//! followed by a long number, or a bare mobile number). Two genuinely separate
//! short records can be mis-merged when neither guess fires; this is a known
//! source of silent misclassification.

use super::classify::{
    classify_line, ends_with_id_digits, is_bare_mobile, is_row_start, split_leading_digits, LineKind,
};
use super::lines::ReconstructedLine;

pub fn merge_continuations(lines: &[ReconstructedLine]) -> Vec<ReconstructedLine> {
    let kinds: Vec<LineKind> = lines.iter().map(|l| classify_line(&l.text)).collect();
    let mut consumed = vec![false; lines.len()];
    let mut out = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        let mut line = line.clone();
        if kinds[i] == LineKind::Content && ends_with_id_digits(&line.text) {
            if let Some(j) = next_content_line(&kinds, &consumed, i + 1) {
                if let Some(joined) = splice(&line.text, &lines[j].text) {
                    line.text = joined;
                    consumed[j] = true;
                }
            }
        }
        out.push(line);
    }
    out
}

/// Index of the next unconsumed content line at or after `from`, skipping furniture and labels.
fn next_content_line(kinds: &[LineKind], consumed: &[bool], from: usize) -> Option<usize> {
    (from..kinds.len()).find(|&k| kinds[k] == LineKind::Content && !consumed[k])
}

fn splice(current: &str, next: &str) -> Option<String> {
    if is_row_start(next) || is_bare_mobile(next) {
        return None;
    }
    let (digits, rest) = split_leading_digits(next)?;
    Some(format!("{}{digits}{rest}", current.trim_end()))
}
