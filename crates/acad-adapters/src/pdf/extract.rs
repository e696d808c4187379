use std::ops::Range;

use acad_core::ExtractedStudentRow;
use once_cell::sync::Lazy;
use regex::Regex;

use super::classify::{classify_line, is_purely_numeric, LineKind};
use super::lines::ReconstructedLine;
use super::ReconstructConfig;
use crate::roster::normalize_sex;

static SERIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,4})\s+").unwrap());
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+\s*@\s*[A-Za-z0-9\-]+(?:\s*\.\s*[A-Za-z0-9\-]+)+").unwrap()
});
static HYPHEN_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4,}\b").unwrap());
static TRUNCATED_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{3}-\d{2}-)(\d{1,3})\b").unwrap());
static MOBILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\D)(\+?(?:88)?01\d{9})(?:\D|$)").unwrap());
static LONG_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{10,}").unwrap());
static SEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(femal\s?e|mal\s?e)\b").unwrap());
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static TRAILING_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)$").unwrap());

static PROGRAM_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:program(?:me)?|prog\.?|pid)\s*(?:id|code|no\.?)?\s*[:#\-]?\s*(\d{1,4})\b").unwrap()
});
static SHORT_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{2,4})\b").unwrap());
static NOT_A_PROGRAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(total|page|date|time)\b").unwrap());

/// Fields recognised on one content line before program attribution.
#[derive(Debug, Default, PartialEq, Eq)]
struct LineFields {
    serial: String,
    id: String,
    name: String,
    sex: String,
    mobile: String,
    email: String,
}

/// Walk merged lines top to bottom, tracking the current program id, and emit
/// one row per line that yields an identifier.
pub fn extract_rows(lines: &[ReconstructedLine], config: &ReconstructConfig) -> Vec<ExtractedStudentRow> {
    let mut tracked_program = String::new();
    let mut rows = Vec::new();

    for line in lines {
        let text = line.text.trim();
        match classify_line(text) {
            LineKind::Furniture => continue,
            LineKind::Metadata => {
                if let Some(program) = program_from_header(text) {
                    tracked_program = program;
                }
                continue;
            }
            LineKind::Content => {}
        }
        if is_purely_numeric(text) {
            continue;
        }

        let Some(fields) = extract_fields(text) else {
            if let Some(program) = program_from_header(text) {
                tracked_program = program;
            }
            continue;
        };

        let pid = config
            .program_code_for(&fields.id)
            .map(str::to_string)
            .or_else(|| program_from_id(&fields.id))
            .unwrap_or_else(|| tracked_program.clone());

        rows.push(ExtractedStudentRow {
            sl: fields.serial,
            pid,
            student_id: fields.id,
            student_name: fields.name,
            sex: fields.sex,
            mobile: fields.mobile,
            email: fields.email,
        });
    }
    rows
}

/// Explicit `Program: NN` label, else the first 2-4 digit number that is not a year.
fn program_from_header(text: &str) -> Option<String> {
    if let Some(caps) = PROGRAM_LABEL.captures(text) {
        return Some(caps[1].to_string());
    }
    if NOT_A_PROGRAM.is_match(text) {
        return None;
    }
    SHORT_NUMBER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|n| !is_plausible_year(n))
}

fn is_plausible_year(number: &str) -> bool {
    number.len() == 4 && number.parse::<u32>().is_ok_and(|y| (1950..=2099).contains(&y))
}

/// Middle segment of a three-segment hyphenated id.
fn program_from_id(id: &str) -> Option<String> {
    let parts: Vec<&str> = id.split('-').collect();
    match parts.as_slice() {
        [_, program, _] if !program.is_empty() => Some(program.to_string()),
        _ => None,
    }
}

fn blank_out(text: &mut String, range: Range<usize>) {
    text.replace_range(range, " ");
}

fn extract_fields(text: &str) -> Option<LineFields> {
    let mut rest = text.to_string();
    let mut fields = LineFields::default();

    if let Some(m) = SERIAL.captures(&rest).and_then(|c| c.get(1)) {
        fields.serial = m.as_str().to_string();
        let range = m.range();
        blank_out(&mut rest, range);
    }

    if let Some(m) = EMAIL.find(&rest) {
        fields.email = m.as_str().split_whitespace().collect();
        let range = m.range();
        blank_out(&mut rest, range);
    }

    let mut truncated = None;
    if let Some(m) = HYPHEN_ID.find(&rest) {
        fields.id = m.as_str().to_string();
        let range = m.range();
        blank_out(&mut rest, range);
    } else if let Some(caps) = TRUNCATED_ID.captures(&rest) {
        let (Some(whole), Some(prefix), Some(tail)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            return None;
        };
        fields.id = whole.as_str().to_string();
        truncated = Some((prefix.as_str().to_string(), tail.as_str().to_string()));
        let range = whole.range();
        blank_out(&mut rest, range);
    }

    if let Some(m) = MOBILE.captures(&rest).and_then(|c| c.get(1)) {
        fields.mobile = m.as_str().to_string();
        let range = m.range();
        blank_out(&mut rest, range);
    }

    if fields.id.is_empty() {
        if let Some(m) = LONG_ID.find(&rest) {
            fields.id = m.as_str().to_string();
            let range = m.range();
            blank_out(&mut rest, range);
        }
    }
    if fields.id.is_empty() {
        return None;
    }

    if let Some(m) = SEX.find(&rest) {
        fields.sex = normalize_sex(m.as_str());
        let range = m.range();
        blank_out(&mut rest, range);
    }

    if let Some((prefix, tail)) = truncated {
        repair_truncated_id(&mut fields, &mut rest, &prefix, &tail);
    }

    fields.name = clean_name(&rest);
    Some(fields)
}

/// The email local part usually ends with the full id tail. When it extends the
/// truncated tail, adopt it and strip the overflow from the digit run it was
/// glued to; whatever is left of that run is the mobile.
fn repair_truncated_id(fields: &mut LineFields, rest: &mut String, prefix: &str, tail: &str) {
    let local = fields.email.split('@').next().unwrap_or_default();
    let Some(suffix) = TRAILING_DIGITS.captures(local).map(|c| c[1].to_string()) else {
        return;
    };
    if suffix.len() <= tail.len() || !suffix.starts_with(tail) {
        return;
    }
    fields.id = format!("{prefix}{suffix}");

    let leftover = &suffix[tail.len()..];
    let run = DIGIT_RUN
        .find_iter(rest)
        .find(|m| m.as_str().starts_with(leftover))
        .map(|m| (m.range(), m.as_str()[leftover.len()..].to_string()));
    if let Some((range, remainder)) = run {
        blank_out(rest, range);
        if fields.mobile.is_empty() && !remainder.is_empty() {
            fields.mobile = remainder;
        }
    }
}

fn clean_name(rest: &str) -> String {
    let kept: String = rest
        .chars()
        .map(|c| {
            if c.is_alphabetic() || c == '.' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '.' || c.is_whitespace())
        .to_string()
}
