//! Line-level classification shared by the merge and extraction passes.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Page headers/footers, page numbers, date stamps, column titles.
    Furniture,
    /// `Label: value` lines such as section or program headers.
    Metadata,
    Content,
}

static PAGE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^page\s*\d+(\s*(of|/)\s*\d+)?$|\bpage\s+\d+\s+of\s+\d+\b").unwrap());
static DATE_STAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{4}-\d{2}-\d{2})([,\s]+\d{1,2}:\d{2}(:\d{2})?\s*(am|pm)?)?$|^(printed|generated|print\s+date|report\s+date)\b",
    )
    .unwrap()
});
static COLUMN_TITLES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(sl\.?|s\.\s?l\.?|serial|#)(\s+no\.?)?\s+.*\b(id|name)\b|\bstudent\s*id\b.*\bname\b").unwrap()
});
static INSTITUTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\buniversity\b|\bdepartment\s+of\b|\b(student|class)\s+(list|roster)\b").unwrap()
});
static METADATA_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(program(me)?|prog\.?|pid|department|dept\.?|course|section|semester|batch|session|level|term|teacher|faculty|instructor|total)(\s+(id|code|title|name|no\.?|students))?\s*[:#\-]",
    )
    .unwrap()
});
static ROW_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,4}\s+(\d{3}-\d{2}-\d+|\d{6,})").unwrap());
static BARE_MOBILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?(88)?01\d{9}$").unwrap());
static PURELY_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\s\-+/.,]+$").unwrap());
static TRAILING_ID_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{3}-\d{2}-\d+|\d{6,})$").unwrap());
static LEADING_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)(.*)$").unwrap());

pub fn classify_line(text: &str) -> LineKind {
    let text = text.trim();
    if PAGE_NUMBER.is_match(text) || DATE_STAMP.is_match(text) || COLUMN_TITLES.is_match(text) {
        return LineKind::Furniture;
    }
    if INSTITUTION_HEADER.is_match(text) && !ROW_START.is_match(text) {
        return LineKind::Furniture;
    }
    if METADATA_LABEL.is_match(text) {
        return LineKind::Metadata;
    }
    LineKind::Content
}

/// Short serial, whitespace, then a long or hyphenated identifier.
pub fn is_row_start(text: &str) -> bool {
    ROW_START.is_match(text.trim())
}

/// A line holding nothing but a mobile number (spaces and dashes ignored).
pub fn is_bare_mobile(text: &str) -> bool {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    BARE_MOBILE.is_match(&compact)
}

pub fn is_purely_numeric(text: &str) -> bool {
    PURELY_NUMERIC.is_match(text.trim())
}

pub fn ends_with_id_digits(text: &str) -> bool {
    TRAILING_ID_DIGITS.is_match(text.trim_end())
}

/// Leading digit run and the rest of the line, if the line starts with a digit.
pub fn split_leading_digits(text: &str) -> Option<(&str, &str)> {
    let caps = LEADING_DIGITS.captures(text.trim_start())?;
    let digits = caps.get(1)?.as_str();
    let rest = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    Some((digits, rest))
}
