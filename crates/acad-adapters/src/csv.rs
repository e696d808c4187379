//! Lenient CSV decoding for sheet exports.
//!
//! Quoted fields may span lines and escape quotes by doubling them. Values are
//! trimmed of surrounding spaces and tabs. The first record is the header;
//! blank and repeated header names are rewritten so every column name in a row
//! is unique.

use std::collections::HashSet;

use acad_core::RawRow;
use ::csv::{ReaderBuilder, StringRecord};
use tracing::warn;

const BOM: char = '\u{feff}';

/// Decode CSV text into rows keyed by the (deduplicated) header.
pub fn decode(text: &str) -> Vec<RawRow> {
    let mut records = read_records(text).into_iter();
    let Some(header_cells) = records.next() else {
        return Vec::new();
    };
    let headers = build_headers(header_cells);

    records
        .filter(|cells| cells.iter().any(|c| !c.trim().is_empty()))
        .map(|cells| {
            let mut cells = cells.into_iter();
            RawRow::from_pairs(
                headers
                    .iter()
                    .map(|h| (h.clone(), cells.next().unwrap_or_default())),
            )
        })
        .collect()
}

/// Ragged records of trimmed cells. Line breaks inside quotes stay in the value.
fn read_records(text: &str) -> Vec<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => records.push(record.iter().map(trim_cell).collect()),
            Ok(false) => break,
            Err(err) => {
                warn!(error = %err, "stopping csv decode at malformed record");
                break;
            }
        }
    }
    records
}

fn trim_cell(cell: &str) -> String {
    cell.trim_matches(|c| c == ' ' || c == '\t').to_string()
}

fn build_headers(cells: Vec<String>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    cells
        .into_iter()
        .enumerate()
        .map(|(idx, cell)| {
            let cell = if idx == 0 {
                cell.trim_start_matches(BOM).trim().to_string()
            } else {
                cell.trim().to_string()
            };
            let base = if cell.is_empty() {
                format!("COLUMN_{}", idx + 1)
            } else {
                cell
            };

            let name = if used.contains(&base) {
                (2..)
                    .map(|n| format!("{base}_{n}"))
                    .find(|candidate| !used.contains(candidate))
                    .unwrap_or_default()
            } else {
                base
            };
            used.insert(name.clone());
            name
        })
        .collect()
}
