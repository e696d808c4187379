//! Reference indices and the overlay merge of primary rows.

use std::collections::HashMap;

use acad_core::{normalize_id, MergedRecord, RawRow, ReferenceKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Only a leading word boundary: labels may run straight into their number.
static THEORY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:theory|th|lecture|lec)\s*[:\-=]?\s*(\d+(?:\.\d+)?)").unwrap()
});
static LAB_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:laboratory|lab|lb)\s*[:\-=]?\s*(\d+(?:\.\d+)?)").unwrap());
static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static MOBILE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\+?88)?01\d{9}$").unwrap());

const LAB_MARKERS: &[&str] = &["lab", "sessional", "practical"];

/// Column names the engine reads and writes. Every list is tried in order,
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub teacher_id_candidates: Vec<String>,
    pub program_id_candidates: Vec<String>,
    pub reference_id_candidates: Vec<String>,
    /// Columns on the primary row holding each lookup key.
    pub primary_teacher_columns: Vec<String>,
    pub primary_program_columns: Vec<String>,
    pub primary_reference_columns: Vec<String>,
    pub credit_columns: Vec<String>,
    pub course_type_columns: Vec<String>,
    pub duration_columns: Vec<String>,
    pub requirement_columns: Vec<String>,
    pub teacher_name_columns: Vec<String>,
    pub teacher_designation_columns: Vec<String>,
    pub class_requirement_field: String,
    pub teacher_mobile_field: String,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            teacher_id_candidates: names(&["Employee ID", "Teacher ID", "EID", "ID", "Code"]),
            program_id_candidates: names(&["PID", "Program ID", "Program Code", "ID"]),
            reference_id_candidates: names(&["Course Code", "Code", "Course ID"]),
            primary_teacher_columns: names(&["Teacher ID", "Employee ID", "Teacher Code", "EID"]),
            primary_program_columns: names(&["PID", "Program ID", "Program Code"]),
            primary_reference_columns: names(&["Course Code", "Course ID"]),
            credit_columns: names(&["Credit", "Credits", "Course Credit"]),
            course_type_columns: names(&["Course Type", "Type"]),
            duration_columns: names(&["Class Duration", "Duration"]),
            requirement_columns: names(&["Class Requirement", "Requirement"]),
            teacher_name_columns: names(&["Name", "Teacher Name", "Employee Name"]),
            teacher_designation_columns: names(&["Designation", "Position"]),
            class_requirement_field: "Class Requirement".to_string(),
            teacher_mobile_field: "Teacher Mobile".to_string(),
        }
    }
}

/// Pick the identifier column of a table: exact (case-insensitive) candidate
/// match in priority order, else the first header containing "id", else the
/// first header.
pub fn discover_id_column<'a>(headers: &[&'a str], candidates: &[String]) -> Option<&'a str> {
    candidates
        .iter()
        .find_map(|c| {
            headers
                .iter()
                .find(|h| h.trim().eq_ignore_ascii_case(c.trim()))
                .copied()
        })
        .or_else(|| {
            headers
                .iter()
                .find(|h| h.to_ascii_lowercase().contains("id"))
                .copied()
        })
        .or_else(|| headers.first().copied())
}

/// A secondary row and the id column of the sheet it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRow {
    pub id_column: String,
    pub row: RawRow,
}

/// Normalized id to row for one kind of secondary table. Later duplicates
/// replace earlier ones, across sheets too.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    rows: HashMap<String, ReferenceRow>,
}

impl ReferenceIndex {
    /// Index every sheet of one kind. Each sheet gets its own id column, so
    /// sheets with different headers still resolve.
    pub fn build(sheets: &[Vec<RawRow>], candidates: &[String]) -> Self {
        let mut rows = HashMap::new();
        for sheet in sheets {
            let Some(first) = sheet.first() else {
                continue;
            };
            let headers: Vec<&str> = first.columns().collect();
            let Some(id_column) = discover_id_column(&headers, candidates).map(str::to_string) else {
                continue;
            };
            for row in sheet {
                let key = normalize_id(row.get(&id_column));
                if !key.is_empty() {
                    rows.insert(
                        key,
                        ReferenceRow {
                            id_column: id_column.clone(),
                            row: row.clone(),
                        },
                    );
                }
            }
        }
        Self { rows }
    }

    pub fn lookup(&self, raw_id: &str) -> Option<&ReferenceRow> {
        let key = normalize_id(raw_id);
        if key.is_empty() {
            return None;
        }
        self.rows.get(&key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Secondary tables for one load cycle, one entry per sheet.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    pub programs: Vec<Vec<RawRow>>,
    pub teachers: Vec<Vec<RawRow>>,
    pub references: Vec<Vec<RawRow>>,
}

#[derive(Debug, Clone)]
pub struct JoinEngine {
    config: JoinConfig,
    programs: ReferenceIndex,
    teachers: ReferenceIndex,
    references: ReferenceIndex,
}

impl JoinEngine {
    pub fn build(tables: &ReferenceTables, config: JoinConfig) -> Self {
        Self {
            programs: ReferenceIndex::build(&tables.programs, &config.program_id_candidates),
            teachers: ReferenceIndex::build(&tables.teachers, &config.teacher_id_candidates),
            references: ReferenceIndex::build(&tables.references, &config.reference_id_candidates),
            config,
        }
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    pub fn merge(&self, primary: &[RawRow]) -> Vec<MergedRecord> {
        primary.iter().map(|row| self.merge_row(row)).collect()
    }

    /// Overlay order, lowest to highest: primary, teacher, program, reference.
    /// Blank values never replace existing ones. The program row never writes
    /// the class requirement field directly; only the derived count does.
    pub fn merge_row(&self, primary: &RawRow) -> MergedRecord {
        let cfg = &self.config;
        let mut fields = primary.clone();
        let mut unresolved = Vec::new();

        let teacher = resolve(
            &self.teachers,
            primary.first_of(&cfg.primary_teacher_columns),
            ReferenceKind::Teacher,
            &mut unresolved,
        );
        let program = resolve(
            &self.programs,
            primary.first_of(&cfg.primary_program_columns),
            ReferenceKind::Program,
            &mut unresolved,
        );
        let reference = resolve(
            &self.references,
            primary.first_of(&cfg.primary_reference_columns),
            ReferenceKind::CourseReference,
            &mut unresolved,
        );

        if let Some(hit) = teacher {
            overlay_except(&mut fields, &hit.row, &[hit.id_column.as_str()]);
            if let Some(mobile) = teacher_mobile(&hit.row, &hit.id_column, cfg) {
                fields.overlay(&cfg.teacher_mobile_field, &mobile);
            }
        }
        if let Some(hit) = program {
            overlay_except(
                &mut fields,
                &hit.row,
                &[hit.id_column.as_str(), cfg.class_requirement_field.as_str()],
            );
        }
        if let Some(hit) = reference {
            overlay_except(&mut fields, &hit.row, &[hit.id_column.as_str()]);
        }

        if let Some(hit) = program {
            let from_reference = reference
                .map(|r| r.row.get(&cfg.class_requirement_field))
                .unwrap_or_default();
            if from_reference.trim().is_empty() {
                if let Some(count) = class_requirement(&hit.row, &fields, cfg) {
                    fields.insert(cfg.class_requirement_field.clone(), count.to_string());
                }
            }
        }

        MergedRecord { fields, unresolved }
    }
}

fn resolve<'a>(
    index: &'a ReferenceIndex,
    raw_id: &str,
    kind: ReferenceKind,
    unresolved: &mut Vec<ReferenceKind>,
) -> Option<&'a ReferenceRow> {
    if raw_id.trim().is_empty() {
        return None;
    }
    let hit = index.lookup(raw_id);
    if hit.is_none() {
        unresolved.push(kind);
    }
    hit
}

fn overlay_except(fields: &mut RawRow, row: &RawRow, skip: &[&str]) {
    for (column, value) in row.iter() {
        if !skip.iter().any(|s| s.eq_ignore_ascii_case(column)) {
            fields.overlay(column, value);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CategoryValues {
    theory: Option<f64>,
    lab: Option<f64>,
}

/// Labeled theory/lab numbers; an unlabeled string with a bare number feeds both.
fn category_values(text: &str) -> CategoryValues {
    let labeled = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c[1].parse::<f64>().ok())
    };
    let theory = labeled(&*THEORY_VALUE);
    let lab = labeled(&*LAB_VALUE);
    if theory.is_some() || lab.is_some() {
        return CategoryValues { theory, lab };
    }
    let bare = BARE_NUMBER
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok());
    CategoryValues {
        theory: bare,
        lab: bare,
    }
}

/// Classes per course: floor(requirement / duration) for the record's
/// category, multiplied by a positive credit, floored.
fn class_requirement(program: &RawRow, merged: &RawRow, cfg: &JoinConfig) -> Option<i64> {
    let duration = category_values(program.first_of(&cfg.duration_columns));
    let requirement = category_values(program.first_of(&cfg.requirement_columns));

    let course_type = merged.first_of(&cfg.course_type_columns).to_ascii_lowercase();
    let is_lab = LAB_MARKERS.iter().any(|m| course_type.contains(m));
    let (duration, requirement) = if is_lab {
        (duration.lab?, requirement.lab?)
    } else {
        (duration.theory?, requirement.theory?)
    };
    if duration == 0.0 {
        return None;
    }
    let classes = (requirement / duration).floor();

    let credit = merged
        .first_of(&cfg.credit_columns)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|c| c.is_finite() && *c > 0.0);
    let total = match credit {
        Some(credit) => (classes * credit).floor(),
        None => classes,
    };
    Some(total as i64)
}

/// First mobile-shaped value among the teacher row's other columns.
fn teacher_mobile(row: &RawRow, id_column: &str, cfg: &JoinConfig) -> Option<String> {
    let own = [
        row.get(id_column),
        row.first_of(&cfg.teacher_name_columns),
        row.first_of(&cfg.teacher_designation_columns),
    ];
    row.iter()
        .filter(|(column, _)| *column != id_column)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty() && !own.contains(value))
        .find(|value| {
            let compact: String = value
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect();
            MOBILE_NUMBER.is_match(&compact)
        })
        .map(str::to_string)
}
