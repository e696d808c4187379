//! Core domain model for the academic roster pipeline.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "acad-core";

pub const DEFAULT_EXPORT_BASE: &str = "https://docs.google.com/spreadsheets/d";

/// Ordered column-name -> value mapping. Missing values are the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(IndexMap<String, String>);

impl RawRow {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Value for `column`, or `""` when the column is absent.
    pub fn get(&self, column: &str) -> &str {
        self.0.get(column).map(String::as_str).unwrap_or_default()
    }

    /// First non-empty value among `columns`, matched case-insensitively on trimmed names.
    pub fn first_of(&self, columns: &[impl AsRef<str>]) -> &str {
        for wanted in columns {
            let wanted = wanted.as_ref().trim();
            let hit = self
                .0
                .iter()
                .find(|(name, value)| name.trim().eq_ignore_ascii_case(wanted) && !value.is_empty());
            if let Some((_, value)) = hit {
                return value;
            }
        }
        ""
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    /// Overwrite `column` only when `value` carries data.
    pub fn overlay(&mut self, column: &str, value: &str) {
        if !value.trim().is_empty() {
            self.0.insert(column.to_string(), value.to_string());
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One CSV export: a spreadsheet document plus a tab (gid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub document_id: String,
    pub sheet_id: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl SourceDescriptor {
    pub fn new(document_id: impl Into<String>, sheet_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            sheet_id: sheet_id.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Stable key for caches and logs; independent of the cache-buster.
    pub fn cache_key(&self) -> String {
        format!("{}#{}", self.document_id, self.sheet_id)
    }

    pub fn export_url(&self, export_base: &str, cache_buster: i64) -> String {
        format!(
            "{}/{}/export?format=csv&gid={}&t={}",
            export_base.trim_end_matches('/'),
            self.document_id,
            self.sheet_id,
            cache_buster
        )
    }
}

/// Canonical join key: ASCII alphanumerics only, lowercased.
pub fn normalize_id(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Program,
    Teacher,
    CourseReference,
}

/// A primary row after reference overlay and derived fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub fields: RawRow,
    /// Lookups that were attempted (the primary row carried a key) but found no match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<ReferenceKind>,
}

impl MergedRecord {
    pub fn get(&self, column: &str) -> &str {
        self.fields.get(column)
    }
}

/// Student roster row shared by the CSV path and the PDF path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedStudentRow {
    #[serde(rename = "SL")]
    pub sl: String,
    #[serde(rename = "PID")]
    pub pid: String,
    #[serde(rename = "StudentID")]
    pub student_id: String,
    #[serde(rename = "StudentName")]
    pub student_name: String,
    #[serde(rename = "Sex")]
    pub sex: String,
    #[serde(rename = "Mobile")]
    pub mobile: String,
    #[serde(rename = "Email")]
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Add,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// How the remote sheet places a newly added row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertStrategy {
    #[default]
    Append,
    FirstEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationPayload {
    pub action: MutationAction,
    pub target_table: String,
    pub record: RawRow,
    pub key_column: Option<String>,
    pub key_value: Option<String>,
    #[serde(default)]
    pub insert_strategy: InsertStrategy,
}

impl MutationPayload {
    pub fn new(action: MutationAction, target_table: impl Into<String>, record: RawRow) -> Self {
        Self {
            action,
            target_table: target_table.into(),
            record,
            key_column: None,
            key_value: None,
            insert_strategy: InsertStrategy::default(),
        }
    }

    pub fn keyed(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_column = Some(column.into());
        self.key_value = Some(value.into());
        self
    }

    pub fn with_insert_strategy(mut self, strategy: InsertStrategy) -> Self {
        self.insert_strategy = strategy;
        self
    }
}
