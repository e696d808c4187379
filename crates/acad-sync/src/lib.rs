//! Load-cycle orchestration: configuration, the join engine, the batch loader
//! and the mutation workflow.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use acad_adapters::{reconstruct_pdf, students_from_rows, CsvSheetSource, ReconstructConfig, StudentColumns, TableSource};
use acad_core::{ExtractedStudentRow, MergedRecord, SourceDescriptor};
use acad_storage::{direct_download_url, HttpClientConfig, MutationGateway, RelayFetcher, TableCache, DEFAULT_RELAYS};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

mod join;
mod loader;
mod upsert;

pub use join::{discover_id_column, JoinConfig, JoinEngine, ReferenceIndex, ReferenceTables};
pub use loader::{BatchLoader, CallbackObserver, LoadEvent, LoadObserver, LoadOutcome, LoadPlan, DEFAULT_GROUP_SIZE};
pub use upsert::{upsert, UpdateOutcome};

pub const CRATE_NAME: &str = "acad-sync";

/// Contents of `sources.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRegistry {
    #[serde(flatten)]
    pub plan: LoadPlan,
    #[serde(default)]
    pub group_size: Option<usize>,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub pdf: ReconstructConfig,
    #[serde(default)]
    pub students: StudentColumns,
}

impl SourceRegistry {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub relays: Vec<String>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub mutation_endpoint: Option<String>,
    pub spreadsheet_id: String,
    pub workspace_root: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            relays: std::env::var("ACAD_RELAYS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|_| DEFAULT_RELAYS.iter().map(ToString::to_string).collect()),
            http_timeout_secs: std::env::var("ACAD_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            user_agent: std::env::var("ACAD_USER_AGENT").unwrap_or_else(|_| "acad-sync/0.1".to_string()),
            mutation_endpoint: std::env::var("ACAD_MUTATION_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            spreadsheet_id: std::env::var("ACAD_SPREADSHEET_ID").unwrap_or_default(),
            workspace_root: std::env::var("ACAD_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }

    fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            relays: self.relays.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub partitions: usize,
    pub groups: usize,
    pub records: usize,
    /// Records with at least one reference lookup that found no match.
    pub unresolved_records: usize,
}

/// Wires configuration to the fetcher, cache, loader and gateway.
pub struct SyncPipeline {
    config: SyncConfig,
    source: Arc<CsvSheetSource>,
    cache: TableCache,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = RelayFetcher::new(config.http_config())?;
        Ok(Self {
            config,
            source: Arc::new(CsvSheetSource::new(Arc::new(http))),
            cache: TableCache::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    pub async fn registry(&self) -> Result<SourceRegistry> {
        SourceRegistry::load(&self.config.registry_path()).await
    }

    /// The registry, or defaults when no `sources.yaml` exists. A file that
    /// exists but does not parse is still an error.
    pub async fn registry_or_default(&self) -> Result<SourceRegistry> {
        let path = self.config.registry_path();
        let exists = fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?;
        if !exists {
            debug!(path = %path.display(), "no source registry; using default mappings");
            return Ok(SourceRegistry::default());
        }
        SourceRegistry::load(&path).await
    }

    pub fn loader(&self, registry: &SourceRegistry) -> BatchLoader<CsvSheetSource> {
        let loader = BatchLoader::new(self.source.clone(), self.cache.clone(), registry.join.clone());
        match registry.group_size {
            Some(size) => loader.with_group_size(size),
            None => loader,
        }
    }

    /// Run one load cycle over every registered partition.
    pub async fn run_once(&self, observer: &dyn LoadObserver) -> Result<(LoadSummary, Vec<MergedRecord>)> {
        let started_at = Utc::now();
        let registry = self.registry().await?;
        let outcome = self.loader(&registry).load(&registry.plan, observer).await;

        let summary = LoadSummary {
            cycle_id: outcome.cycle_id,
            started_at,
            finished_at: Utc::now(),
            partitions: registry.plan.partitions.len(),
            groups: outcome.groups,
            records: outcome.records.len(),
            unresolved_records: outcome.records.iter().filter(|r| !r.unresolved.is_empty()).count(),
        };
        Ok((summary, outcome.records))
    }

    /// Student rows from one roster tab.
    pub async fn csv_roster(&self, source: &SourceDescriptor) -> Result<Vec<ExtractedStudentRow>> {
        let registry = self.registry_or_default().await?;
        let rows = self.source.fetch_rows(source).await;
        Ok(students_from_rows(&rows, &registry.students))
    }

    /// Reconstruct a roster from a local PDF path or a shareable link.
    pub async fn pdf_roster(&self, location: &str) -> Result<Vec<ExtractedStudentRow>> {
        let registry = self.registry_or_default().await?;
        let bytes = if location.starts_with("http://") || location.starts_with("https://") {
            let url = direct_download_url(location);
            self.source
                .http()
                .fetch_bytes_direct(&url)
                .await
                .with_context(|| format!("downloading {url}"))?
        } else {
            fs::read(location)
                .await
                .with_context(|| format!("reading {location}"))?
        };
        reconstruct_pdf(bytes, &registry.pdf)
            .await
            .with_context(|| format!("reconstructing {location}"))
    }

    pub fn mutation_gateway(&self) -> Result<MutationGateway> {
        let endpoint = self
            .config
            .mutation_endpoint
            .clone()
            .context("ACAD_MUTATION_ENDPOINT is not set")?;
        MutationGateway::new(
            endpoint,
            self.config.spreadsheet_id.clone(),
            Duration::from_secs(self.config.http_timeout_secs),
        )
    }
}

pub async fn run_load_once_from_env(observer: &dyn LoadObserver) -> Result<(LoadSummary, Vec<MergedRecord>)> {
    let pipeline = SyncPipeline::new(SyncConfig::from_env())?;
    pipeline.run_once(observer).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
partitions:
  - document_id: doc-sections
    sheet_id: "0"
    label: CSE
  - document_id: doc-sections
    sheet_id: "1"
programs:
  - document_id: doc-programs
    sheet_id: "0"
group_size: 6
join:
  teacher_id_candidates: [Staff ID]
pdf:
  program_codes:
    "0242": CSE
students:
  mobile: [Cell]
"#;

    fn config_at(root: &Path) -> SyncConfig {
        SyncConfig {
            relays: vec![String::new()],
            http_timeout_secs: 1,
            user_agent: "test".into(),
            mutation_endpoint: None,
            spreadsheet_id: String::new(),
            workspace_root: root.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn registry_parses_plan_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sources.yaml"), REGISTRY).unwrap();

        let registry = SourceRegistry::load(&dir.path().join("sources.yaml")).await.unwrap();

        assert_eq!(registry.plan.partitions.len(), 2);
        assert_eq!(registry.plan.partitions[0].label.as_deref(), Some("CSE"));
        assert!(registry.plan.teachers.is_empty());
        assert_eq!(registry.group_size, Some(6));
        assert_eq!(registry.join.teacher_id_candidates, vec!["Staff ID".to_string()]);
        assert_eq!(registry.join.class_requirement_field, "Class Requirement");
        assert_eq!(registry.pdf.program_code_for("0242220005"), Some("CSE"));
        assert_eq!(registry.students.mobile, vec!["Cell".to_string()]);
        assert_eq!(registry.students.email, StudentColumns::default().email);
    }

    #[tokio::test]
    async fn missing_registry_is_an_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = SyncPipeline::new(config_at(dir.path())).unwrap();
        let err = pipeline.registry().await.unwrap_err();
        assert!(format!("{err:#}").contains("sources.yaml"));
    }

    #[test]
    fn gateway_requires_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = SyncPipeline::new(config_at(dir.path())).unwrap();
        assert!(pipeline.mutation_gateway().is_err());
    }

    #[tokio::test]
    async fn malformed_registry_is_not_replaced_by_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sources.yaml"), "pdf:\n  program_codes: [0242, CSE\n").unwrap();
        let pipeline = SyncPipeline::new(config_at(dir.path())).unwrap();

        let err = pipeline.pdf_roster("roster.pdf").await.unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
        let err = pipeline
            .csv_roster(&SourceDescriptor::new("doc", "0"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("sources.yaml"));
    }

    #[tokio::test]
    async fn absent_registry_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = SyncPipeline::new(config_at(dir.path())).unwrap();
        let registry = pipeline.registry_or_default().await.unwrap();
        assert!(registry.plan.partitions.is_empty());
        assert_eq!(registry.students.mobile, StudentColumns::default().mobile);
    }

    #[tokio::test]
    async fn local_pdf_that_is_not_a_pdf_reports_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.pdf");
        std::fs::write(&path, b"plain text").unwrap();
        let pipeline = SyncPipeline::new(config_at(dir.path())).unwrap();

        let err = pipeline.pdf_roster(path.to_str().unwrap()).await.unwrap_err();
        assert!(format!("{err:#}").contains("reconstructing"));
    }
}
