//! Grouped, ordered loading of primary partitions with incremental delivery.

use std::sync::Arc;

use acad_adapters::TableSource;
use acad_core::{MergedRecord, RawRow, SourceDescriptor};
use acad_storage::TableCache;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::join::{JoinConfig, JoinEngine, ReferenceTables};

pub const DEFAULT_GROUP_SIZE: usize = 12;

/// What one load cycle reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPlan {
    pub partitions: Vec<SourceDescriptor>,
    pub programs: Vec<SourceDescriptor>,
    pub teachers: Vec<SourceDescriptor>,
    pub references: Vec<SourceDescriptor>,
}

/// Receives progress and finished groups in source order.
pub trait LoadObserver: Send + Sync {
    fn on_status(&self, message: &str);
    fn on_batch(&self, batch: &[MergedRecord]);
}

/// Observer that forwards to two closures.
pub struct CallbackObserver<S, B> {
    on_status: S,
    on_batch: B,
}

impl<S, B> CallbackObserver<S, B>
where
    S: Fn(&str) + Send + Sync,
    B: Fn(&[MergedRecord]) + Send + Sync,
{
    pub fn new(on_status: S, on_batch: B) -> Self {
        Self { on_status, on_batch }
    }
}

impl<S, B> LoadObserver for CallbackObserver<S, B>
where
    S: Fn(&str) + Send + Sync,
    B: Fn(&[MergedRecord]) + Send + Sync,
{
    fn on_status(&self, message: &str) {
        (self.on_status)(message)
    }

    fn on_batch(&self, batch: &[MergedRecord]) {
        (self.on_batch)(batch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    Status(String),
    Batch(Vec<MergedRecord>),
    Finished { cycle_id: Uuid, total: usize },
}

impl LoadObserver for mpsc::UnboundedSender<LoadEvent> {
    fn on_status(&self, message: &str) {
        let _ = self.send(LoadEvent::Status(message.to_string()));
    }

    fn on_batch(&self, batch: &[MergedRecord]) {
        let _ = self.send(LoadEvent::Batch(batch.to_vec()));
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub cycle_id: Uuid,
    pub groups: usize,
    pub records: Vec<MergedRecord>,
}

pub struct BatchLoader<S> {
    source: Arc<S>,
    cache: TableCache,
    join: JoinConfig,
    group_size: usize,
}

impl<S: TableSource> BatchLoader<S> {
    pub fn new(source: Arc<S>, cache: TableCache, join: JoinConfig) -> Self {
        Self {
            source,
            cache,
            join,
            group_size: DEFAULT_GROUP_SIZE,
        }
    }

    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size.max(1);
        self
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    /// One cycle: reference tables first, then partitions in groups. A group's
    /// fetches run together; the next group starts only after it settles.
    pub async fn load(&self, plan: &LoadPlan, observer: &dyn LoadObserver) -> LoadOutcome {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("load_cycle", %cycle_id, partitions = plan.partitions.len());
        async {
            let (programs, teachers, references) = futures::join!(
                self.reference_rows(&plan.programs),
                self.reference_rows(&plan.teachers),
                self.reference_rows(&plan.references),
            );
            let tables = ReferenceTables {
                programs,
                teachers,
                references,
            };
            debug!(
                programs = row_count(&tables.programs),
                teachers = row_count(&tables.teachers),
                references = row_count(&tables.references),
                "reference tables ready"
            );
            let engine = JoinEngine::build(&tables, self.join.clone());

            let groups: Vec<&[SourceDescriptor]> = plan.partitions.chunks(self.group_size).collect();
            let mut records = Vec::new();
            for (k, group) in groups.iter().enumerate() {
                observer.on_status(&format!(
                    "Loading group {} of {} ({} sources)",
                    k + 1,
                    groups.len(),
                    group.len()
                ));

                let fetched = join_all(group.iter().map(|source| self.source.fetch_rows(source))).await;
                let batch: Vec<MergedRecord> = fetched
                    .iter()
                    .flat_map(|rows| engine.merge(rows))
                    .collect();

                debug!(group = k + 1, rows = batch.len(), "group merged");
                observer.on_batch(&batch);
                records.extend(batch);
            }

            info!(groups = groups.len(), records = records.len(), "load cycle finished");
            LoadOutcome {
                cycle_id,
                groups: groups.len(),
                records,
            }
        }
        .instrument(span)
        .await
    }

    /// One table per source, kept apart so each sheet resolves its own id column.
    async fn reference_rows(&self, sources: &[SourceDescriptor]) -> Vec<Vec<RawRow>> {
        let tables = join_all(sources.iter().map(|s| self.cached_rows(s))).await;
        tables.iter().map(|t| t.as_ref().clone()).collect()
    }

    /// Rows for `source`, served from the cache when present. Empty results are
    /// not cached so a failed fetch is retried next cycle.
    async fn cached_rows(&self, source: &SourceDescriptor) -> Arc<Vec<RawRow>> {
        let key = source.cache_key();
        if let Some(rows) = self.cache.get(&key).await {
            return rows;
        }
        let rows = self.source.fetch_rows(source).await;
        if rows.is_empty() {
            return Arc::new(rows);
        }
        self.cache.put(key, rows).await
    }
}

fn row_count(sheets: &[Vec<RawRow>]) -> usize {
    sheets.iter().map(Vec::len).sum()
}

impl<S: TableSource + 'static> BatchLoader<S> {
    /// Run a cycle on a background task and receive its events.
    pub fn stream(self: Arc<Self>, plan: LoadPlan) -> mpsc::UnboundedReceiver<LoadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let outcome = self.load(&plan, &tx).await;
            let _ = tx.send(LoadEvent::Finished {
                cycle_id: outcome.cycle_id,
                total: outcome.records.len(),
            });
        });
        rx
    }
}
