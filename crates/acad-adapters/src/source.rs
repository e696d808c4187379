use std::sync::Arc;

use acad_core::{RawRow, SourceDescriptor};
use acad_storage::RelayFetcher;
use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::csv::decode;

/// Anything that can turn a sheet descriptor into decoded rows.
///
/// Implementations never fail: an unreachable source yields no rows so one
/// bad tab cannot abort a whole load cycle.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn fetch_rows(&self, source: &SourceDescriptor) -> Vec<RawRow>;
}

/// Sheet CSV exports fetched through the relay pool.
#[derive(Debug, Clone)]
pub struct CsvSheetSource {
    http: Arc<RelayFetcher>,
}

impl CsvSheetSource {
    pub fn new(http: Arc<RelayFetcher>) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &RelayFetcher {
        &self.http
    }

    pub fn export_url(&self, source: &SourceDescriptor) -> String {
        source.export_url(self.http.export_base(), Utc::now().timestamp_millis())
    }

    pub async fn fetch_url(&self, url: &str) -> Vec<RawRow> {
        match self.http.fetch_text(url).await {
            Ok(text) => decode(&text),
            Err(err) => {
                warn!(url, error = %err, "csv source unavailable; continuing without it");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl TableSource for CsvSheetSource {
    async fn fetch_rows(&self, source: &SourceDescriptor) -> Vec<RawRow> {
        let url = self.export_url(source);
        self.fetch_url(&url).await
    }
}
