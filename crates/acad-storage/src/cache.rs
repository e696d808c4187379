use std::collections::HashMap;
use std::sync::Arc;

use acad_core::RawRow;
use tokio::sync::RwLock;

/// Session-scoped store of decoded tables keyed by source cache key.
///
/// Cloning shares the underlying map, so a loader and its caller can both
/// hold a handle and the caller decides when entries go stale.
#[derive(Debug, Clone, Default)]
pub struct TableCache {
    tables: Arc<RwLock<HashMap<String, Arc<Vec<RawRow>>>>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<RawRow>>> {
        self.tables.read().await.get(key).cloned()
    }

    pub async fn put(&self, key: impl Into<String>, rows: Vec<RawRow>) -> Arc<Vec<RawRow>> {
        let rows = Arc::new(rows);
        self.tables.write().await.insert(key.into(), rows.clone());
        rows
    }

    /// Drop one entry. Returns whether anything was cached under `key`.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.tables.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.tables.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_and_invalidate_round_trip() {
        let cache = TableCache::new();
        assert!(cache.get("doc#1").await.is_none());

        cache
            .put("doc#1", vec![RawRow::from_pairs([("PID", "15")])])
            .await;
        let rows = cache.get("doc#1").await.expect("cached");
        assert_eq!(rows[0].get("PID"), "15");

        let shared = cache.clone();
        assert!(shared.invalidate("doc#1").await);
        assert!(cache.get("doc#1").await.is_none());
        assert!(!cache.invalidate("doc#1").await);
    }

    #[tokio::test]
    async fn clear_empties_every_entry() {
        let cache = TableCache::new();
        cache.put("a", Vec::new()).await;
        cache.put("b", Vec::new()).await;
        assert_eq!(cache.len().await, 2);
        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
