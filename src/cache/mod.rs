//! Two-tier read path: hot TTL store first, durable snapshot second, empty
//! payload last. Reads never fail.

pub mod hot;
pub mod snapshot;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::clock;
use crate::error::{CrawlError, Result};
use crate::ingest::types::Record;

pub use hot::{HotStore, MemoryHotStore, RedisHotStore};
pub use snapshot::{Snapshot, SnapshotStore};

pub const DEFAULT_HOT_TTL: Duration = Duration::from_secs(3600);

pub fn hot_key(source: &str) -> String {
    format!("{source}_cache_v1")
}

pub struct CacheManager {
    hot: Option<Arc<dyn HotStore>>,
    snapshots: SnapshotStore,
    ttl: Duration,
}

impl CacheManager {
    pub fn new(hot: Option<Arc<dyn HotStore>>, snapshots: SnapshotStore, ttl: Duration) -> Self {
        Self {
            hot,
            snapshots,
            ttl,
        }
    }

    /// Snapshot-file-only mode.
    pub fn without_hot(snapshots: SnapshotStore) -> Self {
        Self::new(None, snapshots, DEFAULT_HOT_TTL)
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn hot_backend(&self) -> Option<&'static str> {
        self.hot.as_ref().map(|h| h.backend())
    }

    pub async fn read<T: Record>(&self, source: &str) -> Snapshot<T> {
        if let Some(hit) = self.hot_get::<T>(source).await {
            counter!("cache_hot_hits_total", "source" => source.to_string()).increment(1);
            return hit;
        }

        let Some(mut snap) = self.snapshots.load::<T>(source).await else {
            debug!(target: "cache", source, "no hot entry and no snapshot");
            return Snapshot::empty();
        };
        counter!("cache_snapshot_reads_total", "source" => source.to_string()).increment(1);

        let (data, dropped) = dedup_by_key(std::mem::take(&mut snap.data));
        if dropped > 0 {
            debug!(target: "cache", source, dropped, "duplicate records in snapshot");
        }
        snap.data = data;

        self.hot_put(source, &snap).await;
        snap
    }

    /// Replace the durable snapshot, then the hot entry, with `records`
    /// stamped with the completion time. Empty input touches nothing.
    ///
    /// On a snapshot write failure the hot tier is still refreshed as a best
    /// effort and the write error is returned.
    pub async fn write<T: Record>(&self, source: &str, records: Vec<T>) -> Result<Snapshot<T>> {
        if records.is_empty() {
            return Err(CrawlError::EmptyResult);
        }
        let snap = Snapshot {
            last_updated: Some(clock::format_stamp(&clock::now_local())),
            data: records,
        };

        let durable = self.snapshots.store(source, &snap).await;
        if let Err(e) = &durable {
            counter!("cache_snapshot_write_errors_total", "source" => source.to_string())
                .increment(1);
            warn!(target: "cache", source, error = %e, "snapshot write failed; refreshing hot tier only");
        }

        self.hot_put(source, &snap).await;
        durable.map(|_| {
            info!(target: "cache", source, records = snap.data.len(), "snapshot replaced");
            snap
        })
    }

    /// Drop the hot entry so the next read goes to the snapshot.
    pub async fn invalidate(&self, source: &str) {
        let Some(hot) = &self.hot else { return };
        if let Err(e) = hot.delete(&hot_key(source)).await {
            self.note_unavailable(source, &e);
        }
    }

    async fn hot_get<T: Record>(&self, source: &str) -> Option<Snapshot<T>> {
        let hot = self.hot.as_ref()?;
        match hot.get(&hot_key(source)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Snapshot<T>>(&raw) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(target: "cache", source, error = %e, "hot entry corrupt, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.note_unavailable(source, &e);
                None
            }
        }
    }

    async fn hot_put<T: Record>(&self, source: &str, snap: &Snapshot<T>) {
        let Some(hot) = &self.hot else { return };
        let body = match serde_json::to_string(snap) {
            Ok(b) => b,
            Err(e) => {
                warn!(target: "cache", source, error = %e, "snapshot not serializable for hot tier");
                return;
            }
        };
        if let Err(e) = hot.set_ex(&hot_key(source), &body, self.ttl).await {
            self.note_unavailable(source, &e);
        }
    }

    fn note_unavailable(&self, source: &str, e: &CrawlError) {
        counter!("cache_unavailable_total", "source" => source.to_string()).increment(1);
        warn!(target: "cache", source, error = %e, "hot store unavailable, using snapshot path");
    }
}

/// Keep the first record per dedup key; drop records with an empty key.
/// Returns the survivors and how many were dropped.
pub fn dedup_by_key<T: Record>(records: Vec<T>) -> (Vec<T>, usize) {
    let mut seen = HashSet::with_capacity(records.len());
    let mut out = Vec::with_capacity(records.len());
    let mut dropped = 0usize;
    for r in records {
        let key = r.dedup_key();
        if key.is_empty() || !seen.insert(key) {
            dropped += 1;
            continue;
        }
        out.push(r);
    }
    (out, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Event;
    use async_trait::async_trait;

    fn ev(name: &str) -> Event {
        Event {
            category: "c".into(),
            event_name: name.into(),
            period: String::new(),
            link: String::new(),
            image: String::new(),
            accent_color: "#ffffff".into(),
        }
    }

    struct DownStore;

    #[async_trait]
    impl HotStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(CrawlError::CacheUnavailable("connection refused".into()))
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(CrawlError::CacheUnavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Err(CrawlError::CacheUnavailable("connection refused".into()))
        }
        fn backend(&self) -> &'static str {
            "down"
        }
    }

    #[test]
    fn dedup_keeps_first_seen() {
        let mut second = ev("A");
        second.period = "later".into();
        let (out, dropped) = dedup_by_key(vec![ev("A"), ev("B"), second, ev("")]);
        assert_eq!(dropped, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].period, "");
    }

    #[tokio::test]
    async fn empty_write_is_rejected_and_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::without_hot(SnapshotStore::new(dir.path()));
        let res = cache.write::<Event>("s", Vec::new()).await;
        assert!(matches!(res, Err(CrawlError::EmptyResult)));
        assert!(!cache.snapshots().path_for("s").exists());
    }

    #[tokio::test]
    async fn unreachable_hot_store_degrades_to_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(
            Some(Arc::new(DownStore)),
            SnapshotStore::new(dir.path()),
            DEFAULT_HOT_TTL,
        );
        cache.write("s", vec![ev("A")]).await.unwrap();
        let snap = cache.read::<Event>("s").await;
        assert_eq!(snap.data, vec![ev("A")]);
        assert!(snap.last_updated.is_some());
    }

    #[tokio::test]
    async fn hot_hit_is_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let hot = Arc::new(MemoryHotStore::new());
        hot.set_ex(
            &hot_key("s"),
            r#"{"lastUpdated":"2024-05-05 05:05:05","data":[]}"#,
            DEFAULT_HOT_TTL,
        )
        .await
        .unwrap();
        let cache = CacheManager::new(Some(hot), SnapshotStore::new(dir.path()), DEFAULT_HOT_TTL);
        let snap = cache.read::<Event>("s").await;
        assert_eq!(snap.last_updated.as_deref(), Some("2024-05-05 05:05:05"));
        assert!(snap.data.is_empty());
    }
}
