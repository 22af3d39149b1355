//! Durable per-source snapshot documents on local disk.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock;
use crate::error::{CrawlError, Result};
use crate::ingest::types::Record;

/// Whole-value document for one source: `{lastUpdated, data}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot<T> {
    #[serde(rename = "lastUpdated", alias = "last_updated", default)]
    pub last_updated: Option<String>,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Snapshot<T> {
    pub fn empty() -> Self {
        Self {
            last_updated: None,
            data: Vec::new(),
        }
    }
}

// Older files were written as a bare record list.
#[derive(Deserialize)]
#[serde(untagged)]
enum OnDisk<T> {
    Document(Snapshot<T>),
    Bare(Vec<T>),
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, source: &str) -> PathBuf {
        self.root.join(format!("{source}_data.json"))
    }

    /// Load the snapshot if the file exists. The embedded stamp falls back
    /// to the file's modification time. Unreadable files count as absent.
    pub async fn load<T: Record>(&self, source: &str) -> Option<Snapshot<T>> {
        let path = self.path_for(source);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(target: "cache", source, path = %path.display(), error = %e, "snapshot unreadable");
                return None;
            }
        };

        let mut snap = match serde_json::from_slice::<OnDisk<T>>(&bytes) {
            Ok(OnDisk::Document(s)) => s,
            Ok(OnDisk::Bare(data)) => Snapshot {
                last_updated: None,
                data,
            },
            Err(e) => {
                warn!(target: "cache", source, path = %path.display(), error = %e, "snapshot corrupt, ignoring");
                return None;
            }
        };

        if snap.last_updated.as_deref().map_or(true, |s| s.trim().is_empty()) {
            snap.last_updated = tokio::fs::metadata(&path)
                .await
                .and_then(|m| m.modified())
                .ok()
                .map(clock::stamp_from_system_time);
        }
        Some(snap)
    }

    /// Replace the snapshot file as a whole: write a sibling temp file, then
    /// rename it over the target.
    pub async fn store<T: Record>(&self, source: &str, snapshot: &Snapshot<T>) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let root = self.root.clone();
        let target = self.path_for(source);

        tokio::task::spawn_blocking(move || write_atomic(&root, &target, &body))
            .await
            .map_err(|e| CrawlError::SnapshotWrite(format!("writer task failed: {e}")))?
    }
}

fn write_atomic(root: &Path, target: &Path, body: &[u8]) -> Result<()> {
    let wrap = |e: std::io::Error| CrawlError::SnapshotWrite(format!("{}: {e}", target.display()));
    std::fs::create_dir_all(root).map_err(wrap)?;
    let mut tmp = tempfile::NamedTempFile::new_in(root).map_err(wrap)?;
    tmp.write_all(body).map_err(wrap)?;
    tmp.as_file().sync_all().map_err(wrap)?;
    tmp.persist(target).map_err(|e| wrap(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Event;

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

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.load::<Event>("nope").await.is_none());
    }

    #[tokio::test]
    async fn bare_list_gets_mtime_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        std::fs::write(
            store.path_for("legacy"),
            r##"[{"category":"c","eventName":"A","period":"","link":"","image":"","bgColor":"#fff"}]"##,
        )
        .unwrap();
        let snap = store.load::<Event>("legacy").await.unwrap();
        assert_eq!(snap.data.len(), 1);
        assert_eq!(snap.data[0].accent_color, "#fff");
        assert!(snap.last_updated.is_some());
    }

    #[tokio::test]
    async fn snake_case_stamp_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        std::fs::write(
            store.path_for("old"),
            r#"{"last_updated":"2024-01-01 04:00:00","data":[]}"#,
        )
        .unwrap();
        let snap = store.load::<Event>("old").await.unwrap();
        assert_eq!(snap.last_updated.as_deref(), Some("2024-01-01 04:00:00"));
    }

    #[tokio::test]
    async fn store_replaces_file_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let first = Snapshot {
            last_updated: Some("2024-01-01 00:00:00".into()),
            data: vec![ev("A")],
        };
        let second = Snapshot {
            last_updated: Some("2024-01-02 00:00:00".into()),
            data: vec![ev("B"), ev("C")],
        };
        store.store("s", &first).await.unwrap();
        store.store("s", &second).await.unwrap();

        let loaded = store.load::<Event>("s").await.unwrap();
        assert_eq!(loaded, second);
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
