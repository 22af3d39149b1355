// tests/cache_roundtrip.rs
//
// Two-tier cache behaviour through the public surface: hot store backed by
// the in-process map, snapshots in a temp directory.

use std::sync::Arc;
use std::time::Duration;

use promo_relay::cache::{hot_key, CacheManager, HotStore, MemoryHotStore, SnapshotStore};
use promo_relay::ingest::types::Event;

fn ev(name: &str) -> Event {
    Event {
        category: "우리카드".into(),
        event_name: name.into(),
        period: "2024.01.01 ~ 2024.12.31".into(),
        link: String::new(),
        image: String::new(),
        accent_color: "#007bc3".into(),
    }
}

fn manager(root: &std::path::Path, hot: Arc<MemoryHotStore>) -> CacheManager {
    CacheManager::new(
        Some(hot as Arc<dyn HotStore>),
        SnapshotStore::new(root),
        Duration::from_secs(3600),
    )
}

#[tokio::test]
async fn write_invalidate_read_returns_same_records() {
    let dir = tempfile::tempdir().unwrap();
    let hot = Arc::new(MemoryHotStore::new());
    let cache = manager(dir.path(), hot.clone());

    let written = cache
        .write("woori", vec![ev("여름 캐시백"), ev("해외 결제 할인")])
        .await
        .expect("write");
    assert!(hot.get(&hot_key("woori")).await.unwrap().is_some());

    cache.invalidate("woori").await;
    assert!(hot.get(&hot_key("woori")).await.unwrap().is_none());

    let read = cache.read::<Event>("woori").await;
    assert_eq!(read.data, written.data);
    assert!(read.last_updated.is_some());

    // The snapshot read repopulated the hot tier.
    assert!(hot.get(&hot_key("woori")).await.unwrap().is_some());
}

#[tokio::test]
async fn miss_without_snapshot_is_empty_payload() {
    let dir = tempfile::tempdir().unwrap();
    let cache = manager(dir.path(), Arc::new(MemoryHotStore::new()));

    let snap = cache.read::<Event>("lotte").await;
    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json, serde_json::json!({ "lastUpdated": null, "data": [] }));
}

#[tokio::test]
async fn snapshot_document_uses_wire_field_names() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheManager::without_hot(SnapshotStore::new(dir.path()));
    cache.write("bc", vec![ev("주유 할인")]).await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join("bc_data.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let stamp = doc["lastUpdated"].as_str().expect("stamp");
    assert_eq!(stamp.len(), "2024-01-01 00:00:00".len());
    let first = &doc["data"][0];
    assert_eq!(first["eventName"], "주유 할인");
    assert_eq!(first["bgColor"], "#007bc3");
}
