// tests/api_http.rs
//
// HTTP-level tests for the serve Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as Json};
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use promo_relay::api::{create_router, AppState};
use promo_relay::cache::{CacheManager, SnapshotStore};
use promo_relay::error::CrawlError;
use promo_relay::ingest::http::Transport;
use promo_relay::ingest::providers::woori::WooriProvider;
use promo_relay::ingest::scheduler::JobRunner;
use promo_relay::ingest::{CrawlJob, Pipeline, RunOutcome};

const BODY_LIMIT: usize = 1024 * 1024;

/// A job whose crawl always fails.
struct BrokenJob {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl CrawlJob for BrokenJob {
    fn source_id(&self) -> &'static str {
        "shinhan"
    }

    async fn run(&self) -> RunOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        RunOutcome::NoUpdate(CrawlError::Network("upstream down".into()))
    }

    async fn read_json(&self) -> Json {
        json!({ "lastUpdated": null, "data": [] })
    }
}

fn test_router(dir: &std::path::Path, runs: Arc<AtomicUsize>) -> Router {
    let cache = Arc::new(CacheManager::without_hot(SnapshotStore::new(dir)));
    let woori = Transport::fixture([(
        1,
        r#"{"prgEvntList":[{"cardEvntNm":"해외 결제 할인","evntSdt":"20240101","evntEdt":"20241231"}]}"#,
    )]);
    let jobs: Vec<Arc<dyn CrawlJob>> = vec![
        Arc::new(BrokenJob { runs }),
        Arc::new(Pipeline::new(WooriProvider::new(woori), cache)),
    ];
    create_router(AppState {
        runner: Arc::new(JobRunner::new(jobs)),
    })
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

fn as_json(bytes: &[u8]) -> Json {
    serde_json::from_slice(bytes).expect("json body")
}

#[tokio::test]
async fn health_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(test_router(dir.path(), Default::default()), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "OK");
}

#[tokio::test]
async fn empty_source_serves_null_stamp_and_empty_data() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(test_router(dir.path(), Default::default()), "GET", "/api/woori").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body), json!({ "lastUpdated": null, "data": [] }));
}

#[tokio::test]
async fn update_reports_started_even_when_crawl_fails() {
    let dir = tempfile::tempdir().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let app = test_router(dir.path(), runs.clone());

    let (status, body) = send(app, "POST", "/api/shinhan-cards/update").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body), json!({ "status": "started" }));

    // The detached run still happens.
    for _ in 0..50 {
        if runs.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn manual_update_then_read_serves_fresh_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(dir.path(), Default::default());

    let (status, _) = send(app.clone(), "POST", "/api/woori/update").await;
    assert_eq!(status, StatusCode::OK);

    let mut served = Json::Null;
    for _ in 0..100 {
        let (_, body) = send(app.clone(), "GET", "/api/woori").await;
        served = as_json(&body);
        if !served["data"].as_array().map_or(true, Vec::is_empty) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(served["data"][0]["eventName"], "해외 결제 할인");
    assert_eq!(served["data"][0]["period"], "2024.01.01 ~ 2024.12.31");
    assert!(served["lastUpdated"].is_string());
}

#[tokio::test]
async fn unknown_source_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(dir.path(), Default::default());

    let (status, _) = send(app.clone(), "GET", "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(app, "POST", "/api/nope/update").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
