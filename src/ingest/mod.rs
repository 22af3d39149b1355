// src/ingest/mod.rs
pub mod browser;
pub mod config;
pub mod http;
pub mod pagination;
pub mod providers;
pub mod rates;
pub mod scheduler;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::{info, warn};
use url::Url;

use crate::cache::{dedup_by_key, CacheManager};
use crate::error::CrawlError;
use crate::ingest::types::{Record, SourceProvider};

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("crawl_runs_total", "Crawl runs started, per source.");
        describe_counter!(
            "crawl_noop_total",
            "Runs that left the previous snapshot untouched."
        );
        describe_counter!("crawl_records_total", "Records written to snapshots.");
        describe_counter!(
            "crawl_dedup_total",
            "Records removed by normalization or deduplication."
        );
        describe_counter!("ingest_page_errors_total", "Failed upstream page fetches.");
        describe_counter!("cache_hot_hits_total", "Reads served by the hot tier.");
        describe_counter!(
            "cache_unavailable_total",
            "Hot-tier calls that failed and fell back."
        );
        describe_histogram!("crawl_duration_ms", "Crawl run wall time in milliseconds.");
        describe_gauge!(
            "crawl_last_success_ts",
            "Unix ts of the last snapshot replacement per source."
        );
    });
}

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"))
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Canonical form of a display string and of the event dedup key:
/// entities decoded, tags stripped, whitespace collapsed.
pub fn normalize_name(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let stripped = re_tags().replace_all(&decoded, "");
    re_ws().replace_all(&stripped, " ").trim().to_string()
}

/// `"20240101"` → `"2024.01.01"`. Longer all-digit stamps
/// (`"20240101093000"`) use their first eight digits. Anything else is
/// returned trimmed and unchanged.
pub fn format_compact_date(raw: &str) -> String {
    let s = raw.trim();
    if s.len() >= 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}.{}.{}", &s[..4], &s[4..6], &s[6..8])
    } else {
        s.to_string()
    }
}

/// `("20240101", "20241231")` → `"2024.01.01 ~ 2024.12.31"`.
pub fn format_period(start: &str, end: &str) -> String {
    let (s, e) = (format_compact_date(start), format_compact_date(end));
    match (s.is_empty(), e.is_empty()) {
        (true, true) => String::new(),
        (true, false) => format!("~ {e}"),
        (false, true) => format!("{s} ~"),
        _ => format!("{s} ~ {e}"),
    }
}

/// Make an upstream href/src absolute against `base`. Script pseudo-links
/// and blanks become the empty string.
pub fn resolve_url(base: &Url, raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() || s.starts_with('#') || s.to_ascii_lowercase().starts_with("javascript:") {
        return String::new();
    }
    if let Ok(abs) = Url::parse(s) {
        if matches!(abs.scheme(), "http" | "https") {
            return abs.to_string();
        }
        return String::new();
    }
    if let Some(rest) = s.strip_prefix("//") {
        return format!("https://{rest}");
    }
    base.join(s).map(|u| u.to_string()).unwrap_or_default()
}

/// Normalize every record, then drop blanks and duplicates (first wins).
/// Returns (kept, dropped_count).
pub fn normalize_dedup<T: Record>(raw: Vec<T>) -> (Vec<T>, usize) {
    let normalized = raw
        .into_iter()
        .map(|mut r| {
            r.normalize();
            r
        })
        .collect();
    dedup_by_key(normalized)
}

/// Result of one run of one source.
#[derive(Debug)]
pub enum RunOutcome {
    Updated { records: usize, duplicates: usize },
    /// The previous snapshot was left as it was.
    NoUpdate(CrawlError),
}

impl RunOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, RunOutcome::Updated { .. })
    }
}

/// Fetch → normalize → dedup → snapshot → hot tier, for one provider.
pub struct Pipeline<P> {
    provider: P,
    cache: Arc<CacheManager>,
}

impl<P: SourceProvider> Pipeline<P> {
    pub fn new(provider: P, cache: Arc<CacheManager>) -> Self {
        Self { provider, cache }
    }

    pub async fn run_once(&self) -> RunOutcome {
        ensure_metrics_described();
        let source = self.provider.name();
        let kind = self.provider.kind().as_str();
        let t0 = Instant::now();
        counter!("crawl_runs_total", "source" => source).increment(1);
        info!(target: "ingest", source, kind, "crawl started");

        let outcome = match self.provider.fetch_latest().await {
            Ok(raw) => self.publish(raw).await,
            Err(e) => RunOutcome::NoUpdate(e),
        };

        histogram!("crawl_duration_ms", "source" => source)
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        match &outcome {
            RunOutcome::Updated {
                records,
                duplicates,
            } => {
                counter!("crawl_records_total", "source" => source).increment(*records as u64);
                counter!("crawl_dedup_total", "source" => source).increment(*duplicates as u64);
                gauge!("crawl_last_success_ts", "source" => source)
                    .set(chrono::Utc::now().timestamp() as f64);
                info!(target: "ingest", source, records, duplicates, "crawl finished");
            }
            RunOutcome::NoUpdate(e) => {
                counter!("crawl_noop_total", "source" => source, "reason" => e.kind())
                    .increment(1);
                warn!(target: "ingest", source, error = %e, reason = e.kind(), "crawl produced no update; previous snapshot kept");
            }
        }
        outcome
    }

    async fn publish(&self, raw: Vec<P::Record>) -> RunOutcome {
        let (records, duplicates) = normalize_dedup(raw);
        if records.is_empty() {
            return RunOutcome::NoUpdate(CrawlError::EmptyResult);
        }
        let count = records.len();
        match self.cache.write(self.provider.name(), records).await {
            Ok(_) => RunOutcome::Updated {
                records: count,
                duplicates,
            },
            Err(e) => RunOutcome::NoUpdate(e),
        }
    }
}

/// Type-erased crawl routine, as held by the scheduler and the serve layer.
#[async_trait::async_trait]
pub trait CrawlJob: Send + Sync {
    fn source_id(&self) -> &'static str;
    async fn run(&self) -> RunOutcome;
    /// Current cached payload as served by `GET /api/{source}`.
    async fn read_json(&self) -> serde_json::Value;
}

#[async_trait::async_trait]
impl<P: SourceProvider + 'static> CrawlJob for Pipeline<P> {
    fn source_id(&self) -> &'static str {
        self.provider.name()
    }

    async fn run(&self) -> RunOutcome {
        self.run_once().await
    }

    async fn read_json(&self) -> serde_json::Value {
        let snap = self.cache.read::<P::Record>(self.provider.name()).await;
        serde_json::to_value(&snap)
            .unwrap_or_else(|_| serde_json::json!({ "lastUpdated": null, "data": [] }))
    }
}
