use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrawlError>;

/// Failure kinds inside the crawl pipeline.
///
/// Stage functions return these; only `Pipeline::run_once` collapses them
/// into a no-op outcome.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Timeout, refused connection or non-success status.
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    /// The whole run produced zero records.
    #[error("upstream produced no records")]
    EmptyResult,

    #[error("hot store unavailable: {0}")]
    CacheUnavailable(String),

    #[error("snapshot write failed: {0}")]
    SnapshotWrite(String),

    #[error("browser session error: {0}")]
    Browser(String),
}

impl CrawlError {
    /// Short label used as a metrics/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            CrawlError::Network(_) => "network",
            CrawlError::Parse(_) => "parse",
            CrawlError::EmptyResult => "empty",
            CrawlError::CacheUnavailable(_) => "cache_unavailable",
            CrawlError::SnapshotWrite(_) => "snapshot_write",
            CrawlError::Browser(_) => "browser",
        }
    }
}

impl From<reqwest::Error> for CrawlError {
    fn from(err: reqwest::Error) -> Self {
        CrawlError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(err: serde_json::Error) -> Self {
        CrawlError::Parse(err.to_string())
    }
}

impl From<redis::RedisError> for CrawlError {
    fn from(err: redis::RedisError) -> Self {
        CrawlError::CacheUnavailable(err.to_string())
    }
}
