//! Process-wide handles, built once at startup and passed down explicitly.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{CacheManager, HotStore, RedisHotStore, SnapshotStore};
use crate::ingest::browser::{BrowserDriver, BrowserlessDriver};
use crate::ingest::config::CrawlerConfig;

#[derive(Clone)]
pub struct ServiceContext {
    config: Arc<CrawlerConfig>,
    cache: Arc<CacheManager>,
    browser: Arc<dyn BrowserDriver>,
}

impl ServiceContext {
    pub fn new(
        config: CrawlerConfig,
        cache: Arc<CacheManager>,
        browser: Arc<dyn BrowserDriver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            browser,
        }
    }

    /// Connect the hot tier and the browser service described by `config`.
    /// An unreachable Redis is not fatal: the service runs snapshot-only.
    pub async fn from_config(config: CrawlerConfig) -> Self {
        let hot: Option<Arc<dyn HotStore>> = match config.redis_url.as_deref() {
            Some(url) => match RedisHotStore::connect(url).await {
                Ok(store) => {
                    info!(target: "cache", "hot tier connected");
                    Some(Arc::new(store) as Arc<dyn HotStore>)
                }
                Err(e) => {
                    warn!(target: "cache", error = %e, "hot tier unreachable; serving from snapshots only");
                    None
                }
            },
            None => {
                info!(target: "cache", "no REDIS_URL; serving from snapshots only");
                None
            }
        };

        let snapshots = SnapshotStore::new(config.snapshot_dir.clone());
        let cache = Arc::new(CacheManager::new(hot, snapshots, config.hot_ttl()));
        let browser: Arc<dyn BrowserDriver> = Arc::new(BrowserlessDriver::new(
            &config.browser.endpoint,
            config.browser.token.as_deref(),
        ));
        Self::new(config, cache, browser)
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn cache(&self) -> Arc<CacheManager> {
        self.cache.clone()
    }

    pub fn browser(&self) -> Arc<dyn BrowserDriver> {
        self.browser.clone()
    }
}
