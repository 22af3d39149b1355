// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::ingest::rates::MissingIdentity;

const ENV_PATH: &str = "CRAWLER_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Directory holding `<source>_data.json` snapshots.
    pub snapshot_dir: PathBuf,
    /// Hot tier; absent means snapshot-only serving.
    pub redis_url: Option<String>,
    pub hot_ttl_secs: u64,
    pub http_timeout_secs: u64,
    pub browser: BrowserConfig,
    pub schedule: ScheduleConfig,
    pub rates: RatesConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("data"),
            redis_url: None,
            hot_ttl_secs: 3600,
            http_timeout_secs: 30,
            browser: BrowserConfig::default(),
            schedule: ScheduleConfig::default(),
            rates: RatesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Base URL of the remote headless browser service.
    pub endpoint: String,
    pub token: Option<String>,
    /// Wait after navigation before the DOM is read.
    pub settle_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".to_string(),
            token: None,
            settle_ms: 10_000,
            navigation_timeout_ms: 90_000,
        }
    }
}

/// Daily timetable in local civil time (`"HH:MM"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// First event source fires here; the rest follow every `step_minutes`.
    pub events_start: String,
    pub step_minutes: u32,
    pub rates_at: String,
    pub misfire_grace_secs: u64,
    /// Per-source fire times that replace the computed slot.
    pub overrides: BTreeMap<String, String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            events_start: "04:00".to_string(),
            step_minutes: 5,
            rates_at: "05:00".to_string(),
            misfire_grace_secs: 1800,
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    /// Simultaneous detail requests.
    pub concurrency: usize,
    /// Branches per detail wave.
    pub batch_size: usize,
    pub dispatch_delay_ms: u64,
    /// Term lengths kept, in months.
    pub terms: Vec<u32>,
    /// Products kept; empty keeps all.
    pub products: Vec<String>,
    pub missing_identity: MissingIdentity,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            batch_size: 100,
            dispatch_delay_ms: 50,
            terms: vec![6, 12, 24, 36],
            products: vec![
                "MG더뱅킹정기예금".to_string(),
                "MG더뱅킹정기적금".to_string(),
                "MG더뱅킹자유적금".to_string(),
            ],
            missing_identity: MissingIdentity::Skip,
        }
    }
}

impl CrawlerConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn hot_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_ttl_secs)
    }

    /// Replace unusable values with defaults.
    pub fn sanitize(mut self) -> Self {
        let d = CrawlerConfig::default();
        if self.http_timeout_secs == 0 {
            self.http_timeout_secs = d.http_timeout_secs;
        }
        if self.hot_ttl_secs == 0 {
            self.hot_ttl_secs = d.hot_ttl_secs;
        }
        if self.rates.concurrency == 0 {
            warn!(target: "config", "rates.concurrency = 0, using default");
            self.rates.concurrency = d.rates.concurrency;
        }
        if self.rates.batch_size == 0 {
            warn!(target: "config", "rates.batch_size = 0, using default");
            self.rates.batch_size = d.rates.batch_size;
        }
        if self.rates.terms.is_empty() {
            self.rates.terms = d.rates.terms;
        }
        self.rates.terms.sort_unstable();
        self.rates.terms.dedup();
        self.rates.products = clean_list(std::mem::take(&mut self.rates.products));
        if self.schedule.step_minutes == 0 {
            self.schedule.step_minutes = d.schedule.step_minutes;
        }
        if self.schedule.events_start.trim().is_empty() {
            self.schedule.events_start = d.schedule.events_start;
        }
        if self.schedule.rates_at.trim().is_empty() {
            self.schedule.rates_at = d.schedule.rates_at;
        }
        if self.redis_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            self.redis_url = None;
        }
        self
    }

    /// Environment overrides for deployment-specific values.
    pub fn apply_env(mut self) -> Self {
        if let Some(v) = env_nonempty("REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Some(v) = env_nonempty("SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("BROWSERLESS_URL") {
            self.browser.endpoint = v;
        }
        if let Some(v) = env_nonempty("BROWSERLESS_TOKEN") {
            self.browser.token = Some(v);
        }
        self
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<CrawlerConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading crawler config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing crawler config {}", path.display()))
}

/// Load config using env var + fallbacks, then env overrides:
/// 1) $CRAWLER_CONFIG_PATH
/// 2) config/crawler.toml
/// 3) config/crawler.json
/// 4) built-in defaults
pub fn load_config_default() -> Result<CrawlerConfig> {
    let base = if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("CRAWLER_CONFIG_PATH points to non-existent path"));
        }
        load_config_from(&pb)?
    } else if Path::new("config/crawler.toml").exists() {
        load_config_from(Path::new("config/crawler.toml"))?
    } else if Path::new("config/crawler.json").exists() {
        load_config_from(Path::new("config/crawler.json"))?
    } else {
        CrawlerConfig::default()
    };
    Ok(base.apply_env().sanitize())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<CrawlerConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    match toml::from_str::<CrawlerConfig>(s) {
        Ok(c) => Ok(c),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported crawler config format: {toml_err}")),
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn partial_toml_fills_defaults() {
        let toml = r#"
            snapshot_dir = "/var/lib/promo"
            [rates]
            concurrency = 8
            products = [" MG더뱅킹정기예금 ", "", "MG더뱅킹정기예금"]
            missing_identity = "reject_district"
            [schedule.overrides]
            kfcc = "05:30"
        "#;
        let cfg = parse_config(toml, "toml").unwrap().sanitize();
        assert_eq!(cfg.snapshot_dir, PathBuf::from("/var/lib/promo"));
        assert_eq!(cfg.rates.concurrency, 8);
        assert_eq!(cfg.rates.batch_size, 100);
        assert_eq!(cfg.rates.products, vec!["MG더뱅킹정기예금".to_string()]);
        assert_eq!(cfg.rates.missing_identity, MissingIdentity::RejectDistrict);
        assert_eq!(cfg.schedule.overrides["kfcc"], "05:30");
        assert_eq!(cfg.schedule.events_start, "04:00");
    }

    #[test]
    fn json_is_accepted() {
        let cfg = parse_config(r#"{"hot_ttl_secs": 60, "rates": {"terms": [36, 12, 12]}}"#, "json")
            .unwrap()
            .sanitize();
        assert_eq!(cfg.hot_ttl(), Duration::from_secs(60));
        assert_eq!(cfg.rates.terms, vec![12, 36]);
    }

    #[test]
    fn zero_limits_are_clamped() {
        let mut cfg = CrawlerConfig::default();
        cfg.rates.concurrency = 0;
        cfg.rates.batch_size = 0;
        cfg.schedule.step_minutes = 0;
        cfg.redis_url = Some("  ".into());
        let cfg = cfg.sanitize();
        assert_eq!(cfg.rates.concurrency, 20);
        assert_eq!(cfg.rates.batch_size, 100);
        assert_eq!(cfg.schedule.step_minutes, 5);
        assert_eq!(cfg.redis_url, None);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        for k in [ENV_PATH, "REDIS_URL", "SNAPSHOT_DIR", "BROWSERLESS_URL", "BROWSERLESS_TOKEN"] {
            env::remove_var(k);
        }

        // No files → defaults
        assert_eq!(load_config_default().unwrap(), CrawlerConfig::default());

        // Env path wins, env overrides apply on top
        let p = tmp.path().join("crawler.json");
        fs::write(&p, r#"{"snapshot_dir": "from-file", "redis_url": "redis://file:6379"}"#).unwrap();
        env::set_var(ENV_PATH, p.display().to_string());
        env::set_var("REDIS_URL", "redis://env:6379");
        let cfg = load_config_default().unwrap();
        assert_eq!(cfg.snapshot_dir, PathBuf::from("from-file"));
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://env:6379"));

        // Dangling env path is an error
        env::set_var(ENV_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(load_config_default().is_err());

        env::remove_var(ENV_PATH);
        env::remove_var("REDIS_URL");
        env::set_current_dir(&old).unwrap();
    }
}
