//! Credit-union deposit rates: a two-phase crawl over the branch locator.
//!
//! Discovery walks every district of the fixed taxonomy concurrently and
//! collects branches; the detail phase fetches two rate categories per
//! unique branch under a semaphore, in fixed-size waves, with a small delay
//! before each request.

pub mod parse;
pub mod regions;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{CrawlError, Result};
use crate::ingest::config::RatesConfig;
use crate::ingest::http::DESKTOP_USER_AGENT;
use crate::ingest::types::{RateRecord, SourceKind, SourceProvider};

use self::parse::{parse_listing, parse_rate_table, RateTable};
use self::regions::{all_districts, District};

const LOCATOR: &str = "https://www.kfcc.co.kr/map";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "rates_district_failures_total",
            "Discovery requests that failed; the district contributes nothing."
        );
        describe_counter!(
            "rates_missing_identity_total",
            "Listing rows without the branch code attribute."
        );
        describe_counter!(
            "rates_detail_failures_total",
            "Branches whose rate pages could not be fetched."
        );
        describe_counter!(
            "rates_empty_dropped_total",
            "Branches dropped for having no whitelisted rates."
        );
        describe_histogram!("rates_phase_ms", "Wall time per crawl phase.");
    });
}

/// Branch found during discovery. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Institution {
    pub code: String,
    pub name: String,
    pub district: District,
    pub address: String,
}

/// What to do with listing rows that lack the identity attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIdentity {
    /// Drop the row, keep the rest of the district.
    #[default]
    Skip,
    /// Treat the whole district listing as untrustworthy.
    RejectDistrict,
}

/// Rate categories offered per branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCategory {
    /// Fixed-term deposits.
    Deposit,
    /// Installment and free savings.
    Savings,
}

impl RateCategory {
    pub fn gubuncode(&self) -> &'static str {
        match self {
            RateCategory::Deposit => "13",
            RateCategory::Savings => "14",
        }
    }
}

/// Raw page access to the branch locator.
#[async_trait]
pub trait RateUpstream: Send + Sync {
    async fn district_listing(&self, district: &District) -> Result<String>;
    async fn product_rates(&self, code: &str, category: RateCategory) -> Result<String>;
}

pub struct KfccHttp {
    client: reqwest::Client,
}

impl KfccHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DESKTOP_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    async fn get_text(&self, req: reqwest::RequestBuilder) -> Result<String> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CrawlError::Network(format!(
                "status {} from {}",
                status.as_u16(),
                resp.url()
            )));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl RateUpstream for KfccHttp {
    async fn district_listing(&self, district: &District) -> Result<String> {
        let req = self.client.get(format!("{LOCATOR}/list.do")).query(&[
            ("r1", district.province.as_str()),
            ("r2", district.name.as_str()),
        ]);
        self.get_text(req).await
    }

    async fn product_rates(&self, code: &str, category: RateCategory) -> Result<String> {
        let req = self
            .client
            .get(format!("{LOCATOR}/goods_19.do"))
            .query(&[("OPEN_TRMID", code), ("gubuncode", category.gubuncode())]);
        self.get_text(req).await
    }
}

pub struct RateCrawler {
    upstream: Arc<dyn RateUpstream>,
    cfg: RatesConfig,
    districts: Vec<District>,
}

impl RateCrawler {
    pub fn new(upstream: Arc<dyn RateUpstream>, cfg: RatesConfig) -> Self {
        Self {
            upstream,
            cfg,
            districts: all_districts(),
        }
    }

    /// Restrict discovery to `districts` instead of the full taxonomy.
    pub fn with_districts(mut self, districts: Vec<District>) -> Self {
        self.districts = districts;
        self
    }

    /// Phase 1: every district at once, flattened, first listing of each
    /// branch code wins.
    pub async fn discover(&self) -> Vec<Institution> {
        ensure_metrics_described();
        let t0 = Instant::now();

        let listings = join_all(self.districts.iter().map(|d| self.discover_district(d))).await;

        let mut seen = HashSet::new();
        let unique: Vec<Institution> = listings
            .into_iter()
            .flatten()
            .filter(|inst| seen.insert(inst.code.clone()))
            .collect();

        histogram!("rates_phase_ms", "phase" => "discovery")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        info!(target: "rates", districts = self.districts.len(), institutions = unique.len(), "discovery finished");
        unique
    }

    async fn discover_district(&self, district: &District) -> Vec<Institution> {
        let html = match self.upstream.district_listing(district).await {
            Ok(h) => h,
            Err(e) => {
                counter!("rates_district_failures_total").increment(1);
                warn!(target: "rates", district = %district.label(), error = %e, "district listing failed");
                return Vec::new();
            }
        };

        let listing = parse_listing(&html, district);
        if listing.missing_identity > 0 {
            counter!("rates_missing_identity_total").increment(listing.missing_identity as u64);
            match self.cfg.missing_identity {
                MissingIdentity::Skip => {
                    debug!(target: "rates", district = %district.label(), rows = listing.missing_identity, "rows without branch code skipped");
                }
                MissingIdentity::RejectDistrict => {
                    warn!(target: "rates", district = %district.label(), rows = listing.missing_identity, "district rejected: rows without branch code");
                    return Vec::new();
                }
            }
        }
        listing.institutions
    }

    /// Phase 2: two category fetches per branch. Branches that fail or end
    /// up with no rates are left out.
    pub async fn fetch_details(&self, institutions: &[Institution]) -> Vec<RateRecord> {
        ensure_metrics_described();
        let t0 = Instant::now();
        let permits = Arc::new(Semaphore::new(self.cfg.concurrency.max(1)));
        let delay = Duration::from_millis(self.cfg.dispatch_delay_ms);
        let mut out = Vec::new();

        for (wave, batch) in institutions.chunks(self.cfg.batch_size.max(1)).enumerate() {
            let results = join_all(batch.iter().map(|inst| {
                let permits = permits.clone();
                async move {
                    let _permit = permits.acquire_owned().await.ok()?;
                    tokio::time::sleep(delay).await;
                    self.fetch_one(inst).await
                }
            }))
            .await;

            let before = out.len();
            out.extend(results.into_iter().flatten());
            debug!(target: "rates", wave, batch = batch.len(), kept = out.len() - before, "detail wave finished");
        }

        histogram!("rates_phase_ms", "phase" => "detail")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        info!(target: "rates", institutions = institutions.len(), records = out.len(), "detail phase finished");
        out
    }

    async fn fetch_one(&self, inst: &Institution) -> Option<RateRecord> {
        let deposit = self.category_or_empty(inst, RateCategory::Deposit).await;
        let savings = self.category_or_empty(inst, RateCategory::Savings).await;

        let mut rates: BTreeMap<String, BTreeMap<String, String>> = deposit.rates;
        for (product, terms) in savings.rates {
            let entry = rates.entry(product).or_default();
            for (term, rate) in terms {
                entry.entry(term).or_insert(rate);
            }
        }
        if rates.is_empty() {
            counter!("rates_empty_dropped_total").increment(1);
            debug!(target: "rates", code = %inst.code, "no whitelisted rates; branch dropped");
            return None;
        }

        Some(RateRecord {
            institution_code: inst.code.clone(),
            institution_name: inst.name.clone(),
            location: inst.district.label(),
            rates,
            as_of_date: deposit.as_of.or(savings.as_of),
        })
    }

    async fn category(&self, inst: &Institution, category: RateCategory) -> Result<RateTable> {
        let html = self.upstream.product_rates(&inst.code, category).await?;
        Ok(parse_rate_table(&html, &self.cfg.products, &self.cfg.terms))
    }

    /// A failed category contributes nothing; the other one still counts.
    async fn category_or_empty(&self, inst: &Institution, category: RateCategory) -> RateTable {
        match self.category(inst, category).await {
            Ok(table) => table,
            Err(e) => {
                counter!("rates_detail_failures_total").increment(1);
                warn!(target: "rates", code = %inst.code, name = %inst.name, category = category.gubuncode(), error = %e, "rate page failed");
                RateTable::default()
            }
        }
    }

    /// Full cycle: discovery, then detail.
    pub async fn crawl(&self) -> Vec<RateRecord> {
        let institutions = self.discover().await;
        self.fetch_details(&institutions).await
    }
}

/// The rate crawl as a pipeline source.
pub struct KfccProvider {
    crawler: RateCrawler,
}

impl KfccProvider {
    pub fn new(crawler: RateCrawler) -> Self {
        Self { crawler }
    }

    pub fn from_config(cfg: &RatesConfig, timeout: Duration) -> Result<Self> {
        let upstream = Arc::new(KfccHttp::new(timeout)?);
        Ok(Self::new(RateCrawler::new(upstream, cfg.clone())))
    }
}

#[async_trait]
impl SourceProvider for KfccProvider {
    type Record = RateRecord;

    async fn fetch_latest(&self) -> Result<Vec<RateRecord>> {
        Ok(self.crawler.crawl().await)
    }

    fn name(&self) -> &'static str {
        "kfcc"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Hierarchical
    }
}
