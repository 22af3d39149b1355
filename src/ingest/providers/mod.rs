pub mod bc;
pub mod hana;
pub mod rendered;
pub mod shinhan;
pub mod woori;

use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::context::ServiceContext;
use crate::ingest::http::{legacy_tls_client, lenient_client, standard_client, Transport};
use crate::ingest::rates::KfccProvider;
use crate::ingest::{CrawlJob, Pipeline};

/// Event sources in timetable order.
pub const EVENT_SOURCES: [&str; 9] = [
    "shinhan",
    "shinhan-myshop",
    "kb",
    "hana",
    "woori",
    "bc",
    "samsung",
    "hyundai",
    "lotte",
];

pub const RATE_SOURCE: &str = "kfcc";

/// Every job the service knows, in timetable order.
pub fn default_jobs(ctx: &ServiceContext) -> anyhow::Result<Vec<Arc<dyn CrawlJob>>> {
    let cfg = ctx.config();
    let timeout = cfg.http_timeout();
    let cache = ctx.cache();

    let standard = Transport::Http(standard_client(timeout).context("building http client")?);
    let lenient = Transport::Http(lenient_client(timeout).context("building lenient client")?);
    let legacy = Transport::Http(legacy_tls_client(timeout).context("building legacy tls client")?);
    let browser = rendered::BrowserSettings::from_config(&cfg.browser);

    let mut jobs: Vec<Arc<dyn CrawlJob>> = vec![
        Arc::new(Pipeline::new(shinhan::ShinhanProvider::new(lenient.clone()), cache.clone())),
        Arc::new(Pipeline::new(shinhan::MyShopProvider::new(standard.clone()), cache.clone())),
    ];
    jobs.push(Arc::new(Pipeline::new(
        rendered::RenderedProvider::new(&rendered::KB, ctx.browser(), browser.clone()),
        cache.clone(),
    )));
    jobs.push(Arc::new(Pipeline::new(hana::HanaProvider::new(legacy), cache.clone())));
    jobs.push(Arc::new(Pipeline::new(woori::WooriProvider::new(standard), cache.clone())));
    jobs.push(Arc::new(Pipeline::new(bc::BcProvider::new(lenient), cache.clone())));
    for site in [&rendered::SAMSUNG, &rendered::HYUNDAI, &rendered::LOTTE] {
        jobs.push(Arc::new(Pipeline::new(
            rendered::RenderedProvider::new(site, ctx.browser(), browser.clone()),
            cache.clone(),
        )));
    }
    jobs.push(Arc::new(Pipeline::new(
        KfccProvider::from_config(&cfg.rates, timeout).context("building kfcc crawler")?,
        cache,
    )));
    Ok(jobs)
}

/// Upstream JSON is loose about scalars: accept strings, numbers and null
/// where a string is expected.
pub(crate) fn lenient_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(Value::deserialize(d)?))
}

/// Column of loose scalars, as used by grid-shaped responses.
pub(crate) fn lenient_strings<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items.into_iter().map(scalar_text).collect(),
        Value::Null => Vec::new(),
        other => vec![scalar_text(other)],
    })
}

fn scalar_text(v: Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
