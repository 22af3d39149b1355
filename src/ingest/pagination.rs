//! Shared page loop for paginated upstreams.

use std::future::Future;

use metrics::counter;
use tracing::{debug, warn};

use crate::error::{CrawlError, Result};

/// One parsed page.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total page count when the upstream declares one.
    pub total_pages: Option<u32>,
    /// Upstream says there is nothing after this page.
    pub last: bool,
}

impl<T> Page<T> {
    pub fn items(items: Vec<T>) -> Self {
        Self {
            items,
            total_pages: None,
            last: false,
        }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            total_pages: None,
            last: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PagePolicy {
    pub first_page: u32,
    pub max_pages: u32,
    /// Consecutive misses tolerated before giving up.
    pub miss_budget: u32,
    /// Count a failed page as a miss and move on instead of ending the walk.
    /// Only for upstreams whose pages are independent of each other.
    pub skip_failed: bool,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            first_page: 1,
            max_pages: 40,
            miss_budget: 10,
            skip_failed: false,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PageStats {
    pub pages_ok: u32,
    pub pages_failed: u32,
    pub pages_empty: u32,
}

/// Walk pages until completion, the declared total, `max_pages`, a failed
/// page, or the miss budget runs out. Items gathered before a stop are kept.
pub async fn collect_pages<T, F, Fut>(
    source: &'static str,
    policy: PagePolicy,
    mut fetch: F,
) -> (Vec<T>, PageStats)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut out = Vec::new();
    let mut stats = PageStats::default();
    let mut misses = 0u32;
    let last_page = policy.first_page.saturating_add(policy.max_pages.saturating_sub(1));

    for page in policy.first_page..=last_page {
        match fetch(page).await {
            Ok(p) => {
                let empty = p.items.is_empty();
                if empty {
                    stats.pages_empty += 1;
                } else {
                    stats.pages_ok += 1;
                    misses = 0;
                    out.extend(p.items);
                }
                if p.last {
                    debug!(target: "ingest", source, page, "upstream signalled last page");
                    break;
                }
                if let Some(total) = p.total_pages {
                    if page >= total {
                        break;
                    }
                }
                if empty {
                    misses += 1;
                }
            }
            Err(e) => {
                stats.pages_failed += 1;
                counter!("ingest_page_errors_total", "source" => source).increment(1);
                if !policy.skip_failed {
                    warn!(target: "ingest", source, page, error = %e, kind = e.kind(), "page fetch failed, ending walk");
                    break;
                }
                warn!(target: "ingest", source, page, error = %e, kind = e.kind(), "page fetch failed");
                misses += 1;
            }
        }
        if misses >= policy.miss_budget {
            warn!(target: "ingest", source, page, misses, "miss budget exhausted, stopping early");
            break;
        }
    }

    (out, stats)
}

/// Turn a page walk into an adapter result. Gathered items always win; a
/// walk with nothing gathered and only failed pages reports the failure.
pub fn finish_pages<T>(source: &'static str, items: Vec<T>, stats: &PageStats) -> Result<Vec<T>> {
    debug!(
        target: "ingest",
        source,
        ok = stats.pages_ok,
        failed = stats.pages_failed,
        empty = stats.pages_empty,
        "page walk finished"
    );
    if items.is_empty() && stats.pages_failed > 0 && stats.pages_ok == 0 {
        return Err(CrawlError::Network(format!(
            "{} page fetch(es) failed, nothing collected",
            stats.pages_failed
        )));
    }
    Ok(items)
}
