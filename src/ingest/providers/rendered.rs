//! Card issuers whose event boards only exist after client-side rendering.
//!
//! Each site is a [`SiteProfile`]: where the board lives and which DOM
//! heuristic pulls events out of the rendered markup. Extraction runs on a
//! parsed snapshot of the page, never on a live session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::histogram;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::{CrawlError, Result};
use crate::ingest::browser::{render_page, BrowserDriver, PageRequest, SessionProfile};
use crate::ingest::config::BrowserConfig;
use crate::ingest::http::MOBILE_USER_AGENT;
use crate::ingest::resolve_url;
use crate::ingest::types::{Event, SourceKind, SourceProvider};

/// How to read events out of a rendered board.
#[derive(Debug, Clone, Copy)]
pub enum Heuristic {
    /// List items with dedicated title/period children.
    CardList,
    /// Any `li` with an image whose text contains a date range; the range
    /// is the period and the rest of the text is the title.
    PeriodScan { dates: DateStyle, detail: DetailLink },
}

#[derive(Debug, Clone, Copy)]
pub enum DateStyle {
    /// `2024.01.01 ~ 2024.01.31`
    Padded,
    /// Also `2024. 1. 1 ~ 2024. 1. 31`
    Loose,
}

#[derive(Debug, Clone, Copy)]
pub enum DetailLink {
    /// The item's own anchor, falling back to the board for script links.
    Anchor,
    /// Id from a `GoDtlBrws('<id>')` click handler appended to `prefix`.
    /// Items without one are skipped.
    ClickHandlerId { prefix: &'static str },
}

#[derive(Debug)]
pub struct SiteProfile {
    pub id: &'static str,
    pub category: &'static str,
    pub list_url: &'static str,
    pub accent: &'static str,
    pub heuristic: Heuristic,
}

pub static KB: SiteProfile = SiteProfile {
    id: "kb",
    category: "KB국민카드",
    list_url: "https://m.kbcard.com/BON/DVIEW/MBBV0002",
    accent: "#ffffff",
    heuristic: Heuristic::CardList,
};

pub static SAMSUNG: SiteProfile = SiteProfile {
    id: "samsung",
    category: "삼성카드",
    list_url: "https://m.samsungcard.com/personal/event/ing/UHPPBE1401M0.jsp",
    accent: "#0056b3",
    heuristic: Heuristic::PeriodScan {
        dates: DateStyle::Padded,
        detail: DetailLink::ClickHandlerId {
            prefix: "https://www.samsungcard.com/personal/event/ing/UHPPBE1403M0.jsp?cms_id=",
        },
    },
};

pub static HYUNDAI: SiteProfile = SiteProfile {
    id: "hyundai",
    category: "현대카드",
    list_url: "https://www.hyundaicard.com/cpb/ev/CPBEV0101_01.hc",
    accent: "#000000",
    heuristic: Heuristic::PeriodScan {
        dates: DateStyle::Loose,
        detail: DetailLink::Anchor,
    },
};

pub static LOTTE: SiteProfile = SiteProfile {
    id: "lotte",
    category: "롯데카드",
    list_url: "https://m.lottecard.co.kr/app/LPBNFDA_V100.lc",
    accent: "#ed1c24",
    heuristic: Heuristic::PeriodScan {
        dates: DateStyle::Padded,
        detail: DetailLink::Anchor,
    },
};

const TITLE_MAX_CHARS: usize = 100;

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static CARD_ITEMS: Lazy<Selector> = Lazy::new(|| {
    sel(r#".event-list__item, li.event-list__item, a[href^="javascript:goDetail"], .list_type2 li, .event_list li"#)
});
static CARD_TITLE: Lazy<Selector> =
    Lazy::new(|| sel(".tit, dt, strong, .event-list__title, h2, h3, p"));
static CARD_PERIOD: Lazy<Selector> =
    Lazy::new(|| sel(".date, .period, dd, .event-list__date, .time"));
static LI: Lazy<Selector> = Lazy::new(|| sel("li"));
static IMG: Lazy<Selector> = Lazy::new(|| sel("img"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| sel("a"));

static PADDED_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}\.\d{2}\.\d{2}\s*~\s*\d{4}\.\d{2}\.\d{2}").expect("padded range regex")
});
static LOOSE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}\.\s*\d{1,2}\.\s*\d{1,2}\s*~\s*\d{4}\.\s*\d{1,2}\.\s*\d{1,2}")
        .expect("loose range regex")
});
static CLICK_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"GoDtlBrws\(['"](\d+)['"]"#).expect("click id regex"));

/// Visible text of an element, whitespace collapsed.
fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn has_nested_li(li: ElementRef<'_>) -> bool {
    li.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|e| e.value().name() == "li")
}

fn closest_li(el: ElementRef<'_>) -> ElementRef<'_> {
    if el.value().name() == "li" {
        return el;
    }
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "li")
        .unwrap_or(el)
}

/// Pull events out of a rendered board.
pub fn extract_events(site: &SiteProfile, html: &str) -> Result<Vec<Event>> {
    let page_url = Url::parse(site.list_url)
        .map_err(|e| CrawlError::Parse(format!("bad list url {}: {e}", site.list_url)))?;
    let doc = Html::parse_document(html);

    let out = match site.heuristic {
        Heuristic::CardList => card_list(site, &page_url, &doc),
        Heuristic::PeriodScan { dates, detail } => period_scan(site, &page_url, &doc, dates, detail),
    };
    Ok(out)
}

fn event(site: &SiteProfile, title: String, period: String, link: String, image: String) -> Event {
    Event {
        category: site.category.to_string(),
        event_name: title,
        period,
        link: if link.is_empty() {
            site.list_url.to_string()
        } else {
            link
        },
        image,
        accent_color: site.accent.to_string(),
    }
}

fn card_list(site: &SiteProfile, page_url: &Url, doc: &Html) -> Vec<Event> {
    doc.select(&CARD_ITEMS)
        .filter_map(|hit| {
            let item = closest_li(hit);
            let title = item.select(&CARD_TITLE).next().map(text_of)?;
            if title.chars().count() <= 2 {
                return None;
            }
            let period = item.select(&CARD_PERIOD).next().map(text_of).unwrap_or_default();
            let image = item
                .select(&IMG)
                .next()
                .and_then(|i| i.value().attr("src"))
                .map(|src| resolve_url(page_url, src))
                .unwrap_or_default();
            let link = item
                .select(&ANCHOR)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|href| resolve_url(page_url, href))
                .unwrap_or_default();
            Some(event(site, title, period, link, image))
        })
        .collect()
}

fn period_scan(
    site: &SiteProfile,
    page_url: &Url,
    doc: &Html,
    dates: DateStyle,
    detail: DetailLink,
) -> Vec<Event> {
    let range = match dates {
        DateStyle::Padded => &*PADDED_RANGE,
        DateStyle::Loose => &*LOOSE_RANGE,
    };

    doc.select(&LI)
        .filter(|li| !has_nested_li(*li))
        .filter_map(|li| {
            let img = li.select(&IMG).next()?;
            let anchor = li.select(&ANCHOR).next();

            let link = match detail {
                DetailLink::Anchor => anchor
                    .and_then(|a| a.value().attr("href"))
                    .map(|href| resolve_url(page_url, href))
                    .unwrap_or_default(),
                DetailLink::ClickHandlerId { prefix } => {
                    let onclick = anchor?.value().attr("onclick").unwrap_or("");
                    let id = CLICK_ID.captures(onclick)?.get(1)?.as_str();
                    format!("{prefix}{id}")
                }
            };

            let text = text_of(li);
            let period = range.find(&text)?.as_str().to_string();
            let title: String = text
                .replacen(&period, "", 1)
                .chars()
                .take(TITLE_MAX_CHARS)
                .collect();
            let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
            if title.is_empty() {
                return None;
            }

            let image = img
                .value()
                .attr("src")
                .map(|src| resolve_url(page_url, src))
                .unwrap_or_default();
            Some(event(site, title, period, link, image))
        })
        .collect()
}

/// Session timing shared by every rendered board.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub settle: Duration,
    pub navigation_timeout: Duration,
}

impl BrowserSettings {
    pub fn from_config(cfg: &BrowserConfig) -> Self {
        Self {
            settle: Duration::from_millis(cfg.settle_ms),
            navigation_timeout: Duration::from_millis(cfg.navigation_timeout_ms),
        }
    }
}

pub struct RenderedProvider {
    site: &'static SiteProfile,
    driver: Arc<dyn BrowserDriver>,
    settings: BrowserSettings,
}

impl RenderedProvider {
    pub fn new(
        site: &'static SiteProfile,
        driver: Arc<dyn BrowserDriver>,
        settings: BrowserSettings,
    ) -> Self {
        Self {
            site,
            driver,
            settings,
        }
    }
}

#[async_trait]
impl SourceProvider for RenderedProvider {
    type Record = Event;

    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        let profile = SessionProfile {
            user_agent: MOBILE_USER_AGENT.to_string(),
            navigation_timeout: self.settings.navigation_timeout,
        };
        let page = PageRequest {
            url: self.site.list_url.to_string(),
            settle: self.settings.settle,
        };
        let html = render_page(self.driver.as_ref(), &profile, &page).await?;

        let t0 = std::time::Instant::now();
        let events = extract_events(self.site, &html)?;
        histogram!("ingest_parse_ms", "source" => self.site.id)
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        debug!(target: "ingest", source = self.site.id, bytes = html.len(), events = events.len(), "rendered board parsed");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        self.site.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::BrowserRendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::browser::testing::ScriptedDriver;

    fn settings() -> BrowserSettings {
        BrowserSettings {
            settle: Duration::ZERO,
            navigation_timeout: Duration::from_secs(1),
        }
    }

    const KB_BOARD: &str = r#"<html><body><ul class="event_list">
        <li><a href="javascript:goDetail('1')"><img src="/img/kb1.jpg">
            <strong>  KB Pay 첫 결제 </strong><span class="date">2024.05.01 ~ 2024.05.31</span></a></li>
        <li><a href="/BON/DVIEW/MBBV0003?id=2"><img src="https://img.kbcard.com/2.jpg">
            <strong>주유 적립</strong><span class="date">2024.05.10 ~ 2024.06.10</span></a></li>
        <li><strong>가</strong></li>
    </ul></body></html>"#;

    #[test]
    fn card_list_reads_title_period_and_links() {
        let out = extract_events(&KB, KB_BOARD).unwrap();
        assert_eq!(out.len(), 3, "li plus its goDetail anchor both hit: {out:?}");
        assert_eq!(out[0].event_name, "KB Pay 첫 결제");
        assert_eq!(out[0].period, "2024.05.01 ~ 2024.05.31");
        assert_eq!(out[0].image, "https://m.kbcard.com/img/kb1.jpg");
        assert_eq!(out[0].link, KB.list_url);
        assert_eq!(out[0].category, "KB국민카드");

        let second = out.iter().find(|e| e.event_name == "주유 적립").unwrap();
        assert_eq!(second.link, "https://m.kbcard.com/BON/DVIEW/MBBV0003?id=2");
    }

    const SAMSUNG_BOARD: &str = r##"<ul>
        <li><a href="#" onclick="GoDtlBrws('30412', 'Y')"><img src="//static.samsungcard.com/e1.png">
            <p>여름 여행 캐시백</p><p>2024.07.01 ~ 2024.08.31</p></a></li>
        <li><a href="#"><img src="/e2.png"><p>아이디 없음</p><p>2024.07.01 ~ 2024.07.31</p></a></li>
        <li><a href="#" onclick="GoDtlBrws('1')"><img src="/e3.png"><p>기간 없음</p></a></li>
    </ul>"##;

    #[test]
    fn period_scan_requires_click_id_when_configured() {
        let out = extract_events(&SAMSUNG, SAMSUNG_BOARD).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_name, "여름 여행 캐시백");
        assert_eq!(out[0].period, "2024.07.01 ~ 2024.08.31");
        assert_eq!(
            out[0].link,
            "https://www.samsungcard.com/personal/event/ing/UHPPBE1403M0.jsp?cms_id=30412"
        );
        assert_eq!(out[0].image, "https://static.samsungcard.com/e1.png");
        assert_eq!(out[0].accent_color, "#0056b3");
    }

    #[test]
    fn loose_dates_and_script_links_fall_back_to_board() {
        let html = r#"<ul><li><a href="javascript:void(0)"><img src="/h.png">
            <span>the Green 멤버십</span><em>2024. 7. 1 ~ 2024. 7. 31</em></a></li></ul>"#;
        let out = extract_events(&HYUNDAI, html).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_name, "the Green 멤버십");
        assert_eq!(out[0].period, "2024. 7. 1 ~ 2024. 7. 31");
        assert_eq!(out[0].link, HYUNDAI.list_url);

        assert!(extract_events(&LOTTE, html).unwrap().is_empty());
    }

    #[test]
    fn container_items_are_skipped() {
        let html = r#"<ul><li><img src="/banner.png"><ul>
            <li><img src="/a.png"><a href="/ev?id=9">롯데 포인트 2배</a> 2024.06.01 ~ 2024.06.30</li>
        </ul></li></ul>"#;
        let out = extract_events(&LOTTE, html).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_name, "롯데 포인트 2배");
        assert_eq!(out[0].link, "https://m.lottecard.co.kr/ev?id=9");
    }

    #[tokio::test]
    async fn provider_closes_session_when_navigation_fails() {
        let driver = Arc::new(ScriptedDriver::failing());
        let provider = RenderedProvider::new(&SAMSUNG, driver.clone(), settings());
        let err = provider.fetch_latest().await.unwrap_err();
        assert!(matches!(err, CrawlError::Browser(_)));
        assert_eq!((driver.launched(), driver.closed()), (1, 1));
    }

    #[tokio::test]
    async fn provider_renders_and_parses() {
        let driver = Arc::new(ScriptedDriver::serving(SAMSUNG_BOARD));
        let provider = RenderedProvider::new(&SAMSUNG, driver.clone(), settings());
        let out = provider.fetch_latest().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(driver.closed(), 1);
    }
}
