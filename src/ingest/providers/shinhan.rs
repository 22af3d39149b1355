use async_trait::async_trait;
use metrics::histogram;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{lenient_string, lenient_strings};
use crate::error::{CrawlError, Result};
use crate::ingest::http::{Transport, MOBILE_USER_AGENT};
use crate::ingest::pagination::{collect_pages, finish_pages, Page, PagePolicy};
use crate::ingest::types::{default_accent, Event, SourceKind, SourceProvider};
use crate::ingest::{format_period, resolve_url};

const BASE: &str = "https://www.shinhancard.com";
const CATEGORY_FILES: u32 = 9;
const MYSHOP_PAGE: &str = "https://www.shinhancard.com/mob/MOBFM501N/MOBFM501R31.shc";
const MYSHOP_API: &str = "https://www.shinhancard.com/mob/MOBFM501N/MOBFM501R21.ajax";

static BASE_URL: Lazy<Url> = Lazy::new(|| Url::parse(BASE).expect("shinhan base url"));

#[derive(Debug, Default, Deserialize)]
struct CategoryFile {
    #[serde(default)]
    root: CategoryRoot,
}

#[derive(Debug, Default, Deserialize)]
struct CategoryRoot {
    #[serde(default)]
    evnlist: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    mob_wb_evt_nm: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evt_img_sl_til_nm: String,
    #[serde(default, deserialize_with = "lenient_string")]
    mob_wb_evt_std: String,
    #[serde(default, deserialize_with = "lenient_string")]
    mob_wb_evt_edd: String,
    #[serde(default, deserialize_with = "lenient_string")]
    hpg_evt_ctg_img_url_ar: String,
    #[serde(default, deserialize_with = "lenient_string")]
    hpg_evt_dl_pge_url_ar: String,
    #[serde(default, deserialize_with = "lenient_string")]
    hpg_evt_kind_nm: String,
}

/// Card events, published as nine static per-category JSON files.
pub struct ShinhanProvider {
    transport: Transport,
}

impl ShinhanProvider {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub(crate) fn parse_category(body: &str) -> Result<Vec<Event>> {
        let t0 = std::time::Instant::now();
        let file: CategoryFile = serde_json::from_str(body)?;

        let out: Vec<Event> = file
            .root
            .evnlist
            .into_iter()
            .filter_map(|ev| {
                let name = ev.mob_wb_evt_nm.trim();
                let sub = ev.evt_img_sl_til_nm.trim();
                let title = if sub.is_empty() {
                    name.to_string()
                } else {
                    format!("{name} ({sub})")
                };
                if title.is_empty() {
                    return None;
                }
                let category = match ev.hpg_evt_kind_nm.trim() {
                    "" => "이벤트".to_string(),
                    k => k.to_string(),
                };
                Some(Event {
                    category,
                    event_name: title,
                    period: format_period(&ev.mob_wb_evt_std, &ev.mob_wb_evt_edd),
                    link: resolve_url(&BASE_URL, &ev.hpg_evt_dl_pge_url_ar),
                    image: resolve_url(&BASE_URL, &ev.hpg_evt_ctg_img_url_ar),
                    accent_color: default_accent(),
                })
            })
            .collect();

        histogram!("ingest_parse_ms", "source" => "shinhan")
            .record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for ShinhanProvider {
    type Record = Event;

    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        let transport = &self.transport;
        // Category files are independent; one missing file never stops the rest.
        let policy = PagePolicy {
            first_page: 1,
            max_pages: CATEGORY_FILES,
            miss_budget: CATEGORY_FILES,
            skip_failed: true,
        };
        let (events, stats) = collect_pages(self.name(), policy, move |i| async move {
            let body = transport
                .fetch(i, |c| {
                    c.get(format!("{BASE}/logic/json/evnPgsList0{i}.json"))
                        .header("Referer", BASE)
                })
                .await?;
            Self::parse_category(&body).map(Page::items)
        })
        .await;
        finish_pages(self.name(), events, &stats)
    }

    fn name(&self) -> &'static str {
        "shinhan"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::StructuredApi
    }
}

#[derive(Debug, Deserialize)]
struct MyShopResponse {
    #[serde(default)]
    mbw_message: Value,
}

/// Columnar grid: one array per field, rows share an index.
#[derive(Debug, Default, Deserialize)]
struct MyShopGrid {
    #[serde(rename = "SSG_NM", default, deserialize_with = "lenient_strings")]
    shop: Vec<String>,
    #[serde(rename = "MCT_CRD_SV_RG_TT", default, deserialize_with = "lenient_strings")]
    benefit: Vec<String>,
    #[serde(rename = "MYH_CUP_IMG_URL_AR", default, deserialize_with = "lenient_strings")]
    image: Vec<String>,
    #[serde(rename = "MYH_SRM_ONL_SPP_MLL_URL_AR", default, deserialize_with = "lenient_strings")]
    link: Vec<String>,
    #[serde(rename = "MCT_PLF_MO_EDD", default, deserialize_with = "lenient_strings")]
    end: Vec<String>,
}

/// Merchant coupons from the "My Shop" coupon board.
pub struct MyShopProvider {
    transport: Transport,
}

impl MyShopProvider {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub(crate) fn parse_grid(body: &str) -> Result<Vec<Event>> {
        let resp: MyShopResponse = serde_json::from_str(body)?;
        let grid_value = match resp.mbw_message {
            Value::Object(mut msg) => msg.remove("GRID1").unwrap_or(Value::Null),
            other => {
                return Err(CrawlError::Parse(format!(
                    "mbw_message is not an object: {other}"
                )))
            }
        };
        let grid: MyShopGrid = if grid_value.is_null() {
            MyShopGrid::default()
        } else {
            serde_json::from_value(grid_value)?
        };

        let out = grid
            .shop
            .iter()
            .enumerate()
            .map(|(i, shop)| {
                let link = match resolve_url(&BASE_URL, cell(&grid.link, i)) {
                    l if l.is_empty() => MYSHOP_PAGE.to_string(),
                    l => l,
                };
                Event {
                    category: "마이샵 쿠폰".to_string(),
                    event_name: format!("[{shop}] {}", cell(&grid.benefit, i))
                        .trim()
                        .to_string(),
                    period: format_period("", cell(&grid.end, i)),
                    link,
                    image: resolve_url(&BASE_URL, cell(&grid.image, i)),
                    accent_color: default_accent(),
                }
            })
            .collect();
        Ok(out)
    }
}

fn cell(col: &[String], i: usize) -> &str {
    col.get(i).map(String::as_str).unwrap_or("")
}

#[async_trait]
impl SourceProvider for MyShopProvider {
    type Record = Event;

    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        // The coupon API answers only inside a session opened by the page.
        self.transport
            .touch(|c| c.get(MYSHOP_PAGE).header("User-Agent", MOBILE_USER_AGENT))
            .await?;

        let body = self
            .transport
            .fetch(1, |c| {
                c.post(MYSHOP_API)
                    .header("Content-Type", "application/json")
                    .header("X-Requested-With", "XMLHttpRequest")
                    .header("Referer", MYSHOP_PAGE)
                    .header("Origin", BASE)
                    .header("Accept", "application/json, text/javascript, */*; q=0.01")
                    .header("User-Agent", MOBILE_USER_AGENT)
                    .json(&serde_json::json!({ "QY_CCD": "T" }))
            })
            .await?;
        let coupons = Self::parse_grid(&body)?;
        debug!(target: "ingest", source = self.name(), coupons = coupons.len(), "coupon grid parsed");
        Ok(coupons)
    }

    fn name(&self) -> &'static str {
        "shinhan-myshop"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::StructuredApi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATEGORY: &str = r#"{"root":{"evnlist":[
        {"mobWbEvtNm":"여름 캐시백","evtImgSlTilNm":"최대 5만원","mobWbEvtStd":"20240601","mobWbEvtEdd":"20240831",
         "hpgEvtCtgImgUrlAr":"/img/ev1.png","hpgEvtDlPgeUrlAr":"/pconts/html/ev1.html","hpgEvtKindNm":"쇼핑"},
        {"mobWbEvtNm":"무이자 할부","evtImgSlTilNm":null,"mobWbEvtStd":"20240101","mobWbEvtEdd":"20241231"},
        {"mobWbEvtNm":"  ","evtImgSlTilNm":""}
    ]}}"#;

    #[test]
    fn category_file_maps_to_events() {
        let out = ShinhanProvider::parse_category(CATEGORY).unwrap();
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].event_name, "여름 캐시백 (최대 5만원)");
        assert_eq!(out[0].category, "쇼핑");
        assert_eq!(out[0].period, "2024.06.01 ~ 2024.08.31");
        assert_eq!(out[0].image, "https://www.shinhancard.com/img/ev1.png");
        assert_eq!(out[0].link, "https://www.shinhancard.com/pconts/html/ev1.html");

        assert_eq!(out[1].event_name, "무이자 할부");
        assert_eq!(out[1].category, "이벤트");
        assert_eq!(out[1].link, "");
    }

    #[tokio::test]
    async fn missing_category_files_do_not_stop_the_walk() {
        let provider = ShinhanProvider::new(Transport::fixture([(1, CATEGORY), (9, CATEGORY)]));
        let out = provider.fetch_latest().await.unwrap();
        assert_eq!(out.len(), 4);
    }

    #[tokio::test]
    async fn no_category_files_is_an_error() {
        let provider = ShinhanProvider::new(Transport::fixture(Vec::<(u32, String)>::new()));
        assert!(provider.fetch_latest().await.is_err());
    }

    #[test]
    fn coupon_grid_is_read_by_row_index() {
        let body = r#"{"mbw_message":{"GRID1":{
            "SSG_NM":["카페A","마트B"],
            "MCT_CRD_SV_RG_TT":["10% 할인","3천원 청구할인"],
            "MYH_CUP_IMG_URL_AR":["/cup/a.png"],
            "MYH_SRM_ONL_SPP_MLL_URL_AR":["https://shop.example/b"],
            "MCT_PLF_MO_EDD":["20240930","20241031"]
        }}}"#;
        let out = MyShopProvider::parse_grid(body).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].event_name, "[카페A] 10% 할인");
        assert_eq!(out[0].period, "~ 2024.09.30");
        assert_eq!(out[0].image, "https://www.shinhancard.com/cup/a.png");
        assert_eq!(out[0].link, "https://shop.example/b");
        assert_eq!(out[0].category, "마이샵 쿠폰");
        assert_eq!(out[1].image, "");
        assert_eq!(out[1].link, MYSHOP_PAGE);
    }

    #[test]
    fn non_object_message_is_a_parse_error() {
        let err = MyShopProvider::parse_grid(r#"{"mbw_message":"세션이 만료되었습니다"}"#).unwrap_err();
        assert!(matches!(err, CrawlError::Parse(_)));
    }
}
