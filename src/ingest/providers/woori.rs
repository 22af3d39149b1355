use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use url::Url;

use super::lenient_string;
use crate::error::Result;
use crate::ingest::http::{Transport, MOBILE_USER_AGENT};
use crate::ingest::pagination::{collect_pages, finish_pages, Page, PagePolicy};
use crate::ingest::types::{Event, SourceKind, SourceProvider};
use crate::ingest::{format_period, resolve_url};

const BASE: &str = "https://m.wooricard.com";
const API: &str = "https://m.wooricard.com/dcmw/yh1/bnf/bnf02/prgevnt/getPrgEvntList.pwkjson";
const LIST_PAGE: &str = "https://m.wooricard.com/dcmw/yh1/bnf/bnf02/prgevnt/M1BNF202S00.do";
const DETAIL: &str = "https://pc.wooricard.com/dcpc/yh1/bnf/bnf02/prgevnt/H1BNF202S01.do";
const PAGE_SIZE: u32 = 20;
const ACCENT: &str = "#007bc3";

static BASE_URL: Lazy<Url> = Lazy::new(|| Url::parse(BASE).expect("woori base url"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    prg_evnt_list: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    card_evnt_nm: String,
    #[serde(default, deserialize_with = "lenient_string")]
    mbl_doc_titl_txt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evnt_sdt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evnt_edt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    file_cours_web: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evnt_srno: String,
}

pub struct WooriProvider {
    transport: Transport,
}

impl WooriProvider {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    fn request_body(page: u32) -> serde_json::Value {
        serde_json::json!({
            "bnf02PrgEvntVo": {
                "evntCtgrNo": "",
                "searchKwrd": "",
                "sortOrd": "orderNew",
                "pageIndex": page.to_string(),
                "pageSize": PAGE_SIZE.to_string(),
                "evntItgCfcd": "",
            }
        })
    }

    pub(crate) fn parse_page(body: &str) -> Result<Page<Event>> {
        let resp: ListResponse = serde_json::from_str(body)?;
        if resp.prg_evnt_list.is_empty() {
            return Ok(Page::last(Vec::new()));
        }

        let items = resp
            .prg_evnt_list
            .into_iter()
            .map(|ev| {
                let title = if ev.card_evnt_nm.trim().is_empty() {
                    ev.mbl_doc_titl_txt
                } else {
                    ev.card_evnt_nm
                };
                let link = match ev.evnt_srno.trim() {
                    "" => LIST_PAGE.to_string(),
                    srno => format!("{DETAIL}?evntSrno={srno}"),
                };
                Event {
                    category: "우리카드".to_string(),
                    event_name: title,
                    period: format_period(&ev.evnt_sdt, &ev.evnt_edt),
                    link,
                    image: resolve_url(&BASE_URL, &ev.file_cours_web),
                    accent_color: ACCENT.to_string(),
                }
            })
            .collect();
        Ok(Page::items(items))
    }
}

#[async_trait]
impl SourceProvider for WooriProvider {
    type Record = Event;

    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        let transport = &self.transport;
        let policy = PagePolicy {
            max_pages: 19,
            ..PagePolicy::default()
        };
        let (events, stats) = collect_pages(self.name(), policy, move |page| async move {
            let body = transport
                .fetch(page, |c| {
                    c.post(API)
                        .header("User-Agent", MOBILE_USER_AGENT)
                        .json(&Self::request_body(page))
                })
                .await?;
            Self::parse_page(&body)
        })
        .await;
        finish_pages(self.name(), events, &stats)
    }

    fn name(&self) -> &'static str {
        "woori"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::StructuredApi
    }
}
