use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use url::Url;

use super::lenient_string;
use crate::error::Result;
use crate::ingest::http::Transport;
use crate::ingest::pagination::{collect_pages, finish_pages, Page, PagePolicy};
use crate::ingest::types::{default_accent, Event, SourceKind, SourceProvider};
use crate::ingest::{format_period, resolve_url};

const BASE: &str = "https://m.hanacard.co.kr";

static BASE_URL: Lazy<Url> = Lazy::new(|| Url::parse(BASE).expect("hana base url"));

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "DATA", default)]
    data: Data,
}

#[derive(Debug, Default, Deserialize)]
struct Data {
    #[serde(rename = "eventListMap", default)]
    event_list_map: EventListMap,
}

#[derive(Debug, Default, Deserialize)]
struct EventListMap {
    #[serde(default)]
    list: Vec<RawEvent>,
    #[serde(rename = "totalPage", default, deserialize_with = "lenient_string")]
    total_page: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    evn_tit_nm: String,
    #[serde(default, deserialize_with = "lenient_string")]
    itg_app_evn_mc_nm: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evn_sdt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evn_edt: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evn_seq: String,
    #[serde(default, deserialize_with = "lenient_string")]
    apn_file_nm: String,
}

/// Event board behind a form-encoded endpoint that answers in EUC-KR over a
/// dated TLS setup.
pub struct HanaProvider {
    transport: Transport,
}

impl HanaProvider {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub(crate) fn parse_page(body: &str) -> Result<Page<Event>> {
        let env: Envelope = serde_json::from_str(body)?;
        let map = env.data.event_list_map;

        let items: Vec<Event> = map
            .list
            .into_iter()
            .map(|ev| {
                let category = match ev.itg_app_evn_mc_nm.trim() {
                    "" => "이벤트".to_string(),
                    c => c.to_string(),
                };
                let link = match ev.evn_seq.trim() {
                    "" => String::new(),
                    seq => format!("{BASE}/MKEVT1010M.web?EVN_SEQ={seq}"),
                };
                Event {
                    category,
                    event_name: ev.evn_tit_nm,
                    period: format_period(&ev.evn_sdt, &ev.evn_edt),
                    link,
                    image: resolve_url(&BASE_URL, &ev.apn_file_nm),
                    accent_color: default_accent(),
                }
            })
            .collect();

        let last = items.is_empty();
        Ok(Page {
            items,
            total_pages: map.total_page.trim().parse().ok(),
            last,
        })
    }
}

#[async_trait]
impl SourceProvider for HanaProvider {
    type Record = Event;

    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        let transport = &self.transport;
        // This board never recovers mid-walk; the first empty page ends it.
        let policy = PagePolicy {
            max_pages: 39,
            miss_budget: 1,
            ..PagePolicy::default()
        };
        let (events, stats) = collect_pages(self.name(), policy, move |page| async move {
            let body = transport
                .fetch_with_charset(page, "euc-kr", |c| {
                    c.post(format!("{BASE}/MKEVT1000M.ajax"))
                        .header("Referer", format!("{BASE}/MKEVT1000M.web"))
                        .form(&[("page", page.to_string())])
                })
                .await?;
            Self::parse_page(&body)
        })
        .await;
        finish_pages(self.name(), events, &stats)
    }

    fn name(&self) -> &'static str {
        "hana"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LegacyForm
    }
}
