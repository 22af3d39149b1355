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

const BASE: &str = "https://web.paybooc.co.kr";

static BASE_URL: Lazy<Url> = Lazy::new(|| Url::parse(BASE).expect("bc base url"));

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: ListData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListData {
    #[serde(default)]
    evnt_inqr_list: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "pybcUnifEvntNm1", default, deserialize_with = "lenient_string")]
    name1: String,
    #[serde(rename = "pybcUnifEvntNm2", default, deserialize_with = "lenient_string")]
    name2: String,
    #[serde(rename = "pybcUnifEvntNm3", default, deserialize_with = "lenient_string")]
    name3: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evnt_bltn_strt_dtm: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evnt_bltn_end_dtm: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pybc_unif_evnt_no: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evnt_bs_img_url_addr: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evnt_bs_bg_colr_val: String,
}

pub struct BcProvider {
    transport: Transport,
}

impl BcProvider {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    fn query(page: u32) -> [(&'static str, String); 5] {
        [
            ("reqType", if page == 1 { "init" } else { "more" }.to_string()),
            ("inqrDv", "ING".to_string()),
            ("pgeNo", page.to_string()),
            ("pgeCnt", "20".to_string()),
            ("ordering", "RECENT".to_string()),
        ]
    }

    pub(crate) fn parse_page(body: &str) -> Result<Page<Event>> {
        let resp: ListResponse = serde_json::from_str(body)?;
        if resp.data.evnt_inqr_list.is_empty() {
            return Ok(Page::last(Vec::new()));
        }

        let items = resp
            .data
            .evnt_inqr_list
            .into_iter()
            .map(|ev| {
                let title = [ev.name1.trim(), ev.name2.trim(), ev.name3.trim()]
                    .iter()
                    .filter(|p| !p.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ");
                let link = match ev.pybc_unif_evnt_no.trim() {
                    "" => format!("{BASE}/web/evnt/main"),
                    no => format!("{BASE}/web/evnt/evnt-dts?pybcUnifEvntNo={no}"),
                };
                let accent = match ev.evnt_bs_bg_colr_val.trim() {
                    "" => default_accent(),
                    c => c.to_string(),
                };
                Event {
                    category: "BC카드".to_string(),
                    event_name: title,
                    period: format_period(&ev.evnt_bltn_strt_dtm, &ev.evnt_bltn_end_dtm),
                    link,
                    image: resolve_url(&BASE_URL, &ev.evnt_bs_img_url_addr),
                    accent_color: accent,
                }
            })
            .collect();
        Ok(Page::items(items))
    }
}

#[async_trait]
impl SourceProvider for BcProvider {
    type Record = Event;

    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        let transport = &self.transport;
        let policy = PagePolicy {
            max_pages: 9,
            ..PagePolicy::default()
        };
        let (events, stats) = collect_pages(self.name(), policy, move |page| async move {
            let body = transport
                .fetch(page, |c| {
                    c.get(format!("{BASE}/web/evnt/lst-evnt-data"))
                        .query(&Self::query(page))
                })
                .await?;
            Self::parse_page(&body)
        })
        .await;
        finish_pages(self.name(), events, &stats)
    }

    fn name(&self) -> &'static str {
        "bc"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::StructuredApi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_parts_timestamps_and_colour() {
        let body = r##"{"data":{"evntInqrList":[
            {"pybcUnifEvntNm1":"편의점","pybcUnifEvntNm2":"20% 할인","pybcUnifEvntNm3":"",
             "evntBltnStrtDtm":"20240701000000","evntBltnEndDtm":"20240731235959",
             "pybcUnifEvntNo":"E123","evntBsImgUrlAddr":"https://img.paybooc.co.kr/e.png","evntBsBgColrVal":"#fde9e0"},
            {"pybcUnifEvntNm1":"간편결제","evntBltnStrtDtm":"20240701","evntBltnEndDtm":"20240710"}
        ]}}"##;
        let p = BcProvider::parse_page(body).unwrap();
        assert_eq!(p.items.len(), 2);
        let ev = &p.items[0];
        assert_eq!(ev.event_name, "편의점 20% 할인");
        assert_eq!(ev.period, "2024.07.01 ~ 2024.07.31");
        assert_eq!(
            ev.link,
            "https://web.paybooc.co.kr/web/evnt/evnt-dts?pybcUnifEvntNo=E123"
        );
        assert_eq!(ev.accent_color, "#fde9e0");
        assert_eq!(p.items[1].accent_color, "#ffffff");
        assert_eq!(p.items[1].image, "");
    }

    #[test]
    fn first_page_is_init_then_more() {
        assert_eq!(BcProvider::query(1)[0].1, "init");
        assert_eq!(BcProvider::query(2)[0].1, "more");
        assert_eq!(BcProvider::query(2)[2].1, "2");
    }

    #[test]
    fn empty_list_is_last() {
        let p = BcProvider::parse_page(r#"{"data":{"evntInqrList":[]}}"#).unwrap();
        assert!(p.last);
    }
}
