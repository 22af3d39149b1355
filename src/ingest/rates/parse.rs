//! Markup readers for the branch locator: listing tables and rate tables.
//!
//! Both take the page body and return owned data; the parsed DOM never
//! outlives the call.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::regions::District;
use super::Institution;

const KEY_CODE: &str = "새마을금고코드";
const KEY_NAME: &str = "새마을금고명";
const KEY_ADDRESS: &str = "주소";

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static LISTING_ROW: Lazy<Selector> = Lazy::new(|| sel("tr[onclick]"));
static TITLED_SPAN: Lazy<Selector> = Lazy::new(|| sel("span[title]"));
static BASE_DATE: Lazy<Selector> = Lazy::new(|| sel(".base-date"));
static TABLE_WRAP: Lazy<Selector> = Lazy::new(|| sel(".tblWrap"));
static TABLE_TITLE: Lazy<Selector> = Lazy::new(|| sel(".tbl-tit"));
static BODY_ROW: Lazy<Selector> = Lazy::new(|| sel("tbody tr"));
static CELL: Lazy<Selector> = Lazy::new(|| sel("td"));

static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[/.-](\d{2})[/.-](\d{2})").expect("date regex"));
static TERM_MONTHS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*개월").expect("term regex"));
static RATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("rate regex"));

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Default)]
pub struct Listing {
    pub institutions: Vec<Institution>,
    /// Clickable rows without the identity attribute.
    pub missing_identity: usize,
}

/// Read the branch rows of one district listing. Identity comes from the
/// `span[title]` metadata, never from the visible cell text.
pub fn parse_listing(html: &str, district: &District) -> Listing {
    let doc = Html::parse_document(html);
    let mut out = Listing::default();

    for row in doc.select(&LISTING_ROW) {
        let meta: HashMap<String, String> = row
            .select(&TITLED_SPAN)
            .filter_map(|span| {
                let key = span.value().attr("title")?.trim().to_string();
                Some((key, text_of(span)))
            })
            .collect();

        let code = meta.get(KEY_CODE).map(|c| c.trim()).unwrap_or("");
        if code.is_empty() {
            out.missing_identity += 1;
            continue;
        }
        out.institutions.push(Institution {
            code: code.to_string(),
            name: meta.get(KEY_NAME).cloned().unwrap_or_default(),
            district: district.clone(),
            address: meta.get(KEY_ADDRESS).cloned().unwrap_or_default(),
        });
    }
    out
}

/// One category page of one branch.
#[derive(Debug, Default, PartialEq)]
pub struct RateTable {
    pub as_of: Option<String>,
    /// product → term label → rate
    pub rates: BTreeMap<String, BTreeMap<String, String>>,
}

/// `"연3.50%"` → `"3.50"`.
pub fn clean_rate(raw: &str) -> Option<String> {
    let stripped = raw.replace('연', "").replace('%', "");
    let m = RATE.find(stripped.trim())?;
    Some(m.as_str().to_string())
}

/// `"2024/03/05"` (or dotted/dashed) → `"2024.03.05"`.
pub fn normalize_as_of(raw: &str) -> Option<String> {
    let caps = DATE.captures(raw)?;
    Some(format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]))
}

/// Read product rate tables, keeping whitelisted products (all when the
/// list is empty) and whitelisted terms. The first rate seen for a
/// (product, term) pair wins.
pub fn parse_rate_table(html: &str, products: &[String], terms: &[u32]) -> RateTable {
    let doc = Html::parse_document(html);
    let mut out = RateTable {
        as_of: doc
            .select(&BASE_DATE)
            .next()
            .and_then(|el| normalize_as_of(&text_of(el))),
        rates: BTreeMap::new(),
    };

    for wrap in doc.select(&TABLE_WRAP) {
        let Some(title) = wrap.select(&TABLE_TITLE).next().map(text_of) else {
            continue;
        };
        if title.is_empty() || !(products.is_empty() || products.iter().any(|p| *p == title)) {
            continue;
        }

        for row in wrap.select(&BODY_ROW) {
            let cells: Vec<String> = row.select(&CELL).map(text_of).collect();
            let [.., term_cell, rate_cell] = cells.as_slice() else {
                continue;
            };
            let Some(months) = TERM_MONTHS
                .captures(term_cell)
                .and_then(|c| c[1].parse::<u32>().ok())
            else {
                continue;
            };
            if !terms.contains(&months) {
                continue;
            }
            let Some(rate) = clean_rate(rate_cell) else {
                continue;
            };
            out.rates
                .entry(title.clone())
                .or_default()
                .entry(format!("{months}개월"))
                .or_insert(rate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<table><tbody>
        <tr onclick="parent.mapGo('0101','3333')"><td>
            <span title="새마을금고코드">A1</span><span title="새마을금고명">역삼 새마을금고</span>
            <span title="주소">서울 강남구 테헤란로 1</span>역삼</td></tr>
        <tr onclick="parent.mapGo('0102','3334')"><td><span title="새마을금고명">코드 없음</span></td></tr>
        <tr><td><span title="새마을금고코드">B2</span></td></tr>
    </tbody></table>"#;

    #[test]
    fn listing_reads_metadata_not_visible_text() {
        let district = District::new("서울", "강남구");
        let listing = parse_listing(LISTING, &district);
        assert_eq!(listing.institutions.len(), 1);
        assert_eq!(listing.missing_identity, 1);
        let inst = &listing.institutions[0];
        assert_eq!(inst.code, "A1");
        assert_eq!(inst.name, "역삼 새마을금고");
        assert_eq!(inst.address, "서울 강남구 테헤란로 1");
        assert_eq!(inst.district, district);
    }

    const DEPOSIT: &str = r#"<div class="base-date">조회기준일 : 2024/03/05</div>
        <div class="tblWrap"><p class="tbl-tit">MG더뱅킹정기예금</p>
          <table><tbody>
            <tr><td rowspan="4">상품</td><td>3개월이상</td><td>연2.80%</td></tr>
            <tr><td>6개월이상</td><td>연3.20%</td></tr>
            <tr><td>12개월이상</td><td>연3.55%</td></tr>
            <tr><td>12개월이상(우대)</td><td>연3.90%</td></tr>
            <tr><td>48개월이상</td><td>연3.00%</td></tr>
          </tbody></table></div>
        <div class="tblWrap"><p class="tbl-tit">정기예탁금</p>
          <table><tbody><tr><td>12개월이상</td><td>연3.10%</td></tr></tbody></table></div>"#;

    #[test]
    fn rate_table_keeps_whitelisted_products_and_terms() {
        let products = vec!["MG더뱅킹정기예금".to_string()];
        let t = parse_rate_table(DEPOSIT, &products, &[6, 12, 24, 36]);
        assert_eq!(t.as_of.as_deref(), Some("2024.03.05"));
        assert_eq!(t.rates.len(), 1);
        let terms = &t.rates["MG더뱅킹정기예금"];
        assert_eq!(terms.len(), 2);
        assert_eq!(terms["6개월"], "3.20");
        assert_eq!(terms["12개월"], "3.55");
    }

    #[test]
    fn empty_product_list_keeps_everything() {
        let t = parse_rate_table(DEPOSIT, &[], &[12]);
        assert_eq!(t.rates.len(), 2);
        assert_eq!(t.rates["정기예탁금"]["12개월"], "3.10");
    }

    #[test]
    fn rates_and_dates_are_cleaned() {
        assert_eq!(clean_rate("연3.50%").as_deref(), Some("3.50"));
        assert_eq!(clean_rate(" 연 4 % ").as_deref(), Some("4"));
        assert_eq!(clean_rate("-"), None);
        assert_eq!(normalize_as_of("2024/01/09").as_deref(), Some("2024.01.09"));
        assert_eq!(normalize_as_of("기준일 없음"), None);
    }

    #[test]
    fn page_without_tables_is_empty() {
        let t = parse_rate_table("<html><body>점검중</body></html>", &[], &[12]);
        assert_eq!(t, RateTable::default());
    }
}
