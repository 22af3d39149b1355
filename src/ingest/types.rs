// src/ingest/types.rs
use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;

/// Upstream family; selects transport and parsing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Paginated JSON endpoints.
    StructuredApi,
    /// Form-encoded endpoint with legacy text encoding / TLS.
    LegacyForm,
    /// Script-heavy page rendered in a headless browser.
    BrowserRendered,
    /// Two-phase discovery + detail crawl.
    Hierarchical,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::StructuredApi => "structured_api",
            SourceKind::LegacyForm => "legacy_form",
            SourceKind::BrowserRendered => "browser_rendered",
            SourceKind::Hierarchical => "hierarchical",
        }
    }
}

/// Anything a source persists as a snapshot.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Key used to collapse duplicates within one run. Empty keys are dropped.
    fn dedup_key(&self) -> String;

    /// Canonicalize text fields in place.
    fn normalize(&mut self) {}
}

/// One promotion as served by `/api/{source}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub category: String,
    pub event_name: String,
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub image: String,
    #[serde(rename = "bgColor", default = "default_accent")]
    pub accent_color: String,
}

pub fn default_accent() -> String {
    "#ffffff".to_string()
}

impl Record for Event {
    fn dedup_key(&self) -> String {
        crate::ingest::normalize_name(&self.event_name)
    }

    fn normalize(&mut self) {
        self.category = crate::ingest::normalize_name(&self.category);
        self.event_name = crate::ingest::normalize_name(&self.event_name);
        self.period = crate::ingest::normalize_name(&self.period);
        self.link = self.link.trim().to_string();
        self.image = self.image.trim().to_string();
        if self.accent_color.trim().is_empty() {
            self.accent_color = default_accent();
        }
    }
}

/// Deposit rates of one credit-union branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateRecord {
    pub institution_code: String,
    pub institution_name: String,
    pub location: String,
    /// product name → term label (`"12개월"`) → rate (`"3.50"`)
    pub rates: BTreeMap<String, BTreeMap<String, String>>,
    pub as_of_date: Option<String>,
}

impl Record for RateRecord {
    fn dedup_key(&self) -> String {
        self.institution_code.trim().to_string()
    }

    fn normalize(&mut self) {
        self.institution_code = self.institution_code.trim().to_string();
        self.institution_name = crate::ingest::normalize_name(&self.institution_name);
    }
}

/// One upstream integration.
///
/// `fetch_latest` keeps whatever it gathered before a page failure; it
/// returns `Err` only when nothing usable could be attempted at all.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    type Record: Record;

    async fn fetch_latest(&self) -> Result<Vec<Self::Record>>;
    fn name(&self) -> &'static str;
    fn kind(&self) -> SourceKind;
}
