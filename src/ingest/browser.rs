//! Headless-browser seam for script-rendered upstreams.
//!
//! A driver hands out one isolated session per crawl run. Callers go through
//! [`render_page`], which closes the session on every exit path.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{CrawlError, Result};

/// Client identity and timing for one session.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_agent: String,
    pub navigation_timeout: Duration,
}

/// What to load and how long to let scripts settle before reading the DOM.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub settle: Duration,
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, page: &PageRequest) -> Result<()>;
    /// Serialized DOM of the current page.
    async fn content(&mut self) -> Result<String>;
    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self, profile: &SessionProfile) -> Result<Box<dyn BrowserSession>>;
}

/// Launch a session, load `page`, return its rendered HTML. The session is
/// closed whether navigation succeeded or not.
pub async fn render_page(
    driver: &dyn BrowserDriver,
    profile: &SessionProfile,
    page: &PageRequest,
) -> Result<String> {
    let mut session = driver.launch(profile).await?;

    let rendered = async {
        session.goto(page).await?;
        session.content().await
    }
    .await;

    if let Err(e) = session.close().await {
        warn!(target: "ingest", url = %page.url, error = %e, "browser session close failed");
    }
    rendered
}

/// Remote headless Chrome behind a Browserless-compatible `/content` API.
pub struct BrowserlessDriver {
    base_url: String,
    token: Option<String>,
}

impl BrowserlessDriver {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }
}

#[async_trait]
impl BrowserDriver for BrowserlessDriver {
    async fn launch(&self, profile: &SessionProfile) -> Result<Box<dyn BrowserSession>> {
        // Fresh client per session: no connection or cookie reuse across runs.
        let client = reqwest::Client::builder()
            .timeout(profile.navigation_timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| CrawlError::Browser(format!("launch failed: {e}")))?;

        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(token) = &self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        debug!(target: "ingest", %endpoint, "browser session opened");
        Ok(Box::new(BrowserlessSession {
            client: Some(client),
            endpoint,
            profile: profile.clone(),
            html: None,
        }))
    }
}

struct BrowserlessSession {
    client: Option<reqwest::Client>,
    endpoint: String,
    profile: SessionProfile,
    html: Option<String>,
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    async fn goto(&mut self, page: &PageRequest) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CrawlError::Browser("session already closed".into()))?;

        let body = serde_json::json!({
            "url": page.url,
            "userAgent": self.profile.user_agent,
            "setExtraHTTPHeaders": { "User-Agent": self.profile.user_agent },
            "gotoOptions": {
                "timeout": self.profile.navigation_timeout.as_millis() as u64,
                "waitUntil": "domcontentloaded",
            },
            "waitForTimeout": page.settle.as_millis() as u64,
        });

        let resp = client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CrawlError::Browser(format!("navigation to {} failed: {e}", page.url)))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CrawlError::Browser(format!(
                "render of {} failed (status {}): {message}",
                page.url,
                status.as_u16()
            )));
        }
        self.html = Some(resp.text().await?);
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        self.html
            .clone()
            .ok_or_else(|| CrawlError::Browser("no page loaded".into()))
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.client.take();
        self.html.take();
        debug!(target: "ingest", endpoint = %self.endpoint, "browser session closed");
        Ok(())
    }
}
