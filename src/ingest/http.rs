//! HTTP clients and the fixture/live transport shared by the JSON adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};

use crate::error::{CrawlError, Result};

pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default client for well-behaved JSON upstreams.
pub fn standard_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(DESKTOP_USER_AGENT)
        .build()
        .map_err(CrawlError::from)
}

/// Client for upstreams with broken certificate chains.
pub fn lenient_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(DESKTOP_USER_AGENT)
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(CrawlError::from)
}

/// Client for the legacy endpoint with an outdated TLS setup. rustls has no
/// DHE suites at all, so this one goes through the platform TLS stack,
/// accepts TLS 1.0 and skips certificate and hostname checks.
///
/// The cipher list and security level stay at the system OpenSSL defaults:
/// native-tls exposes neither. A host whose policy rejects the upstream's
/// small DH group needs `CipherString = DEFAULT@SECLEVEL=1` in the
/// `OPENSSL_CONF` the process runs with.
pub fn legacy_tls_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .use_native_tls()
        .timeout(timeout)
        .user_agent(DESKTOP_USER_AGENT)
        .min_tls_version(reqwest::tls::Version::TLS_1_0)
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(CrawlError::from)
}

/// Where an adapter gets its page bodies from.
#[derive(Clone)]
pub enum Transport {
    Http(Client),
    /// Canned bodies keyed by page number; a missing page behaves like a
    /// network failure.
    Fixture(Arc<HashMap<u32, String>>),
}

impl Transport {
    pub fn fixture<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        Transport::Fixture(Arc::new(
            pages.into_iter().map(|(k, v)| (k, v.into())).collect(),
        ))
    }

    /// Send the request built by `build` and return the body as UTF-8 text.
    pub async fn fetch<F>(&self, page: u32, build: F) -> Result<String>
    where
        F: FnOnce(&Client) -> RequestBuilder,
    {
        self.fetch_with_charset(page, "utf-8", build).await
    }

    /// Like `fetch`, decoding the body with `charset` unless the response
    /// declares its own.
    pub async fn fetch_with_charset<F>(&self, page: u32, charset: &str, build: F) -> Result<String>
    where
        F: FnOnce(&Client) -> RequestBuilder,
    {
        match self {
            Transport::Fixture(pages) => pages
                .get(&page)
                .cloned()
                .ok_or_else(|| CrawlError::Network(format!("no fixture for page {page}"))),
            Transport::Http(client) => {
                let resp = build(client).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(CrawlError::Network(format!(
                        "status {} from {}",
                        status.as_u16(),
                        resp.url()
                    )));
                }
                Ok(resp.text_with_charset(charset).await?)
            }
        }
    }

    /// Fire-and-forget request whose body is irrelevant (session warm-up).
    pub async fn touch<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(&Client) -> RequestBuilder,
    {
        if let Transport::Http(client) = self {
            build(client).send().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_pages_are_served_and_gaps_fail() {
        let t = Transport::fixture([(1, "one")]);
        let body = t.fetch(1, |c| c.get("http://unused.invalid")).await.unwrap();
        assert_eq!(body, "one");
        let err = t.fetch(2, |c| c.get("http://unused.invalid")).await.unwrap_err();
        assert!(matches!(err, CrawlError::Network(_)));
    }
}
