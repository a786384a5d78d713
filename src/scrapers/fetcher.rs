// =============================================================================
// fetcher.rs - GETTING PAGES OUT OF EDGAR
// =============================================================================
//
// Two kinds of request go out: the bulk ticker listing (once) and the
// ownership disclosure page for an issuer (every tick, for every ticker).
// Both are plain GETs against the same host. Request URLs come from a
// template with a `{cik}` placeholder so the identifier is substituted and
// encoded rather than glued on with string concatenation.
//
// The actual HTTP call sits behind `PageSource` so the scheduling loops can
// be driven by an in-memory source in tests.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::error::{FetchError, TemplateError};

/// Something that can turn a URL into a document body.
///
/// Implementations must allow concurrent outstanding requests; every
/// scheduling loop shares the same source.
pub trait PageSource: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String, FetchError>>;
}

/// `PageSource` backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Arc<reqwest::Client>,
}

impl HttpPageFetcher {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl PageSource for HttpPageFetcher {
    fn fetch<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<String, FetchError>> {
        Box::pin(async move {
            info!(url = %url, "Visiting");

            let response = self.client.get(url.clone()).send().await.map_err(|e| {
                FetchError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let body = response.text().await.map_err(|e| FetchError::Body {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

            debug!(url = %url, bytes = body.len(), "Response received");
            Ok(body)
        })
    }
}

// =============================================================================
// URL templates
// =============================================================================

/// A URL with `{name}` placeholders. Rendering substitutes URL-encoded
/// values and validates the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
}

impl UrlTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Substitute every placeholder from `vars`. Every name in `vars` must
    /// appear in the template, and every placeholder must have a value.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<Url, TemplateError> {
        let mut out = String::with_capacity(self.raw.len() + 16);
        let mut seen = vec![false; vars.len()];
        let mut rest = self.raw.as_str();
        let mut offset = 0;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or(TemplateError::Unterminated {
                position: offset + open,
            })?;
            let name = &after[..close];

            let idx = vars
                .iter()
                .position(|(key, _)| *key == name)
                .ok_or_else(|| TemplateError::UnknownPlaceholder {
                    name: name.to_string(),
                })?;
            out.push_str(&urlencoding::encode(vars[idx].1));
            seen[idx] = true;

            let consumed = open + 1 + close + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);

        if let Some(((name, _), _)) = vars.iter().zip(&seen).find(|(_, hit)| !**hit) {
            return Err(TemplateError::MissingPlaceholder {
                name: name.to_string(),
            });
        }

        Url::parse(&out).map_err(|e| TemplateError::InvalidUrl {
            url: out.clone(),
            reason: e.to_string(),
        })
    }
}

/// The two request shapes the scraper needs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub ticker_listing: UrlTemplate,
    pub disclosure: UrlTemplate,
}

impl Endpoints {
    pub fn from_config(config: &Config) -> Self {
        let base = config.base_url.trim_end_matches('/');
        Self {
            ticker_listing: UrlTemplate::new(format!("{base}{}", config.ticker_listing_path)),
            disclosure: UrlTemplate::new(format!("{base}{}", config.disclosure_path_template)),
        }
    }

    pub fn ticker_listing_url(&self) -> Result<Url, TemplateError> {
        self.ticker_listing.render(&[])
    }

    pub fn disclosure_url(&self, cik: &str) -> Result<Url, TemplateError> {
        self.disclosure.render(&[("cik", cik)])
    }
}
