use crate::concept::{Concept, ConceptQuery, LookupOptions};
use crate::{TerminologyError, TerminologyResult};
use care_types::Page;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Response, Url};
use std::time::Duration;

pub const DEFAULT_TERMINOLOGY_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`TerminologyClient`].
#[derive(Clone)]
pub struct TerminologyConfig {
    pub base_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl TerminologyConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
            timeout: DEFAULT_TERMINOLOGY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for TerminologyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminologyConfig")
            .field("base_url", &self.base_url)
            .field("token", &"****")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// HTTP client for the terminology catalog.
#[derive(Clone, Debug)]
pub struct TerminologyClient {
    http: reqwest::Client,
    config: TerminologyConfig,
}

impl TerminologyClient {
    /// # Errors
    ///
    /// Returns [`TerminologyError::InvalidInput`] for a non-http(s) base URL or a blank token.
    pub fn new(config: TerminologyConfig) -> TerminologyResult<Self> {
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(TerminologyError::InvalidInput(format!(
                "terminology base URL must be http(s): {}",
                config.base_url
            )));
        }
        if config.token.trim().is_empty() {
            return Err(TerminologyError::InvalidInput(
                "terminology token is empty".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Look up one concept.
    pub async fn get_concept(
        &self,
        org: &str,
        source: &str,
        concept: &str,
        options: &LookupOptions,
    ) -> TerminologyResult<Concept> {
        let url = format!(
            "{}/orgs/{}/sources/{}/concepts/{}/",
            self.config.base_url,
            segment(org, "org")?,
            segment(source, "source")?,
            segment(concept, "concept")?,
        );
        tracing::debug!(org, source, concept, "looking up concept");

        let response = self.get(&url, &options.to_query()).await?;
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&body)
            .map_err(|e| TerminologyError::ResponseParse(format!("concept: {e}")))
    }

    /// List concepts in a source. Pagination comes back as an explicit [`Page`].
    pub async fn list_concepts(
        &self,
        org: &str,
        source: &str,
        query: &ConceptQuery,
    ) -> TerminologyResult<Page<Concept>> {
        let url = format!(
            "{}/orgs/{}/sources/{}/concepts/",
            self.config.base_url,
            segment(org, "org")?,
            segment(source, "source")?,
        );
        tracing::debug!(org, source, q = ?query.q, "listing concepts");

        let response = self.get(&url, &query.to_query()).await?;
        self.read_page(response).await
    }

    /// Follow the `next_cursor` of a page returned by [`TerminologyClient::list_concepts`].
    ///
    /// The cursor is refused unless it stays on the catalog's origin and base path without
    /// userinfo, so the token is only ever sent to the configured catalog.
    pub async fn next_concepts(&self, cursor: &str) -> TerminologyResult<Page<Concept>> {
        let url = same_catalog(&self.config.base_url, cursor).ok_or_else(|| {
            TerminologyError::InvalidInput("page cursor does not belong to this catalog".into())
        })?;
        let response = self.get(url.as_str(), &[]).await?;
        self.read_page(response).await
    }

    async fn get(&self, url: &str, query: &[(&'static str, String)]) -> TerminologyResult<Response> {
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Token {}", self.config.token))
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.as_u16() > 299 {
            let body = response.text().await.unwrap_or_default();
            return Err(TerminologyError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn read_page(&self, response: Response) -> TerminologyResult<Page<Concept>> {
        let (next, total) = pagination(response.headers());
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        let items: Vec<Concept> = serde_json::from_slice(&body)
            .map_err(|e| TerminologyError::ResponseParse(format!("concept list: {e}")))?;
        Ok(Page::new(items, next, total))
    }

    fn transport_error(&self, err: reqwest::Error) -> TerminologyError {
        if err.is_timeout() {
            TerminologyError::Timeout(self.config.timeout)
        } else {
            TerminologyError::Transport(err)
        }
    }
}

/// Out-of-band pagination: the catalog sends `next` and `num_found` as response headers.
fn pagination(headers: &HeaderMap) -> (Option<String>, Option<u64>) {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != "None")
            .map(str::to_owned)
    };
    let total = text("num_found").and_then(|n| n.parse().ok());
    (text("next"), total)
}

fn same_catalog(base: &str, cursor: &str) -> Option<Url> {
    let base = Url::parse(base).ok()?;
    let url = Url::parse(cursor).ok()?;
    let same_origin = url.scheme() == base.scheme()
        && url.host_str() == base.host_str()
        && url.port_or_known_default() == base.port_or_known_default();
    if !same_origin || !url.username().is_empty() || url.password().is_some() {
        return None;
    }
    let root = base.path().trim_end_matches('/');
    (url.path() == root || url.path().starts_with(&format!("{root}/"))).then_some(url)
}

fn segment<'a>(value: &'a str, name: &str) -> TerminologyResult<&'a str> {
    let value = value.trim();
    if value.is_empty() || value.contains('/') || value.contains('?') || value.contains('#') {
        return Err(TerminologyError::InvalidInput(format!(
            "{name} must be a single non-empty path segment"
        )));
    }
    Ok(value)
}
