//! REST gateway to the clinical resource store.
//!
//! The store is the single source of truth: nothing here caches resources. Every call fetches a
//! bearer token from the configured [`TokenSource`], sets the FHIR JSON headers and maps the
//! response onto [`FhirError`].

use crate::auth::TokenSource;
use crate::bundle::{parse_searchset, SearchSet};
use crate::patch::{validate_patch, PatchOperation, JSON_PATCH_CONTENT_TYPE};
use crate::resource::{validate_id, validate_resource_type, Resource};
use crate::search::SearchParams;
use crate::{FhirError, FhirResult};
use async_trait::async_trait;
use care_types::Page;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Content type for create, update and search requests.
pub const FHIR_JSON_CONTENT_TYPE: &str = "application/fhir+json;charset=utf-8";

/// Default per-call timeout for store requests.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Language tag stamped onto every created resource unless configured otherwise.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Operations the care core needs from a clinical store.
#[async_trait]
pub trait FhirStore: Send + Sync {
    /// Create a resource; the store assigns the id.
    async fn create(&self, resource_type: &str, payload: Resource) -> FhirResult<Resource>;

    async fn read(&self, resource_type: &str, id: &str) -> FhirResult<Resource>;

    /// Replace a resource in full.
    async fn update(&self, resource_type: &str, id: &str, payload: Resource)
        -> FhirResult<Resource>;

    /// Apply an ordered JSON-Patch atomically.
    async fn patch(
        &self,
        resource_type: &str,
        id: &str,
        ops: &[PatchOperation],
    ) -> FhirResult<Resource>;

    async fn delete(&self, resource_type: &str, id: &str) -> FhirResult<()>;

    /// Resources on the first page of a search.
    async fn search(&self, resource_type: &str, params: &SearchParams)
        -> FhirResult<Vec<Resource>>;

    /// Number of matches for a search, without fetching them.
    async fn count(&self, resource_type: &str, params: &SearchParams) -> FhirResult<u64>;

    /// First page of a search with an explicit continuation.
    ///
    /// Stores that do not paginate return everything as a single last page.
    async fn search_page(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> FhirResult<Page<Resource>> {
        Ok(Page::last(self.search(resource_type, params).await?))
    }

    /// Follow a `next_cursor` returned by [`FhirStore::search_page`].
    async fn next_page(&self, cursor: &str) -> FhirResult<Page<Resource>> {
        Err(FhirError::InvalidInput(format!(
            "page cursor does not belong to this store: {cursor}"
        )))
    }

    /// Every resource in the patient's compartment, as the store's raw bundle bytes.
    async fn patient_everything(&self, patient_id: &str) -> FhirResult<Vec<u8>>;
}

/// Connection settings for [`FhirGateway`].
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// `.../datasets/{dataset}/fhirStores/{store}/fhir`, without a trailing slash.
    pub base_url: String,
    pub timeout: Duration,
    pub language: String,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout: DEFAULT_GATEWAY_TIMEOUT,
            language: DEFAULT_LANGUAGE.to_owned(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// Build the store base URL for a Cloud Healthcare style deployment.
pub fn store_base_url(
    api_root: &str,
    project: &str,
    location: &str,
    dataset: &str,
    store: &str,
) -> String {
    format!(
        "{}/projects/{project}/locations/{location}/datasets/{dataset}/fhirStores/{store}/fhir",
        api_root.trim_end_matches('/')
    )
}

/// REST implementation of [`FhirStore`].
#[derive(Clone)]
pub struct FhirGateway {
    http: reqwest::Client,
    config: GatewayConfig,
    tokens: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for FhirGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FhirGateway")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

impl FhirGateway {
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if the base URL is not http(s), or
    /// [`FhirError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig, tokens: Arc<dyn TokenSource>) -> FhirResult<Self> {
        if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
            return Err(FhirError::InvalidInput(format!(
                "store base URL must be http(s): {}",
                config.base_url
            )));
        }
        if config.language.trim().is_empty() {
            return Err(FhirError::InvalidInput("language tag is empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(FhirError::Transport)?;

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Validate caller-supplied JSON filters, then search.
    ///
    /// Non-string filter values are rejected before any request is made.
    pub async fn search_filters(
        &self,
        resource_type: &str,
        filters: &Value,
    ) -> FhirResult<Vec<Resource>> {
        let params = SearchParams::from_json(filters)?;
        self.search(resource_type, &params).await
    }

    async fn search_set(&self, resource_type: &str, params: &SearchParams) -> FhirResult<SearchSet> {
        validate_resource_type(resource_type)?;
        let url = format!("{}/{resource_type}/_search", self.config.base_url);
        tracing::debug!(resource_type, params = ?params.as_pairs(), "searching clinical store");

        let request = self
            .request(Method::POST, &url)
            .await?
            .header(CONTENT_TYPE, FHIR_JSON_CONTENT_TYPE)
            .query(params.as_pairs());
        let (status, body) = self.send(request).await?;
        if status.as_u16() > 299 {
            return Err(remote_error(status, &body));
        }
        parse_searchset(&body)
    }

    fn resource_url(&self, resource_type: &str, id: &str) -> FhirResult<String> {
        validate_resource_type(resource_type)?;
        validate_id(id)?;
        Ok(format!("{}/{resource_type}/{id}", self.config.base_url))
    }

    /// Stamp the envelope header the store expects onto an outgoing payload.
    fn stamp(&self, resource_type: &str, mut payload: Resource, language: bool) -> Resource {
        payload.resource_type = resource_type.to_owned();
        if language {
            payload
                .fields
                .insert("language".into(), Value::String(self.config.language.clone()));
        }
        payload
    }

    async fn request(&self, method: Method, url: &str) -> FhirResult<RequestBuilder> {
        let token = self.tokens.token().await?;
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, FHIR_JSON_CONTENT_TYPE))
    }

    async fn send(&self, request: RequestBuilder) -> FhirResult<(StatusCode, Vec<u8>)> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?
            .to_vec();
        Ok((status, body))
    }

    fn transport_error(&self, err: reqwest::Error) -> FhirError {
        if err.is_timeout() {
            FhirError::Timeout(self.config.timeout)
        } else {
            FhirError::Transport(err)
        }
    }

    /// Shared path for create, update and patch: strict error decoding, resource body.
    async fn write(&self, request: RequestBuilder) -> FhirResult<Resource> {
        let (status, body) = self.send(request).await?;
        if status.as_u16() > 299 {
            return Err(outcome_error(status, &body));
        }
        Resource::from_slice(&body)
    }
}

#[async_trait]
impl FhirStore for FhirGateway {
    async fn create(&self, resource_type: &str, payload: Resource) -> FhirResult<Resource> {
        validate_resource_type(resource_type)?;
        let url = format!("{}/{resource_type}", self.config.base_url);
        let payload = self.stamp(resource_type, payload, true);
        let body = serde_json::to_vec(&payload)
            .map_err(|e| FhirError::InvalidInput(format!("payload is not serialisable: {e}")))?;

        tracing::debug!(resource_type, "creating resource");
        let request = self
            .request(Method::POST, &url)
            .await?
            .header(CONTENT_TYPE, FHIR_JSON_CONTENT_TYPE)
            .body(body);
        self.write(request).await
    }

    async fn read(&self, resource_type: &str, id: &str) -> FhirResult<Resource> {
        let url = self.resource_url(resource_type, id)?;
        let (status, body) = self.send(self.request(Method::GET, &url).await?).await?;
        if status.as_u16() > 299 {
            return Err(remote_error(status, &body));
        }
        Resource::from_slice(&body)
    }

    async fn update(&self, resource_type: &str, id: &str, payload: Resource) -> FhirResult<Resource> {
        let url = self.resource_url(resource_type, id)?;
        let mut payload = self.stamp(resource_type, payload, false);
        payload.id = Some(id.to_owned());
        let body = serde_json::to_vec(&payload)
            .map_err(|e| FhirError::InvalidInput(format!("payload is not serialisable: {e}")))?;

        tracing::debug!(resource_type, id, "updating resource");
        let request = self
            .request(Method::PUT, &url)
            .await?
            .header(CONTENT_TYPE, FHIR_JSON_CONTENT_TYPE)
            .body(body);
        self.write(request).await
    }

    async fn patch(
        &self,
        resource_type: &str,
        id: &str,
        ops: &[PatchOperation],
    ) -> FhirResult<Resource> {
        let url = self.resource_url(resource_type, id)?;
        validate_patch(ops)?;
        let body = serde_json::to_vec(ops)
            .map_err(|e| FhirError::InvalidInput(format!("patch is not serialisable: {e}")))?;

        tracing::debug!(resource_type, id, ops = ops.len(), "patching resource");
        let request = self
            .request(Method::PATCH, &url)
            .await?
            .header(CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
            .body(body);
        self.write(request).await
    }

    async fn delete(&self, resource_type: &str, id: &str) -> FhirResult<()> {
        let url = self.resource_url(resource_type, id)?;
        let (status, body) = self.send(self.request(Method::DELETE, &url).await?).await?;
        if status.as_u16() > 299 {
            return Err(remote_error(status, &body));
        }
        Ok(())
    }

    async fn search(&self, resource_type: &str, params: &SearchParams) -> FhirResult<Vec<Resource>> {
        Ok(self.search_set(resource_type, params).await?.resources)
    }

    async fn count(&self, resource_type: &str, params: &SearchParams) -> FhirResult<u64> {
        let params = params.clone().with("_summary", "count");
        Ok(self.search_set(resource_type, &params).await?.total)
    }

    async fn search_page(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> FhirResult<Page<Resource>> {
        let set = self.search_set(resource_type, params).await?;
        Ok(Page::new(set.resources, set.next_link, Some(set.total)))
    }

    /// The cursor must stay on the store's origin, under its base path, and carry no userinfo;
    /// anything else would send the bearer token elsewhere.
    async fn next_page(&self, cursor: &str) -> FhirResult<Page<Resource>> {
        let url = cursor_under(&self.config.base_url, cursor).ok_or_else(|| {
            FhirError::InvalidInput("page cursor does not belong to this store".into())
        })?;
        let request = self.request(Method::GET, url.as_str()).await?;
        let (status, body) = self.send(request).await?;
        if status.as_u16() > 299 {
            return Err(remote_error(status, &body));
        }
        let set = parse_searchset(&body)?;
        Ok(Page::new(set.resources, set.next_link, Some(set.total)))
    }

    async fn patient_everything(&self, patient_id: &str) -> FhirResult<Vec<u8>> {
        validate_id(patient_id)?;
        let url = format!("{}/Patient/{patient_id}/$everything", self.config.base_url);
        let (status, body) = self.send(self.request(Method::GET, &url).await?).await?;
        if status.as_u16() > 299 {
            return Err(remote_error(status, &body));
        }
        Ok(body)
    }
}

/// Parse `cursor` and accept it only if it is on the same scheme, host and port as `base`, has
/// no userinfo, and its normalised path lies under the base path.
fn cursor_under(base: &str, cursor: &str) -> Option<Url> {
    let base = Url::parse(base).ok()?;
    let url = Url::parse(cursor).ok()?;
    if !url.username().is_empty() || url.password().is_some() {
        return None;
    }
    if url.scheme() != base.scheme()
        || url.host_str() != base.host_str()
        || url.port_or_known_default() != base.port_or_known_default()
    {
        return None;
    }
    let root = base.path().trim_end_matches('/');
    let under = url.path() == root || url.path().starts_with(&format!("{root}/"));
    under.then_some(url)
}

/// `issue[0].details.text` and `issue[0].diagnostics` of an OperationOutcome body.
fn decode_outcome(body: &[u8]) -> Option<(String, String)> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let issue = value.get("issue")?.as_array()?.first()?;
    let text = issue
        .get("details")
        .and_then(|d| d.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let diagnostics = issue
        .get("diagnostics")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    Some((text, diagnostics))
}

/// Error for a failed write: the body must be an OperationOutcome.
fn outcome_error(status: StatusCode, body: &[u8]) -> FhirError {
    match decode_outcome(body) {
        Some((text, diagnostics)) => FhirError::Remote {
            status: status.as_u16(),
            text,
            diagnostics,
            body: String::from_utf8_lossy(body).into_owned(),
        },
        None => FhirError::ResponseParse(format!(
            "store returned {status} with an undecodable error body: {}",
            String::from_utf8_lossy(body)
        )),
    }
}

/// Error for a failed read: keep the raw body, add outcome text when present.
fn remote_error(status: StatusCode, body: &[u8]) -> FhirError {
    let (text, diagnostics) = decode_outcome(body).unwrap_or_else(|| {
        (
            status.canonical_reason().unwrap_or("error").to_owned(),
            String::new(),
        )
    });
    FhirError::Remote {
        status: status.as_u16(),
        text,
        diagnostics,
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_store_base_url() {
        assert_eq!(
            store_base_url("https://healthcare.googleapis.com/v1/", "proj", "asia-south1", "ds", "fs"),
            "https://healthcare.googleapis.com/v1/projects/proj/locations/asia-south1/datasets/ds/fhirStores/fs/fhir"
        );
    }

    #[test]
    fn cursors_must_stay_under_the_store() {
        let base = "https://store.example/v1/fhir";
        assert!(cursor_under(base, "https://store.example/v1/fhir/Condition/_search?_page_token=a").is_some());
        assert!(cursor_under(base, "https://store.example:443/v1/fhir/Condition").is_some());
        assert!(cursor_under(base, "https://store.example/v1/fhirx/Condition").is_none());
        assert!(cursor_under(base, "https://store.example/v1/fhir/../admin").is_none());
        assert!(cursor_under(base, "http://store.example/v1/fhir/Condition").is_none());
        assert!(cursor_under(base, "https://store.example:8443/v1/fhir/Condition").is_none());
        assert!(cursor_under(base, "https://u:p@store.example/v1/fhir/Condition").is_none());
        assert!(cursor_under("https://store.example", "https://store.example@evil.example/x").is_none());
        assert!(cursor_under(base, "not a url").is_none());
    }

    #[test]
    fn outcome_error_carries_text_and_diagnostics() {
        let body = br#"{"resourceType":"OperationOutcome","issue":[{"severity":"error","details":{"text":"invalid_query"},"diagnostics":"unknown search parameter"}]}"#;
        match outcome_error(StatusCode::BAD_REQUEST, body) {
            FhirError::Remote {
                status,
                text,
                diagnostics,
                ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(text, "invalid_query");
                assert_eq!(diagnostics, "unknown search parameter");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_write_error_is_a_parse_error() {
        assert!(matches!(
            outcome_error(StatusCode::BAD_GATEWAY, b"upstream connect error"),
            FhirError::ResponseParse(_)
        ));
    }

    #[test]
    fn read_error_keeps_raw_body() {
        match remote_error(StatusCode::NOT_FOUND, b"not here") {
            FhirError::Remote { status, text, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(text, "Not Found");
                assert_eq!(body, "not here");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }
}
