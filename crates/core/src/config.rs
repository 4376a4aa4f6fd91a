//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services. Core
//! code never reads process-wide environment variables during request handling.
//!
//! Resolution happens in two steps:
//! - [`Settings`] is a bag of raw, optional values (from the environment or built by hand)
//! - [`CoreConfig::from_settings`] validates them and fails with a typed [`ConfigError`]

use crate::constants::{
    DEFAULT_FHIR_API_ROOT, DEFAULT_FHIR_TIMEOUT, DEFAULT_MAX_PAGE_SIZE, DEFAULT_OTP_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_REST_ADDR, DEFAULT_TERMINOLOGY_TIMEOUT,
    DEFAULT_TIMELINE_CONCURRENCY, MAX_PAGE_SIZE_LIMIT, MAX_REQUEST_TIMEOUT,
    MAX_TIMELINE_CONCURRENCY,
};
use crate::error::ConfigError;
use crate::timeline::PartialFailurePolicy;
use fhir::gateway::DEFAULT_LANGUAGE;
use std::net::SocketAddr;
use std::time::Duration;

/// Raw configuration values, unvalidated.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub fhir_base_url: Option<String>,
    pub fhir_api_root: Option<String>,
    pub fhir_project: Option<String>,
    pub fhir_location: Option<String>,
    pub fhir_dataset: Option<String>,
    pub fhir_store: Option<String>,
    pub fhir_access_token: Option<String>,
    pub fhir_language: Option<String>,
    pub fhir_timeout_secs: Option<String>,
    pub terminology_base_url: Option<String>,
    pub terminology_token: Option<String>,
    pub terminology_timeout_secs: Option<String>,
    pub otp_base_url: Option<String>,
    pub otp_timeout_secs: Option<String>,
    pub request_timeout_secs: Option<String>,
    pub aggregation_policy: Option<String>,
    pub max_page_size: Option<String>,
    pub timeline_concurrency: Option<String>,
    pub rest_addr: Option<String>,
    pub api_key: Option<String>,
}

impl Settings {
    /// Read every setting from the process environment.
    ///
    /// Call this once at startup, after loading any `.env` file.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        Self {
            fhir_base_url: var("FHIR_BASE_URL"),
            fhir_api_root: var("FHIR_API_ROOT"),
            fhir_project: var("FHIR_PROJECT"),
            fhir_location: var("FHIR_LOCATION"),
            fhir_dataset: var("FHIR_DATASET"),
            fhir_store: var("FHIR_STORE"),
            fhir_access_token: var("FHIR_ACCESS_TOKEN"),
            fhir_language: var("FHIR_LANGUAGE"),
            fhir_timeout_secs: var("FHIR_TIMEOUT_SECS"),
            terminology_base_url: var("TERMINOLOGY_BASE_URL"),
            terminology_token: var("TERMINOLOGY_TOKEN"),
            terminology_timeout_secs: var("TERMINOLOGY_TIMEOUT_SECS"),
            otp_base_url: var("OTP_BASE_URL"),
            otp_timeout_secs: var("OTP_TIMEOUT_SECS"),
            request_timeout_secs: var("REQUEST_TIMEOUT_SECS"),
            aggregation_policy: var("AGGREGATION_POLICY"),
            max_page_size: var("MAX_PAGE_SIZE"),
            timeline_concurrency: var("TIMELINE_CONCURRENCY"),
            rest_addr: var("CARE_REST_ADDR"),
            api_key: var("API_KEY"),
        }
    }
}

/// How the gateway obtains bearer tokens.
#[derive(Clone)]
pub enum FhirCredentials {
    Static(String),
    /// Ask the gcloud CLI, cached by the token source.
    Gcloud,
}

impl std::fmt::Debug for FhirCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FhirCredentials::Static(_) => f.write_str("Static(****)"),
            FhirCredentials::Gcloud => f.write_str("Gcloud"),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    fhir_base_url: String,
    fhir_credentials: FhirCredentials,
    fhir_language: String,
    fhir_timeout: Duration,
    terminology_base_url: String,
    terminology_token: String,
    terminology_timeout: Duration,
    otp_base_url: String,
    otp_timeout: Duration,
    request_timeout: Duration,
    aggregation_policy: PartialFailurePolicy,
    max_page_size: u32,
    timeline_concurrency: usize,
    rest_addr: SocketAddr,
    api_key: Option<String>,
}

impl CoreConfig {
    /// Validate raw settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Missing`] when a required value is absent or blank.
    /// - [`ConfigError::Invalid`] when a value does not parse or is out of range.
    pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
        let fhir_base_url = match present(settings.fhir_base_url) {
            Some(url) => url,
            None => {
                let root = present(settings.fhir_api_root)
                    .unwrap_or_else(|| DEFAULT_FHIR_API_ROOT.to_owned());
                fhir::store_base_url(
                    &root,
                    &required(settings.fhir_project, "FHIR_PROJECT")?,
                    &required(settings.fhir_location, "FHIR_LOCATION")?,
                    &required(settings.fhir_dataset, "FHIR_DATASET")?,
                    &required(settings.fhir_store, "FHIR_STORE")?,
                )
            }
        };
        let fhir_base_url = http_url(fhir_base_url, "FHIR_BASE_URL")?;

        let fhir_credentials = match present(settings.fhir_access_token) {
            Some(token) => FhirCredentials::Static(token),
            None => FhirCredentials::Gcloud,
        };

        let request_timeout = seconds(
            settings.request_timeout_secs,
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT,
        )?;
        if request_timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_SECS",
                reason: format!("must be at most {}", MAX_REQUEST_TIMEOUT.as_secs()),
            });
        }

        let aggregation_policy = match present(settings.aggregation_policy) {
            None => PartialFailurePolicy::default(),
            Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                key: "AGGREGATION_POLICY",
                reason,
            })?,
        };

        let max_page_size = match present(settings.max_page_size) {
            None => DEFAULT_MAX_PAGE_SIZE,
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|n| (1..=MAX_PAGE_SIZE_LIMIT).contains(n))
                .ok_or_else(|| ConfigError::Invalid {
                    key: "MAX_PAGE_SIZE",
                    reason: format!("expected 1..={MAX_PAGE_SIZE_LIMIT}, got {value:?}"),
                })?,
        };

        let timeline_concurrency = match present(settings.timeline_concurrency) {
            None => DEFAULT_TIMELINE_CONCURRENCY,
            Some(value) => value
                .parse::<usize>()
                .ok()
                .filter(|n| (1..=MAX_TIMELINE_CONCURRENCY).contains(n))
                .ok_or_else(|| ConfigError::Invalid {
                    key: "TIMELINE_CONCURRENCY",
                    reason: format!("expected 1..={MAX_TIMELINE_CONCURRENCY}, got {value:?}"),
                })?,
        };

        let rest_addr = present(settings.rest_addr)
            .unwrap_or_else(|| DEFAULT_REST_ADDR.to_owned())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "CARE_REST_ADDR",
                reason: e.to_string(),
            })?;

        Ok(Self {
            fhir_base_url,
            fhir_credentials,
            fhir_language: present(settings.fhir_language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned()),
            fhir_timeout: seconds(
                settings.fhir_timeout_secs,
                "FHIR_TIMEOUT_SECS",
                DEFAULT_FHIR_TIMEOUT,
            )?,
            terminology_base_url: http_url(
                required(settings.terminology_base_url, "TERMINOLOGY_BASE_URL")?,
                "TERMINOLOGY_BASE_URL",
            )?,
            terminology_token: required(settings.terminology_token, "TERMINOLOGY_TOKEN")?,
            terminology_timeout: seconds(
                settings.terminology_timeout_secs,
                "TERMINOLOGY_TIMEOUT_SECS",
                DEFAULT_TERMINOLOGY_TIMEOUT,
            )?,
            otp_base_url: http_url(required(settings.otp_base_url, "OTP_BASE_URL")?, "OTP_BASE_URL")?,
            otp_timeout: seconds(
                settings.otp_timeout_secs,
                "OTP_TIMEOUT_SECS",
                DEFAULT_OTP_TIMEOUT,
            )?,
            request_timeout,
            aggregation_policy,
            max_page_size,
            timeline_concurrency,
            rest_addr,
            api_key: present(settings.api_key),
        })
    }

    pub fn fhir_base_url(&self) -> &str {
        &self.fhir_base_url
    }

    pub fn fhir_credentials(&self) -> &FhirCredentials {
        &self.fhir_credentials
    }

    pub fn fhir_language(&self) -> &str {
        &self.fhir_language
    }

    pub fn fhir_timeout(&self) -> Duration {
        self.fhir_timeout
    }

    pub fn terminology_base_url(&self) -> &str {
        &self.terminology_base_url
    }

    pub fn terminology_token(&self) -> &str {
        &self.terminology_token
    }

    pub fn terminology_timeout(&self) -> Duration {
        self.terminology_timeout
    }

    pub fn otp_base_url(&self) -> &str {
        &self.otp_base_url
    }

    pub fn otp_timeout(&self) -> Duration {
        self.otp_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn aggregation_policy(&self) -> PartialFailurePolicy {
        self.aggregation_policy
    }

    pub fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    /// Encounters a timeline gathers at once.
    pub fn timeline_concurrency(&self) -> usize {
        self.timeline_concurrency
    }

    pub fn rest_addr(&self) -> SocketAddr {
        self.rest_addr
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    present(value).ok_or(ConfigError::Missing(key))
}

fn http_url(value: String, key: &'static str) -> Result<String, ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(value.trim_end_matches('/').to_owned())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: format!("expected an http(s) URL, got {value:?}"),
        })
    }
}

fn seconds(
    value: Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match present(value) {
        None => Ok(default),
        Some(value) => value
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::Invalid {
                key,
                reason: format!("expected a positive number of seconds, got {value:?}"),
            }),
    }
}
