//! Bearer credential sources for the clinical store.
//!
//! The gateway asks its [`TokenSource`] for a token on every call and never caches one itself.
//! A source that is expensive to query caches on its own side.

use crate::{FhirError, FhirResult};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a bearer token for the next request.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Auth`] if no token can be obtained. Callers do not retry.
    async fn token(&self) -> FhirResult<String>;
}

/// A fixed token supplied at startup.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> FhirResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(FhirError::Auth("static token is empty".into()));
        }
        Ok(Self(token.trim().to_owned()))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(****)")
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> FhirResult<String> {
        Ok(self.0.clone())
    }
}

/// Default lifetime assumed for a token printed by the gcloud CLI (they live for an hour).
pub const DEFAULT_GCLOUD_TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

/// Application-default credentials obtained through `gcloud auth print-access-token`.
#[derive(Debug)]
pub struct GcloudToken {
    program: String,
    ttl: Duration,
    cached: RwLock<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    fetched_at: Instant,
}

impl GcloudToken {
    pub fn new() -> Self {
        Self::with_program("gcloud", DEFAULT_GCLOUD_TOKEN_TTL)
    }

    /// Use a different executable (for example an absolute path to the SDK) and cache lifetime.
    pub fn with_program(program: impl Into<String>, ttl: Duration) -> Self {
        Self {
            program: program.into(),
            ttl,
            cached: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> FhirResult<String> {
        let output = tokio::process::Command::new(&self.program)
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| FhirError::Auth(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FhirError::Auth(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if token.is_empty() {
            return Err(FhirError::Auth(format!("{} printed no token", self.program)));
        }
        Ok(token)
    }
}

impl Default for GcloudToken {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenSource for GcloudToken {
    async fn token(&self) -> FhirResult<String> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }

        let mut slot = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }

        tracing::debug!("refreshing clinical store access token");
        let value = self.fetch().await?;
        *slot = Some(CachedToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }
}
