//! # Care Core
//!
//! Core business logic for episode-of-care access control and clinical timelines.
//!
//! This crate contains:
//! - the episode access controller (passcode and break-glass starts, upgrades, ends, encounters)
//! - the timeline and summary aggregator
//! - configuration, error taxonomy, passcode verification, audit and notification seams
//!
//! **No API concerns**: HTTP servers and command-line front ends live in `api-rest` and `cli`.
//! The clinical store is reached only through [`fhir::FhirStore`].

pub mod audit;
pub mod config;
pub mod constants;
pub mod episodes;
pub mod error;
pub mod notify;
pub mod otp;
pub mod services;
pub mod timeline;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use audit::{AuditSink, FhirAuditSink};
pub use config::{CoreConfig, FhirCredentials, Settings};
pub use episodes::{AccessState, BreakGlass, EpisodeService, StartByOtp, UpgradedEpisode};
pub use error::{CareError, CareResult, ConfigError};
pub use notify::{CareEvent, ChannelPublisher, EventPublisher, NoopPublisher, TracingPublisher};
pub use otp::{HttpOtpVerifier, OtpVerifier};
pub use services::{CareServices, Collaborators};
pub use timeline::{AggregatedView, PartialFailurePolicy, TimelineEntry, TimelineService};

use std::future::Future;
use std::time::Duration;

/// Bound a whole request by `limit`.
///
/// On expiry the inner future is dropped, which cancels any in-flight network call, and
/// [`CareError::Timeout`] is returned.
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> CareResult<T>
where
    F: Future<Output = CareResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(?limit, "request deadline exceeded");
            Err(CareError::Timeout(limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CareError>(1)
        };
        let err = with_deadline(Duration::from_millis(20), slow).await.unwrap_err();
        assert!(matches!(err, CareError::Timeout(_)));
    }

    #[tokio::test]
    async fn fast_work_passes_through() {
        let value = with_deadline(Duration::from_secs(1), async { Ok::<_, CareError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
