//! FHIR boundary support for the care workspace.
//!
//! This crate provides:
//! - a generic resource envelope and typed references
//! - wire models for the resources the access controller owns (EpisodeOfCare, Encounter,
//!   AuditEvent), with translation to and from domain-level carriers
//! - searchset bundle validation
//! - the REST gateway to the clinical store, behind the [`FhirStore`] trait
//!
//! The store is the system of record. Nothing in this crate caches resources.

pub mod audit_event;
pub mod auth;
pub mod bundle;
mod datatypes;
pub mod encounter;
pub mod episode_of_care;
pub mod gateway;
pub mod patch;
pub mod resource;
pub mod search;

// Re-export facades
pub use audit_event::AuditEvent;
pub use encounter::Encounter;
pub use episode_of_care::EpisodeOfCare;

// Re-export public domain-level types
pub use audit_event::{AccessAction, AccessAuditRecord};
pub use auth::{GcloudToken, StaticToken, TokenSource};
pub use bundle::{parse_searchset, SearchSet};
pub use datatypes::Period;
pub use encounter::{EncounterData, EncounterStatus};
pub use episode_of_care::{AccessLevel, EmergencyProvenance, EpisodeOfCareData, EpisodeStatus};
pub use gateway::{store_base_url, FhirGateway, FhirStore, GatewayConfig};
pub use patch::{PatchOp, PatchOperation};
pub use resource::{Reference, Resource, ResourceType};
pub use search::SearchParams;

use std::time::Duration;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    /// Caller input was rejected before any request was made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No usable access token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The store answered with a non-2xx status.
    #[error("store returned {status}: {text} {diagnostics}")]
    Remote {
        status: u16,
        text: String,
        diagnostics: String,
        body: String,
    },

    /// The store answered 2xx with a body that is not the expected JSON.
    #[error("unparseable store response: {0}")]
    ResponseParse(String),

    /// A searchset bundle is missing mandatory structure.
    #[error("store broke the bundle contract: {0}")]
    ServerContract(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A stored resource does not match the typed wire model.
    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
