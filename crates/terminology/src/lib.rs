//! Read-only client for the terminology catalog.
//!
//! The catalog resolves coded clinical concepts (diagnoses, symptoms, findings) by
//! organization, source and concept id. This crate only looks concepts up; it never writes.

mod client;
mod concept;

pub use client::{TerminologyClient, TerminologyConfig, DEFAULT_TERMINOLOGY_TIMEOUT};
pub use concept::{Concept, ConceptQuery, LookupOptions, SortOrder};

use std::time::Duration;

/// Errors returned by the terminology client.
#[derive(Debug, thiserror::Error)]
pub enum TerminologyError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("terminology service returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("unparseable terminology response: {0}")]
    ResponseParse(String),

    #[error("terminology call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Type alias for Results that can fail with a [`TerminologyError`].
pub type TerminologyResult<T> = Result<T, TerminologyError>;
