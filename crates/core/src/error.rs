use fhir::FhirError;
use std::time::Duration;
use terminology::TerminologyError;

/// Errors raised while validating startup configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The error taxonomy callers of the care core observe.
#[derive(Debug, thiserror::Error)]
pub enum CareError {
    /// Malformed caller input, rejected before any network call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Missing or rejected credentials, including a failed OTP check. Nothing was written.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// `body` is the raw error body, kept for diagnostics and left out of the message.
    #[error("remote service returned {status}: {text} {diagnostics}")]
    Remote {
        status: u16,
        text: String,
        diagnostics: String,
        body: String,
    },

    #[error("unparseable response: {0}")]
    ResponseParse(String),

    /// The remote reported success but the payload does not have the contracted shape.
    #[error("server contract violated: {0}")]
    ServerContract(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The episode or encounter is in a state that does not allow the operation.
    #[error("invalid state: {0}")]
    State(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("terminology error: {0}")]
    Terminology(#[from] TerminologyError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<FhirError> for CareError {
    fn from(err: FhirError) -> Self {
        match err {
            FhirError::InvalidInput(msg) => CareError::Validation(msg),
            FhirError::Auth(msg) => CareError::Auth(msg),
            FhirError::Remote {
                status,
                text,
                diagnostics,
                body,
            } => CareError::Remote {
                status,
                text,
                diagnostics,
                body,
            },
            FhirError::ResponseParse(msg) => CareError::ResponseParse(msg),
            FhirError::ServerContract(msg) => CareError::ServerContract(msg),
            FhirError::Timeout(limit) => CareError::Timeout(limit),
            FhirError::Transport(err) => CareError::Transport(err.to_string()),
            // A stored record the controller cannot read breaks the store contract.
            FhirError::Translation(msg) => CareError::ServerContract(msg),
        }
    }
}

impl From<care_types::TextError> for CareError {
    fn from(err: care_types::TextError) -> Self {
        CareError::Validation(err.to_string())
    }
}

pub type CareResult<T> = std::result::Result<T, CareError>;
