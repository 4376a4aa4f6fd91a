//! HTTP mapping of the care error taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use care_core::CareError;
use serde::Serialize;
use terminology::TerminologyError;
use utoipa::ToSchema;

/// Body of every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorRes {
    /// Stable machine-readable error kind, e.g. `validation` or `remote`.
    pub error: String,
    pub message: String,
}

/// A [`CareError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub CareError);

impl From<CareError> for ApiError {
    fn from(err: CareError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CareError::Validation(_) => StatusCode::BAD_REQUEST,
            CareError::Auth(_) => StatusCode::UNAUTHORIZED,
            CareError::State(_) => StatusCode::CONFLICT,
            CareError::Remote { status: 404, .. } => StatusCode::NOT_FOUND,
            CareError::Remote { .. }
            | CareError::ResponseParse(_)
            | CareError::ServerContract(_)
            | CareError::Transport(_) => StatusCode::BAD_GATEWAY,
            CareError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CareError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CareError::Terminology(err) => match err {
                TerminologyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                TerminologyError::Remote { status: 404, .. } => StatusCode::NOT_FOUND,
                TerminologyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                TerminologyError::Remote { .. }
                | TerminologyError::ResponseParse(_)
                | TerminologyError::Transport(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            CareError::Validation(_) => "validation",
            CareError::Auth(_) => "auth",
            CareError::Remote { .. } => "remote",
            CareError::ResponseParse(_) => "response_parse",
            CareError::ServerContract(_) => "server_contract",
            CareError::Timeout(_) => "timeout",
            CareError::State(_) => "state",
            CareError::Transport(_) => "transport",
            CareError::Terminology(_) => "terminology",
            CareError::Config(_) => "config",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(status = status.as_u16(), "request failed: {:?}", self.0);
        let body = ErrorRes {
            error: self.kind().into(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status_of(err: CareError) -> StatusCode {
        ApiError(err).status()
    }

    #[test]
    fn caller_faults_are_4xx() {
        assert_eq!(status_of(CareError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(CareError::Auth("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(CareError::State("x".into())), StatusCode::CONFLICT);
    }

    #[test]
    fn remote_not_found_passes_through() {
        let missing = CareError::Remote {
            status: 404,
            text: "Not Found".into(),
            diagnostics: String::new(),
            body: String::new(),
        };
        assert_eq!(status_of(missing), StatusCode::NOT_FOUND);

        let unavailable = CareError::Remote {
            status: 503,
            text: "Service Unavailable".into(),
            diagnostics: String::new(),
            body: String::new(),
        };
        assert_eq!(status_of(unavailable), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn upstream_faults_are_5xx() {
        assert_eq!(
            status_of(CareError::Timeout(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_of(CareError::ServerContract("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(CareError::Terminology(TerminologyError::Remote {
                status: 404,
                body: String::new(),
            })),
            StatusCode::NOT_FOUND
        );
    }
}
