//! # API REST
//!
//! REST surface over the care services.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON bodies, CORS, API key, status mapping, request deadline)
//!
//! All behaviour lives in `care-core`; handlers translate HTTP to service calls and back.

#![warn(rust_2018_idioms)]

pub mod dto;
pub mod error;
mod handlers;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use care_core::{CareServices, CoreConfig};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use error::{ApiError, ErrorRes};

/// Header carrying the shared API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for every request handler.
#[derive(Clone)]
pub struct AppState {
    services: Arc<CareServices>,
    request_timeout: Duration,
    api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(services: CareServices, cfg: &CoreConfig) -> Self {
        Self::with_limits(services, cfg.request_timeout(), cfg.api_key())
    }

    /// State with an explicit deadline and optional API key.
    pub fn with_limits(services: CareServices, request_timeout: Duration, api_key: Option<&str>) -> Self {
        Self {
            services: Arc::new(services),
            request_timeout,
            api_key: api_key.map(Arc::from),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::start_by_otp,
        handlers::start_by_break_glass,
        handlers::get_episode,
        handlers::upgrade_episode,
        handlers::end_episode,
        handlers::start_encounter,
        handlers::end_encounter,
        handlers::patient_episodes,
        handlers::organization_episodes,
        handlers::visit_summary,
        handlers::timeline,
        handlers::allergies,
        handlers::problems,
        handlers::everything,
        handlers::get_concept,
        handlers::list_concepts,
        handlers::search,
    ),
    components(schemas(
        dto::HealthRes,
        dto::StartByOtpReq,
        dto::BreakGlassReq,
        dto::UpgradeReq,
        dto::EpisodeRes,
        dto::UpgradeRes,
        dto::EndEpisodeRes,
        dto::EpisodesRes,
        dto::EncounterRes,
        dto::VisitSummaryRes,
        dto::TimelineRes,
        dto::SummaryRes,
        dto::ConceptRes,
        dto::ConceptsRes,
        dto::SearchRes,
        ErrorRes,
    ))
)]
pub struct ApiDoc;

/// Build the application router.
///
/// `/health` and the Swagger UI stay open; every other route requires the API key when one is
/// configured.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/episodes/otp", post(handlers::start_by_otp))
        .route("/episodes/break-glass", post(handlers::start_by_break_glass))
        .route("/episodes/:id", get(handlers::get_episode))
        .route("/episodes/:id/upgrade", post(handlers::upgrade_episode))
        .route("/episodes/:id/end", post(handlers::end_episode))
        .route("/episodes/:id/encounters", post(handlers::start_encounter))
        .route("/episodes/:id/timeline", get(handlers::timeline))
        .route("/encounters/:id/end", post(handlers::end_encounter))
        .route("/encounters/:id/summary", get(handlers::visit_summary))
        .route("/patients/:id/episodes", get(handlers::patient_episodes))
        .route("/patients/:id/allergies", get(handlers::allergies))
        .route("/patients/:id/problems", get(handlers::problems))
        .route("/patients/:id/everything", get(handlers::everything))
        .route("/organizations/:code/episodes", get(handlers::organization_episodes))
        .route("/concepts/:org/:source", get(handlers::list_concepts))
        .route("/concepts/:org/:source/:concept", get(handlers::get_concept))
        .route("/fhir/:resource_type/_search", post(handlers::search))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(req).await;
    };
    let verdict = match req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(key) if key == expected => Ok(()),
        Some(_) => Err("Invalid API key"),
        None => Err("Missing x-api-key header"),
    };
    match verdict {
        Ok(()) => next.run(req).await,
        Err(message) => {
            tracing::warn!(path = %req.uri().path(), "{message}");
            unauthorized(message)
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorRes {
            error: "auth".into(),
            message: message.into(),
        }),
    )
        .into_response()
}
