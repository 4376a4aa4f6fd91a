//! Route handlers. Each one validates nothing itself: input goes straight to the care services,
//! bounded by the request deadline, and errors leave through [`ApiError`].

use crate::dto::*;
use crate::error::{ApiError, ErrorRes};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Json},
};
use care_core::{with_deadline, CareError, CareResult};
use serde_json::Value;
use std::future::Future;
use terminology::{ConceptQuery, LookupOptions};

type ApiResult<T> = Result<T, ApiError>;

async fn bounded<T>(state: &AppState, fut: impl Future<Output = CareResult<T>>) -> ApiResult<T> {
    with_deadline(state.request_timeout, fut)
        .await
        .map_err(ApiError::from)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "care REST API is alive".into(),
    })
}

// ============================================================================
// Episodes
// ============================================================================

#[utoipa::path(
    post,
    path = "/episodes/otp",
    request_body = StartByOtpReq,
    responses(
        (status = 201, description = "Episode started", body = EpisodeRes),
        (status = 400, description = "Malformed input", body = ErrorRes),
        (status = 401, description = "Passcode rejected", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn start_by_otp(
    State(state): State<AppState>,
    Json(req): Json<StartByOtpReq>,
) -> ApiResult<(StatusCode, Json<EpisodeRes>)> {
    let episode = bounded(&state, state.services.episodes().start_by_otp(req.into())).await?;
    Ok((StatusCode::CREATED, Json(episode.into())))
}

#[utoipa::path(
    post,
    path = "/episodes/break-glass",
    request_body = BreakGlassReq,
    responses(
        (status = 201, description = "Emergency episode started", body = EpisodeRes),
        (status = 400, description = "Malformed input", body = ErrorRes),
        (status = 401, description = "Passcode rejected", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn start_by_break_glass(
    State(state): State<AppState>,
    Json(req): Json<BreakGlassReq>,
) -> ApiResult<(StatusCode, Json<EpisodeRes>)> {
    let episode = bounded(
        &state,
        state.services.episodes().start_by_break_glass(req.into()),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(episode.into())))
}

#[utoipa::path(
    get,
    path = "/episodes/{id}",
    params(("id" = String, Path, description = "Episode id")),
    responses(
        (status = 200, description = "Episode", body = EpisodeRes),
        (status = 404, description = "No such episode", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_episode(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EpisodeRes>> {
    let episode = bounded(&state, state.services.episodes().episode(&id)).await?;
    Ok(Json(episode.into()))
}

#[utoipa::path(
    post,
    path = "/episodes/{id}/upgrade",
    params(("id" = String, Path, description = "Episode id")),
    request_body = UpgradeReq,
    responses(
        (status = 200, description = "Episode upgraded", body = UpgradeRes),
        (status = 401, description = "Phone mismatch or passcode rejected", body = ErrorRes),
        (status = 409, description = "Episode is not active", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn upgrade_episode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpgradeReq>,
) -> ApiResult<Json<UpgradeRes>> {
    let upgraded = bounded(
        &state,
        state
            .services
            .episodes()
            .upgrade_episode(&id, &req.otp, &req.msisdn),
    )
    .await?;
    Ok(Json(UpgradeRes {
        state: care_core::AccessState::of(&upgraded.episode),
        episode: upgraded.episode,
        encounter_count: upgraded.encounter_count,
    }))
}

#[utoipa::path(
    post,
    path = "/episodes/{id}/end",
    params(("id" = String, Path, description = "Episode id")),
    responses(
        (status = 200, description = "Episode finished", body = EndEpisodeRes),
        (status = 409, description = "Episode was never activated", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn end_episode(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EndEpisodeRes>> {
    let ended = bounded(&state, state.services.episodes().end_episode(&id)).await?;
    Ok(Json(EndEpisodeRes {
        episode_id: id,
        ended,
    }))
}

#[utoipa::path(
    post,
    path = "/episodes/{id}/encounters",
    params(("id" = String, Path, description = "Episode id")),
    responses(
        (status = 201, description = "Encounter started", body = EncounterRes),
        (status = 409, description = "Episode is not active", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn start_encounter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<EncounterRes>)> {
    let encounter = bounded(&state, state.services.episodes().start_encounter(&id)).await?;
    Ok((StatusCode::CREATED, Json(EncounterRes { encounter })))
}

#[utoipa::path(
    post,
    path = "/encounters/{id}/end",
    params(("id" = String, Path, description = "Encounter id")),
    responses(
        (status = 200, description = "Encounter finished", body = EncounterRes),
        (status = 404, description = "No such encounter", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn end_encounter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EncounterRes>> {
    let encounter = bounded(&state, state.services.episodes().end_encounter(&id)).await?;
    Ok(Json(EncounterRes { encounter }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/episodes",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Active episodes of the patient", body = EpisodesRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn patient_episodes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EpisodesRes>> {
    let episodes = bounded(&state, state.services.episodes().open_episodes(&id)).await?;
    Ok(Json(EpisodesRes {
        episodes: episodes.into_iter().map(EpisodeRes::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/organizations/{code}/episodes",
    params(("code" = String, Path, description = "Provider organization code")),
    responses(
        (status = 200, description = "Active episodes managed by the organization", body = EpisodesRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn organization_episodes(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<EpisodesRes>> {
    let episodes = bounded(
        &state,
        state.services.episodes().open_organization_episodes(&code),
    )
    .await?;
    Ok(Json(EpisodesRes {
        episodes: episodes.into_iter().map(EpisodeRes::from).collect(),
    }))
}

// ============================================================================
// Timelines and summaries
// ============================================================================

#[utoipa::path(
    get,
    path = "/encounters/{id}/summary",
    params(("id" = String, Path, description = "Encounter id"), SummaryParams),
    responses(
        (status = 200, description = "Clinical resources recorded during the visit", body = VisitSummaryRes),
        (status = 400, description = "Invalid page size", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn visit_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SummaryParams>,
) -> ApiResult<Json<VisitSummaryRes>> {
    let view = bounded(
        &state,
        state.services.timeline().visit_summary(&id, params.max_page_size),
    )
    .await?;
    Ok(Json(VisitSummaryRes {
        encounter_id: id,
        complete: view.is_complete(),
        view,
    }))
}

#[utoipa::path(
    get,
    path = "/episodes/{id}/timeline",
    params(("id" = String, Path, description = "Episode id"), TimelineParams),
    responses(
        (status = 200, description = "Encounters of the episode, newest first", body = TimelineRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TimelineParams>,
) -> ApiResult<Json<TimelineRes>> {
    let entries = bounded(
        &state,
        state
            .services
            .timeline()
            .patient_timeline_with_count(&id, params.count),
    )
    .await?;
    Ok(Json(TimelineRes {
        episode_id: id,
        entries,
    }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/allergies",
    params(("id" = String, Path, description = "Patient id")),
    responses((status = 200, description = "Allergy names", body = SummaryRes))
)]
#[axum::debug_handler]
pub(crate) async fn allergies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SummaryRes>> {
    let items = bounded(&state, state.services.timeline().allergy_summary(&id)).await?;
    Ok(Json(SummaryRes {
        patient_id: id,
        items,
    }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/problems",
    params(("id" = String, Path, description = "Patient id")),
    responses((status = 200, description = "Problem list", body = SummaryRes))
)]
#[axum::debug_handler]
pub(crate) async fn problems(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SummaryRes>> {
    let items = bounded(&state, state.services.timeline().problem_summary(&id)).await?;
    Ok(Json(SummaryRes {
        patient_id: id,
        items,
    }))
}

#[utoipa::path(
    get,
    path = "/patients/{id}/everything",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "The store's Patient/$everything bundle, unmodified", body = Object, content_type = "application/fhir+json")
    )
)]
#[axum::debug_handler]
pub(crate) async fn everything(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let body = bounded(&state, state.services.patient_everything(&id)).await?;
    Ok(([(CONTENT_TYPE, fhir::gateway::FHIR_JSON_CONTENT_TYPE)], body))
}

// ============================================================================
// Terminology
// ============================================================================

#[utoipa::path(
    get,
    path = "/concepts/{org}/{source}/{concept}",
    params(
        ("org" = String, Path, description = "Owning organization, e.g. CIEL"),
        ("source" = String, Path, description = "Concept source"),
        ("concept" = String, Path, description = "Concept id"),
        ConceptParams
    ),
    responses(
        (status = 200, description = "Concept", body = ConceptRes),
        (status = 404, description = "No such concept", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn get_concept(
    State(state): State<AppState>,
    Path((org, source, concept)): Path<(String, String, String)>,
    Query(params): Query<ConceptParams>,
) -> ApiResult<Json<ConceptRes>> {
    let options = LookupOptions {
        verbose: params.verbose,
        include_mappings: params.include_mappings,
        include_reverse_mappings: params.include_reverse_mappings,
    };
    let terminology = state.services.terminology();
    let concept = bounded(&state, async {
        terminology
            .get_concept(&org, &source, &concept, &options)
            .await
            .map_err(CareError::from)
    })
    .await?;
    Ok(Json(ConceptRes { concept }))
}

#[utoipa::path(
    get,
    path = "/concepts/{org}/{source}",
    params(
        ("org" = String, Path, description = "Owning organization"),
        ("source" = String, Path, description = "Concept source"),
        ConceptListParams
    ),
    responses(
        (status = 200, description = "One page of concepts", body = ConceptsRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn list_concepts(
    State(state): State<AppState>,
    Path((org, source)): Path<(String, String)>,
    Query(params): Query<ConceptListParams>,
) -> ApiResult<Json<ConceptsRes>> {
    let terminology = state.services.terminology();
    let page = match params.cursor {
        Some(cursor) => {
            bounded(&state, async {
                terminology
                    .next_concepts(&cursor)
                    .await
                    .map_err(CareError::from)
            })
            .await?
        }
        None => {
            let query = ConceptQuery {
                q: params.q,
                concept_class: params.concept_class,
                data_type: params.datatype,
                locale: params.locale,
                include_retired: params.include_retired,
                limit: params.limit,
                page: params.page,
                ..ConceptQuery::default()
            };
            bounded(&state, async {
                terminology
                    .list_concepts(&org, &source, &query)
                    .await
                    .map_err(CareError::from)
            })
            .await?
        }
    };
    Ok(Json(ConceptsRes {
        concepts: page.items,
        next_cursor: page.next_cursor,
        has_more: page.has_more,
        total: page.total,
    }))
}

// ============================================================================
// Search
// ============================================================================

#[utoipa::path(
    post,
    path = "/fhir/{resource_type}/_search",
    params(("resource_type" = String, Path, description = "FHIR resource type")),
    request_body(content = Object, description = "Search parameters as a flat JSON object of strings"),
    responses(
        (status = 200, description = "Matching resources", body = SearchRes),
        (status = 400, description = "Non-string filter or bad resource type", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub(crate) async fn search(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Json(filters): Json<Value>,
) -> ApiResult<Json<SearchRes>> {
    let resources = bounded(&state, state.services.search(&resource_type, &filters)).await?;
    Ok(Json(SearchRes {
        resource_type,
        resources,
    }))
}
