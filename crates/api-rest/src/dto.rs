//! Request and response bodies of the REST surface.
//!
//! Clinical payloads are passed through as FHIR-shaped JSON and documented as plain objects.

use care_core::{AccessState, AggregatedView, BreakGlass, StartByOtp, TimelineEntry};
use fhir::{EncounterData, EpisodeOfCareData, Resource};
use serde::{Deserialize, Serialize};
use terminology::Concept;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

// ============================================================================
// Episodes
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartByOtpReq {
    pub patient_id: String,
    pub provider_code: String,
    pub msisdn: String,
    pub otp: String,
    #[serde(default)]
    pub full_access: bool,
}

impl From<StartByOtpReq> for StartByOtp {
    fn from(req: StartByOtpReq) -> Self {
        StartByOtp {
            patient_id: req.patient_id,
            provider_code: req.provider_code,
            msisdn: req.msisdn,
            otp: req.otp,
            full_access: req.full_access,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BreakGlassReq {
    pub practitioner_uid: String,
    pub patient_id: String,
    pub provider_code: String,
    pub otp: String,
    pub provider_phone: String,
    pub patient_phone: String,
    #[serde(default)]
    pub full_access: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl From<BreakGlassReq> for BreakGlass {
    fn from(req: BreakGlassReq) -> Self {
        BreakGlass {
            practitioner_uid: req.practitioner_uid,
            patient_id: req.patient_id,
            provider_code: req.provider_code,
            otp: req.otp,
            provider_phone: req.provider_phone,
            patient_phone: req.patient_phone,
            full_access: req.full_access,
            reason: req.reason,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpgradeReq {
    pub otp: String,
    pub msisdn: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EpisodeRes {
    #[schema(value_type = Object)]
    pub episode: EpisodeOfCareData,
    #[schema(value_type = String, example = "active_limited")]
    pub state: AccessState,
}

impl From<EpisodeOfCareData> for EpisodeRes {
    fn from(episode: EpisodeOfCareData) -> Self {
        EpisodeRes {
            state: AccessState::of(&episode),
            episode,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpgradeRes {
    #[schema(value_type = Object)]
    pub episode: EpisodeOfCareData,
    #[schema(value_type = String)]
    pub state: AccessState,
    pub encounter_count: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EndEpisodeRes {
    pub episode_id: String,
    pub ended: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EpisodesRes {
    pub episodes: Vec<EpisodeRes>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EncounterRes {
    #[schema(value_type = Object)]
    pub encounter: EncounterData,
}

// ============================================================================
// Timelines and summaries
// ============================================================================

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SummaryParams {
    /// Upper bound on resources returned per type.
    pub max_page_size: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TimelineParams {
    /// Number of most recent encounters to include.
    pub count: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VisitSummaryRes {
    pub encounter_id: String,
    pub complete: bool,
    #[schema(value_type = Object)]
    pub view: AggregatedView,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TimelineRes {
    pub episode_id: String,
    #[schema(value_type = Vec<Object>)]
    pub entries: Vec<TimelineEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SummaryRes {
    pub patient_id: String,
    pub items: Vec<String>,
}

// ============================================================================
// Terminology
// ============================================================================

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConceptParams {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub include_mappings: bool,
    #[serde(default)]
    pub include_reverse_mappings: bool,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConceptListParams {
    pub q: Option<String>,
    pub concept_class: Option<String>,
    pub datatype: Option<String>,
    pub locale: Option<String>,
    #[serde(default)]
    pub include_retired: bool,
    pub limit: Option<u32>,
    pub page: Option<u32>,
    /// Continuation returned as `next_cursor` by a previous listing. Other filters are ignored
    /// when it is present.
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConceptRes {
    #[schema(value_type = Object)]
    pub concept: Concept,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConceptsRes {
    #[schema(value_type = Vec<Object>)]
    pub concepts: Vec<Concept>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total: Option<u64>,
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchRes {
    pub resource_type: String,
    #[schema(value_type = Vec<Object>)]
    pub resources: Vec<Resource>,
}
