//! Episode access controller.
//!
//! An episode of care grants a provider organization access to a patient's record. This module
//! drives its lifecycle:
//!
//! ```text
//! Requested ──► ActiveLimited ──upgrade──► ActiveFull ──► Finished
//!          ├──► ActiveFull                               ▲
//!          └──► ActiveEmergency ─────────────────────────┘
//! ```
//!
//! Every transition is a write to the clinical store; the store is the system of record and
//! nothing is cached here. Encounters are nested inside an active episode and are closed when
//! the episode ends.
//!
//! Authentication happens before any write. A rejected passcode leaves the store untouched.

use crate::audit::AuditSink;
use crate::constants::EPISODE_OF_CARE_PARAM;
use crate::notify::{CareEvent, EventPublisher};
use crate::otp::OtpVerifier;
use crate::{CareError, CareResult};
use care_types::{Msisdn, NonEmptyText, Otp};
use chrono::{SecondsFormat, Utc};
use fhir::{
    AccessAction, AccessAuditRecord, AccessLevel, EmergencyProvenance, Encounter, EncounterData,
    EncounterStatus, EpisodeOfCare, EpisodeOfCareData, EpisodeStatus, FhirStore, PatchOperation,
    Period, Reference, ResourceType, SearchParams,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Access state
// ============================================================================

/// The controller's view of an episode's lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    /// Persisted as `planned`; not yet usable.
    Requested,
    ActiveLimited,
    ActiveFull,
    ActiveEmergency,
    Finished,
}

impl AccessState {
    pub fn of(episode: &EpisodeOfCareData) -> Self {
        match (episode.status, episode.access_level) {
            (EpisodeStatus::Planned, _) => AccessState::Requested,
            (EpisodeStatus::Finished, _) => AccessState::Finished,
            (EpisodeStatus::Active, AccessLevel::Limited) => AccessState::ActiveLimited,
            (EpisodeStatus::Active, AccessLevel::Full) => AccessState::ActiveFull,
            (EpisodeStatus::Active, AccessLevel::Emergency) => AccessState::ActiveEmergency,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            AccessState::ActiveLimited | AccessState::ActiveFull | AccessState::ActiveEmergency
        )
    }
}

// ============================================================================
// Requests and results
// ============================================================================

/// Open an episode with the patient's own passcode.
#[derive(Clone)]
pub struct StartByOtp {
    pub patient_id: String,
    pub provider_code: String,
    pub msisdn: String,
    pub otp: String,
    pub full_access: bool,
}

/// Open an emergency episode on a practitioner's authority.
///
/// The passcode is checked against the provider's phone, not the patient's.
#[derive(Clone)]
pub struct BreakGlass {
    pub practitioner_uid: String,
    pub patient_id: String,
    pub provider_code: String,
    pub otp: String,
    pub provider_phone: String,
    pub patient_phone: String,
    /// Scope the practitioner asked for. Recorded in the audit trail; the episode itself is
    /// always emergency.
    pub full_access: bool,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpgradedEpisode {
    pub episode: EpisodeOfCareData,
    /// Encounters ever recorded against the episode, counted by the store.
    pub encounter_count: u64,
}

// ============================================================================
// Service
// ============================================================================

/// Drives episode and encounter lifecycles against the clinical store.
#[derive(Clone)]
pub struct EpisodeService {
    store: Arc<dyn FhirStore>,
    otp: Arc<dyn OtpVerifier>,
    audit: Arc<dyn AuditSink>,
    events: Arc<dyn EventPublisher>,
}

impl EpisodeService {
    pub fn new(
        store: Arc<dyn FhirStore>,
        otp: Arc<dyn OtpVerifier>,
        audit: Arc<dyn AuditSink>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            otp,
            audit,
            events,
        }
    }

    /// Verify the patient's passcode and open an active episode.
    ///
    /// # Errors
    ///
    /// - [`CareError::Validation`] for a malformed id, phone number or passcode.
    /// - [`CareError::Auth`] if the passcode is rejected. No resource is created.
    pub async fn start_by_otp(&self, request: StartByOtp) -> CareResult<EpisodeOfCareData> {
        let patient = Reference::parse_or_id(&request.patient_id, ResourceType::Patient)?;
        let organization =
            Reference::parse_or_id(&request.provider_code, ResourceType::Organization)?;
        let msisdn = Msisdn::parse(&request.msisdn)?;
        let otp = Otp::parse(&request.otp)?;

        self.require_otp(&msisdn, &otp, &patient).await?;

        let access_level = if request.full_access {
            AccessLevel::Full
        } else {
            AccessLevel::Limited
        };
        let episode = EpisodeOfCareData {
            id: None,
            patient,
            organization,
            status: EpisodeStatus::Active,
            access_level,
            period: Period::starting(Utc::now()),
            patient_phone: Some(msisdn.as_str().to_owned()),
            emergency: None,
        };

        let created = self.create_episode(&episode).await?;
        tracing::info!(
            episode = %display_ref(created.reference()),
            access_level = access_level.as_str(),
            "episode started"
        );
        self.publish_started(&created);
        Ok(created)
    }

    /// Grant emergency access on a practitioner's authority.
    ///
    /// The audit record is written before the episode. If it cannot be written, no episode is
    /// created.
    ///
    /// # Errors
    ///
    /// - [`CareError::Validation`] for a blank practitioner UID or malformed identifiers.
    /// - [`CareError::Auth`] if the provider passcode is rejected.
    pub async fn start_by_break_glass(&self, request: BreakGlass) -> CareResult<EpisodeOfCareData> {
        let practitioner = NonEmptyText::new(&request.practitioner_uid)
            .map_err(|_| CareError::Validation("practitioner UID is required".into()))?;
        let patient = Reference::parse_or_id(&request.patient_id, ResourceType::Patient)?;
        let organization =
            Reference::parse_or_id(&request.provider_code, ResourceType::Organization)?;
        let provider_phone = Msisdn::parse(&request.provider_phone)?;
        let patient_phone = Msisdn::parse(&request.patient_phone)?;
        let otp = Otp::parse(&request.otp)?;
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_owned);

        self.require_otp(&provider_phone, &otp, &patient).await?;

        let access_id = Uuid::new_v4();
        let requested_scope = if request.full_access { "full" } else { "limited" };
        let record = AccessAuditRecord {
            access_id,
            action: AccessAction::BreakGlass,
            recorded: Utc::now(),
            actor: practitioner.as_str().to_owned(),
            patient: patient.clone(),
            organization: organization.clone(),
            episode: None,
            reason: reason.clone(),
            details: vec![
                ("provider-phone".into(), provider_phone.as_str().to_owned()),
                ("patient-phone".into(), patient_phone.as_str().to_owned()),
                ("requested-scope".into(), requested_scope.to_owned()),
            ],
        };
        self.audit.record(&record).await?;

        let episode = EpisodeOfCareData {
            id: None,
            patient,
            organization,
            status: EpisodeStatus::Active,
            access_level: AccessLevel::Emergency,
            period: Period::starting(record.recorded),
            patient_phone: None,
            emergency: Some(EmergencyProvenance {
                access_id,
                practitioner_uid: practitioner.as_str().to_owned(),
                patient_phone: patient_phone.as_str().to_owned(),
                provider_phone: provider_phone.as_str().to_owned(),
            }),
        };

        let created = self.create_episode(&episode).await?;
        tracing::warn!(
            episode = %display_ref(created.reference()),
            %access_id,
            practitioner = practitioner.as_str(),
            reason = reason.as_deref().unwrap_or_default(),
            "break-glass access granted"
        );
        self.publish_started(&created);
        Ok(created)
    }

    /// Re-verify the patient and raise the episode to full access.
    ///
    /// Upgrading an episode that is already full changes nothing but still reports the
    /// encounter count.
    ///
    /// # Errors
    ///
    /// - [`CareError::State`] if the episode is not active.
    /// - [`CareError::Auth`] if the phone number does not match the episode or the passcode is
    ///   rejected.
    pub async fn upgrade_episode(
        &self,
        episode_id: &str,
        otp: &str,
        msisdn: &str,
    ) -> CareResult<UpgradedEpisode> {
        let reference = Reference::parse_or_id(episode_id, ResourceType::EpisodeOfCare)?;
        let msisdn = Msisdn::parse(msisdn)?;
        let otp = Otp::parse(otp)?;

        let episode = self.load_episode(&reference).await?;
        let state = AccessState::of(&episode);
        if !state.is_active() {
            return Err(CareError::State(format!(
                "{reference} is {state:?} and cannot be upgraded"
            )));
        }

        if let Some(expected) = patient_phone(&episode) {
            let expected = Msisdn::parse(expected)?;
            if expected != msisdn {
                tracing::warn!(episode = %reference, "upgrade phone does not match episode");
                return Err(CareError::Auth(
                    "phone number does not match the episode".into(),
                ));
            }
        }
        self.require_otp(&msisdn, &otp, &episode.patient).await?;

        let episode = if state == AccessState::ActiveFull {
            tracing::debug!(episode = %reference, "episode already has full access");
            episode
        } else {
            let patched = self
                .store
                .patch(
                    ResourceType::EpisodeOfCare.as_str(),
                    reference.id(),
                    &[
                        PatchOperation::test("/status", EpisodeStatus::Active.as_str()),
                        PatchOperation::replace(
                            "/type",
                            EpisodeOfCare::access_level_concepts(AccessLevel::Full),
                        ),
                    ],
                )
                .await?;
            let upgraded = EpisodeOfCare::parse(&patched)?;

            tracing::info!(episode = %reference, from = ?state, "episode upgraded to full access");
            self.audit_best_effort(AccessAction::Upgrade, &upgraded, msisdn.as_str())
                .await;
            self.events.publish(CareEvent::EpisodeUpgraded {
                episode: reference.to_string(),
                access_level: AccessLevel::Full.as_str().to_owned(),
            });
            upgraded
        };

        let encounter_count = self
            .store
            .count(
                ResourceType::Encounter.as_str(),
                &SearchParams::new().with(EPISODE_OF_CARE_PARAM, reference.to_string()),
            )
            .await?;

        Ok(UpgradedEpisode {
            episode,
            encounter_count,
        })
    }

    /// Close an episode and every encounter still open inside it.
    ///
    /// Ending a finished episode succeeds without writing anything.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::State`] if the episode was never activated.
    pub async fn end_episode(&self, episode_id: &str) -> CareResult<bool> {
        let reference = Reference::parse_or_id(episode_id, ResourceType::EpisodeOfCare)?;
        let episode = self.load_episode(&reference).await?;

        match AccessState::of(&episode) {
            AccessState::Finished => {
                tracing::debug!(episode = %reference, "episode already finished");
                return Ok(true);
            }
            AccessState::Requested => {
                return Err(CareError::State(format!(
                    "{reference} was never activated"
                )));
            }
            _ => {}
        }

        // The status test makes the end conditional on nothing having changed since the read.
        let ended_at = timestamp();
        self.store
            .patch(
                ResourceType::EpisodeOfCare.as_str(),
                reference.id(),
                &[
                    PatchOperation::test("/status", episode.status.as_str()),
                    PatchOperation::replace("/status", EpisodeStatus::Finished.as_str()),
                    PatchOperation::add("/period/end", ended_at),
                ],
            )
            .await
            .map_err(|err| match CareError::from(err) {
                CareError::Remote { status: 412, .. } => {
                    CareError::State(format!("{reference} changed while it was being ended"))
                }
                other => other,
            })?;

        // After the status change: an encounter created meanwhile is either swept here or closed
        // by start_encounter's re-check.
        self.close_open_encounters(&reference).await?;

        tracing::info!(episode = %reference, "episode ended");
        self.audit_best_effort(AccessAction::End, &episode, episode.organization.id())
            .await;
        self.events.publish(CareEvent::EpisodeEnded {
            episode: reference.to_string(),
        });
        Ok(true)
    }

    /// Open a visit inside an active episode.
    ///
    /// # Errors
    ///
    /// Returns [`CareError::State`] if the episode is not active.
    pub async fn start_encounter(&self, episode_id: &str) -> CareResult<EncounterData> {
        let reference = Reference::parse_or_id(episode_id, ResourceType::EpisodeOfCare)?;
        let episode = self.load_episode(&reference).await?;

        let state = AccessState::of(&episode);
        if !state.is_active() {
            return Err(CareError::State(format!(
                "cannot start an encounter: {reference} is {state:?}"
            )));
        }

        let encounter = EncounterData {
            id: None,
            episode: reference.clone(),
            patient: episode.patient.clone(),
            organization: Some(episode.organization.clone()),
            status: EncounterStatus::InProgress,
            period: Period::starting(Utc::now()),
        };
        let created = self
            .store
            .create(
                ResourceType::Encounter.as_str(),
                Encounter::render(&encounter)?,
            )
            .await?;
        let created = Encounter::parse(&created)?;

        // The episode may have ended between the check above and the create.
        let current = self.load_episode(&reference).await?;
        if !AccessState::of(&current).is_active() {
            if let Some(encounter_ref) = created.reference() {
                self.finish_encounter(&encounter_ref).await?;
            }
            return Err(CareError::State(format!(
                "cannot start an encounter: {reference} ended meanwhile"
            )));
        }

        let encounter_ref = display_ref(created.reference());
        tracing::info!(episode = %reference, encounter = %encounter_ref, "encounter started");
        self.events.publish(CareEvent::EncounterStarted {
            encounter: encounter_ref,
            episode: reference.to_string(),
        });
        Ok(created)
    }

    /// Close a visit. Closing a finished encounter returns it unchanged.
    pub async fn end_encounter(&self, encounter_id: &str) -> CareResult<EncounterData> {
        let reference = Reference::parse_or_id(encounter_id, ResourceType::Encounter)?;
        let current = self
            .store
            .read(ResourceType::Encounter.as_str(), reference.id())
            .await?;
        let current = Encounter::parse(&current)?;
        if current.status == EncounterStatus::Finished {
            return Ok(current);
        }
        self.finish_encounter(&reference).await
    }

    /// Active episodes of one patient. Accepts `Patient/<id>` or a bare id.
    pub async fn open_episodes(&self, patient: &str) -> CareResult<Vec<EpisodeOfCareData>> {
        let patient = Reference::parse_or_id(patient, ResourceType::Patient)?;
        self.active_episodes("patient", &patient).await
    }

    /// Active episodes managed by one provider organization.
    pub async fn open_organization_episodes(
        &self,
        provider_code: &str,
    ) -> CareResult<Vec<EpisodeOfCareData>> {
        let organization = Reference::parse_or_id(provider_code, ResourceType::Organization)?;
        self.active_episodes("organization", &organization).await
    }

    pub async fn episode(&self, episode_id: &str) -> CareResult<EpisodeOfCareData> {
        let reference = Reference::parse_or_id(episode_id, ResourceType::EpisodeOfCare)?;
        self.load_episode(&reference).await
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn require_otp(&self, msisdn: &Msisdn, otp: &Otp, patient: &Reference) -> CareResult<()> {
        if self.otp.verify(msisdn, otp).await? {
            return Ok(());
        }
        tracing::warn!(patient = %patient, "one-time passcode rejected");
        Err(CareError::Auth("one-time passcode rejected".into()))
    }

    async fn create_episode(&self, episode: &EpisodeOfCareData) -> CareResult<EpisodeOfCareData> {
        let created = self
            .store
            .create(
                ResourceType::EpisodeOfCare.as_str(),
                EpisodeOfCare::render(episode)?,
            )
            .await?;
        Ok(EpisodeOfCare::parse(&created)?)
    }

    async fn load_episode(&self, reference: &Reference) -> CareResult<EpisodeOfCareData> {
        let resource = self
            .store
            .read(ResourceType::EpisodeOfCare.as_str(), reference.id())
            .await?;
        Ok(EpisodeOfCare::parse(&resource)?)
    }

    async fn close_open_encounters(&self, episode: &Reference) -> CareResult<()> {
        let open = self
            .store
            .search(
                ResourceType::Encounter.as_str(),
                &SearchParams::new()
                    .with(EPISODE_OF_CARE_PARAM, episode.to_string())
                    .with("status", EncounterStatus::InProgress.as_str()),
            )
            .await?;
        for resource in open {
            let encounter = Encounter::parse(&resource)?;
            if let Some(encounter_ref) = encounter.reference() {
                self.finish_encounter(&encounter_ref).await?;
            }
        }
        Ok(())
    }

    async fn finish_encounter(&self, reference: &Reference) -> CareResult<EncounterData> {
        let patched = self
            .store
            .patch(
                ResourceType::Encounter.as_str(),
                reference.id(),
                &[
                    PatchOperation::replace("/status", EncounterStatus::Finished.as_str()),
                    PatchOperation::add("/period/end", timestamp()),
                ],
            )
            .await?;
        let finished = Encounter::parse(&patched)?;

        tracing::info!(encounter = %reference, "encounter ended");
        self.events.publish(CareEvent::EncounterEnded {
            encounter: reference.to_string(),
        });
        Ok(finished)
    }

    async fn active_episodes(
        &self,
        param: &str,
        owner: &Reference,
    ) -> CareResult<Vec<EpisodeOfCareData>> {
        let found = self
            .store
            .search(
                ResourceType::EpisodeOfCare.as_str(),
                &SearchParams::new()
                    .with("status", EpisodeStatus::Active.as_str())
                    .with(param, owner.to_string()),
            )
            .await?;
        found
            .iter()
            .map(|resource| EpisodeOfCare::parse(resource).map_err(CareError::from))
            .collect()
    }

    /// Audit a routine transition after it has been written. A failure here is logged, not
    /// returned: the transition already happened.
    async fn audit_best_effort(&self, action: AccessAction, episode: &EpisodeOfCareData, actor: &str) {
        let record = AccessAuditRecord {
            access_id: Uuid::new_v4(),
            action,
            recorded: Utc::now(),
            actor: actor.to_owned(),
            patient: episode.patient.clone(),
            organization: episode.organization.clone(),
            episode: episode.reference(),
            reason: None,
            details: Vec::new(),
        };
        if let Err(err) = self.audit.record(&record).await {
            tracing::warn!(
                action = action.as_str(),
                episode = %display_ref(episode.reference()),
                error = %err,
                "failed to audit episode transition"
            );
        }
    }

    fn publish_started(&self, episode: &EpisodeOfCareData) {
        self.events.publish(CareEvent::EpisodeStarted {
            episode: display_ref(episode.reference()),
            patient: episode.patient.to_string(),
            organization: episode.organization.to_string(),
            access_level: episode.access_level.as_str().to_owned(),
        });
    }
}

/// The phone an upgrade must be verified against, if the episode recorded one.
fn patient_phone(episode: &EpisodeOfCareData) -> Option<&str> {
    episode
        .patient_phone
        .as_deref()
        .or_else(|| episode.emergency.as_ref().map(|e| e.patient_phone.as_str()))
}

fn display_ref(reference: Option<Reference>) -> String {
    reference.map(|r| r.to_string()).unwrap_or_default()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
