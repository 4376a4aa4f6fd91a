//! Encounter wire model and translation helpers.
//!
//! An encounter is a single visit nested inside an episode of care. Only the two statuses the
//! access controller drives (`in-progress`, `finished`) are accepted.

use crate::datatypes::{decode_wire, encode_wire, CodingWire, Period, PeriodWire, ReferenceWire};
use crate::resource::{Reference, Resource, ResourceType};
use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};

/// `Encounter.class` is mandatory in the store's profile; visits are recorded as ambulatory.
pub const ENCOUNTER_CLASS_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";
pub const ENCOUNTER_CLASS_CODE: &str = "AMB";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncounterStatus {
    InProgress,
    Finished,
}

impl EncounterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EncounterStatus::InProgress => "in-progress",
            EncounterStatus::Finished => "finished",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EncounterData {
    pub id: Option<String>,
    pub episode: Reference,
    pub patient: Reference,
    pub organization: Option<Reference>,
    pub status: EncounterStatus,
    #[serde(serialize_with = "serialize_period")]
    pub period: Period,
}

impl EncounterData {
    pub fn reference(&self) -> Option<Reference> {
        self.id
            .as_deref()
            .and_then(|id| Reference::to(ResourceType::Encounter, id).ok())
    }
}

fn serialize_period<S: serde::Serializer>(period: &Period, s: S) -> Result<S::Ok, S::Error> {
    PeriodWire::from_domain(period).serialize(s)
}

/// Encounter translation operations.
pub struct Encounter;

impl Encounter {
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if the resource is not an encounter, has no episode
    /// reference, or has a status other than `in-progress`/`finished`.
    pub fn parse(resource: &Resource) -> FhirResult<EncounterData> {
        if resource.resource_type != ResourceType::Encounter.as_str() {
            return Err(FhirError::Translation(format!(
                "expected Encounter, got {}",
                resource.resource_type
            )));
        }
        let wire: EncounterWire = decode_wire(resource, "Encounter")?;

        let episode = wire
            .episode_of_care
            .into_iter()
            .next()
            .ok_or_else(|| FhirError::Translation("Encounter has no episodeOfCare".into()))?
            .reference;

        Ok(EncounterData {
            id: wire.id,
            episode,
            patient: wire.subject.reference,
            organization: wire.service_provider.map(|r| r.reference),
            status: wire.status,
            period: wire.period.into_domain("period")?,
        })
    }

    pub fn render(data: &EncounterData) -> FhirResult<Resource> {
        let wire = EncounterWire {
            resource_type: ResourceType::Encounter.as_str().to_owned(),
            id: data.id.clone(),
            status: data.status,
            class: CodingWire {
                system: Some(ENCOUNTER_CLASS_SYSTEM.to_owned()),
                code: Some(ENCOUNTER_CLASS_CODE.to_owned()),
                display: Some("ambulatory".to_owned()),
            },
            subject: ReferenceWire::from(&data.patient),
            episode_of_care: vec![ReferenceWire::from(&data.episode)],
            service_provider: data.organization.as_ref().map(ReferenceWire::from),
            period: PeriodWire::from_domain(&data.period),
        };
        encode_wire(&wire, "Encounter")
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct EncounterWire {
    resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    status: EncounterStatus,
    class: CodingWire,
    subject: ReferenceWire,
    #[serde(default)]
    episode_of_care: Vec<ReferenceWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service_provider: Option<ReferenceWire>,
    period: PeriodWire,
}
