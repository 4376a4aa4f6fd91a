//! EpisodeOfCare wire model and translation helpers.
//!
//! Responsibilities:
//! - Define the domain-level carrier used by the access controller
//! - Define the wire model stored in the clinical store
//! - Translate between the two, rejecting records the controller cannot reason about
//!
//! Notes:
//! - The access level has no native FHIR field; it is a coding in `EpisodeOfCare.type`
//! - Emergency provenance lives in extensions and an identifier that links to the audit record

use crate::datatypes::{
    decode_wire, encode_wire, extension_value, CodeableConceptWire, ExtensionWire,
    IdentifierWire, Period, PeriodWire, ReferenceWire,
};
use crate::resource::{Reference, Resource, ResourceType};
use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Code system for the access level coding in `EpisodeOfCare.type`.
pub const ACCESS_LEVEL_SYSTEM: &str = "urn:care:access-level";

/// Identifier system linking a break-glass episode to its audit record.
pub const BREAK_GLASS_IDENTIFIER_SYSTEM: &str = "urn:care:break-glass-access";

pub const EXT_PATIENT_PHONE: &str = "urn:care:patient-phone";
pub const EXT_EMERGENCY_PRACTITIONER: &str = "urn:care:emergency-practitioner";
pub const EXT_EMERGENCY_PATIENT_PHONE: &str = "urn:care:emergency-patient-phone";
pub const EXT_EMERGENCY_PROVIDER_PHONE: &str = "urn:care:emergency-provider-phone";

// ============================================================================
// Public domain-level types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Planned,
    Active,
    Finished,
}

impl EpisodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeStatus::Planned => "planned",
            EpisodeStatus::Active => "active",
            EpisodeStatus::Finished => "finished",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Limited,
    Full,
    Emergency,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Limited => "limited",
            AccessLevel::Full => "full",
            AccessLevel::Emergency => "emergency",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "limited" => Some(AccessLevel::Limited),
            "full" => Some(AccessLevel::Full),
            "emergency" => Some(AccessLevel::Emergency),
            _ => None,
        }
    }
}

/// Who invoked emergency access, and against which phones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EmergencyProvenance {
    /// Id of the audit record written when access was granted.
    pub access_id: Uuid,
    pub practitioner_uid: String,
    pub patient_phone: String,
    pub provider_phone: String,
}

/// Domain-level carrier for an episode of care.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EpisodeOfCareData {
    /// Store-assigned id; `None` until created.
    pub id: Option<String>,
    pub patient: Reference,
    pub organization: Reference,
    pub status: EpisodeStatus,
    pub access_level: AccessLevel,
    #[serde(serialize_with = "serialize_period")]
    pub period: Period,
    /// Phone the patient verified with when the episode was opened by OTP.
    pub patient_phone: Option<String>,
    pub emergency: Option<EmergencyProvenance>,
}

impl EpisodeOfCareData {
    pub fn reference(&self) -> Option<Reference> {
        self.id
            .as_deref()
            .and_then(|id| Reference::to(ResourceType::EpisodeOfCare, id).ok())
    }
}

fn serialize_period<S: serde::Serializer>(period: &Period, s: S) -> Result<S::Ok, S::Error> {
    PeriodWire::from_domain(period).serialize(s)
}

// ============================================================================
// Public EpisodeOfCare operations
// ============================================================================

/// EpisodeOfCare translation operations.
///
/// Zero-sized namespace; all methods are associated functions.
pub struct EpisodeOfCare;

impl EpisodeOfCare {
    /// Read an episode from a stored resource.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if:
    /// - the resource is not an `EpisodeOfCare`,
    /// - a required field is missing or has the wrong type (the message names the path),
    /// - `status` is outside `planned | active | finished`,
    /// - no access level coding is present,
    /// - an emergency episode lacks its provenance.
    pub fn parse(resource: &Resource) -> FhirResult<EpisodeOfCareData> {
        if resource.resource_type != ResourceType::EpisodeOfCare.as_str() {
            return Err(FhirError::Translation(format!(
                "expected EpisodeOfCare, got {}",
                resource.resource_type
            )));
        }
        let wire: EpisodeOfCareWire = decode_wire(resource, "EpisodeOfCare")?;
        wire_to_domain(wire)
    }

    /// Render an episode as a resource ready to create or update.
    pub fn render(data: &EpisodeOfCareData) -> FhirResult<Resource> {
        encode_wire(&domain_to_wire(data), "EpisodeOfCare")
    }

    /// The `type` array carrying `level`, for patching an existing episode.
    pub fn access_level_concepts(level: AccessLevel) -> Value {
        serde_json::to_value(vec![CodeableConceptWire::coded(
            ACCESS_LEVEL_SYSTEM,
            level.as_str(),
        )])
        .unwrap_or(Value::Null)
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct EpisodeOfCareWire {
    resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    identifier: Vec<IdentifierWire>,
    status: EpisodeStatus,
    #[serde(rename = "type", default, skip_serializing_if = "Vec::is_empty")]
    kind: Vec<CodeableConceptWire>,
    patient: ReferenceWire,
    managing_organization: ReferenceWire,
    period: PeriodWire,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extension: Vec<ExtensionWire>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn wire_to_domain(wire: EpisodeOfCareWire) -> FhirResult<EpisodeOfCareData> {
    let access_level = wire
        .kind
        .iter()
        .find_map(|concept| concept.code_in(ACCESS_LEVEL_SYSTEM))
        .ok_or_else(|| FhirError::Translation("EpisodeOfCare has no access level coding".into()))
        .and_then(|code| {
            AccessLevel::from_code(code).ok_or_else(|| {
                FhirError::Translation(format!("unknown access level code: {code}"))
            })
        })?;

    let period = wire.period.into_domain("period")?;
    let patient_phone = extension_value(&wire.extension, EXT_PATIENT_PHONE).map(str::to_owned);

    let emergency = match access_level {
        AccessLevel::Emergency => Some(emergency_from_wire(&wire.identifier, &wire.extension)?),
        // An upgraded emergency episode keeps its provenance.
        _ => emergency_from_wire(&wire.identifier, &wire.extension).ok(),
    };

    Ok(EpisodeOfCareData {
        id: wire.id,
        patient: wire.patient.reference,
        organization: wire.managing_organization.reference,
        status: wire.status,
        access_level,
        period,
        patient_phone,
        emergency,
    })
}

fn emergency_from_wire(
    identifiers: &[IdentifierWire],
    extensions: &[ExtensionWire],
) -> FhirResult<EmergencyProvenance> {
    let access_id = identifiers
        .iter()
        .find(|i| i.system.as_deref() == Some(BREAK_GLASS_IDENTIFIER_SYSTEM))
        .and_then(|i| i.value.as_deref())
        .ok_or_else(|| FhirError::Translation("emergency episode has no access identifier".into()))
        .and_then(|v| {
            Uuid::parse_str(v).map_err(|_| {
                FhirError::Translation(format!("invalid break-glass access id: {v}"))
            })
        })?;

    let required = |url: &str| {
        extension_value(extensions, url)
            .map(str::to_owned)
            .ok_or_else(|| FhirError::Translation(format!("emergency episode is missing {url}")))
    };

    Ok(EmergencyProvenance {
        access_id,
        practitioner_uid: required(EXT_EMERGENCY_PRACTITIONER)?,
        patient_phone: required(EXT_EMERGENCY_PATIENT_PHONE)?,
        provider_phone: required(EXT_EMERGENCY_PROVIDER_PHONE)?,
    })
}

fn domain_to_wire(data: &EpisodeOfCareData) -> EpisodeOfCareWire {
    let mut identifier = Vec::new();
    let mut extension = Vec::new();

    if let Some(phone) = &data.patient_phone {
        extension.push(ExtensionWire::string(EXT_PATIENT_PHONE, phone));
    }
    if let Some(emergency) = &data.emergency {
        identifier.push(IdentifierWire {
            system: Some(BREAK_GLASS_IDENTIFIER_SYSTEM.to_owned()),
            value: Some(emergency.access_id.to_string()),
        });
        extension.push(ExtensionWire::string(
            EXT_EMERGENCY_PRACTITIONER,
            &emergency.practitioner_uid,
        ));
        extension.push(ExtensionWire::string(
            EXT_EMERGENCY_PATIENT_PHONE,
            &emergency.patient_phone,
        ));
        extension.push(ExtensionWire::string(
            EXT_EMERGENCY_PROVIDER_PHONE,
            &emergency.provider_phone,
        ));
    }

    EpisodeOfCareWire {
        resource_type: ResourceType::EpisodeOfCare.as_str().to_owned(),
        id: data.id.clone(),
        identifier,
        status: data.status,
        kind: vec![CodeableConceptWire::coded(
            ACCESS_LEVEL_SYSTEM,
            data.access_level.as_str(),
        )],
        patient: ReferenceWire::from(&data.patient),
        managing_organization: ReferenceWire::from(&data.organization),
        period: PeriodWire::from_domain(&data.period),
        extension,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn limited_episode() -> EpisodeOfCareData {
        EpisodeOfCareData {
            id: Some("ep1".into()),
            patient: Reference::parse("Patient/p1").unwrap(),
            organization: Reference::parse("Organization/HOSP01").unwrap(),
            status: EpisodeStatus::Active,
            access_level: AccessLevel::Limited,
            period: Period::starting(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()),
            patient_phone: Some("+8801711000000".into()),
            emergency: None,
        }
    }

    #[test]
    fn renders_access_level_as_type_coding() {
        let resource = EpisodeOfCare::render(&limited_episode()).unwrap();
        assert_eq!(resource.resource_type, "EpisodeOfCare");
        assert_eq!(
            resource.field("type").unwrap(),
            &json!([{
                "coding": [{"system": ACCESS_LEVEL_SYSTEM, "code": "limited"}],
                "text": "limited"
            }])
        );
        assert_eq!(
            resource.field("managingOrganization").unwrap(),
            &json!({"reference": "Organization/HOSP01"})
        );
    }

    #[test]
    fn parses_what_it_renders() {
        let data = limited_episode();
        let parsed = EpisodeOfCare::parse(&EpisodeOfCare::render(&data).unwrap()).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn tolerates_store_metadata() {
        let mut resource = EpisodeOfCare::render(&limited_episode()).unwrap();
        resource
            .fields
            .insert("meta".into(), json!({"versionId": "3", "lastUpdated": "2024-03-01T09:30:00Z"}));
        resource.fields.insert("language".into(), json!("en"));
        assert!(EpisodeOfCare::parse(&resource).is_ok());
    }

    #[test]
    fn emergency_provenance_is_required_and_kept_after_upgrade() {
        let access_id = Uuid::new_v4();
        let mut data = limited_episode();
        data.access_level = AccessLevel::Emergency;
        data.patient_phone = None;
        data.emergency = Some(EmergencyProvenance {
            access_id,
            practitioner_uid: "DR-0042".into(),
            patient_phone: "+8801711000000".into(),
            provider_phone: "+8801811000000".into(),
        });

        let mut resource = EpisodeOfCare::render(&data).unwrap();
        assert_eq!(EpisodeOfCare::parse(&resource).unwrap(), data);

        resource.fields.insert(
            "type".into(),
            EpisodeOfCare::access_level_concepts(AccessLevel::Full),
        );
        let upgraded = EpisodeOfCare::parse(&resource).unwrap();
        assert_eq!(upgraded.access_level, AccessLevel::Full);
        assert_eq!(upgraded.emergency.unwrap().access_id, access_id);

        resource.fields.remove("extension");
        resource.fields.insert(
            "type".into(),
            EpisodeOfCare::access_level_concepts(AccessLevel::Emergency),
        );
        assert!(matches!(
            EpisodeOfCare::parse(&resource),
            Err(FhirError::Translation(_))
        ));
    }

    #[test]
    fn rejects_unknown_status_with_path() {
        let mut resource = EpisodeOfCare::render(&limited_episode()).unwrap();
        resource.fields.insert("status".into(), json!("onhold"));
        match EpisodeOfCare::parse(&resource) {
            Err(FhirError::Translation(msg)) => assert!(msg.contains("status"), "{msg}"),
            other => panic!("expected Translation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_access_level() {
        let mut resource = EpisodeOfCare::render(&limited_episode()).unwrap();
        resource.fields.remove("type");
        assert!(matches!(
            EpisodeOfCare::parse(&resource),
            Err(FhirError::Translation(_))
        ));
    }

    #[test]
    fn rejects_other_resource_types() {
        let resource = Resource::new("Encounter").with_id("e1");
        assert!(matches!(
            EpisodeOfCare::parse(&resource),
            Err(FhirError::Translation(_))
        ));
    }
}
