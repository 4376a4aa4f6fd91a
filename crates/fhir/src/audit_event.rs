//! AuditEvent rendering for access-control decisions.
//!
//! Audit events are append-only: they are rendered and created, never parsed back or updated.

use crate::episode_of_care::BREAK_GLASS_IDENTIFIER_SYSTEM;
use crate::resource::{Reference, Resource, ResourceType};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub const ACCESS_ACTION_SYSTEM: &str = "urn:care:access-action";
const DICOM_SYSTEM: &str = "http://dicom.nema.org/resources/ontology/DCM";
const ACT_REASON_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActReason";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessAction {
    BreakGlass,
    Upgrade,
    End,
}

impl AccessAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessAction::BreakGlass => "break-glass",
            AccessAction::Upgrade => "upgrade",
            AccessAction::End => "end",
        }
    }
}

/// One access-control decision, as it should appear in the audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccessAuditRecord {
    pub access_id: Uuid,
    pub action: AccessAction,
    pub recorded: DateTime<Utc>,
    /// Practitioner UID for break-glass; otherwise the organization acting on the episode.
    pub actor: String,
    pub patient: Reference,
    pub organization: Reference,
    pub episode: Option<Reference>,
    pub reason: Option<String>,
    /// Free-form `name -> value` facts (phones, requested scope).
    pub details: Vec<(String, String)>,
}

/// AuditEvent rendering operations.
pub struct AuditEvent;

impl AuditEvent {
    pub fn render(record: &AccessAuditRecord) -> Resource {
        let emergency = record.action == AccessAction::BreakGlass;

        let (type_code, type_display) = if emergency {
            ("110113", "Security Alert")
        } else {
            ("110110", "Patient Record")
        };
        let (purpose_code, purpose_display) = if emergency {
            ("ETREAT", "Emergency Treatment")
        } else {
            ("TREAT", "treatment")
        };

        let mut entity = vec![
            json!({
                "what": {"identifier": {"system": BREAK_GLASS_IDENTIFIER_SYSTEM, "value": record.access_id.to_string()}},
                "detail": record
                    .details
                    .iter()
                    .map(|(name, value)| json!({"type": name, "valueString": value}))
                    .collect::<Vec<Value>>(),
            }),
            json!({"what": record.patient.to_json()}),
        ];
        if let Some(episode) = &record.episode {
            entity.push(json!({"what": episode.to_json()}));
        }

        let mut resource = Resource::new(ResourceType::AuditEvent.as_str())
            .with_field(
                "type",
                json!({"system": DICOM_SYSTEM, "code": type_code, "display": type_display}),
            )
            .with_field(
                "subtype",
                json!([{"system": ACCESS_ACTION_SYSTEM, "code": record.action.as_str()}]),
            )
            .with_field("action", "E")
            .with_field(
                "recorded",
                record.recorded.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .with_field("outcome", "0")
            .with_field(
                "purposeOfEvent",
                json!([{"coding": [{"system": ACT_REASON_SYSTEM, "code": purpose_code, "display": purpose_display}]}]),
            )
            .with_field(
                "agent",
                json!([{"who": {"identifier": {"value": record.actor}}, "requestor": true}]),
            )
            .with_field("source", json!({"observer": record.organization.to_json()}))
            .with_field("entity", entity);

        if let Some(reason) = &record.reason {
            resource = resource.with_field("outcomeDesc", reason.as_str());
        }
        resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(action: AccessAction) -> AccessAuditRecord {
        AccessAuditRecord {
            access_id: Uuid::nil(),
            action,
            recorded: Utc.with_ymd_and_hms(2024, 3, 1, 2, 15, 0).unwrap(),
            actor: "DR-0042".into(),
            patient: Reference::parse("Patient/p1").unwrap(),
            organization: Reference::parse("Organization/HOSP01").unwrap(),
            episode: None,
            reason: Some("patient unconscious".into()),
            details: vec![("provider-phone".into(), "+8801811000000".into())],
        }
    }

    #[test]
    fn break_glass_is_a_security_alert_for_emergency_treatment() {
        let resource = AuditEvent::render(&record(AccessAction::BreakGlass));
        assert_eq!(resource.resource_type, "AuditEvent");
        assert_eq!(resource.field("type").unwrap()["code"], json!("110113"));
        assert_eq!(
            resource.field("purposeOfEvent").unwrap()[0]["coding"][0]["code"],
            json!("ETREAT")
        );
        assert_eq!(
            resource.field("agent").unwrap()[0]["who"]["identifier"]["value"],
            json!("DR-0042")
        );
        assert_eq!(resource.field("recorded").unwrap(), &json!("2024-03-01T02:15:00.000Z"));
        assert_eq!(
            resource.field("outcomeDesc").unwrap(),
            &json!("patient unconscious")
        );
        assert!(resource.references_to(&Reference::parse("Patient/p1").unwrap()));
    }

    #[test]
    fn routine_actions_reference_the_episode() {
        let mut r = record(AccessAction::End);
        r.episode = Some(Reference::parse("EpisodeOfCare/ep1").unwrap());
        let resource = AuditEvent::render(&r);
        assert_eq!(resource.field("type").unwrap()["code"], json!("110110"));
        assert!(resource.references_to(&Reference::parse("EpisodeOfCare/ep1").unwrap()));
    }
}
