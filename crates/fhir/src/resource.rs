//! Tagged resource envelope.
//!
//! A clinical resource is modelled as a strongly-typed header (`resourceType`, `id`) plus an open
//! bag of every other field. Business logic reads the header and the few helpers below; the
//! standard-specific body travels through untouched.

use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource types the care core reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    Patient,
    Practitioner,
    Organization,
    EpisodeOfCare,
    Encounter,
    Condition,
    Observation,
    AllergyIntolerance,
    MedicationRequest,
    ServiceRequest,
    Composition,
    AuditEvent,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Practitioner => "Practitioner",
            ResourceType::Organization => "Organization",
            ResourceType::EpisodeOfCare => "EpisodeOfCare",
            ResourceType::Encounter => "Encounter",
            ResourceType::Condition => "Condition",
            ResourceType::Observation => "Observation",
            ResourceType::AllergyIntolerance => "AllergyIntolerance",
            ResourceType::MedicationRequest => "MedicationRequest",
            ResourceType::ServiceRequest => "ServiceRequest",
            ResourceType::Composition => "Composition",
            ResourceType::AuditEvent => "AuditEvent",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A clinical resource as stored by the remote store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Every field other than `resourceType` and `id`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            fields: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Decode a resource from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::ResponseParse`] if the value is not an object with a string
    /// `resourceType`.
    pub fn from_value(value: Value) -> FhirResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| FhirError::ResponseParse(format!("not a resource: {e}")))
    }

    /// Decode a resource from a raw response body.
    pub fn from_slice(body: &[u8]) -> FhirResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| FhirError::ResponseParse(format!("not a resource: {e}")))
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.clone())
    }

    /// The `<Type>/<id>` reference to this resource, if it has been assigned an id.
    pub fn reference(&self) -> Option<Reference> {
        self.id
            .as_deref()
            .and_then(|id| Reference::new(&self.resource_type, id).ok())
    }

    /// Every relative reference found anywhere in the resource body.
    ///
    /// Any string under a `reference` key that parses as `<Type>/<id>` is collected, in document
    /// order. Absolute and contained (`#x`) references are skipped.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            collect_references(value, &mut out);
        }
        out
    }

    /// Whether any reference in the body points at `target`.
    pub fn references_to(&self, target: &Reference) -> bool {
        self.references().iter().any(|r| r == target)
    }

    /// Human-readable text of the resource's `code` concept.
    ///
    /// Prefers `code.text`; falls back to the first `code.coding[].display`.
    pub fn code_text(&self) -> Option<&str> {
        let code = self.fields.get("code")?;
        if let Some(text) = code.get("text").and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return Some(text);
            }
        }
        code.get("coding")?
            .as_array()?
            .iter()
            .filter_map(|c| c.get("display").and_then(Value::as_str))
            .find(|d| !d.trim().is_empty())
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        let mut map = resource.fields;
        map.insert("resourceType".into(), Value::String(resource.resource_type));
        if let Some(id) = resource.id {
            map.insert("id".into(), Value::String(id));
        }
        Value::Object(map)
    }
}

fn collect_references(value: &Value, out: &mut Vec<Reference>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                if key == "reference" {
                    if let Some(r) = inner.as_str().and_then(|s| Reference::parse(s).ok()) {
                        out.push(r);
                    }
                } else {
                    collect_references(inner, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        _ => {}
    }
}

/// A relative `<Type>/<id>` reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    resource_type: String,
    id: String,
}

impl Reference {
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if either part fails identifier validation.
    pub fn new(resource_type: &str, id: &str) -> FhirResult<Self> {
        validate_resource_type(resource_type)?;
        validate_id(id)?;
        Ok(Self {
            resource_type: resource_type.to_owned(),
            id: id.to_owned(),
        })
    }

    pub fn to(resource_type: ResourceType, id: &str) -> FhirResult<Self> {
        Self::new(resource_type.as_str(), id)
    }

    /// Parse `"<Type>/<id>"`.
    pub fn parse(input: &str) -> FhirResult<Self> {
        let (resource_type, id) = input
            .split_once('/')
            .ok_or_else(|| FhirError::InvalidInput(format!("not a reference: {input}")))?;
        Self::new(resource_type, id)
    }

    /// Accept either a full reference or a bare id of the expected type.
    pub fn parse_or_id(input: &str, expected: ResourceType) -> FhirResult<Self> {
        let reference = if input.contains('/') {
            Self::parse(input)?
        } else {
            Self::to(expected, input)?
        };
        if reference.resource_type != expected.as_str() {
            return Err(FhirError::InvalidInput(format!(
                "expected a {expected} reference, got {reference}"
            )));
        }
        Ok(reference)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The JSON shape used inside resources: `{"reference": "<Type>/<id>"}`.
    pub fn to_json(&self) -> Value {
        serde_json::json!({ "reference": self.to_string() })
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Reference::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Resource type names: an upper-case ASCII letter followed by ASCII letters.
pub fn validate_resource_type(resource_type: &str) -> FhirResult<()> {
    let mut chars = resource_type.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphabetic());
    if !valid {
        return Err(FhirError::InvalidInput(format!(
            "invalid resource type: {resource_type:?}"
        )));
    }
    Ok(())
}

/// Logical ids: 1 to 64 of `[A-Za-z0-9-.]`, and not dots alone (`.` and `..` are path segments).
pub fn validate_id(id: &str) -> FhirResult<()> {
    let valid = (1..=64).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !id.chars().all(|c| c == '.');
    if !valid {
        return Err(FhirError::InvalidInput(format!("invalid resource id: {id:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_keeps_header_and_open_fields() {
        let value = json!({
            "resourceType": "Condition",
            "id": "c1",
            "subject": {"reference": "Patient/p1"},
            "code": {"text": "Pulmonary Tuberculosis"}
        });

        let resource = Resource::from_value(value.clone()).unwrap();
        assert_eq!(resource.resource_type, "Condition");
        assert_eq!(resource.id.as_deref(), Some("c1"));
        assert!(resource.field("resourceType").is_none());
        assert_eq!(Value::from(resource), value);
    }

    #[test]
    fn missing_resource_type_is_a_parse_error() {
        let err = Resource::from_value(json!({"id": "x"})).unwrap_err();
        assert!(matches!(err, FhirError::ResponseParse(_)));
    }

    #[test]
    fn collects_nested_references_in_order() {
        let resource = Resource::from_value(json!({
            "resourceType": "Encounter",
            "id": "e1",
            "subject": {"reference": "Patient/p1"},
            "episodeOfCare": [{"reference": "EpisodeOfCare/ep1"}],
            "contained": [{"reference": "#inline"}],
            "partOf": {"reference": "https://other.example/Encounter/9"}
        }))
        .unwrap();

        let refs: Vec<String> = resource.references().iter().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["Patient/p1", "EpisodeOfCare/ep1"]);
        assert!(resource.references_to(&Reference::parse("EpisodeOfCare/ep1").unwrap()));
    }

    #[test]
    fn code_text_falls_back_to_coding_display() {
        let with_text = Resource::new("Condition")
            .with_field("code", json!({"text": "Asthma", "coding": [{"display": "x"}]}));
        assert_eq!(with_text.code_text(), Some("Asthma"));

        let coding_only = Resource::new("AllergyIntolerance")
            .with_field("code", json!({"coding": [{"code": "1"}, {"display": "Penicillin"}]}));
        assert_eq!(coding_only.code_text(), Some("Penicillin"));

        assert_eq!(Resource::new("Condition").code_text(), None);
    }

    #[test]
    fn reference_parsing_validates_both_parts() {
        let r = Reference::parse("EpisodeOfCare/abc-123").unwrap();
        assert_eq!(r.resource_type(), "EpisodeOfCare");
        assert_eq!(r.id(), "abc-123");

        assert!(Reference::parse("episodeOfCare/abc").is_err());
        assert!(Reference::parse("Patient/").is_err());
        assert!(Reference::parse("Patient").is_err());
        assert!(Reference::parse("Patient/a b").is_err());
    }

    #[test]
    fn parse_or_id_accepts_bare_ids_of_the_expected_type() {
        let bare = Reference::parse_or_id("p1", ResourceType::Patient).unwrap();
        assert_eq!(bare.to_string(), "Patient/p1");

        let full = Reference::parse_or_id("Patient/p1", ResourceType::Patient).unwrap();
        assert_eq!(bare, full);

        assert!(Reference::parse_or_id("Organization/o1", ResourceType::Patient).is_err());
    }

    #[test]
    fn dot_segments_are_not_ids() {
        assert!(validate_id(".").is_err());
        assert!(validate_id("..").is_err());
        assert!(validate_id("...").is_err());
        assert!(validate_id("v1.2").is_ok());
        assert!(Reference::parse("Patient/..").is_err());
    }
}
