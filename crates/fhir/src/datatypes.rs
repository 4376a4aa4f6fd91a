//! Wire shapes of the small FHIR datatypes shared by the typed resource models.

use crate::resource::{Reference, Resource};
use crate::{FhirError, FhirResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A start/end interval. An open `end` means the interval is still running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Period {
    pub fn starting(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct PeriodWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl PeriodWire {
    pub fn from_domain(period: &Period) -> Self {
        Self {
            start: Some(period.start),
            end: period.end,
        }
    }

    pub fn into_domain(self, field: &str) -> FhirResult<Period> {
        let start = self
            .start
            .ok_or_else(|| FhirError::Translation(format!("{field}.start is required")))?;
        Ok(Period {
            start,
            end: self.end,
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct ReferenceWire {
    pub reference: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl From<&Reference> for ReferenceWire {
    fn from(reference: &Reference) -> Self {
        Self {
            reference: reference.clone(),
            display: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct CodingWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct CodeableConceptWire {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<CodingWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConceptWire {
    pub fn coded(system: &str, code: &str) -> Self {
        Self {
            coding: vec![CodingWire {
                system: Some(system.to_owned()),
                code: Some(code.to_owned()),
                display: None,
            }],
            text: Some(code.to_owned()),
        }
    }

    pub fn code_in(&self, system: &str) -> Option<&str> {
        self.coding
            .iter()
            .find(|c| c.system.as_deref() == Some(system))
            .and_then(|c| c.code.as_deref())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExtensionWire {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

impl ExtensionWire {
    pub fn string(url: &str, value: &str) -> Self {
        Self {
            url: url.to_owned(),
            value_string: Some(value.to_owned()),
        }
    }
}

pub(crate) fn extension_value<'a>(extensions: &'a [ExtensionWire], url: &str) -> Option<&'a str> {
    extensions
        .iter()
        .find(|e| e.url == url)
        .and_then(|e| e.value_string.as_deref())
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct IdentifierWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Decode a typed wire model from a resource, naming the failing JSON path on mismatch.
pub(crate) fn decode_wire<T: DeserializeOwned>(resource: &Resource, label: &str) -> FhirResult<T> {
    let value = resource.to_value();
    serde_path_to_error::deserialize::<_, T>(value).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>".to_owned()
        } else {
            path
        };
        FhirError::Translation(format!("{label} schema mismatch at {path}: {source}"))
    })
}

/// Encode a typed wire model back into the envelope.
pub(crate) fn encode_wire<T: Serialize>(wire: &T, label: &str) -> FhirResult<Resource> {
    let value: Value = serde_json::to_value(wire)
        .map_err(|e| FhirError::Translation(format!("failed to serialise {label}: {e}")))?;
    Resource::from_value(value)
        .map_err(|e| FhirError::Translation(format!("failed to serialise {label}: {e}")))
}
