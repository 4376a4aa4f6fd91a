//! Search result envelope (`Bundle` of type `searchset`).
//!
//! The store's search contract is checked key by key. A body that is valid JSON but does not
//! have the searchset shape is a [`FhirError::ServerContract`], never an empty result.

use crate::resource::Resource;
use crate::{FhirError, FhirResult};
use serde_json::{Map, Value};

/// Keys every searchset envelope must carry, even when nothing matched.
pub const MANDATORY_BUNDLE_KEYS: [&str; 4] = ["resourceType", "type", "total", "link"];

/// Keys every search entry must carry.
pub const MANDATORY_ENTRY_KEYS: [&str; 3] = ["fullUrl", "resource", "search"];

/// A validated searchset.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchSet {
    pub total: u64,
    pub resources: Vec<Resource>,
    /// Absolute URL of the next page, from `link[relation=next]`.
    pub next_link: Option<String>,
}

/// Parse and validate a search response body.
///
/// # Errors
///
/// - [`FhirError::ResponseParse`] if the body is not a JSON object.
/// - [`FhirError::ServerContract`] if a mandatory key is missing, `resourceType` is not
///   `Bundle`, `type` is not `searchset`, `total` is not a non-negative integer, or an entry is
///   malformed.
pub fn parse_searchset(body: &[u8]) -> FhirResult<SearchSet> {
    let envelope: Map<String, Value> = serde_json::from_slice(body).map_err(|e| {
        FhirError::ResponseParse(format!("search response is not a JSON object: {e}"))
    })?;

    for key in MANDATORY_BUNDLE_KEYS {
        if !envelope.contains_key(key) {
            return Err(FhirError::ServerContract(format!(
                "search response is missing mandatory key `{key}`"
            )));
        }
    }

    expect_literal(&envelope, "resourceType", "Bundle")?;
    expect_literal(&envelope, "type", "searchset")?;

    let total = envelope
        .get("total")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            FhirError::ServerContract("Bundle `total` is not a non-negative integer".into())
        })?;

    let next_link = envelope
        .get("link")
        .and_then(Value::as_array)
        .and_then(|links| {
            links.iter().find(|l| l.get("relation").and_then(Value::as_str) == Some("next"))
        })
        .and_then(|l| l.get("url").and_then(Value::as_str))
        .map(str::to_owned);

    let entries: &[Value] = match envelope.get("entry") {
        None | Some(Value::Null) => &[],
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(FhirError::ServerContract(
                "Bundle `entry` is not an array".into(),
            ))
        }
    };

    let resources = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| entry_resource(index, entry))
        .collect::<FhirResult<Vec<_>>>()?;

    Ok(SearchSet {
        total,
        resources,
        next_link,
    })
}

fn expect_literal(envelope: &Map<String, Value>, key: &str, expected: &str) -> FhirResult<()> {
    match envelope.get(key).and_then(Value::as_str) {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(FhirError::ServerContract(format!(
            "Bundle `{key}` is `{actual}`, expected `{expected}`"
        ))),
        None => Err(FhirError::ServerContract(format!(
            "Bundle `{key}` is not a string"
        ))),
    }
}

fn entry_resource(index: usize, entry: &Value) -> FhirResult<Resource> {
    let entry = entry.as_object().ok_or_else(|| {
        FhirError::ServerContract(format!("Bundle entry[{index}] is not an object"))
    })?;

    for key in MANDATORY_ENTRY_KEYS {
        if !entry.contains_key(key) {
            return Err(FhirError::ServerContract(format!(
                "Bundle entry[{index}] is missing mandatory key `{key}`"
            )));
        }
    }

    let resource = entry
        .get("resource")
        .filter(|r| r.is_object())
        .cloned()
        .ok_or_else(|| {
            FhirError::ServerContract(format!("Bundle entry[{index}].resource is not an object"))
        })?;

    Resource::from_value(resource).map_err(|e| {
        FhirError::ServerContract(format!("Bundle entry[{index}].resource: {e}"))
    })
}
