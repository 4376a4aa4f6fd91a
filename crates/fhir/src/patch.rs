//! JSON-Patch operations applied to a single resource.

use crate::{FhirError, FhirResult};
use serde::Serialize;
use serde_json::Value;

/// Content type the store expects for patch bodies.
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
    Test,
}

/// One `{op, path, value}` step. A patch is an ordered slice of these, applied atomically.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }

    pub fn test(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOp::Test,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    fn validate(&self, index: usize) -> FhirResult<()> {
        if !self.path.starts_with('/') {
            return Err(FhirError::InvalidInput(format!(
                "patch[{index}] path must be a JSON pointer, got {:?}",
                self.path
            )));
        }
        if self.path == "/resourceType" || self.path == "/id" {
            return Err(FhirError::InvalidInput(format!(
                "patch[{index}] may not change {}",
                self.path
            )));
        }
        match (self.op, &self.value) {
            (PatchOp::Remove, Some(_)) => Err(FhirError::InvalidInput(format!(
                "patch[{index}] remove must not carry a value"
            ))),
            (PatchOp::Add | PatchOp::Replace | PatchOp::Test, None) => Err(
                FhirError::InvalidInput(format!("patch[{index}] requires a value")),
            ),
            _ => Ok(()),
        }
    }
}

/// Check a whole patch before it is sent.
///
/// # Errors
///
/// Returns [`FhirError::InvalidInput`] for an empty patch or any malformed operation.
pub fn validate_patch(ops: &[PatchOperation]) -> FhirResult<()> {
    if ops.is_empty() {
        return Err(FhirError::InvalidInput("patch is empty".into()));
    }
    ops.iter()
        .enumerate()
        .try_for_each(|(index, op)| op.validate(index))
}
