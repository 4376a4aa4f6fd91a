//! Search filters.

use crate::{FhirError, FhirResult};
use serde_json::Value;

/// Ordered `name=value` search filters. Values are strings only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchParams(Vec<(String, String)>);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((name.into(), value.into()));
        self
    }

    /// Build filters from a caller-supplied JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if `filters` is not an object, a name is empty, or any
    /// value is not a JSON string.
    pub fn from_json(filters: &Value) -> FhirResult<Self> {
        let map = filters
            .as_object()
            .ok_or_else(|| FhirError::InvalidInput("search filters must be an object".into()))?;

        let mut params = Self::new();
        for (name, value) in map {
            if name.trim().is_empty() {
                return Err(FhirError::InvalidInput("search filter name is empty".into()));
            }
            let value = value.as_str().ok_or_else(|| {
                FhirError::InvalidInput(format!(
                    "search filter `{name}` must be a string, got {value}"
                ))
            })?;
            params = params.with(name.as_str(), value);
        }
        Ok(params)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.0
    }
}
