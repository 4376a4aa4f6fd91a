//! Concept representation and lookup options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A concept as returned by the catalog.
///
/// The fields callers rely on are typed; everything else the catalog sends (names,
/// descriptions, mappings when requested) is kept in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub concept_class: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub retired: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Options for a single-concept lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LookupOptions {
    pub verbose: bool,
    pub include_mappings: bool,
    pub include_reverse_mappings: bool,
}

impl LookupOptions {
    pub(crate) fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        push_flag(&mut query, "verbose", self.verbose);
        push_flag(&mut query, "includeMappings", self.include_mappings);
        push_flag(&mut query, "includeReverseMappings", self.include_reverse_mappings);
        query
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc(String),
    Desc(String),
}

/// Filters for a concept listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConceptQuery {
    pub q: Option<String>,
    pub sort: Option<SortOrder>,
    pub concept_class: Option<String>,
    pub data_type: Option<String>,
    pub locale: Option<String>,
    pub include_retired: bool,
    pub verbose: bool,
    pub include_mappings: bool,
    pub include_reverse_mappings: bool,
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

impl ConceptQuery {
    pub fn search(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Self::default()
        }
    }

    pub fn with_concept_class(mut self, class: impl Into<String>) -> Self {
        self.concept_class = Some(class.into());
        self
    }

    pub(crate) fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        push_flag(&mut query, "verbose", self.verbose);
        if let Some(q) = &self.q {
            query.push(("q", q.clone()));
        }
        match &self.sort {
            Some(SortOrder::Asc(field)) => query.push(("sortAsc", field.clone())),
            Some(SortOrder::Desc(field)) => query.push(("sortDesc", field.clone())),
            None => {}
        }
        if let Some(class) = &self.concept_class {
            query.push(("conceptClass", class.clone()));
        }
        if let Some(data_type) = &self.data_type {
            query.push(("dataType", data_type.clone()));
        }
        if let Some(locale) = &self.locale {
            query.push(("locale", locale.clone()));
        }
        // The catalog expects 0/1 here, unlike the other boolean flags.
        query.push(("includeRetired", u8::from(self.include_retired).to_string()));
        push_flag(&mut query, "includeMappings", self.include_mappings);
        push_flag(&mut query, "includeReverseMappings", self.include_reverse_mappings);
        if let Some(limit) = self.limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(page) = self.page {
            query.push(("page", page.to_string()));
        }
        query
    }
}

fn push_flag(query: &mut Vec<(&'static str, String)>, name: &'static str, on: bool) {
    if on {
        query.push((name, "true".to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concept_keeps_unmodelled_fields() {
        let concept: Concept = serde_json::from_value(json!({
            "id": "106",
            "display_name": "Acute Coryza",
            "concept_class": "Diagnosis",
            "datatype": "N/A",
            "source": "CIEL",
            "owner": "CIEL",
            "url": "/orgs/CIEL/sources/CIEL/concepts/106/",
            "display_locale": "en"
        }))
        .unwrap();

        assert_eq!(concept.display_name, "Acute Coryza");
        assert!(!concept.retired);
        assert_eq!(concept.extra.get("display_locale"), Some(&json!("en")));
    }

    #[test]
    fn list_query_encodes_retired_as_digit() {
        let query = ConceptQuery::search("cold").with_concept_class("Diagnosis");
        let pairs = query.to_query();
        assert!(pairs.contains(&("q", "cold".to_owned())));
        assert!(pairs.contains(&("conceptClass", "Diagnosis".to_owned())));
        assert!(pairs.contains(&("includeRetired", "0".to_owned())));
        assert!(!pairs.iter().any(|(k, _)| *k == "verbose"));
    }

    #[test]
    fn sort_order_picks_one_direction() {
        let query = ConceptQuery {
            sort: Some(SortOrder::Desc("display_name".into())),
            ..ConceptQuery::default()
        };
        let pairs = query.to_query();
        assert!(pairs.contains(&("sortDesc", "display_name".to_owned())));
        assert!(!pairs.iter().any(|(k, _)| *k == "sortAsc"));
    }
}
