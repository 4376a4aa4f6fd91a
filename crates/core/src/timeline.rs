//! Timeline and summary aggregation.
//!
//! Every view here is derived on request from independent searches against the clinical store
//! and is never cached. Per-type searches run concurrently; results land in ordered maps so the
//! assembled view does not depend on completion order. A timeline gathers at most
//! `visit_concurrency` encounters at a time.

use crate::constants::{
    DEFAULT_TIMELINE_CONCURRENCY, ENCOUNTER_PARAM, EPISODE_OF_CARE_PARAM, MAX_PAGE_SIZE_LIMIT,
};
use crate::{CareError, CareResult};
use fhir::{FhirStore, Reference, Resource, ResourceType, SearchParams};
use futures::future::join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// Resource types gathered for one visit.
pub const VISIT_RESOURCE_TYPES: [ResourceType; 6] = [
    ResourceType::Condition,
    ResourceType::Observation,
    ResourceType::Composition,
    ResourceType::ServiceRequest,
    ResourceType::MedicationRequest,
    ResourceType::AllergyIntolerance,
];

/// What to do when one per-type search fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartialFailurePolicy {
    /// Fail the whole view with the first error, in type order.
    #[default]
    FailFast,
    /// Keep going on remote errors and timeouts; report them per type in
    /// [`AggregatedView::failures`]. Other errors still fail the view.
    Degrade,
}

impl PartialFailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            PartialFailurePolicy::FailFast => "fail-fast",
            PartialFailurePolicy::Degrade => "degrade",
        }
    }
}

impl FromStr for PartialFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(PartialFailurePolicy::FailFast),
            "degrade" => Ok(PartialFailurePolicy::Degrade),
            other => Err(format!("expected `fail-fast` or `degrade`, got {other:?}")),
        }
    }
}

/// Resources grouped by type name.
///
/// Every requested type has an entry, empty when nothing matched. A type listed in `failures`
/// failed to load; its empty entry does not mean "no data".
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregatedView {
    pub resources: BTreeMap<String, Vec<Resource>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
}

impl AggregatedView {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub encounter: Resource,
    pub view: AggregatedView,
}

/// Read-only aggregation over the clinical store.
#[derive(Clone)]
pub struct TimelineService {
    store: Arc<dyn FhirStore>,
    policy: PartialFailurePolicy,
    max_page_size: u32,
    visit_concurrency: usize,
}

impl TimelineService {
    pub fn new(store: Arc<dyn FhirStore>, policy: PartialFailurePolicy, max_page_size: u32) -> Self {
        Self {
            store,
            policy,
            max_page_size,
            visit_concurrency: DEFAULT_TIMELINE_CONCURRENCY,
        }
    }

    /// Gather at most `limit` encounters of a timeline at once.
    pub fn with_visit_concurrency(mut self, limit: usize) -> Self {
        self.visit_concurrency = limit.max(1);
        self
    }

    pub fn policy(&self) -> PartialFailurePolicy {
        self.policy
    }

    /// Everything recorded during one encounter, by type.
    ///
    /// `max_page_size` bounds each per-type search and defaults to the configured page size.
    pub async fn visit_summary(
        &self,
        encounter_id: &str,
        max_page_size: Option<u32>,
    ) -> CareResult<AggregatedView> {
        let encounter = Reference::parse_or_id(encounter_id, ResourceType::Encounter)?;
        let page_size = page_size(max_page_size.unwrap_or(self.max_page_size))?;
        self.gather(&encounter, page_size).await
    }

    pub async fn patient_timeline(&self, episode_id: &str) -> CareResult<Vec<TimelineEntry>> {
        self.patient_timeline_with_count(episode_id, None).await
    }

    /// One visit summary per encounter of the episode, newest encounter first.
    ///
    /// With a `count`, only the most recent `count` encounters are included.
    pub async fn patient_timeline_with_count(
        &self,
        episode_id: &str,
        count: Option<u32>,
    ) -> CareResult<Vec<TimelineEntry>> {
        let episode = Reference::parse_or_id(episode_id, ResourceType::EpisodeOfCare)?;

        let params = SearchParams::new()
            .with(EPISODE_OF_CARE_PARAM, episode.to_string())
            .with("_sort", "-_lastUpdated");

        let encounters = match count {
            Some(count) => {
                let count = page_size(count)?;
                let mut found = self
                    .store
                    .search(
                        ResourceType::Encounter.as_str(),
                        &params.with("_count", count.to_string()),
                    )
                    .await?;
                found.truncate(count as usize);
                found
            }
            None => self.search_all(ResourceType::Encounter, &params).await?,
        };
        tracing::debug!(episode = %episode, encounters = encounters.len(), "building timeline");

        let page_size = self.max_page_size;
        // `buffered` yields in input order, so the newest-first order survives.
        stream::iter(encounters)
            .map(|encounter| async move {
                let reference = encounter.reference().ok_or_else(|| {
                    CareError::ServerContract("encounter in search result has no id".into())
                })?;
                let view = self.gather(&reference, page_size).await?;
                Ok::<_, CareError>(TimelineEntry { encounter, view })
            })
            .buffered(self.visit_concurrency)
            .try_collect()
            .await
    }

    /// Display text of every allergy recorded for the patient.
    pub async fn allergy_summary(&self, patient_id: &str) -> CareResult<Vec<String>> {
        self.summary(ResourceType::AllergyIntolerance, patient_id).await
    }

    /// Display text of every condition recorded for the patient.
    pub async fn problem_summary(&self, patient_id: &str) -> CareResult<Vec<String>> {
        self.summary(ResourceType::Condition, patient_id).await
    }

    async fn summary(&self, resource_type: ResourceType, patient_id: &str) -> CareResult<Vec<String>> {
        let patient = Reference::parse_or_id(patient_id, ResourceType::Patient)?;
        let found = self
            .search_all(
                resource_type,
                &SearchParams::new().with("patient", patient.to_string()),
            )
            .await?;
        Ok(found
            .iter()
            .filter_map(Resource::code_text)
            .map(str::to_owned)
            .collect())
    }

    /// Every match of a search, following next-page cursors to the end.
    async fn search_all(
        &self,
        resource_type: ResourceType,
        params: &SearchParams,
    ) -> CareResult<Vec<Resource>> {
        let mut page = self.store.search_page(resource_type.as_str(), params).await?;
        let mut found = std::mem::take(&mut page.items);
        while let Some(cursor) = page.next_cursor.take() {
            page = self.store.next_page(&cursor).await?;
            found.append(&mut page.items);
        }
        Ok(found)
    }

    async fn gather(&self, encounter: &Reference, page_size: u32) -> CareResult<AggregatedView> {
        let params = SearchParams::new()
            .with(ENCOUNTER_PARAM, encounter.to_string())
            .with("_count", page_size.to_string());

        let results = join_all(VISIT_RESOURCE_TYPES.iter().map(|resource_type| {
            let params = &params;
            async move {
                let found = self.store.search(resource_type.as_str(), params).await;
                (*resource_type, found)
            }
        }))
        .await;

        let mut view = AggregatedView::default();
        for (resource_type, result) in results {
            let name = resource_type.as_str().to_owned();
            match result {
                Ok(found) => {
                    view.resources.insert(name, found);
                }
                Err(err) => {
                    let err = CareError::from(err);
                    if self.policy == PartialFailurePolicy::FailFast || !degradable(&err) {
                        return Err(err);
                    }
                    tracing::warn!(
                        encounter = %encounter,
                        resource_type = %name,
                        error = %err,
                        "visit summary degraded"
                    );
                    view.failures.insert(name.clone(), err.to_string());
                    view.resources.insert(name, Vec::new());
                }
            }
        }
        Ok(view)
    }
}

fn degradable(err: &CareError) -> bool {
    matches!(err, CareError::Remote { .. } | CareError::Timeout(_))
}

fn page_size(n: u32) -> CareResult<u32> {
    if (1..=MAX_PAGE_SIZE_LIMIT).contains(&n) {
        Ok(n)
    } else {
        Err(CareError::Validation(format!(
            "page size must be within 1..={MAX_PAGE_SIZE_LIMIT}, got {n}"
        )))
    }
}
