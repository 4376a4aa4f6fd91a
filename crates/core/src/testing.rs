//! In-memory fakes for the core's collaborators.
//!
//! Enabled for this crate's tests and, through the `test-support` feature, for downstream
//! crates. Nothing here is meant for production use.

use crate::audit::AuditSink;
use crate::otp::OtpVerifier;
use crate::{CareError, CareResult};
use async_trait::async_trait;
use care_types::{Msisdn, Otp, Page};
use fhir::{
    AccessAuditRecord, FhirError, FhirResult, FhirStore, PatchOp, PatchOperation, Reference,
    Resource, SearchParams,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// MemoryStore
// ============================================================================

/// A failure to inject into every call for one resource type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectedFailure {
    Remote(u16),
    Timeout,
    Contract,
}

impl InjectedFailure {
    fn to_error(self, resource_type: &str) -> FhirError {
        match self {
            InjectedFailure::Remote(status) => FhirError::Remote {
                status,
                text: format!("{resource_type} unavailable"),
                diagnostics: String::new(),
                body: String::new(),
            },
            InjectedFailure::Timeout => FhirError::Timeout(Duration::from_secs(10)),
            InjectedFailure::Contract => {
                FhirError::ServerContract(format!("{resource_type} bundle is missing `total`"))
            }
        }
    }
}

#[derive(Default)]
struct StoreState {
    seq: u64,
    /// `(type, id) -> (last write sequence, resource)`
    resources: BTreeMap<(String, String), (u64, Resource)>,
    failures: HashMap<String, InjectedFailure>,
    calls: u64,
    /// Default page size when a search carries no `_count`.
    page_size: Option<usize>,
    /// `cursor -> (type, params, offset)` for searches with more pages.
    cursors: HashMap<String, (String, SearchParams, usize)>,
}

type CreateHook = Arc<dyn Fn(&MemoryStore) + Send + Sync>;

/// An in-memory [`FhirStore`].
///
/// Search supports:
/// - reference filters (`name=<Type>/<id>`), matched against any reference in the body
/// - plain field equality for other filters (`status=active`)
/// - `_sort=-_lastUpdated`, `_count`; other `_` parameters are ignored
///
/// `_count` (or the page size set with [`MemoryStore::with_page_size`]) bounds each page;
/// [`FhirStore::search_page`] hands out a cursor for the rest.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    before_create: Mutex<HashMap<String, CreateHook>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that pages searches without `_count` at `page_size` results.
    pub fn with_page_size(page_size: usize) -> Self {
        let store = Self::default();
        store.lock().page_size = Some(page_size.max(1));
        store
    }

    /// Make every call touching `resource_type` fail.
    pub fn fail(&self, resource_type: &str, failure: InjectedFailure) {
        self.lock().failures.insert(resource_type.to_owned(), failure);
    }

    /// Run `hook` just before each create of `resource_type`, to stage a concurrent writer.
    pub fn before_create(
        &self,
        resource_type: &str,
        hook: impl Fn(&MemoryStore) + Send + Sync + 'static,
    ) {
        if let Ok(mut hooks) = self.before_create.lock() {
            hooks.insert(resource_type.to_owned(), Arc::new(hook));
        }
    }

    /// Insert a fixture directly, assigning an id if it has none.
    pub fn seed(&self, resource: Resource) -> Resource {
        let mut state = self.lock();
        Self::put(&mut state, resource)
    }

    /// Every stored resource of one type, in write order.
    pub fn all(&self, resource_type: &str) -> Vec<Resource> {
        let state = self.lock();
        let mut found: Vec<_> = state
            .resources
            .iter()
            .filter(|((t, _), _)| t == resource_type)
            .map(|(_, (seq, r))| (*seq, r.clone()))
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, r)| r).collect()
    }

    /// Number of store calls made so far.
    pub fn calls(&self) -> u64 {
        self.lock().calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, resource_type: &str) -> FhirResult<std::sync::MutexGuard<'_, StoreState>> {
        fhir::resource::validate_resource_type(resource_type)?;
        let mut state = self.lock();
        state.calls += 1;
        if let Some(failure) = state.failures.get(resource_type) {
            return Err(failure.to_error(resource_type));
        }
        Ok(state)
    }

    fn put(state: &mut StoreState, mut resource: Resource) -> Resource {
        state.seq += 1;
        let seq = state.seq;
        let id = resource
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{seq}", resource.resource_type.to_ascii_lowercase()));
        resource.id = Some(id.clone());
        resource.fields.insert(
            "meta".into(),
            json!({"versionId": seq.to_string(), "lastUpdated": last_updated(seq)}),
        );
        state
            .resources
            .insert((resource.resource_type.clone(), id), (seq, resource.clone()));
        resource
    }

    fn get(state: &StoreState, resource_type: &str, id: &str) -> FhirResult<Resource> {
        state
            .resources
            .get(&(resource_type.to_owned(), id.to_owned()))
            .map(|(_, r)| r.clone())
            .ok_or_else(|| not_found(resource_type, id))
    }

    fn matching(state: &StoreState, resource_type: &str, params: &SearchParams) -> Vec<Resource> {
        let mut found: Vec<(u64, Resource)> = state
            .resources
            .iter()
            .filter(|((t, _), _)| t == resource_type)
            .filter(|(_, (_, r))| params.iter().all(|(name, value)| filter_matches(r, name, value)))
            .map(|(_, (seq, r))| (*seq, r.clone()))
            .collect();

        found.sort_by_key(|(seq, _)| *seq);
        if params.get("_sort") == Some("-_lastUpdated") {
            found.reverse();
        }
        found.into_iter().map(|(_, r)| r).collect()
    }

    /// The page of a search starting at `offset`, registering a cursor when more remain.
    fn page(
        state: &mut StoreState,
        resource_type: &str,
        params: &SearchParams,
        offset: usize,
    ) -> Page<Resource> {
        let found = Self::matching(state, resource_type, params);
        let total = found.len();
        let size = params
            .get("_count")
            .and_then(|c| c.parse::<usize>().ok())
            .or(state.page_size)
            .unwrap_or(usize::MAX);
        let end = offset.saturating_add(size).min(total);
        let items = found.get(offset..end).map(<[Resource]>::to_vec).unwrap_or_default();

        let next = (end < total).then(|| {
            let cursor = format!("memory:{resource_type}?page={}", state.cursors.len() + 1);
            state
                .cursors
                .insert(cursor.clone(), (resource_type.to_owned(), params.clone(), end));
            cursor
        });
        Page::new(items, next, Some(total as u64))
    }
}

#[async_trait]
impl FhirStore for MemoryStore {
    async fn create(&self, resource_type: &str, mut payload: Resource) -> FhirResult<Resource> {
        let hook = self
            .before_create
            .lock()
            .ok()
            .and_then(|hooks| hooks.get(resource_type).cloned());
        if let Some(hook) = hook {
            hook(self);
        }
        let mut state = self.enter(resource_type)?;
        payload.resource_type = resource_type.to_owned();
        payload.id = None;
        Ok(Self::put(&mut state, payload))
    }

    async fn read(&self, resource_type: &str, id: &str) -> FhirResult<Resource> {
        let state = self.enter(resource_type)?;
        Self::get(&state, resource_type, id)
    }

    async fn update(&self, resource_type: &str, id: &str, mut payload: Resource) -> FhirResult<Resource> {
        let mut state = self.enter(resource_type)?;
        Self::get(&state, resource_type, id)?;
        payload.resource_type = resource_type.to_owned();
        payload.id = Some(id.to_owned());
        Ok(Self::put(&mut state, payload))
    }

    async fn patch(
        &self,
        resource_type: &str,
        id: &str,
        ops: &[PatchOperation],
    ) -> FhirResult<Resource> {
        let mut state = self.enter(resource_type)?;
        fhir::patch::validate_patch(ops)?;
        let mut document = Self::get(&state, resource_type, id)?.to_value();
        for op in ops {
            apply(&mut document, op)?;
        }
        let patched = Resource::from_value(document)?;
        Ok(Self::put(&mut state, patched))
    }

    async fn delete(&self, resource_type: &str, id: &str) -> FhirResult<()> {
        let mut state = self.enter(resource_type)?;
        state
            .resources
            .remove(&(resource_type.to_owned(), id.to_owned()))
            .map(|_| ())
            .ok_or_else(|| not_found(resource_type, id))
    }

    async fn search(&self, resource_type: &str, params: &SearchParams) -> FhirResult<Vec<Resource>> {
        Ok(self.search_page(resource_type, params).await?.items)
    }

    async fn count(&self, resource_type: &str, params: &SearchParams) -> FhirResult<u64> {
        let state = self.enter(resource_type)?;
        Ok(Self::matching(&state, resource_type, params).len() as u64)
    }

    async fn search_page(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> FhirResult<Page<Resource>> {
        let mut state = self.enter(resource_type)?;
        Ok(Self::page(&mut state, resource_type, params, 0))
    }

    async fn next_page(&self, cursor: &str) -> FhirResult<Page<Resource>> {
        let (resource_type, params, offset) = self
            .lock()
            .cursors
            .get(cursor)
            .cloned()
            .ok_or_else(|| FhirError::InvalidInput(format!("unknown page cursor: {cursor}")))?;
        let mut state = self.enter(&resource_type)?;
        Ok(Self::page(&mut state, &resource_type, &params, offset))
    }

    async fn patient_everything(&self, patient_id: &str) -> FhirResult<Vec<u8>> {
        let state = self.enter("Patient")?;
        let patient = Reference::new("Patient", patient_id)?;
        let entries: Vec<Value> = state
            .resources
            .values()
            .map(|(_, r)| r)
            .filter(|r| r.reference().as_ref() == Some(&patient) || r.references_to(&patient))
            .map(|r| json!({"resource": r}))
            .collect();
        let bundle = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": entries.len(),
            "entry": entries,
        });
        serde_json::to_vec(&bundle).map_err(|e| FhirError::ResponseParse(e.to_string()))
    }
}

fn last_updated(seq: u64) -> String {
    let base = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH + chrono::Duration::days(19_800);
    (base + chrono::Duration::seconds(seq as i64))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn not_found(resource_type: &str, id: &str) -> FhirError {
    FhirError::Remote {
        status: 404,
        text: "Not Found".into(),
        diagnostics: format!("{resource_type}/{id} does not exist"),
        body: String::new(),
    }
}

fn filter_matches(resource: &Resource, name: &str, value: &str) -> bool {
    if name.starts_with('_') {
        return true;
    }
    if let Ok(target) = Reference::parse(value) {
        return resource.references_to(&target);
    }
    resource.field(name).and_then(Value::as_str) == Some(value)
}

fn apply(document: &mut Value, op: &PatchOperation) -> FhirResult<()> {
    let unprocessable = |what: &str| FhirError::Remote {
        status: 422,
        text: "Unprocessable Entity".into(),
        diagnostics: format!("{what} at {}", op.path),
        body: String::new(),
    };

    match op.op {
        PatchOp::Test => {
            if document.pointer(&op.path) != op.value.as_ref() {
                return Err(FhirError::Remote {
                    status: 412,
                    text: "Precondition Failed".into(),
                    diagnostics: format!("test failed at {}", op.path),
                    body: String::new(),
                });
            }
        }
        PatchOp::Replace => {
            let slot = document
                .pointer_mut(&op.path)
                .ok_or_else(|| unprocessable("no value to replace"))?;
            *slot = op.value.clone().unwrap_or(Value::Null);
        }
        PatchOp::Add => {
            let (parent, key) = split_pointer(&op.path);
            let value = op.value.clone().unwrap_or(Value::Null);
            match document.pointer_mut(parent) {
                Some(Value::Object(map)) => {
                    map.insert(key.to_owned(), value);
                }
                Some(Value::Array(items)) if key == "-" => items.push(value),
                Some(Value::Array(items)) => {
                    let index = key
                        .parse::<usize>()
                        .ok()
                        .filter(|i| *i <= items.len())
                        .ok_or_else(|| unprocessable("bad array index"))?;
                    items.insert(index, value);
                }
                _ => return Err(unprocessable("no parent to add to")),
            }
        }
        PatchOp::Remove => {
            let (parent, key) = split_pointer(&op.path);
            let removed = match document.pointer_mut(parent) {
                Some(Value::Object(map)) => map.remove(key).is_some(),
                Some(Value::Array(items)) => match key.parse::<usize>() {
                    Ok(i) if i < items.len() => {
                        items.remove(i);
                        true
                    }
                    _ => false,
                },
                _ => false,
            };
            if !removed {
                return Err(unprocessable("no value to remove"));
            }
        }
    }
    Ok(())
}

fn split_pointer(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

// ============================================================================
// Passcodes and audit
// ============================================================================

/// Accepts exactly one passcode for any phone, and records who asked.
pub struct StaticOtp {
    accepted: Option<String>,
    checked: Mutex<Vec<String>>,
}

impl StaticOtp {
    pub fn accepting(code: &str) -> Self {
        Self {
            accepted: Some(code.to_owned()),
            checked: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accepted: None,
            checked: Mutex::new(Vec::new()),
        }
    }

    /// Phone numbers verification was attempted for, in order.
    pub fn checked(&self) -> Vec<String> {
        self.checked
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[async_trait]
impl OtpVerifier for StaticOtp {
    async fn verify(&self, msisdn: &Msisdn, otp: &Otp) -> CareResult<bool> {
        if let Ok(mut checked) = self.checked.lock() {
            checked.push(msisdn.as_str().to_owned());
        }
        Ok(self.accepted.as_deref() == Some(otp.as_str()))
    }
}

#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AccessAuditRecord>>,
    failing: bool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write fails.
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn records(&self) -> Vec<AccessAuditRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: &AccessAuditRecord) -> CareResult<()> {
        if self.failing {
            return Err(CareError::Remote {
                status: 503,
                text: "audit store unavailable".into(),
                diagnostics: String::new(),
                body: String::new(),
            });
        }
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn patch_applies_replace_add_and_test() {
        let store = MemoryStore::new();
        let created = store
            .create(
                "EpisodeOfCare",
                Resource::new("EpisodeOfCare")
                    .with_field("status", "active")
                    .with_field("period", json!({"start": "2024-01-01T00:00:00Z"})),
            )
            .await
            .unwrap();
        let id = created.id.clone().unwrap();

        let patched = store
            .patch(
                "EpisodeOfCare",
                &id,
                &[
                    PatchOperation::test("/status", "active"),
                    PatchOperation::replace("/status", "finished"),
                    PatchOperation::add("/period/end", "2024-01-02T00:00:00Z"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(patched.field("status"), Some(&json!("finished")));
        assert_eq!(patched.field("period").unwrap()["end"], json!("2024-01-02T00:00:00Z"));

        let err = store
            .patch("EpisodeOfCare", &id, &[PatchOperation::test("/status", "active")])
            .await
            .unwrap_err();
        assert!(matches!(err, FhirError::Remote { status: 412, .. }));
    }

    #[tokio::test]
    async fn search_filters_by_reference_and_sorts_newest_first() {
        let store = MemoryStore::new();
        for n in 0..3 {
            store.seed(
                Resource::new("Encounter")
                    .with_id(format!("e{n}"))
                    .with_field("episodeOfCare", json!([{"reference": "EpisodeOfCare/ep1"}])),
            );
        }
        store.seed(
            Resource::new("Encounter")
                .with_id("other")
                .with_field("episodeOfCare", json!([{"reference": "EpisodeOfCare/ep2"}])),
        );

        let found = store
            .search(
                "Encounter",
                &SearchParams::new()
                    .with("episode-of-care", "EpisodeOfCare/ep1")
                    .with("_sort", "-_lastUpdated")
                    .with("_count", "2"),
            )
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["e2", "e1"]);
    }

    #[tokio::test]
    async fn pages_follow_cursors_to_the_end() {
        let store = MemoryStore::with_page_size(2);
        for n in 0..5 {
            store.seed(Resource::new("Condition").with_id(format!("c{n}")));
        }

        let first = store.search_page("Condition", &SearchParams::new()).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.total, Some(5));

        let mut ids: Vec<_> = first.items.iter().map(|r| r.id.clone().unwrap()).collect();
        let mut cursor = first.next_cursor;
        while let Some(next) = cursor {
            let page = store.next_page(&next).await.unwrap();
            ids.extend(page.items.iter().map(|r| r.id.clone().unwrap()));
            cursor = page.next_cursor;
        }
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4"]);

        assert_eq!(store.search("Condition", &SearchParams::new()).await.unwrap().len(), 2);
        assert!(matches!(
            store.next_page("memory:Condition?page=999").await,
            Err(FhirError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_apply_per_type() {
        let store = MemoryStore::new();
        store.fail("Observation", InjectedFailure::Timeout);
        assert!(matches!(
            store.search("Observation", &SearchParams::new()).await,
            Err(FhirError::Timeout(_))
        ));
        assert!(store.search("Condition", &SearchParams::new()).await.is_ok());
    }
}
