//! Append-only audit trail for access-control decisions.

use crate::CareResult;
use async_trait::async_trait;
use fhir::{AccessAuditRecord, AuditEvent, FhirStore, ResourceType};
use std::sync::Arc;

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one record. Records are never updated or removed.
    async fn record(&self, record: &AccessAuditRecord) -> CareResult<()>;
}

/// [`AuditSink`] that writes each record as an `AuditEvent` resource in the clinical store.
#[derive(Clone)]
pub struct FhirAuditSink {
    store: Arc<dyn FhirStore>,
}

impl FhirAuditSink {
    pub fn new(store: Arc<dyn FhirStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for FhirAuditSink {
    async fn record(&self, record: &AccessAuditRecord) -> CareResult<()> {
        let event = AuditEvent::render(record);
        let created = self
            .store
            .create(ResourceType::AuditEvent.as_str(), event)
            .await?;
        tracing::info!(
            access_id = %record.access_id,
            action = record.action.as_str(),
            audit_event = created.id.as_deref().unwrap_or_default(),
            "access audit recorded"
        );
        Ok(())
    }
}
