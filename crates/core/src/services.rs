//! Service wiring.
//!
//! [`CareServices`] owns one instance of every service a front end needs. Production code builds
//! it from a validated [`CoreConfig`]; tests assemble it from fakes with [`CareServices::new`].

use crate::audit::{AuditSink, FhirAuditSink};
use crate::config::{CoreConfig, FhirCredentials};
use crate::episodes::EpisodeService;
use crate::notify::{EventPublisher, TracingPublisher};
use crate::otp::{HttpOtpVerifier, OtpVerifier};
use crate::timeline::{PartialFailurePolicy, TimelineService};
use crate::CareResult;
use fhir::{
    FhirGateway, FhirStore, GatewayConfig, GcloudToken, Resource, SearchParams, StaticToken,
    TokenSource,
};
use serde_json::Value;
use std::sync::Arc;
use terminology::{TerminologyClient, TerminologyConfig};

#[derive(Clone)]
pub struct CareServices {
    store: Arc<dyn FhirStore>,
    terminology: Arc<TerminologyClient>,
    episodes: EpisodeService,
    timeline: TimelineService,
}

/// Collaborators for [`CareServices::new`].
pub struct Collaborators {
    pub store: Arc<dyn FhirStore>,
    pub terminology: Arc<TerminologyClient>,
    pub otp: Arc<dyn OtpVerifier>,
    pub audit: Arc<dyn AuditSink>,
    pub events: Arc<dyn EventPublisher>,
}

impl CareServices {
    /// Build the production service graph.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::CareError`] if any client cannot be constructed from the configuration.
    pub fn from_config(cfg: &CoreConfig) -> CareResult<Self> {
        let tokens: Arc<dyn TokenSource> = match cfg.fhir_credentials() {
            FhirCredentials::Static(token) => Arc::new(StaticToken::new(token.as_str())?),
            FhirCredentials::Gcloud => Arc::new(GcloudToken::new()),
        };
        let gateway = FhirGateway::new(
            GatewayConfig::new(cfg.fhir_base_url())
                .with_timeout(cfg.fhir_timeout())
                .with_language(cfg.fhir_language()),
            tokens,
        )?;
        let store: Arc<dyn FhirStore> = Arc::new(gateway);

        let terminology = TerminologyClient::new(
            TerminologyConfig::new(cfg.terminology_base_url(), cfg.terminology_token())
                .with_timeout(cfg.terminology_timeout()),
        )?;

        let otp = HttpOtpVerifier::new(cfg.otp_base_url(), cfg.otp_timeout())?;

        tracing::info!(
            store = cfg.fhir_base_url(),
            terminology = cfg.terminology_base_url(),
            policy = cfg.aggregation_policy().as_str(),
            "care services configured"
        );

        Ok(Self::new(
            Collaborators {
                audit: Arc::new(FhirAuditSink::new(store.clone())),
                store,
                terminology: Arc::new(terminology),
                otp: Arc::new(otp),
                events: Arc::new(TracingPublisher),
            },
            cfg,
        ))
    }

    pub fn new(parts: Collaborators, cfg: &CoreConfig) -> Self {
        let mut services = Self::assemble(parts, cfg.aggregation_policy(), cfg.max_page_size());
        services.timeline = services
            .timeline
            .with_visit_concurrency(cfg.timeline_concurrency());
        services
    }

    /// Assemble from explicit parts without a [`CoreConfig`].
    pub fn assemble(
        parts: Collaborators,
        policy: PartialFailurePolicy,
        max_page_size: u32,
    ) -> Self {
        let episodes = EpisodeService::new(
            parts.store.clone(),
            parts.otp,
            parts.audit,
            parts.events,
        );
        let timeline = TimelineService::new(parts.store.clone(), policy, max_page_size);
        Self {
            store: parts.store,
            terminology: parts.terminology,
            episodes,
            timeline,
        }
    }

    pub fn episodes(&self) -> &EpisodeService {
        &self.episodes
    }

    pub fn timeline(&self) -> &TimelineService {
        &self.timeline
    }

    pub fn terminology(&self) -> &TerminologyClient {
        &self.terminology
    }

    pub fn store(&self) -> &Arc<dyn FhirStore> {
        &self.store
    }

    /// Search with caller-supplied JSON filters. Non-string values are rejected before the
    /// store is called.
    pub async fn search(&self, resource_type: &str, filters: &Value) -> CareResult<Vec<Resource>> {
        let params = SearchParams::from_json(filters)?;
        Ok(self.store.search(resource_type, &params).await?)
    }

    /// The patient's whole compartment as the store's raw bundle.
    pub async fn patient_everything(&self, patient_id: &str) -> CareResult<Vec<u8>> {
        let patient = fhir::Reference::parse_or_id(patient_id, fhir::ResourceType::Patient)?;
        Ok(self.store.patient_everything(patient.id()).await?)
    }
}

impl std::fmt::Debug for CareServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CareServices")
            .field("policy", &self.timeline.policy())
            .finish_non_exhaustive()
    }
}
