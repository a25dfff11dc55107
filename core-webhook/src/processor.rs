//! # Webhook Pipeline
//!
//! Authenticates, validates, filters, and routes incoming webhook events,
//! then feeds the resulting deltas through the entity mapper and the
//! reconciler. A webhook delta reconciles exactly like a resync batch of
//! size one.
//!
//! ## Flow
//!
//! 1. Verify the signature over the raw body (before JSON parsing)
//! 2. Parse and validate the payload
//! 3. Filter with `should_process_event`, route with `get_matching_kinds`
//! 4. `handle_event` per kind yields updated and deleted raw records
//! 5. Updated records map through the selector/mapping and upsert; deleted
//!    records map to entity deletes

use async_trait::async_trait;
use connector_traits::{MappingOptions, RawRecord};
use core_mapper::EntityProcessor;
use core_reconcile::{Entity, Reconciler, RequestOptions, ResyncReport};
use core_runtime::events::{CoreEvent, EventBus, WebhookEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, WebhookError};
use crate::signature::SignatureVerifier;

/// Raw-record deltas extracted from one webhook event for one kind.
#[derive(Debug, Clone, Default)]
pub struct WebhookEventRawResults {
    pub updated_raw_results: Vec<RawRecord>,
    pub deleted_raw_results: Vec<RawRecord>,
}

/// Connector-side webhook handling surface.
///
/// One processor per connector; the pipeline owns the generic
/// authenticate/validate/filter/route order and delegates the
/// vendor-specific parts here.
#[async_trait]
pub trait WebhookProcessor: Send + Sync {
    /// Payload-level authentication beyond the body signature, e.g. a
    /// token embedded in the payload. Defaults to accepting.
    async fn authenticate(&self, _payload: &Value, _headers: &HashMap<String, String>) -> bool {
        true
    }

    /// Structural payload validation.
    async fn validate_payload(&self, payload: &Value) -> bool;

    /// Event-level filter, e.g. dropping bot-generated events.
    async fn should_process_event(&self, event: &Value) -> bool;

    /// Resource kinds this event maps to.
    async fn get_matching_kinds(&self, event: &Value) -> Vec<String>;

    /// Extract the raw-record delta for one kind.
    async fn handle_event(&self, payload: &Value, kind: &str) -> Result<WebhookEventRawResults>;
}

/// Generic webhook ingestion pipeline over one connector's processor.
pub struct WebhookPipeline {
    processor: Arc<dyn WebhookProcessor>,
    mapper: Arc<EntityProcessor>,
    reconciler: Arc<Reconciler>,
    /// Selector/mapping configuration per resource kind
    mappings: HashMap<String, MappingOptions>,
    verifier: Option<SignatureVerifier>,
    options: RequestOptions,
    event_bus: Option<EventBus>,
}

impl WebhookPipeline {
    pub fn new(
        processor: Arc<dyn WebhookProcessor>,
        mapper: Arc<EntityProcessor>,
        reconciler: Arc<Reconciler>,
        mappings: HashMap<String, MappingOptions>,
    ) -> Self {
        Self {
            processor,
            mapper,
            reconciler,
            mappings,
            verifier: None,
            options: RequestOptions::default(),
            event_bus: None,
        }
    }

    /// Require a valid body signature before anything is parsed.
    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Override the request options used for delta upserts/deletes.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn emit(&self, event: WebhookEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Webhook(event)).ok();
        }
    }

    /// Ingest one webhook delivery.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when the signature or payload authentication fails
    /// - `InvalidPayload` when the body is not valid JSON or fails
    ///   validation
    /// - `Rejected` when the event filter drops the delivery
    #[instrument(skip_all, fields(body_len = raw_body.len()))]
    pub async fn process(
        &self,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<Vec<ResyncReport>> {
        if let Some(verifier) = &self.verifier {
            verifier.verify(raw_body, headers).inspect_err(|e| {
                self.emit(WebhookEvent::Rejected {
                    reason: e.to_string(),
                });
            })?;
        }

        let payload: Value = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookError::InvalidPayload(format!("body is not JSON: {}", e)))?;

        if !self.processor.authenticate(&payload, headers).await {
            self.emit(WebhookEvent::Rejected {
                reason: "payload authentication failed".to_string(),
            });
            return Err(WebhookError::Unauthorized(
                "payload authentication failed".to_string(),
            ));
        }

        if !self.processor.validate_payload(&payload).await {
            self.emit(WebhookEvent::Rejected {
                reason: "payload validation failed".to_string(),
            });
            return Err(WebhookError::InvalidPayload(
                "payload validation failed".to_string(),
            ));
        }

        if !self.processor.should_process_event(&payload).await {
            debug!("Event filtered out");
            self.emit(WebhookEvent::Rejected {
                reason: "event filtered".to_string(),
            });
            return Err(WebhookError::Rejected("event filtered".to_string()));
        }

        let kinds = self.processor.get_matching_kinds(&payload).await;
        let mut reports = Vec::with_capacity(kinds.len());

        for kind in kinds {
            let Some(mapping) = self.mappings.get(&kind) else {
                warn!(kind, "No mapping configured for webhook kind");
                continue;
            };
            self.emit(WebhookEvent::Accepted { kind: kind.clone() });

            let results = self.processor.handle_event(&payload, &kind).await?;
            let report = self.reconcile_delta(&kind, mapping, results).await;
            self.emit(WebhookEvent::Processed {
                kind: kind.clone(),
                upserted: report.upserted,
                deleted: report.deleted,
            });
            reports.push(report);
        }

        Ok(reports)
    }

    /// Apply one kind's delta the same way a resync applies one batch.
    async fn reconcile_delta(
        &self,
        kind: &str,
        mapping: &MappingOptions,
        results: WebhookEventRawResults,
    ) -> ResyncReport {
        let mut run = self.reconciler.start_run(kind);

        let upserts = self.map_records(&results.updated_raw_results, mapping);
        if !upserts.is_empty() {
            self.reconciler
                .upsert_batch(&mut run, upserts, &self.options)
                .await;
        }

        let deletes = self.map_records(&results.deleted_raw_results, mapping);
        if !deletes.is_empty() {
            self.reconciler
                .delete_batch(&mut run, deletes, &self.options)
                .await;
        }

        let report = self.reconciler.finish(run).await;
        info!(
            kind,
            upserted = report.upserted,
            deleted = report.deleted,
            "Webhook delta reconciled"
        );
        report
    }

    /// Run raw records through the selector/mapping and keep the usable
    /// entities. Selector rejections and malformed entity bodies are
    /// logged, never fatal for the delivery.
    fn map_records(&self, records: &[RawRecord], mapping: &MappingOptions) -> Vec<Entity> {
        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            let mapped = match self.mapper.get_mapped_entity(
                record,
                &mapping.mapping_spec,
                &mapping.selector_expr,
                mapping.parse_all,
            ) {
                Ok(mapped) => mapped,
                Err(e) => {
                    warn!(error = %e, "Webhook record failed selector evaluation");
                    continue;
                }
            };
            if !mapped.did_pass_selector {
                debug!("Webhook record rejected by selector");
                continue;
            }
            if !mapped.misconfigurations.is_empty() {
                debug!(
                    misconfigurations = ?mapped.misconfigurations,
                    "Webhook record mapped with unresolved fields"
                );
            }
            match serde_json::from_value::<Entity>(mapped.entity) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!(error = %e, "Mapped webhook record is not a valid entity"),
            }
        }
        entities
    }
}
