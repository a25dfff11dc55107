//! # Reconciler
//!
//! Applies mapped entities to the catalog: dependency-ordered upserts and
//! deletes, per-entity failure isolation, an end-of-pass retry queue, diff
//! reconciliation, and the resync run lifecycle.
//!
//! ## Overview
//!
//! Every catalog write passes through one semaphore sized at 90% of the
//! HTTP connection pool, reserving headroom for non-entity traffic on the
//! same pool. Within a batch, entities of one dependency level are written
//! concurrently under that semaphore; the next level starts only once the
//! level holding its relation targets has finished. A failed upsert/delete
//! never fails its siblings; it is queued
//! by entity key and retried exactly once after the main pass, in
//! dependency order. Whatever still fails lands in the [`ResyncReport`] and
//! turns the run `PartiallyFailed`.

use core_runtime::events::{CoreEvent, EventBus, ResyncEvent};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::catalog::CatalogClient;
use crate::entity::{
    Entity, EntityKey, FailedEntityRecord, FailedOp, RequestOptions, ResyncRunId,
};
use crate::error::Result;
use crate::order::{delete_levels, sort_for_delete, sort_for_upsert, upsert_levels};
use futures::future::join_all;

/// Lifecycle of one resync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

/// Mutable state of one resync pass, owned by the caller for its duration.
pub struct ResyncRun {
    pub id: ResyncRunId,
    pub kind: String,
    pub status: RunStatus,
    /// Keys successfully upserted during this pass; the authoritative "the
    /// source still has this" set consumed by
    /// [`Reconciler::delete_stale`]. Deletions and validation-only calls
    /// never land here.
    pub seen: HashSet<EntityKey>,
    /// Failures queued for the end-of-pass retry, keyed so re-registration
    /// replaces rather than duplicates.
    pub failed: HashMap<EntityKey, FailedEntityRecord>,
    pub upserted: u64,
    pub deleted: u64,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl ResyncRun {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: ResyncRunId::new(),
            kind: kind.into(),
            status: RunStatus::Pending,
            seen: HashSet::new(),
            failed: HashMap::new(),
            upserted: 0,
            deleted: 0,
            started_at: chrono::Utc::now(),
        }
    }

    fn record_success(&mut self, key: EntityKey, op: FailedOp, validation_only: bool) {
        // A validation response is not applied state.
        if validation_only {
            return;
        }
        match op {
            // Only upserts assert presence; a deleted key must read as
            // absent to the stale sweep.
            FailedOp::Upsert => {
                self.upserted += 1;
                self.seen.insert(key);
            }
            FailedOp::Delete => self.deleted += 1,
        }
    }
}

/// Outcome summary of one finished resync pass.
#[derive(Debug, Clone)]
pub struct ResyncReport {
    pub run_id: ResyncRunId,
    pub status: RunStatus,
    pub upserted: u64,
    pub deleted: u64,
    pub failed: Vec<EntityKey>,
    pub duration_secs: u64,
}

/// Dependency-aware reconciliation engine over a [`CatalogClient`].
pub struct Reconciler {
    catalog: Arc<CatalogClient>,
    /// Gates every catalog upsert/delete; floor(0.9 x max_http_connections)
    semaphore: Arc<Semaphore>,
    event_bus: Option<EventBus>,
}

impl Reconciler {
    pub fn new(catalog: Arc<CatalogClient>, catalog_concurrency: usize) -> Self {
        Self {
            catalog,
            semaphore: Arc::new(Semaphore::new(catalog_concurrency.max(1))),
            event_bus: None,
        }
    }

    /// Emit resync lifecycle events on this bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn emit(&self, event: ResyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Resync(event)).ok();
        }
    }

    /// Begin a resync pass.
    pub fn start_run(&self, kind: impl Into<String>) -> ResyncRun {
        let mut run = ResyncRun::new(kind);
        run.status = RunStatus::Running;
        self.emit(ResyncEvent::Started {
            run_id: run.id.to_string(),
            kind: run.kind.clone(),
        });
        run
    }

    /// Upsert a single entity, gated by the catalog semaphore.
    pub async fn upsert(&self, entity: &Entity, options: &RequestOptions) -> Result<()> {
        // Closed only if the reconciler is being torn down; fall through
        // and let the catalog call surface the real state.
        let _permit = self.semaphore.acquire().await;
        self.catalog.upsert_entity(entity, options).await
    }

    /// Delete a single entity, gated by the catalog semaphore.
    pub async fn delete(&self, key: &EntityKey, options: &RequestOptions) -> Result<()> {
        let _permit = self.semaphore.acquire().await;
        self.catalog.delete_entity(key, options).await
    }

    /// Upsert a batch in dependency order with per-entity isolation.
    ///
    /// Entities within one dependency level are written concurrently,
    /// bounded by the catalog semaphore; a level starts only after the
    /// level holding its relation targets has finished. One failing entity
    /// is queued on the run and never aborts its siblings.
    #[instrument(skip_all, fields(run_id = %run.id, batch = entities.len()))]
    pub async fn upsert_batch(
        &self,
        run: &mut ResyncRun,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) {
        for level in upsert_levels(entities) {
            let results = join_all(level.into_iter().map(|entity| async move {
                let result = self.upsert(&entity, options).await;
                (entity, result)
            }))
            .await;

            for (entity, result) in results {
                match result {
                    Ok(()) => {
                        run.record_success(entity.key(), FailedOp::Upsert, options.validation_only)
                    }
                    Err(e) => {
                        warn!(key = %entity.key(), error = %e, "Upsert failed, queuing for retry");
                        self.register_failure(run, entity, *options, FailedOp::Upsert);
                    }
                }
            }
        }
        self.emit(ResyncEvent::Progress {
            run_id: run.id.to_string(),
            upserted: run.upserted,
            deleted: run.deleted,
        });
    }

    /// Delete a batch in reverse dependency order with per-entity
    /// isolation. Each level's deletes run concurrently, referrers before
    /// their targets across levels.
    #[instrument(skip_all, fields(run_id = %run.id, batch = entities.len()))]
    pub async fn delete_batch(
        &self,
        run: &mut ResyncRun,
        entities: Vec<Entity>,
        options: &RequestOptions,
    ) {
        for level in delete_levels(entities) {
            let results = join_all(level.into_iter().map(|entity| async move {
                let result = self.delete(&entity.key(), options).await;
                (entity, result)
            }))
            .await;

            for (entity, result) in results {
                match result {
                    Ok(()) => {
                        run.record_success(entity.key(), FailedOp::Delete, options.validation_only)
                    }
                    Err(e) => {
                        warn!(key = %entity.key(), error = %e, "Delete failed, queuing for retry");
                        self.register_failure(run, entity, *options, FailedOp::Delete);
                    }
                }
            }
        }
    }

    /// Sweep entities the pass never confirmed: everything in `known` whose
    /// key was not upserted during this run is deleted, referrers before
    /// targets. `known` is the authoritative pre-pass set, typically the
    /// result of a catalog search scoped to this run's kind.
    #[instrument(skip_all, fields(run_id = %run.id, known = known.len()))]
    pub async fn delete_stale(
        &self,
        run: &mut ResyncRun,
        known: Vec<Entity>,
        options: &RequestOptions,
    ) {
        let stale: Vec<Entity> = known
            .into_iter()
            .filter(|e| !run.seen.contains(&e.key()))
            .collect();
        if stale.is_empty() {
            return;
        }
        info!(stale = stale.len(), "Deleting entities missing from this pass");
        self.delete_batch(run, stale, options).await;
    }

    /// Queue a failed operation for the end-of-pass retry. Re-registering
    /// the same key replaces the earlier record.
    pub fn register_failure(
        &self,
        run: &mut ResyncRun,
        entity: Entity,
        options: RequestOptions,
        op: FailedOp,
    ) {
        run.failed.insert(
            entity.key(),
            FailedEntityRecord {
                entity,
                options,
                user_agent: Some(self.catalog.user_agent().to_string()),
                op,
            },
        );
    }

    /// Retry everything in the run's failure queue exactly once, in
    /// dependency order. Entities that fail again stay queued and are
    /// reported, not raised.
    #[instrument(skip_all, fields(run_id = %run.id, queued = run.failed.len()))]
    pub async fn retry_failed(&self, run: &mut ResyncRun) {
        if run.failed.is_empty() {
            return;
        }
        info!(queued = run.failed.len(), "Retrying failed entities");

        let records: HashMap<EntityKey, FailedEntityRecord> = std::mem::take(&mut run.failed);
        let (upserts, deletes): (Vec<_>, Vec<_>) = records
            .into_values()
            .partition(|r| r.op == FailedOp::Upsert);

        let mut by_key: HashMap<EntityKey, FailedEntityRecord> = upserts
            .iter()
            .chain(deletes.iter())
            .map(|r| (r.entity.key(), r.clone()))
            .collect();

        for entity in sort_for_upsert(upserts.iter().map(|r| r.entity.clone()).collect()) {
            let key = entity.key();
            let Some(options) = by_key.get(&key).map(|r| r.options) else { continue };
            match self.upsert(&entity, &options).await {
                Ok(()) => {
                    run.record_success(key.clone(), FailedOp::Upsert, options.validation_only);
                    by_key.remove(&key);
                }
                Err(e) => warn!(%key, error = %e, "Entity failed again on retry"),
            }
        }

        for entity in sort_for_delete(deletes.iter().map(|r| r.entity.clone()).collect()) {
            let key = entity.key();
            let Some(options) = by_key.get(&key).map(|r| r.options) else { continue };
            match self.delete(&key, &options).await {
                Ok(()) => {
                    run.record_success(key.clone(), FailedOp::Delete, options.validation_only);
                    by_key.remove(&key);
                }
                Err(e) => warn!(%key, error = %e, "Entity failed again on retry"),
            }
        }

        run.failed = by_key;
    }

    /// Reconcile a before/after diff: delete entities only in `before`,
    /// upsert entities that are new or changed, touch nothing that is
    /// identical on both sides.
    #[instrument(skip_all, fields(run_id = %run.id, before = before.len(), after = after.len()))]
    pub async fn reconcile_diff(
        &self,
        run: &mut ResyncRun,
        before: Vec<Entity>,
        after: Vec<Entity>,
        options: &RequestOptions,
    ) {
        let before_by_key: HashMap<EntityKey, &Entity> =
            before.iter().map(|e| (e.key(), e)).collect();
        let after_keys: HashSet<EntityKey> = after.iter().map(|e| e.key()).collect();

        let stale: Vec<Entity> = before
            .iter()
            .filter(|e| !after_keys.contains(&e.key()))
            .cloned()
            .collect();
        let changed: Vec<Entity> = after
            .into_iter()
            .filter(|e| match before_by_key.get(&e.key()) {
                Some(prev) => *prev != e,
                None => true,
            })
            .collect();

        self.delete_batch(run, stale, options).await;
        self.upsert_batch(run, changed, options).await;
    }

    /// Close a run: one retry pass over the failure queue, then the final
    /// status and report.
    pub async fn finish(&self, mut run: ResyncRun) -> ResyncReport {
        self.retry_failed(&mut run).await;

        run.status = if run.failed.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::PartiallyFailed
        };

        let duration_secs = (chrono::Utc::now() - run.started_at).num_seconds().max(0) as u64;
        let failed: Vec<EntityKey> = run.failed.keys().cloned().collect();

        match run.status {
            RunStatus::Completed => self.emit(ResyncEvent::Completed {
                run_id: run.id.to_string(),
                upserted: run.upserted,
                deleted: run.deleted,
                duration_secs,
            }),
            _ => self.emit(ResyncEvent::PartiallyFailed {
                run_id: run.id.to_string(),
                upserted: run.upserted,
                deleted: run.deleted,
                failed: failed.len() as u64,
            }),
        }

        info!(
            run_id = %run.id,
            status = ?run.status,
            upserted = run.upserted,
            deleted = run.deleted,
            failed = failed.len(),
            "Resync pass finished"
        );

        ResyncReport {
            run_id: run.id,
            status: run.status,
            upserted: run.upserted,
            deleted: run.deleted,
            failed,
            duration_secs,
        }
    }

    /// Mark a run aborted before completion.
    pub fn fail_run(&self, mut run: ResyncRun, message: impl Into<String>) -> ResyncReport {
        run.status = RunStatus::Failed;
        let message = message.into();
        self.emit(ResyncEvent::Failed {
            run_id: run.id.to_string(),
            message: message.clone(),
        });
        warn!(run_id = %run.id, message, "Resync pass aborted");

        ResyncReport {
            run_id: run.id,
            status: RunStatus::Failed,
            upserted: run.upserted,
            deleted: run.deleted,
            failed: run.failed.keys().cloned().collect(),
            duration_secs: (chrono::Utc::now() - run.started_at).num_seconds().max(0) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use connector_traits::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
    use core_runtime::config::EngineConfig;
    use core_transport::{ResilientClient, RetryConfig};
    use crate::entity::RelationValue;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted catalog transport: records every non-auth call, tracks how
    /// many run at once, and answers per-identifier failure scripts with a
    /// fatal 400.
    struct ScriptedHttp {
        calls: Mutex<Vec<(HttpMethod, String)>>,
        /// Request bodies of entity calls, in arrival order.
        bodies: Mutex<Vec<String>>,
        /// Identifier -> how many times its calls should still fail
        failures: Mutex<HashMap<String, u32>>,
        latency: Mutex<Option<Duration>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedHttp {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                bodies: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
                latency: Mutex::new(None),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn fail_times(&self, identifier: &str, times: u32) {
            self.failures
                .lock()
                .unwrap()
                .insert(identifier.to_string(), times);
        }

        fn set_latency(&self, delay: Duration) {
            *self.latency.lock().unwrap() = Some(delay);
        }

        fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        fn bodies(&self) -> Vec<String> {
            self.bodies.lock().unwrap().clone()
        }

        fn calls(&self) -> Vec<(HttpMethod, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn entity_calls(&self) -> Vec<(HttpMethod, String)> {
            self.calls()
                .into_iter()
                .filter(|(_, url)| url.contains("/entities"))
                .collect()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttp {
        async fn execute(&self, request: HttpRequest) -> connector_traits::Result<HttpResponse> {
            if request.url.ends_with("/auth/access_token") {
                return Ok(HttpResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: Bytes::from(
                        serde_json::json!({"accessToken": "tok", "expiresIn": 3600})
                            .to_string(),
                    ),
                });
            }

            let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(active, Ordering::SeqCst);

            self.calls
                .lock()
                .unwrap()
                .push((request.method, request.url.clone()));

            // Upserts carry the identifier in the body, deletes in the URL.
            let body_text = request
                .body
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).to_string())
                .unwrap_or_default();
            self.bodies.lock().unwrap().push(body_text.clone());

            let latency = *self.latency.lock().unwrap();
            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }

            let mut failed = false;
            {
                let mut failures = self.failures.lock().unwrap();
                for (identifier, remaining) in failures.iter_mut() {
                    let hit = request.url.contains(identifier.as_str())
                        || body_text.contains(identifier.as_str());
                    if hit && *remaining > 0 {
                        *remaining -= 1;
                        failed = true;
                        break;
                    }
                }
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if failed {
                return Ok(HttpResponse {
                    status: 400,
                    headers: HashMap::new(),
                    body: Bytes::from("bad entity"),
                });
            }

            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: Bytes::from("{}"),
            })
        }
    }

    fn reconciler(http: Arc<ScriptedHttp>) -> Reconciler {
        let client: Arc<dyn HttpClient> = http;
        let config = EngineConfig::builder()
            .http_client(Arc::clone(&client))
            .catalog_url("https://api.catalog.example")
            .client_credentials("id", "secret")
            .build()
            .unwrap();
        let transport = ResilientClient::new(client, RetryConfig::default());
        let catalog = Arc::new(CatalogClient::new(transport, &config));
        Reconciler::new(catalog, config.catalog_concurrency())
    }

    fn entity(id: &str) -> Entity {
        Entity::new(id, "service")
    }

    fn entity_depending_on(id: &str, target: &str) -> Entity {
        let mut e = entity(id);
        e.relations.insert(
            "depends_on".to_string(),
            RelationValue::Many(vec![target.to_string()]),
        );
        e
    }

    #[tokio::test]
    async fn test_idempotent_upsert_call_shape() {
        let http = Arc::new(ScriptedHttp::new());
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");
        let options = RequestOptions::default();

        reconciler
            .upsert_batch(&mut run, vec![entity("api")], &options)
            .await;
        reconciler
            .upsert_batch(&mut run, vec![entity("api")], &options)
            .await;

        // Same key twice with merge=true stays one logical entity: both
        // calls hit the same upsert URL with the merge flag.
        let calls = http.entity_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert!(calls[0].1.contains("merge=true"));
        assert_eq!(run.seen.len(), 1);
    }

    #[tokio::test]
    async fn test_diff_deletes_stale_creates_new_skips_unchanged() {
        let http = Arc::new(ScriptedHttp::new());
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");

        let before = vec![entity("p1"), entity("p2")];
        let after = vec![entity("p2"), entity("p3")];
        reconciler
            .reconcile_diff(&mut run, before, after, &RequestOptions::default())
            .await;

        let calls = http.entity_calls();
        let deletes: Vec<_> = calls
            .iter()
            .filter(|(m, _)| *m == HttpMethod::Delete)
            .collect();
        let upserts: Vec<_> = calls
            .iter()
            .filter(|(m, _)| *m == HttpMethod::Post)
            .collect();

        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].1.contains("/entities/p1"));
        assert_eq!(upserts.len(), 1);
        assert!(upserts[0].1.contains("p3") || upserts[0].1.contains("/entities?"));
        // p2 is identical on both sides and gets no call at all.
        assert!(!calls.iter().any(|(m, url)| {
            *m == HttpMethod::Delete && url.contains("/entities/p2")
        }));
    }

    #[tokio::test]
    async fn test_diff_upserts_changed_entity() {
        let http = Arc::new(ScriptedHttp::new());
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");

        let before = vec![entity("p1")];
        let mut modified = entity("p1");
        modified.title = Some("renamed".to_string());

        reconciler
            .reconcile_diff(&mut run, before, vec![modified], &RequestOptions::default())
            .await;

        let calls = http.entity_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, HttpMethod::Post);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_retried_once() {
        let http = Arc::new(ScriptedHttp::new());
        // First attempt for "flaky" fails; its single retry succeeds.
        http.fail_times("flaky", 1);
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");

        reconciler
            .upsert_batch(
                &mut run,
                vec![entity("flaky"), entity("steady")],
                &RequestOptions::default(),
            )
            .await;

        // Sibling unaffected, failure queued.
        assert!(run.seen.contains(&entity("steady").key()));
        assert_eq!(run.failed.len(), 1);

        let report = reconciler.finish(run).await;
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.upserted, 2);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_persistent_failure_turns_run_partially_failed() {
        let http = Arc::new(ScriptedHttp::new());
        http.fail_times("broken", 10);
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");

        reconciler
            .upsert_batch(&mut run, vec![entity("broken")], &RequestOptions::default())
            .await;
        let report = reconciler.finish(run).await;

        assert_eq!(report.status, RunStatus::PartiallyFailed);
        assert_eq!(report.failed, vec![entity("broken").key()]);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_failure_record() {
        let http = Arc::new(ScriptedHttp::new());
        let reconciler = reconciler(http);
        let mut run = reconciler.start_run("service");

        reconciler.register_failure(
            &mut run,
            entity("dup"),
            RequestOptions::default(),
            FailedOp::Upsert,
        );
        reconciler.register_failure(
            &mut run,
            entity("dup"),
            RequestOptions {
                merge: false,
                ..RequestOptions::default()
            },
            FailedOp::Delete,
        );

        assert_eq!(run.failed.len(), 1);
        let record = run.failed.get(&entity("dup").key()).unwrap();
        assert_eq!(record.op, FailedOp::Delete);
        assert!(!record.options.merge);
    }

    #[tokio::test]
    async fn test_validation_only_is_never_recorded_as_applied() {
        let http = Arc::new(ScriptedHttp::new());
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");

        let options = RequestOptions {
            validation_only: true,
            ..RequestOptions::default()
        };
        reconciler
            .upsert_batch(&mut run, vec![entity("candidate")], &options)
            .await;

        assert!(run.seen.is_empty());
        assert_eq!(run.upserted, 0);
        // The call itself still went out with the flag.
        assert!(http.entity_calls()[0].1.contains("validation_only=true"));
    }

    #[tokio::test]
    async fn test_delete_stale_sweeps_only_unconfirmed_keys() {
        let http = Arc::new(ScriptedHttp::new());
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");
        let options = RequestOptions::default();

        reconciler
            .upsert_batch(&mut run, vec![entity("keep1"), entity("keep2")], &options)
            .await;

        // The catalog still knows a third entity the pass never produced.
        let known = vec![entity("keep1"), entity("keep2"), entity("gone")];
        reconciler.delete_stale(&mut run, known, &options).await;

        let deletes: Vec<_> = http
            .entity_calls()
            .into_iter()
            .filter(|(m, _)| *m == HttpMethod::Delete)
            .collect();
        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].1.contains("/entities/gone"));
        assert_eq!(run.deleted, 1);
    }

    #[tokio::test]
    async fn test_stale_sweep_deletes_referrers_before_targets() {
        let http = Arc::new(ScriptedHttp::new());
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");
        let options = RequestOptions::default();

        reconciler
            .upsert_batch(&mut run, vec![entity("svc")], &options)
            .await;

        let known = vec![
            entity("db"),
            entity_depending_on("app", "db"),
            entity("svc"),
        ];
        reconciler.delete_stale(&mut run, known, &options).await;

        let deletes: Vec<_> = http
            .entity_calls()
            .into_iter()
            .filter(|(m, _)| *m == HttpMethod::Delete)
            .collect();
        assert_eq!(deletes.len(), 2);
        assert!(deletes[0].1.contains("/entities/app"));
        assert!(deletes[1].1.contains("/entities/db"));
        assert!(!deletes.iter().any(|(_, url)| url.contains("/entities/svc")));
    }

    #[tokio::test]
    async fn test_deleted_keys_are_not_confirmed_against_the_sweep() {
        let http = Arc::new(ScriptedHttp::new());
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");
        let options = RequestOptions::default();

        reconciler
            .upsert_batch(&mut run, vec![entity("alive")], &options)
            .await;
        reconciler
            .delete_batch(&mut run, vec![entity("dead")], &options)
            .await;

        assert_eq!(run.seen.len(), 1);
        assert!(run.seen.contains(&entity("alive").key()));
        assert_eq!(run.deleted, 1);

        // "dead" reads as absent, so a sweep over a catalog that still
        // lists it re-issues the (idempotent) delete; "alive" is spared.
        reconciler
            .delete_stale(&mut run, vec![entity("alive"), entity("dead")], &options)
            .await;

        let deletes: Vec<_> = http
            .entity_calls()
            .into_iter()
            .filter(|(m, _)| *m == HttpMethod::Delete)
            .collect();
        assert_eq!(deletes.len(), 2);
        assert!(deletes.iter().all(|(_, url)| url.contains("/entities/dead")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_entities_upsert_concurrently() {
        let http = Arc::new(ScriptedHttp::new());
        http.set_latency(Duration::from_millis(20));
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");

        reconciler
            .upsert_batch(
                &mut run,
                vec![entity("a"), entity("b"), entity("c")],
                &RequestOptions::default(),
            )
            .await;

        // No relations between them: the whole level is in flight at once.
        assert_eq!(http.max_in_flight(), 3);
        assert_eq!(run.upserted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relation_targets_complete_before_referrers_start() {
        let http = Arc::new(ScriptedHttp::new());
        http.set_latency(Duration::from_millis(20));
        let reconciler = reconciler(Arc::clone(&http));
        let mut run = reconciler.start_run("service");

        reconciler
            .upsert_batch(
                &mut run,
                vec![entity_depending_on("app", "db"), entity("db")],
                &RequestOptions::default(),
            )
            .await;

        // Two levels of one entity each: never more than one in flight,
        // and the target's write fully precedes the referrer's.
        assert_eq!(http.max_in_flight(), 1);
        let bodies = http.bodies();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].contains("\"db\""));
        assert!(!bodies[0].contains("\"app\""));
        assert!(bodies[1].contains("\"app\""));
    }

    #[tokio::test]
    async fn test_lifecycle_events_emitted() {
        let http = Arc::new(ScriptedHttp::new());
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let reconciler = reconciler(http).with_event_bus(bus);

        let mut run = reconciler.start_run("service");
        reconciler
            .upsert_batch(&mut run, vec![entity("api")], &RequestOptions::default())
            .await;
        reconciler.finish(run).await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Resync(ResyncEvent::Started { .. })
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Resync(ResyncEvent::Progress { .. })
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CoreEvent::Resync(ResyncEvent::Completed { upserted: 1, .. })
        ));
    }
}
