//! # Blueprint Bootstrap
//!
//! Creates a connector's catalog schema in three ordered stages, rolling
//! back blueprints created during this run when a stage fails.
//!
//! ## Stages
//!
//! 1. Bare schema per blueprint, stripped of relations and of
//!    calculated/mirror/aggregation properties, so every blueprint exists
//!    before anything references it
//! 2. Patch relations into each blueprint
//! 3. Patch calculated, mirror, and aggregation properties
//!
//! A stage failure deletes only blueprints this run created; pre-existing
//! blueprints are never touched. Actions, scorecards, and pages are applied
//! after the stages; their failures are logged and never roll anything
//! back.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::catalog::CatalogClient;
use crate::error::{BootstrapError, Result};

/// Blueprint body keys deferred past stage one.
const RELATION_KEY: &str = "relations";
const DEFERRED_PROPERTY_KEYS: [&str; 3] = [
    "calculatedProperties",
    "mirrorProperties",
    "aggregationProperties",
];

/// Everything a connector wants present in the catalog before syncing.
#[derive(Debug, Clone, Default)]
pub struct BootstrapResources {
    /// Full blueprint bodies, each with an `"identifier"` field
    pub blueprints: Vec<Value>,
    pub actions: Vec<Value>,
    pub scorecards: Vec<Value>,
    pub pages: Vec<Value>,
}

/// What the bootstrap pass did.
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    /// Blueprints created during this run
    pub created: Vec<String>,
    /// Blueprints that already existed and were left as-is at stage one
    pub pre_existing: Vec<String>,
    /// Non-blueprint resources that failed, as `(kind, message)`
    pub skipped: Vec<(String, String)>,
}

pub struct Bootstrapper {
    catalog: Arc<CatalogClient>,
}

impl Bootstrapper {
    pub fn new(catalog: Arc<CatalogClient>) -> Self {
        Self { catalog }
    }

    /// Run the full bootstrap.
    ///
    /// # Errors
    ///
    /// A failed stage returns one grouped [`BootstrapError`] naming the
    /// stage and listing which blueprints were rolled back.
    #[instrument(skip_all, fields(blueprints = resources.blueprints.len()))]
    pub async fn bootstrap(&self, resources: &BootstrapResources) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();

        if let Err((stage, message)) = self.run_stages(resources, &mut report).await {
            let rolled_back = self.rollback(&report.created).await;
            return Err(BootstrapError {
                stage,
                message,
                rolled_back,
            }
            .into());
        }

        self.apply_extras(resources, &mut report).await;
        info!(
            created = report.created.len(),
            pre_existing = report.pre_existing.len(),
            skipped = report.skipped.len(),
            "Bootstrap finished"
        );
        Ok(report)
    }

    async fn run_stages(
        &self,
        resources: &BootstrapResources,
        report: &mut BootstrapReport,
    ) -> std::result::Result<(), (String, String)> {
        // Stage 1: bare blueprints.
        for blueprint in &resources.blueprints {
            let identifier = blueprint_identifier(blueprint)
                .ok_or_else(|| ("bare_schema".to_string(), "blueprint without identifier".to_string()))?;

            let exists = self
                .catalog
                .blueprint_exists(&identifier)
                .await
                .map_err(|e| ("bare_schema".to_string(), e.to_string()))?;

            if exists {
                report.pre_existing.push(identifier);
                continue;
            }

            let bare = strip_deferred(blueprint);
            self.catalog
                .create_blueprint(&bare)
                .await
                .map_err(|e| ("bare_schema".to_string(), e.to_string()))?;
            report.created.push(identifier);
        }

        // Stage 2: relations.
        for blueprint in &resources.blueprints {
            let Some(identifier) = blueprint_identifier(blueprint) else { continue };
            let Some(relations) = blueprint.get(RELATION_KEY) else { continue };
            let patch = serde_json::json!({ RELATION_KEY: relations });
            self.catalog
                .patch_blueprint(&identifier, &patch)
                .await
                .map_err(|e| ("relations".to_string(), e.to_string()))?;
        }

        // Stage 3: calculated/mirror/aggregation properties.
        for blueprint in &resources.blueprints {
            let Some(identifier) = blueprint_identifier(blueprint) else { continue };
            let mut patch = serde_json::Map::new();
            for key in DEFERRED_PROPERTY_KEYS {
                if let Some(value) = blueprint.get(key) {
                    patch.insert(key.to_string(), value.clone());
                }
            }
            if patch.is_empty() {
                continue;
            }
            self.catalog
                .patch_blueprint(&identifier, &Value::Object(patch))
                .await
                .map_err(|e| ("derived_properties".to_string(), e.to_string()))?;
        }

        Ok(())
    }

    /// Delete blueprints created this run. Individual delete failures are
    /// logged; the returned list holds what was actually removed.
    async fn rollback(&self, created: &[String]) -> Vec<String> {
        warn!(count = created.len(), "Rolling back blueprints created this run");
        let mut rolled_back = Vec::with_capacity(created.len());
        for identifier in created {
            match self.catalog.delete_blueprint(identifier).await {
                Ok(()) => rolled_back.push(identifier.clone()),
                Err(e) => warn!(identifier, error = %e, "Rollback delete failed"),
            }
        }
        rolled_back
    }

    /// Actions, scorecards, and pages: best-effort, never rolled back.
    async fn apply_extras(&self, resources: &BootstrapResources, report: &mut BootstrapReport) {
        let groups = [
            ("actions", &resources.actions),
            ("scorecards", &resources.scorecards),
            ("pages", &resources.pages),
        ];
        for (kind, bodies) in groups {
            for body in bodies.iter() {
                if let Err(e) = self.catalog.create_resource(kind, body).await {
                    report.skipped.push((kind.to_string(), e.to_string()));
                }
            }
        }
    }
}

fn blueprint_identifier(blueprint: &Value) -> Option<String> {
    blueprint
        .get("identifier")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Blueprint body minus relations and derived properties.
fn strip_deferred(blueprint: &Value) -> Value {
    let Some(map) = blueprint.as_object() else {
        return blueprint.clone();
    };
    let stripped: serde_json::Map<String, Value> = map
        .iter()
        .filter(|(k, _)| {
            k.as_str() != RELATION_KEY && !DEFERRED_PROPERTY_KEYS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use connector_traits::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
    use core_runtime::config::EngineConfig;
    use core_transport::{ResilientClient, RetryConfig};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted catalog for bootstrap flows: a configurable set of
    /// pre-existing blueprints and an optional stage to break.
    struct BootstrapHttp {
        existing: Vec<String>,
        fail_on_patch_with_key: Option<String>,
        calls: Mutex<Vec<(HttpMethod, String, String)>>,
    }

    impl BootstrapHttp {
        fn new(existing: &[&str]) -> Self {
            Self {
                existing: existing.iter().map(|s| s.to_string()).collect(),
                fail_on_patch_with_key: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn fail_patches_containing(mut self, key: &str) -> Self {
            self.fail_on_patch_with_key = Some(key.to_string());
            self
        }

        fn calls(&self) -> Vec<(HttpMethod, String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn deleted_blueprints(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|(m, url, _)| *m == HttpMethod::Delete && url.contains("/v1/blueprints/"))
                .map(|(_, url, _)| url.rsplit('/').next().unwrap().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl HttpClient for BootstrapHttp {
        async fn execute(&self, request: HttpRequest) -> connector_traits::Result<HttpResponse> {
            let respond = |status: u16| {
                Ok(HttpResponse {
                    status,
                    headers: HashMap::new(),
                    body: Bytes::from("{}"),
                })
            };

            if request.url.ends_with("/auth/access_token") {
                return Ok(HttpResponse {
                    status: 200,
                    headers: HashMap::new(),
                    body: Bytes::from(
                        json!({"accessToken": "tok", "expiresIn": 3600}).to_string(),
                    ),
                });
            }

            let body_text = request
                .body
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).to_string())
                .unwrap_or_default();
            self.calls
                .lock()
                .unwrap()
                .push((request.method, request.url.clone(), body_text.clone()));

            match request.method {
                HttpMethod::Get => {
                    let exists = self
                        .existing
                        .iter()
                        .any(|id| request.url.ends_with(id.as_str()));
                    respond(if exists { 200 } else { 404 })
                }
                HttpMethod::Patch => {
                    if let Some(key) = &self.fail_on_patch_with_key {
                        if body_text.contains(key.as_str()) {
                            return respond(422);
                        }
                    }
                    respond(200)
                }
                _ => respond(200),
            }
        }
    }

    fn bootstrapper(http: Arc<BootstrapHttp>) -> Bootstrapper {
        let client: Arc<dyn HttpClient> = http;
        let config = EngineConfig::builder()
            .http_client(Arc::clone(&client))
            .catalog_url("https://api.catalog.example")
            .client_credentials("id", "secret")
            .build()
            .unwrap();
        let transport = ResilientClient::new(client, RetryConfig::default());
        Bootstrapper::new(Arc::new(CatalogClient::new(transport, &config)))
    }

    fn blueprint(identifier: &str, relations_to: Option<&str>) -> Value {
        let mut body = json!({
            "identifier": identifier,
            "schema": {"properties": {"name": {"type": "string"}}},
            "calculatedProperties": {"upper": {"calculation": ".name"}},
        });
        if let Some(target) = relations_to {
            body["relations"] = json!({"target": {"target": target, "many": false}});
        }
        body
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let http = Arc::new(BootstrapHttp::new(&[]));
        let resources = BootstrapResources {
            blueprints: vec![blueprint("x", Some("y")), blueprint("y", None)],
            ..Default::default()
        };

        let report = bootstrapper(Arc::clone(&http))
            .bootstrap(&resources)
            .await
            .unwrap();
        assert_eq!(report.created, vec!["x", "y"]);

        // Creates never carry relations or derived properties; those arrive
        // in later patches.
        let calls = http.calls();
        let creates: Vec<_> = calls
            .iter()
            .filter(|(m, url, _)| *m == HttpMethod::Post && url.ends_with("/v1/blueprints"))
            .collect();
        assert_eq!(creates.len(), 2);
        for (_, _, body) in &creates {
            assert!(!body.contains("relations"));
            assert!(!body.contains("calculatedProperties"));
        }

        let patches: Vec<_> = calls
            .iter()
            .filter(|(m, _, _)| *m == HttpMethod::Patch)
            .collect();
        let relation_patch = patches.iter().position(|(_, _, b)| b.contains("relations"));
        let calc_patch = patches
            .iter()
            .position(|(_, _, b)| b.contains("calculatedProperties"));
        assert!(relation_patch.unwrap() < calc_patch.unwrap());
    }

    #[tokio::test]
    async fn test_stage_failure_rolls_back_only_this_run() {
        // Blueprints x and y get created this run; z pre-exists. Stage
        // three breaks.
        let http = Arc::new(
            BootstrapHttp::new(&["z"]).fail_patches_containing("calculatedProperties"),
        );
        let resources = BootstrapResources {
            blueprints: vec![
                blueprint("x", Some("z")),
                blueprint("y", None),
                blueprint("z", None),
            ],
            ..Default::default()
        };

        let result = bootstrapper(Arc::clone(&http)).bootstrap(&resources).await;

        match result {
            Err(ReconcileError::Bootstrap(e)) => {
                assert_eq!(e.stage, "derived_properties");
                assert_eq!(e.rolled_back, vec!["x", "y"]);
            }
            other => panic!("expected Bootstrap error, got {:?}", other.map(|_| ())),
        }

        let deleted = http.deleted_blueprints();
        assert_eq!(deleted, vec!["x", "y"]);
        assert!(!deleted.contains(&"z".to_string()));
    }

    #[tokio::test]
    async fn test_pre_existing_blueprint_not_recreated() {
        let http = Arc::new(BootstrapHttp::new(&["z"]));
        let resources = BootstrapResources {
            blueprints: vec![blueprint("z", None)],
            ..Default::default()
        };

        let report = bootstrapper(Arc::clone(&http))
            .bootstrap(&resources)
            .await
            .unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.pre_existing, vec!["z"]);

        let creates = http
            .calls()
            .into_iter()
            .filter(|(m, url, _)| *m == HttpMethod::Post && url.ends_with("/v1/blueprints"))
            .count();
        assert_eq!(creates, 0);
    }

    #[tokio::test]
    async fn test_extras_failures_are_logged_not_fatal() {
        struct FailingExtras(BootstrapHttp);

        #[async_trait]
        impl HttpClient for FailingExtras {
            async fn execute(
                &self,
                request: HttpRequest,
            ) -> connector_traits::Result<HttpResponse> {
                if request.url.ends_with("/v1/scorecards") {
                    return Ok(HttpResponse {
                        status: 422,
                        headers: HashMap::new(),
                        body: Bytes::from("invalid scorecard"),
                    });
                }
                self.0.execute(request).await
            }
        }

        let client: Arc<dyn HttpClient> = Arc::new(FailingExtras(BootstrapHttp::new(&[])));
        let config = EngineConfig::builder()
            .http_client(Arc::clone(&client))
            .catalog_url("https://api.catalog.example")
            .client_credentials("id", "secret")
            .build()
            .unwrap();
        let transport = ResilientClient::new(client, RetryConfig::default());
        let bootstrapper = Bootstrapper::new(Arc::new(CatalogClient::new(transport, &config)));

        let resources = BootstrapResources {
            blueprints: vec![blueprint("x", None)],
            scorecards: vec![json!({"identifier": "quality"})],
            pages: vec![json!({"identifier": "overview"})],
            ..Default::default()
        };

        let report = bootstrapper.bootstrap(&resources).await.unwrap();
        assert_eq!(report.created, vec!["x"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "scorecards");
    }
}
