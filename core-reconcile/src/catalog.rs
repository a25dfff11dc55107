//! # Catalog Client
//!
//! Authenticated client for the catalog API, layered over the resilient
//! transport.
//!
//! ## Overview
//!
//! - Bearer tokens from `POST /auth/access_token`, cached until expiry
//!   minus a safety buffer, with a refresh lock preventing concurrent
//!   refreshes
//! - Entity upsert/delete/search call shapes, including 404-as-success on
//!   delete
//! - Blueprint CRUD used by the bootstrap stage
//! - Migration polling until a terminal status
//!
//! ## Usage
//!
//! ```ignore
//! use core_reconcile::CatalogClient;
//! use core_transport::{ResilientClient, RetryConfig};
//!
//! let transport = ResilientClient::new(http, RetryConfig::default());
//! let catalog = CatalogClient::new(transport, &config);
//! catalog.upsert_entity(&entity, &RequestOptions::default()).await?;
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use connector_traits::{HttpMethod, HttpRequest};
use core_runtime::config::EngineConfig;
use core_transport::{ResilientClient, TransportError};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::entity::{Entity, EntityKey, RequestOptions};
use crate::error::{ReconcileError, Result};

/// Refresh the token this long before it actually expires (5 minutes).
const TOKEN_REFRESH_BUFFER: ChronoDuration = ChronoDuration::seconds(300);

/// How often to poll an in-flight migration.
pub const DEFAULT_MIGRATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Terminal and non-terminal states of a catalog migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Running,
    Complete,
    Failure,
    Cancelled,
}

impl MigrationStatus {
    fn from_api(status: &str) -> Self {
        match status {
            "COMPLETE" => Self::Complete,
            "FAILURE" => Self::Failure,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Authenticated catalog API client.
///
/// Thread-safe; share across tasks with `Arc`.
pub struct CatalogClient {
    client: ResilientClient,
    base_url: String,
    client_id: String,
    client_secret: String,
    user_agent: String,
    token: RwLock<Option<CachedToken>>,
    /// Serializes token refreshes so concurrent callers with an expired
    /// token trigger a single `POST /auth/access_token`
    refresh_lock: Mutex<()>,
}

impl CatalogClient {
    pub fn new(client: ResilientClient, config: &EngineConfig) -> Self {
        Self {
            client,
            base_url: config.catalog_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            user_agent: config.user_agent.clone(),
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn cached_token(&self) -> Option<String> {
        let guard = self.token.read().await;
        guard
            .as_ref()
            .filter(|t| t.is_valid())
            .map(|t| t.token.clone())
    }

    /// Returns a valid bearer token, fetching a fresh one when the cached
    /// token is absent or inside the refresh buffer.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        debug!("Fetching catalog access token");
        let body = serde_json::json!({
            "clientId": self.client_id,
            "clientSecret": self.client_secret,
        });
        let request = HttpRequest::new(
            HttpMethod::Post,
            format!("{}/auth/access_token", self.base_url),
        )
        .header("User-Agent", self.user_agent.clone())
        .json(&body)?
        .retryable();

        let response = self.client.execute(request).await?;
        let parsed: TokenResponse = response.json()?;

        let expires_at =
            Utc::now() + ChronoDuration::seconds(parsed.expires_in) - TOKEN_REFRESH_BUFFER;
        let mut guard = self.token.write().await;
        *guard = Some(CachedToken {
            token: parsed.access_token.clone(),
            expires_at,
        });

        Ok(parsed.access_token)
    }

    async fn authed(&self, request: HttpRequest) -> Result<HttpRequest> {
        let token = self.access_token().await?;
        Ok(request
            .bearer_token(token)
            .header("User-Agent", self.user_agent.clone()))
    }

    /// Upsert one entity into its blueprint.
    ///
    /// The four request flags travel as query parameters; with
    /// `validation_only` the catalog performs the same call shape without
    /// persisting.
    #[instrument(skip(self, entity, options), fields(key = %entity.key()))]
    pub async fn upsert_entity(&self, entity: &Entity, options: &RequestOptions) -> Result<()> {
        let url = format!(
            "{}/v1/blueprints/{}/entities?upsert=true&merge={}&create_missing_related_entities={}&validation_only={}",
            self.base_url,
            entity.blueprint,
            options.merge,
            options.create_missing_related_entities,
            options.validation_only,
        );
        let request = self
            .authed(HttpRequest::new(HttpMethod::Post, url).json(entity)?)
            .await?
            .retryable();

        self.client
            .execute(request)
            .await
            .map_err(|e| ReconcileError::Upsert {
                key: entity.key(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Delete one entity. A 404 means the entity is already absent and is
    /// treated as success.
    #[instrument(skip(self, key, options), fields(key = %key))]
    pub async fn delete_entity(&self, key: &EntityKey, options: &RequestOptions) -> Result<()> {
        let url = format!(
            "{}/v1/blueprints/{}/entities/{}?delete_dependents={}",
            self.base_url, key.blueprint, key.identifier, options.delete_dependent_entities,
        );
        let request = self
            .authed(HttpRequest::new(HttpMethod::Delete, url))
            .await?;

        match self.client.execute(request).await {
            Ok(_) => Ok(()),
            Err(TransportError::Client { status: 404, .. }) => {
                debug!(%key, "Entity already absent, treating delete as success");
                Ok(())
            }
            Err(e) => Err(ReconcileError::Delete {
                key: key.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Search entities with a catalog query document.
    pub async fn search_entities(&self, query: &serde_json::Value) -> Result<Vec<serde_json::Value>> {
        let request = self
            .authed(
                HttpRequest::new(
                    HttpMethod::Post,
                    format!("{}/v1/entities/search", self.base_url),
                )
                .json(query)?,
            )
            .await?
            .retryable();

        let response = self.client.execute(request).await?;
        let body: serde_json::Value = response.json()?;
        Ok(body
            .get("entities")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Poll a migration until it reaches a terminal status.
    #[instrument(skip(self))]
    pub async fn wait_for_migration(
        &self,
        migration_id: &str,
        poll_interval: Duration,
    ) -> Result<MigrationStatus> {
        loop {
            let request = self
                .authed(HttpRequest::new(
                    HttpMethod::Get,
                    format!("{}/v1/migrations/{}", self.base_url, migration_id),
                ))
                .await?;
            let response = self.client.execute(request).await?;
            let body: serde_json::Value = response.json()?;
            let raw = body
                .pointer("/migration/status")
                .or_else(|| body.get("status"))
                .and_then(|s| s.as_str())
                .unwrap_or("");

            let status = MigrationStatus::from_api(raw);
            if status.is_terminal() {
                info!(migration_id, ?status, "Migration reached terminal status");
                return Ok(status);
            }
            debug!(migration_id, raw, "Migration still running");
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Whether a blueprint with this identifier already exists.
    pub async fn blueprint_exists(&self, identifier: &str) -> Result<bool> {
        let request = self
            .authed(HttpRequest::new(
                HttpMethod::Get,
                format!("{}/v1/blueprints/{}", self.base_url, identifier),
            ))
            .await?;

        match self.client.execute(request).await {
            Ok(_) => Ok(true),
            Err(TransportError::Client { status: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_blueprint(&self, body: &serde_json::Value) -> Result<()> {
        let request = self
            .authed(
                HttpRequest::new(HttpMethod::Post, format!("{}/v1/blueprints", self.base_url))
                    .json(body)?,
            )
            .await?;
        self.client.execute(request).await?;
        Ok(())
    }

    pub async fn patch_blueprint(
        &self,
        identifier: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        let request = self
            .authed(
                HttpRequest::new(
                    HttpMethod::Patch,
                    format!("{}/v1/blueprints/{}", self.base_url, identifier),
                )
                .json(body)?,
            )
            .await?;
        self.client.execute(request).await?;
        Ok(())
    }

    /// Delete a blueprint; 404 counts as already gone.
    pub async fn delete_blueprint(&self, identifier: &str) -> Result<()> {
        let request = self
            .authed(HttpRequest::new(
                HttpMethod::Delete,
                format!("{}/v1/blueprints/{}", self.base_url, identifier),
            ))
            .await?;

        match self.client.execute(request).await {
            Ok(_) => Ok(()),
            Err(TransportError::Client { status: 404, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a non-blueprint bootstrap resource (actions, scorecards,
    /// pages). Callers decide whether failures are fatal.
    pub async fn create_resource(&self, kind: &str, body: &serde_json::Value) -> Result<()> {
        let request = self
            .authed(
                HttpRequest::new(
                    HttpMethod::Post,
                    format!("{}/v1/{}", self.base_url, kind),
                )
                .json(body)?,
            )
            .await?;
        if let Err(e) = self.client.execute(request).await {
            warn!(kind, error = %e, "Failed to create bootstrap resource");
            return Err(e.into());
        }
        Ok(())
    }
}
