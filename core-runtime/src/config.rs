//! # Engine Configuration Module
//!
//! Provides configuration management for the sync engine core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! `EngineConfig` instance that holds all dependencies and settings shared
//! across a run. It enforces fail-fast validation so a missing capability
//! surfaces at startup with an actionable message rather than deep inside a
//! resync pass.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - transport used for every outbound call
//! - catalog base URL and client credentials
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::builder()
//!     .http_client(Arc::new(MyHttpClient))
//!     .catalog_url("https://api.catalog.example")
//!     .client_credentials("client-id", "client-secret")
//!     .fetch_concurrency(10)
//!     .max_http_connections(50)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! Config-file and environment loading are connector-application glue and
//! deliberately live outside this crate; hosts construct the builder from
//! whatever source they prefer.

use crate::error::{Error, Result};
use connector_traits::HttpClient;
use std::sync::Arc;

/// Default number of paginated sources fetched concurrently per connector.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 10;

/// Default size of the shared outbound HTTP connection pool.
pub const DEFAULT_MAX_HTTP_CONNECTIONS: usize = 50;

/// Engine configuration shared by every component of one run.
///
/// Use [`EngineConfigBuilder`] to construct instances. The config is created
/// at run start and passed by reference into every component that needs it;
/// nothing in the engine reads process-global state.
#[derive(Clone)]
pub struct EngineConfig {
    /// Transport used for every outbound HTTP call
    pub http_client: Arc<dyn HttpClient>,

    /// Base URL of the catalog API
    pub catalog_url: String,

    /// Client id presented to `POST /auth/access_token`
    pub client_id: String,

    /// Client secret presented to `POST /auth/access_token`
    pub client_secret: String,

    /// User-Agent attached to catalog calls
    pub user_agent: String,

    /// How many paginated sources run at once per connector
    pub fetch_concurrency: usize,

    /// Shared HTTP connection-pool limit; the catalog semaphore is sized at
    /// 90% of this value
    pub max_http_connections: usize,
}

impl EngineConfig {
    /// Create a builder for constructing an `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Permits available for concurrent catalog upsert/delete calls.
    ///
    /// 90% of the connection pool, leaving headroom for non-entity traffic
    /// on the same pool. Never less than one.
    pub fn catalog_concurrency(&self) -> usize {
        ((self.max_http_connections as f64) * 0.9).floor().max(1.0) as usize
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("catalog_url", &self.catalog_url)
            .field("client_id", &self.client_id)
            .field("user_agent", &self.user_agent)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("max_http_connections", &self.max_http_connections)
            .finish_non_exhaustive()
    }
}

/// Builder for [`EngineConfig`] with fail-fast validation.
#[derive(Default)]
pub struct EngineConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    catalog_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    user_agent: Option<String>,
    fetch_concurrency: Option<usize>,
    max_http_connections: Option<usize>,
}

impl EngineConfigBuilder {
    /// Set the HTTP client implementation (required).
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set the catalog API base URL (required).
    pub fn catalog_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_url = Some(url.into());
        self
    }

    /// Set the catalog client credentials (required).
    pub fn client_credentials(
        mut self,
        id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.client_id = Some(id.into());
        self.client_secret = Some(secret.into());
        self
    }

    /// Set the User-Agent for catalog calls.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set how many paginated sources run at once per connector.
    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = Some(n);
        self
    }

    /// Set the shared HTTP connection-pool limit.
    pub fn max_http_connections(mut self, n: usize) -> Self {
        self.max_http_connections = Some(n);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when no `HttpClient` was provided
    /// - `Config` when required settings are absent or tunables are zero
    pub fn build(self) -> Result<EngineConfig> {
        let http_client = self.http_client.ok_or_else(|| Error::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "No HTTP client implementation provided. \
                      Use core_transport::ReqwestHttpClient or inject a custom adapter."
                .to_string(),
        })?;

        let catalog_url = self
            .catalog_url
            .ok_or_else(|| Error::Config("catalog_url is required".to_string()))?;
        let client_id = self
            .client_id
            .ok_or_else(|| Error::Config("client credentials are required".to_string()))?;
        let client_secret = self
            .client_secret
            .ok_or_else(|| Error::Config("client credentials are required".to_string()))?;

        let fetch_concurrency = self.fetch_concurrency.unwrap_or(DEFAULT_FETCH_CONCURRENCY);
        if fetch_concurrency == 0 {
            return Err(Error::Config(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }

        let max_http_connections = self
            .max_http_connections
            .unwrap_or(DEFAULT_MAX_HTTP_CONNECTIONS);
        if max_http_connections < 2 {
            return Err(Error::Config(
                "max_http_connections must be at least 2".to_string(),
            ));
        }

        Ok(EngineConfig {
            http_client,
            catalog_url: catalog_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| "catalog-sync/0.1.0".to_string()),
            fetch_concurrency,
            max_http_connections,
        })
    }
}
