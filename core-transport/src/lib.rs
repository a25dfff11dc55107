//! # Resilient Transport
//!
//! Wraps outbound HTTP calls with retry, exponential backoff with jitter,
//! credential refresh, and rate-limit-aware waiting.
//!
//! ## Overview
//!
//! - **Retry Policy** (`retry`): `RetryConfig` with backoff arithmetic and
//!   `Retry-After` parsing
//! - **Execution** (`client`): `ResilientClient` walking the
//!   `ATTEMPT -> (SUCCESS | RETRY | EXHAUSTED)` state machine
//! - **Rate Limiting** (`rate_limit`): token bucket, header-adaptive
//!   limiter, and a per-`(host, api-family)` registry
//! - **Default Transport** (`reqwest_client`): pooled reqwest-backed
//!   [`connector_traits::HttpClient`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_transport::{ResilientClient, RetryConfig, ReqwestHttpClient};
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let client = ResilientClient::new(http, RetryConfig::default());
//! let response = client.execute(request).await?;
//! ```

pub mod client;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod reqwest_client;

pub use client::{quota_exhausted_403, CredentialRefresher, ResilientClient, RetryPredicate};
pub use error::{Result, TransportError};
pub use rate_limit::{
    AdaptiveLimiter, ApiFamily, LimiterRegistry, RateLimitState, RateLimiter, TokenBucketLimiter,
};
pub use reqwest_client::ReqwestHttpClient;
pub use retry::{parse_retry_after, RetryConfig, DEFAULT_RETRYABLE_STATUS_CODES};
