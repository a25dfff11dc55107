//! Resilient request execution.
//!
//! One logical request walks the state machine
//! `ATTEMPT -> (SUCCESS | RETRY -> ATTEMPT | EXHAUSTED)`. Every decision is
//! made by branching on a classified value, never by unwinding.

use async_trait::async_trait;
use connector_traits::{HttpClient, HttpRequest, HttpResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{Result, TransportError};
use crate::rate_limit::{RateLimitState, RateLimiter};
use crate::retry::RetryConfig;

/// Refreshes credentials after a 401; returns the new bearer token.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self) -> connector_traits::Result<String>;
}

/// Connector-specific retry hook, e.g. "403 whose rate-limit headers show
/// an exhausted quota".
pub type RetryPredicate = Arc<dyn Fn(&HttpResponse) -> bool + Send + Sync>;

/// Ready-made predicate for hosts that report quota exhaustion as 403.
pub fn quota_exhausted_403(response: &HttpResponse) -> bool {
    response.status == 403
        && RateLimitState::from_headers(&response.headers)
            .map(|s| s.is_exhausted())
            .unwrap_or(false)
}

/// What to do after one attempt.
enum Decision {
    Success(HttpResponse),
    Retry { sleep: Duration },
    RefreshCredentials,
    Fatal(TransportError),
}

/// HTTP client wrapper providing retry, backoff, rate-limit gating, and
/// credential refresh.
///
/// Wraps any [`HttpClient`]; connectors build one per API they talk to and
/// override the [`RetryConfig`] where a vendor misbehaves.
pub struct ResilientClient {
    http: Arc<dyn HttpClient>,
    retry: RetryConfig,
    limiter: Option<Arc<dyn RateLimiter>>,
    refresher: Option<Arc<dyn CredentialRefresher>>,
    retry_predicate: Option<RetryPredicate>,
}

impl ResilientClient {
    pub fn new(http: Arc<dyn HttpClient>, retry: RetryConfig) -> Self {
        Self {
            http,
            retry,
            limiter: None,
            refresher: None,
            retry_predicate: None,
        }
    }

    /// Gate every attempt through a rate limiter.
    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Register a credential refresher invoked once per request on 401.
    pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Register a connector-specific "this response is retryable" hook.
    pub fn with_retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Execute one logical request, retrying per the policy.
    ///
    /// # Errors
    ///
    /// Surfaces the final classified failure once attempts are exhausted or
    /// a fatal (non-retryable) response arrives.
    #[instrument(skip(self, request), fields(url = %request.url, method = ?request.method))]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let retry_eligible =
            request.force_retryable || self.retry.method_is_retryable(request.method);
        let mut current = request;
        let mut attempt: u32 = 1;
        let mut credentials_refreshed = false;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }

            let decision = match self.http.execute(current.clone()).await {
                Ok(response) => {
                    if let Some(limiter) = &self.limiter {
                        limiter.update_from_headers(&response.headers).await;
                    }
                    self.classify(response, retry_eligible, attempt, credentials_refreshed)
                }
                Err(e) => {
                    if retry_eligible && attempt < self.retry.max_attempts {
                        Decision::Retry {
                            sleep: self.retry.backoff_delay(attempt),
                        }
                    } else {
                        Decision::Fatal(TransportError::Network {
                            message: e.to_string(),
                            attempts: attempt,
                        })
                    }
                }
            };

            match decision {
                Decision::Success(response) => {
                    debug!(status = response.status, attempt, "Request succeeded");
                    return Ok(response);
                }
                Decision::Retry { sleep } => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        sleep_ms = sleep.as_millis() as u64,
                        "Retrying request"
                    );
                    tokio::time::sleep(sleep).await;
                    attempt += 1;
                }
                Decision::RefreshCredentials => {
                    // One immediate retry with fresh credentials, outside
                    // the backoff clock.
                    let Some(refresher) = self.refresher.as_ref() else {
                        return Err(TransportError::Auth {
                            message: "Unauthorized and no credential refresher registered"
                                .to_string(),
                        });
                    };
                    let token = refresher.refresh().await.map_err(|e| TransportError::Auth {
                        message: format!("Credential refresh failed: {}", e),
                    })?;
                    current
                        .headers
                        .insert("Authorization".to_string(), format!("Bearer {}", token));
                    credentials_refreshed = true;
                }
                Decision::Fatal(error) => {
                    warn!(attempt, error = %error, "Request failed");
                    return Err(error);
                }
            }
        }
    }

    fn classify(
        &self,
        response: HttpResponse,
        retry_eligible: bool,
        attempt: u32,
        credentials_refreshed: bool,
    ) -> Decision {
        if response.is_success() {
            return Decision::Success(response);
        }

        if response.status == 401 {
            if self.refresher.is_some() && !credentials_refreshed {
                return Decision::RefreshCredentials;
            }
            let message = if credentials_refreshed {
                "Unauthorized and credentials already refreshed"
            } else {
                "Unauthorized and no credential refresher registered"
            };
            return Decision::Fatal(TransportError::Auth {
                message: message.to_string(),
            });
        }

        let predicate_hit = self
            .retry_predicate
            .as_ref()
            .map(|p| p(&response))
            .unwrap_or(false);
        let retryable_status =
            self.retry.retryable_status_codes.contains(&response.status) || predicate_hit;

        if retry_eligible && retryable_status && attempt < self.retry.max_attempts {
            let sleep = self
                .retry
                .retry_after(&response.headers)
                .unwrap_or_else(|| self.retry.backoff_delay(attempt));
            return Decision::Retry { sleep };
        }

        Decision::Fatal(Self::final_error(response, attempt))
    }

    fn final_error(response: HttpResponse, attempts: u32) -> TransportError {
        match response.status {
            429 => TransportError::RateLimited {
                status: 429,
                attempts,
            },
            s if s >= 500 => TransportError::Server { status: s, attempts },
            s => TransportError::Client {
                status: s,
                message: response.text().unwrap_or_default().chars().take(200).collect(),
            },
        }
    }
}
