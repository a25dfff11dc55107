//! Retry configuration and backoff arithmetic.
//!
//! Sleep duration for a retry is decided in priority order: the server's
//! `Retry-After` header when the config respects it, otherwise exponential
//! backoff with symmetric jitter capped at `max_backoff_wait`.

use chrono::{DateTime, Utc};
use connector_traits::HttpMethod;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Status codes retried by default: request timeout, rate limit, and the
/// transient 5xx family.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry policy for one transport instance.
///
/// Immutable once constructed; connectors needing different behavior clone
/// and override before building their client.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts for one logical request, first try included
    pub max_attempts: u32,
    /// Ceiling on any single backoff sleep
    pub max_backoff_wait: Duration,
    /// First backoff delay; doubles every attempt
    pub base_delay: Duration,
    /// Symmetric jitter fraction, clamped to [0, 0.5]
    pub jitter_ratio: f64,
    /// Obey `Retry-After` response headers when present
    pub respect_retry_after_header: bool,
    /// Methods retried without per-request opt-in
    pub retryable_methods: HashSet<HttpMethod>,
    /// Response statuses that trigger a retry
    pub retryable_status_codes: HashSet<u16>,
    /// Header names consulted for a server-dictated wait
    pub retry_after_headers: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_backoff_wait: Duration::from_secs(60),
            base_delay: Duration::from_millis(500),
            jitter_ratio: 0.1,
            respect_retry_after_header: true,
            retryable_methods: [
                HttpMethod::Get,
                HttpMethod::Head,
                HttpMethod::Put,
                HttpMethod::Delete,
            ]
            .into_iter()
            .collect(),
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            retry_after_headers: vec!["Retry-After".to_string()],
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_backoff_wait(mut self, wait: Duration) -> Self {
        self.max_backoff_wait = wait;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 0.5);
        self
    }

    pub fn without_retry_after(mut self) -> Self {
        self.respect_retry_after_header = false;
        self
    }

    /// Whether this request method is retry-eligible under the policy.
    pub fn method_is_retryable(&self, method: HttpMethod) -> bool {
        self.retryable_methods.contains(&method)
    }

    /// Backoff sleep before the given retry, `attempt` counting from 1 for
    /// the first retry.
    ///
    /// `base_delay * 2^(attempt-1)`, jittered by ±`jitter_ratio`, capped at
    /// `max_backoff_wait` both before and after jitter, so the returned
    /// delay never exceeds `max_backoff_wait` and the un-jittered series is
    /// non-decreasing.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exp as i32);
        let capped = raw.min(self.max_backoff_wait.as_secs_f64());

        let ratio = self.jitter_ratio.clamp(0.0, 0.5);
        let jittered = if ratio > 0.0 {
            let factor = rand::thread_rng().gen_range(1.0 - ratio..=1.0 + ratio);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.min(self.max_backoff_wait.as_secs_f64()))
    }

    /// Extract a server-dictated wait from response headers, if configured.
    pub fn retry_after(
        &self,
        headers: &std::collections::HashMap<String, String>,
    ) -> Option<Duration> {
        if !self.respect_retry_after_header {
            return None;
        }
        for name in &self.retry_after_headers {
            let value = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str());
            if let Some(value) = value {
                if let Some(delay) = parse_retry_after(value) {
                    return Some(delay);
                }
            }
        }
        None
    }
}

/// Parse a `Retry-After` value: integer seconds, or an HTTP date converted
/// to `max(0, date - now)`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date: DateTime<Utc> = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let delta = date - Utc::now();
    Some(Duration::from_secs(delta.num_seconds().max(0) as u64))
}
