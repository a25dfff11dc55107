//! Webhook authentication over the raw request body.
//!
//! Verification runs before JSON parsing so a tampered body never reaches
//! the pipeline. Comparisons are constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, WebhookError};

type HmacSha256 = Hmac<Sha256>;

/// Default signature header when a vendor doesn't use a custom one.
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-hub-signature-256";

fn lookup<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// HMAC-SHA256 signature verification.
///
/// Accepts the signature as raw hex or prefixed `sha256=<hex>`; the header
/// name is vendor-specific and configurable.
pub struct SignatureVerifier {
    secret: Vec<u8>,
    header_name: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            header_name: DEFAULT_SIGNATURE_HEADER.to_string(),
        }
    }

    /// Override the header carrying the signature (e.g. `x-hub-signature`
    /// or a custom `X-<Vendor>-Signature`).
    pub fn with_header(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Verify the signature header against the raw body.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the header is missing, malformed, or does not
    /// match.
    pub fn verify(&self, body: &[u8], headers: &HashMap<String, String>) -> Result<()> {
        let provided = lookup(headers, &self.header_name).ok_or_else(|| {
            WebhookError::Unauthorized(format!("missing '{}' header", self.header_name))
        })?;
        let hex_sig = provided.strip_prefix("sha256=").unwrap_or(provided);
        let signature = hex::decode(hex_sig)
            .map_err(|_| WebhookError::Unauthorized("signature is not valid hex".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| WebhookError::Unauthorized("invalid signing key".to_string()))?;
        mac.update(body);
        mac.verify_slice(&signature).map_err(|_| {
            debug!(header = %self.header_name, "Webhook signature mismatch");
            WebhookError::Unauthorized("signature mismatch".to_string())
        })
    }

    /// Hex signature for a body, usable by senders and tests.
    pub fn sign(&self, body: &[u8]) -> String {
        // HMAC accepts keys of any length; this cannot fail.
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Plain shared-secret header check, for vendors that send the secret
/// verbatim instead of signing the body.
pub struct SharedSecretVerifier {
    secret: Vec<u8>,
    header_name: String,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl AsRef<[u8]>, header_name: impl Into<String>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            header_name: header_name.into(),
        }
    }

    pub fn verify(&self, headers: &HashMap<String, String>) -> Result<()> {
        let provided = lookup(headers, &self.header_name).ok_or_else(|| {
            WebhookError::Unauthorized(format!("missing '{}' header", self.header_name))
        })?;
        if constant_time_eq(provided.as_bytes(), &self.secret) {
            Ok(())
        } else {
            Err(WebhookError::Unauthorized(
                "shared secret mismatch".to_string(),
            ))
        }
    }
}

/// Length-checked constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let verifier = SignatureVerifier::new("topsecret");
        let body = br#"{"event":"push"}"#;
        let sig = verifier.sign(body);

        let headers = headers(&[("X-Hub-Signature-256", sig.as_str())]);
        assert!(verifier.verify(body, &headers).is_ok());
    }

    #[test]
    fn test_sha256_prefix_accepted() {
        let verifier = SignatureVerifier::new("topsecret");
        let body = b"payload";
        let sig = format!("sha256={}", verifier.sign(body));

        let headers = headers(&[("x-hub-signature-256", sig.as_str())]);
        assert!(verifier.verify(body, &headers).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let verifier = SignatureVerifier::new("topsecret");
        let sig = verifier.sign(b"original");

        let headers = headers(&[("x-hub-signature-256", sig.as_str())]);
        let result = verifier.verify(b"tampered", &headers);
        assert!(matches!(result, Err(WebhookError::Unauthorized(_))));
    }

    #[test]
    fn test_missing_header_rejected() {
        let verifier = SignatureVerifier::new("topsecret");
        let result = verifier.verify(b"body", &headers(&[]));
        assert!(matches!(result, Err(WebhookError::Unauthorized(_))));
    }

    #[test]
    fn test_custom_header_name() {
        let verifier = SignatureVerifier::new("topsecret").with_header("X-Vendor-Signature");
        let body = b"body";
        let sig = verifier.sign(body);

        let headers = headers(&[("x-vendor-signature", sig.as_str())]);
        assert!(verifier.verify(body, &headers).is_ok());
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let verifier = SignatureVerifier::new("topsecret");
        let headers = headers(&[("x-hub-signature-256", "not-hex!")]);
        assert!(verifier.verify(b"body", &headers).is_err());
    }

    #[test]
    fn test_shared_secret_verifier() {
        let verifier = SharedSecretVerifier::new("abc123", "x-webhook-secret");
        assert!(verifier
            .verify(&headers(&[("X-Webhook-Secret", "abc123")]))
            .is_ok());
        assert!(verifier
            .verify(&headers(&[("X-Webhook-Secret", "abc124")]))
            .is_err());
        assert!(verifier.verify(&headers(&[])).is_err());
    }

    #[test]
    fn test_constant_time_eq_lengths() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
