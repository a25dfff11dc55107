//! # Webhook Ingestion
//!
//! Authenticated webhook intake feeding live deltas into the entity mapper
//! and the reconciliation engine.
//!
//! ## Overview
//!
//! - **Signatures** (`signature`): HMAC-SHA256 over the raw body and plain
//!   shared-secret headers, both constant-time
//! - **Pipeline** (`processor`): authenticate, validate, filter, route,
//!   handle, reconcile

pub mod error;
pub mod processor;
pub mod signature;

pub use error::{Result, WebhookError};
pub use processor::{WebhookEventRawResults, WebhookPipeline, WebhookProcessor};
pub use signature::{SharedSecretVerifier, SignatureVerifier, DEFAULT_SIGNATURE_HEADER};
