//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the
//! individual workspace crates (e.g., `core-reconcile`, `core-webhook`).
//! Host applications can depend on `catalog-sync` and enable the documented
//! features without needing to wire each crate individually.

#[cfg(feature = "engine")]
pub use core_reconcile;

#[cfg(feature = "webhooks")]
pub use core_webhook;
