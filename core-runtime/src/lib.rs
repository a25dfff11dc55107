//! # Engine Runtime
//!
//! Shared runtime services for the sync engine core.
//!
//! ## Overview
//!
//! This crate owns the ambient concerns every other engine crate relies on:
//!
//! - **Configuration** (`config`): fail-fast `EngineConfig` builder holding
//!   the HTTP client, catalog credentials, and concurrency tunables
//! - **Events** (`events`): broadcast `EventBus` carrying resync and webhook
//!   lifecycle events
//! - **Logging** (`logging`): `tracing-subscriber` bootstrap
//!
//! The config object is created at run start and passed by reference into
//! every component; there are no process-global singletons.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, ResyncEvent, WebhookEvent};
pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
