//! # Connector Traits
//!
//! Contracts between the sync engine core and the connector fleet.
//!
//! ## Overview
//!
//! Hundreds of thin REST connectors sit on top of the engine. This crate
//! defines the two things the engine needs from each of them, and nothing
//! else:
//!
//! - [`HttpClient`](http::HttpClient) - a single request/response exchange;
//!   retry and rate limiting are layered on top in `core-transport`
//! - [`ResourceConnector`](source::ResourceConnector) - a paginated batch
//!   producer plus its declarative `{selector, mapping}` configuration
//!
//! ## Error Handling
//!
//! All traits use [`ConnectorError`](error::ConnectorError). The
//! `AccessDenied` variant carries special meaning during fan-in: it ends one
//! source silently instead of aborting the whole merge.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` bounds so implementations can be shared
//! across async tasks.

pub mod error;
pub mod http;
pub mod source;

pub use error::{ConnectorError, Result};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use source::{BatchStream, MappingOptions, RawRecord, RecordBatch, ResourceConnector};
