//! Connector Contract
//!
//! The interface every third-party connector implements: a paginated async
//! producer of raw record batches plus the declarative mapping configuration
//! that turns those records into catalog entities.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An untyped key/value record as returned by one page of a source API.
pub type RawRecord = serde_json::Value;

/// One page worth of raw records.
pub type RecordBatch = Vec<RawRecord>;

/// A paginated producer: batches in source order, terminated by stream end.
pub type BatchStream = BoxStream<'static, Result<RecordBatch>>;

/// Declarative mapping configuration supplied by a connector.
///
/// `selector_expr` must evaluate to a boolean per record; `mapping_spec` is
/// a nested template whose leaf strings are expressions evaluated against
/// the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingOptions {
    /// Boolean expression deciding whether a record becomes an entity
    pub selector_expr: String,

    /// Nested object template producing the entity fields
    pub mapping_spec: serde_json::Value,

    /// Run the object mapping even for records the selector rejects
    #[serde(default)]
    pub parse_all: bool,
}

/// Resource connector capability set.
///
/// Connectors are selected at construction time and implement exactly this
/// surface; the engine never probes for optional methods at runtime.
pub trait ResourceConnector: Send + Sync {
    /// Identifies the connector in logs and failure reports.
    fn kind(&self) -> &str;

    /// Produce the paginated batch stream for one resource kind.
    ///
    /// Each call starts a fresh pagination pass. Batches preserve source
    /// order within the stream; errors terminate the stream.
    fn fetch_batches(&self) -> BatchStream;

    /// The selector/mapping pair consumed by the entity mapper.
    fn map_options(&self) -> MappingOptions;
}
