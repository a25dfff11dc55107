use connector_traits::RawRecord;
use serde_json::Value;
use std::collections::BTreeMap;

/// Result of running one raw record through a mapping configuration.
///
/// Immutable after creation. `entity` is the candidate entity body as raw
/// JSON; downstream reconciliation deserializes it into its own model.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedEntity {
    /// Mapped entity body (an object, possibly empty)
    pub entity: Value,
    /// Whether the record's selector expression evaluated to true
    pub did_pass_selector: bool,
    /// Dotted field path -> original expression, for every mapping leaf
    /// that resolved to nothing
    pub misconfigurations: BTreeMap<String, String>,
    /// The raw record the mapping ran against, when retained
    pub raw_data: Option<RawRecord>,
    /// Position of the record within its batch, when known
    pub raw_index: Option<usize>,
}

impl MappedEntity {
    /// An empty, selector-failing result. Used when the selector rejects a
    /// record and full parsing was not requested.
    pub fn failed(raw_data: Option<RawRecord>, raw_index: Option<usize>) -> Self {
        Self {
            entity: Value::Object(serde_json::Map::new()),
            did_pass_selector: false,
            misconfigurations: BTreeMap::new(),
            raw_data,
            raw_index,
        }
    }

    /// True when the mapping produced a usable entity body.
    pub fn is_usable(&self) -> bool {
        self.did_pass_selector && self.entity.is_object()
    }
}
