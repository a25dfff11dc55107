//! Canonical catalog entity model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A relation slot on an entity: either one target identifier (possibly
/// unset when the target does not exist yet) or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationValue {
    Many(Vec<String>),
    Single(Option<String>),
}

impl RelationValue {
    /// Identifiers this relation points at.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            RelationValue::Many(ids) => ids.iter().map(String::as_str).collect(),
            RelationValue::Single(Some(id)) => vec![id.as_str()],
            RelationValue::Single(None) => Vec::new(),
        }
    }
}

/// The catalog's canonical entity shape.
///
/// `identifier` + `blueprint` form the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub identifier: String,
    pub blueprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationValue>,
}

impl Entity {
    pub fn new(identifier: impl Into<String>, blueprint: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            blueprint: blueprint.into(),
            title: None,
            properties: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey {
            identifier: self.identifier.clone(),
            blueprint: self.blueprint.clone(),
        }
    }

    /// Identifiers of every entity this one relates to.
    pub fn relation_targets(&self) -> Vec<&str> {
        self.relations.values().flat_map(|r| r.targets()).collect()
    }
}

/// Unique key of an entity within the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub identifier: String,
    pub blueprint: String,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.blueprint, self.identifier)
    }
}

/// Flags accompanying every upsert/delete call.
///
/// `validation_only = true` must never cause a durable write; the flag is
/// forwarded to the catalog and the engine never records a validation
/// response as applied state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub merge: bool,
    pub create_missing_related_entities: bool,
    pub delete_dependent_entities: bool,
    pub validation_only: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            merge: true,
            create_missing_related_entities: true,
            delete_dependent_entities: false,
            validation_only: false,
        }
    }
}

/// Which catalog operation failed for a queued entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedOp {
    Upsert,
    Delete,
}

/// A failed upsert/delete queued for one end-of-pass retry.
///
/// Keyed by [`EntityKey`] in the run's failure map, so re-registering the
/// same entity replaces the earlier record instead of duplicating it.
#[derive(Debug, Clone)]
pub struct FailedEntityRecord {
    pub entity: Entity,
    pub options: RequestOptions,
    pub user_agent: Option<String>,
    pub op: FailedOp,
}

/// Unique identifier for one resync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResyncRunId(Uuid);

impl ResyncRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResyncRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
