//! # Entity Processor
//!
//! Evaluates selector and mapping configurations against raw records.
//!
//! ## Overview
//!
//! - `compile` memoizes parsed expressions in an LRU cache, since the same
//!   handful of expressions is evaluated across every record of a run
//! - `search` is tolerant: evaluation problems are logged and surface as
//!   `None`, never as errors
//! - `search_as_bool` is strict: selectors must produce a definite yes/no
//! - `search_as_object` walks a nested template, evaluating every leaf
//!   independently so one bad expression never aborts its siblings; empty
//!   leaves are recorded in a misconfiguration map by dotted field path
//!
//! ## Usage
//!
//! ```ignore
//! use core_mapper::EntityProcessor;
//! use serde_json::json;
//!
//! let processor = EntityProcessor::new();
//! let mapping = json!({"identifier": ".id", "title": ".name"});
//! let mapped = processor.get_mapped_entity(&record, &mapping, ".status == 'ACTIVE'", false)?;
//! ```

use lru::LruCache;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::entity::MappedEntity;
use crate::error::{MapperError, Result};
use crate::expr::{self, CompiledExpr};

const COMPILE_CACHE_SIZE: usize = 256;

/// Compiles and evaluates mapping expressions, with a process-wide compile
/// cache scoped to this processor instance.
pub struct EntityProcessor {
    cache: Mutex<LruCache<String, CompiledExpr>>,
}

impl EntityProcessor {
    pub fn new() -> Self {
        Self::with_cache_size(COMPILE_CACHE_SIZE)
    }

    pub fn with_cache_size(size: usize) -> Self {
        let size = NonZeroUsize::new(size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(size)),
        }
    }

    /// Parse an expression, returning a shared handle. Repeated calls with
    /// the same text hit the cache.
    pub fn compile(&self, expression: &str) -> Result<CompiledExpr> {
        // Lock poisoning only happens if a panic escaped while compiling;
        // fall through to an uncached parse in that case.
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(compiled) = cache.get(expression) {
                return Ok(compiled.clone());
            }
            let compiled = CompiledExpr::new(expr::parse(expression)?);
            cache.put(expression.to_string(), compiled.clone());
            return Ok(compiled);
        }
        Ok(CompiledExpr::new(expr::parse(expression)?))
    }

    /// Evaluate an expression against a record.
    ///
    /// Returns `None` when the expression fails to compile or resolves to
    /// null. Mapping must survive absent or malformed fields, so problems
    /// are logged rather than propagated.
    pub fn search(&self, data: &Value, expression: &str) -> Option<Value> {
        let compiled = match self.compile(expression) {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(expression, error = %e, "Failed to compile mapping expression");
                return None;
            }
        };
        match expr::eval(&compiled, data) {
            Value::Null => None,
            value => Some(value),
        }
    }

    /// Evaluate a selector expression, which must produce a boolean.
    pub fn search_as_bool(&self, data: &Value, expression: &str) -> Result<bool> {
        let compiled = self.compile(expression)?;
        match expr::eval(&compiled, data) {
            Value::Bool(b) => Ok(b),
            value => Err(MapperError::NonBooleanSelector {
                expression: expression.to_string(),
                value,
            }),
        }
    }

    /// Resolve a nested template against a record.
    ///
    /// Leaf strings are expressions; objects and lists recurse. Every leaf
    /// is evaluated independently; a leaf that resolves to nothing becomes
    /// `null` in the output and an entry in the returned misconfiguration
    /// map, keyed by its dotted field path.
    pub fn search_as_object(
        &self,
        data: &Value,
        template: &Value,
    ) -> (Value, BTreeMap<String, String>) {
        let mut misconfigurations = BTreeMap::new();
        let resolved = self.resolve_template(data, template, "", &mut misconfigurations);
        (resolved, misconfigurations)
    }

    fn resolve_template(
        &self,
        data: &Value,
        template: &Value,
        path: &str,
        misconfigurations: &mut BTreeMap<String, String>,
    ) -> Value {
        match template {
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, sub) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    out.insert(
                        key.clone(),
                        self.resolve_template(data, sub, &child_path, misconfigurations),
                    );
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, sub) in items.iter().enumerate() {
                    let child_path = format!("{}[{}]", path, i);
                    out.push(self.resolve_template(data, sub, &child_path, misconfigurations));
                }
                Value::Array(out)
            }
            Value::String(expression) => match self.search(data, expression) {
                Some(value) => value,
                None => {
                    debug!(field = path, expression, "Mapping leaf resolved to nothing");
                    misconfigurations.insert(path.to_string(), expression.clone());
                    Value::Null
                }
            },
            // Non-string scalars pass through as literal values.
            other => other.clone(),
        }
    }

    /// Run the full selector-then-mapping flow for one record.
    ///
    /// The selector runs first; when it rejects the record and `parse_all`
    /// is false, the mapping is skipped entirely and an empty failing
    /// result is returned.
    pub fn get_mapped_entity(
        &self,
        data: &Value,
        mapping: &Value,
        selector: &str,
        parse_all: bool,
    ) -> Result<MappedEntity> {
        self.get_mapped_entity_indexed(data, mapping, selector, parse_all, None)
    }

    /// Same as [`get_mapped_entity`](Self::get_mapped_entity) but records
    /// the record's position within its batch.
    pub fn get_mapped_entity_indexed(
        &self,
        data: &Value,
        mapping: &Value,
        selector: &str,
        parse_all: bool,
        raw_index: Option<usize>,
    ) -> Result<MappedEntity> {
        let did_pass_selector = self.search_as_bool(data, selector)?;

        if !did_pass_selector && !parse_all {
            return Ok(MappedEntity::failed(Some(data.clone()), raw_index));
        }

        let (entity, misconfigurations) = self.search_as_object(data, mapping);
        Ok(MappedEntity {
            entity,
            did_pass_selector,
            misconfigurations,
            raw_data: Some(data.clone()),
            raw_index,
        })
    }
}

impl Default for EntityProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_compile_is_memoized() {
        let processor = EntityProcessor::new();
        let a = processor.compile(".status == 'WORKING'").unwrap();
        let b = processor.compile(".status == 'WORKING'").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_search_returns_none_for_missing_field() {
        let processor = EntityProcessor::new();
        let data = json!({"foo": "bar"});
        assert_eq!(processor.search(&data, ".foo"), Some(json!("bar")));
        assert_eq!(processor.search(&data, ".nope"), None);
    }

    #[test]
    fn test_search_swallows_compile_errors() {
        let processor = EntityProcessor::new();
        assert_eq!(processor.search(&json!({}), ".a =="), None);
    }

    #[test]
    fn test_selector_semantics() {
        let processor = EntityProcessor::new();
        let data = json!({"status": "WORKING"});
        assert!(processor
            .search_as_bool(&data, ".status == \"WORKING\"")
            .unwrap());
        assert!(processor
            .search_as_bool(&data, ".status == 'WORKING'")
            .unwrap());
        assert!(!processor
            .search_as_bool(&data, ".status == 'BROKEN'")
            .unwrap());
    }

    #[test]
    fn test_non_boolean_selector_is_hard_error() {
        let processor = EntityProcessor::new();
        let data = json!({"status": "WORKING"});
        let err = processor.search_as_bool(&data, ".status").unwrap_err();
        assert!(matches!(err, MapperError::NonBooleanSelector { .. }));
    }

    #[test]
    fn test_mapping_resilience_records_misconfigurations() {
        let processor = EntityProcessor::new();
        let data = json!({"foo": "bar"});
        let template = json!({"missing": ".nope", "present": ".foo"});

        let (resolved, misconfigurations) = processor.search_as_object(&data, &template);

        assert_eq!(resolved, json!({"missing": null, "present": "bar"}));
        assert_eq!(misconfigurations.len(), 1);
        assert_eq!(misconfigurations.get("missing"), Some(&".nope".to_string()));
    }

    #[test]
    fn test_nested_template_paths_are_dotted() {
        let processor = EntityProcessor::new();
        let data = json!({"a": 1});
        let template = json!({"props": {"good": ".a", "bad": ".b"}});

        let (resolved, misconfigurations) = processor.search_as_object(&data, &template);

        assert_eq!(resolved, json!({"props": {"good": 1, "bad": null}}));
        assert_eq!(misconfigurations.get("props.bad"), Some(&".b".to_string()));
    }

    #[test]
    fn test_list_of_templates() {
        let processor = EntityProcessor::new();
        let data = json!({"x": "one", "y": "two"});
        let template = json!([{"v": ".x"}, {"v": ".y"}, {"v": ".z"}]);

        let (resolved, misconfigurations) = processor.search_as_object(&data, &template);

        assert_eq!(
            resolved,
            json!([{"v": "one"}, {"v": "two"}, {"v": null}])
        );
        assert_eq!(misconfigurations.get("[2].v"), Some(&".z".to_string()));
    }

    #[test]
    fn test_non_string_leaves_pass_through() {
        let processor = EntityProcessor::new();
        let template = json!({"fixed": 5, "flag": true});
        let (resolved, misconfigurations) = processor.search_as_object(&json!({}), &template);
        assert_eq!(resolved, json!({"fixed": 5, "flag": true}));
        assert!(misconfigurations.is_empty());
    }

    #[test]
    fn test_get_mapped_entity_selector_short_circuit() {
        let processor = EntityProcessor::new();
        let data = json!({"status": "BROKEN", "id": "e1"});
        let mapping = json!({"identifier": ".id"});

        let mapped = processor
            .get_mapped_entity(&data, &mapping, ".status == 'WORKING'", false)
            .unwrap();

        assert!(!mapped.did_pass_selector);
        assert_eq!(mapped.entity, json!({}));
        assert!(mapped.misconfigurations.is_empty());
    }

    #[test]
    fn test_get_mapped_entity_parse_all_maps_rejected_records() {
        let processor = EntityProcessor::new();
        let data = json!({"status": "BROKEN", "id": "e1"});
        let mapping = json!({"identifier": ".id"});

        let mapped = processor
            .get_mapped_entity(&data, &mapping, ".status == 'WORKING'", true)
            .unwrap();

        assert!(!mapped.did_pass_selector);
        assert_eq!(mapped.entity, json!({"identifier": "e1"}));
    }

    #[test]
    fn test_get_mapped_entity_full_flow() {
        let processor = EntityProcessor::new();
        let data = json!({"status": "WORKING", "id": "e1", "name": "Service One"});
        let mapping = json!({
            "identifier": ".id",
            "title": ".name",
            "properties": {"status": ".status", "region": ".region"}
        });

        let mapped = processor
            .get_mapped_entity_indexed(&data, &mapping, ".status == 'WORKING'", false, Some(0))
            .unwrap();

        assert!(mapped.did_pass_selector);
        assert!(mapped.is_usable());
        assert_eq!(mapped.entity["identifier"], json!("e1"));
        assert_eq!(mapped.entity["properties"]["status"], json!("WORKING"));
        assert_eq!(mapped.entity["properties"]["region"], json!(null));
        assert_eq!(
            mapped.misconfigurations.get("properties.region"),
            Some(&".region".to_string())
        );
        assert_eq!(mapped.raw_index, Some(0));
    }
}
