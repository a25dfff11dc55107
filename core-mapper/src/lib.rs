//! # Entity Mapper
//!
//! Declarative selector/mapping evaluation for raw records.
//!
//! ## Overview
//!
//! - **Expression Language** (`expr`): dot-path navigation, literals,
//!   equality comparison, boolean connectives
//! - **Processor** (`processor`): memoized compilation plus the
//!   `search` / `search_as_bool` / `search_as_object` /
//!   `get_mapped_entity` evaluation surface
//! - **Mapped Entity** (`entity`): the per-record mapping result with its
//!   misconfiguration map

pub mod entity;
pub mod error;
pub mod expr;
pub mod processor;

pub use entity::MappedEntity;
pub use error::{MapperError, Result};
pub use expr::{normalize_quotes, CompiledExpr, Expr};
pub use processor::EntityProcessor;
