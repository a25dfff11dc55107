//! # Reconciliation Engine
//!
//! Dependency-aware application of mapped entities to the catalog.
//!
//! ## Overview
//!
//! - **Entity Model** (`entity`): canonical entity shape, keys, request
//!   options, failure records, run identifiers
//! - **Catalog Client** (`catalog`): authenticated call shapes for upsert,
//!   delete, search, blueprints, and migration polling
//! - **Ordering** (`order`): Kahn topological sort over the relation
//!   graph, layered into concurrency-safe dependency levels
//! - **Reconciler** (`reconciler`): bounded upsert/delete, failure retry
//!   queue, diff reconciliation, stale-entity sweep, run lifecycle
//! - **Bootstrap** (`bootstrap`): three-stage blueprint creation with
//!   this-run-only rollback

pub mod bootstrap;
pub mod catalog;
pub mod entity;
pub mod error;
pub mod order;
pub mod reconciler;

pub use bootstrap::{BootstrapReport, BootstrapResources, Bootstrapper};
pub use catalog::{CatalogClient, MigrationStatus, DEFAULT_MIGRATION_POLL_INTERVAL};
pub use entity::{
    Entity, EntityKey, FailedEntityRecord, FailedOp, RelationValue, RequestOptions, ResyncRunId,
};
pub use error::{BootstrapError, ReconcileError, Result};
pub use order::{delete_levels, sort_for_delete, sort_for_upsert, upsert_levels};
pub use reconciler::{Reconciler, ResyncReport, ResyncRun, RunStatus};
