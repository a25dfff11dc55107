use crate::entity::EntityKey;
use thiserror::Error;

/// One grouped bootstrap failure: which stage broke, what happened, and
/// which blueprints were rolled back as a result.
#[derive(Error, Debug)]
#[error("Blueprint bootstrap failed at stage '{stage}': {message} (rolled back: {rolled_back:?})")]
pub struct BootstrapError {
    pub stage: String,
    pub message: String,
    /// Identifiers of blueprints created this run and deleted again
    pub rolled_back: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to upsert entity {key}: {message}")]
    Upsert { key: EntityKey, message: String },

    #[error("Failed to delete entity {key}: {message}")]
    Delete { key: EntityKey, message: String },

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("Catalog request failed: {message}")]
    Catalog { message: String },
}

impl From<core_transport::TransportError> for ReconcileError {
    fn from(e: core_transport::TransportError) -> Self {
        ReconcileError::Catalog {
            message: e.to_string(),
        }
    }
}

impl From<connector_traits::ConnectorError> for ReconcileError {
    fn from(e: connector_traits::ConnectorError) -> Self {
        ReconcileError::Catalog {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
