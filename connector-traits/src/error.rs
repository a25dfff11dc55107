use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Connector operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Whether this error means the source refused us rather than broke.
    ///
    /// Access-denied errors are absorbed per source during fan-in; every
    /// other variant aborts the merge.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
