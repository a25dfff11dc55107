use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error after {attempts} attempts: {message}")]
    Network { message: String, attempts: u32 },

    #[error("Rate limited (status {status}) after {attempts} attempts")]
    RateLimited { status: u16, attempts: u32 },

    #[error("Server error (status {status}) after {attempts} attempts")]
    Server { status: u16, attempts: u32 },

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Client error (status {status}): {message}")]
    Client { status: u16, message: String },
}

impl TransportError {
    /// Whether the failure could succeed on a later resync pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::RateLimited { .. } | Self::Server { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
