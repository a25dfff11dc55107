use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhook authentication failed: {0}")]
    Unauthorized(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Webhook event rejected: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
