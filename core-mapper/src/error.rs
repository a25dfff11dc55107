use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Failed to parse expression '{expression}': {message}")]
    Parse { expression: String, message: String },

    #[error("Selector '{expression}' returned non-boolean value: {value}")]
    NonBooleanSelector {
        expression: String,
        value: serde_json::Value,
    },
}

pub type Result<T> = std::result::Result<T, MapperError>;
