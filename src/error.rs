use thiserror::Error;

#[derive(Debug, Error)]
pub enum PsganError {
    #[error("no {kind} registered under `{name}` (available: {available})")]
    UnknownModel {
        kind: &'static str,
        name: String,
        available: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed constructor arguments: {0}")]
    Kwargs(#[from] serde_json::Error),

    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PsganError>;

pub(crate) fn ensure_positive(field: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        tracing::warn!(field, "rejected configuration with zero value");
        return Err(PsganError::InvalidConfig(format!(
            "`{field}` must be at least 1"
        )));
    }
    Ok(())
}
