use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
