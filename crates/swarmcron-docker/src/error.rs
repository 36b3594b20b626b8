use thiserror::Error;

/// Errors surfaced by an [`Orchestrator`](crate::Orchestrator) implementation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The named object does not exist (HTTP 404 from the engine).
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// The engine answered with a non-success status.
    #[error("Docker API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response.
    #[error("Docker request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The unix socket could not be reached or broke mid-request.
    #[error("Docker socket error: {0}")]
    Socket(String),

    /// A response body did not have the expected shape.
    #[error("Unexpected Docker response: {0}")]
    Decode(String),

    /// The event stream broke or ended.
    #[error("Event stream failed: {0}")]
    Stream(String),

    /// The configured engine address cannot be used.
    #[error("Invalid Docker host {0:?}")]
    InvalidHost(String),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
