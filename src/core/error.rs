use crate::services::llm::Provider;
use thiserror::Error;

/// Request problems caught before any generation work starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Duration must be at least one minute (got {0})")]
    InvalidDuration(u32),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("{0} API key is required")]
    MissingCredential(Provider),

    #[error("Local model is not initialized")]
    LocalModelUnavailable,
}
