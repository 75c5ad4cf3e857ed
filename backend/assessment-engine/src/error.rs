use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or malformed attempt/question identifiers and payloads.
    #[error("{0}")]
    InvalidInput(String),

    #[error("question provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    #[error("question provider failed: {0}")]
    ProviderFailure(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("section {0} is closed")]
    SectionClosed(String),
}

impl EngineError {
    /// Provider errors never reach the student; the fallback bank absorbs them.
    pub fn is_recoverable_by_fallback(&self) -> bool {
        matches!(
            self,
            EngineError::ProviderTimeout(_) | EngineError::ProviderFailure(_)
        )
    }
}

impl From<mongodb::error::Error> for EngineError {
    fn from(e: mongodb::error::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::ProviderFailure(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
