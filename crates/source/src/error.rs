use thiserror::Error;

/// Errors returned by a chunk source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The locator does not address any content on this backend.
    #[error("content not found: {0}")]
    NotFound(String),

    /// The backend could not be reached or failed transiently.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something this client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Whether retrying against another backend may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
