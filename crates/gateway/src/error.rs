use chunkgate_core::{BackendIndex, WindowKind};
use chunkgate_crypto::LinkError;
use chunkgate_source::SourceError;
use thiserror::Error;

/// Errors that end a gateway request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The link's expiry has passed.
    #[error("link expired at {expiry}")]
    LinkExpired { expiry: i64 },

    /// The integrity tag does not match, or the link is malformed.
    #[error("link integrity check failed")]
    LinkInvalid,

    /// No file is registered under the resource id, or its backend lost it.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The requested byte range lies outside the file.
    #[error("requested range not satisfiable for a {file_size}-byte file")]
    RangeUnsatisfiable { file_size: u64 },

    /// No backend could serve the content.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The user has used up a rate-limit window.
    #[error("rate limit exceeded: at most {limit} links per {window}")]
    RateLimitExceeded {
        window: WindowKind,
        limit: u32,
        /// Seconds until the refusing window rolls over.
        retry_after_secs: u64,
    },

    /// A requested link lifetime puts the expiry past the epoch range.
    #[error("link lifetime of {ttl_seconds}s is too long")]
    InvalidLinkLifetime { ttl_seconds: u64 },

    /// An ingestion named a backend index that is not configured.
    #[error("unknown backend index: {0}")]
    UnknownBackend(BackendIndex),

    /// An error occurred in the state store.
    #[error("state error: {0}")]
    State(#[from] chunkgate_state::StateError),

    /// The gateway was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<LinkError> for GatewayError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Expired { expiry } => Self::LinkExpired { expiry },
            LinkError::Invalid => Self::LinkInvalid,
            LinkError::ExpiryOverflow { ttl_seconds } => Self::InvalidLinkLifetime { ttl_seconds },
            other @ LinkError::EmptySecret => Self::Configuration(other.to_string()),
        }
    }
}

impl From<SourceError> for GatewayError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(locator) => Self::ResourceNotFound(locator),
            SourceError::Unavailable(msg) | SourceError::Protocol(msg) => {
                Self::BackendUnavailable(msg)
            }
        }
    }
}
