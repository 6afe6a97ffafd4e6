use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chunkgate_gateway::GatewayError;
use thiserror::Error;

/// Errors that can occur when running the chunkgate server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A gateway-level error surfaced through the API.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The state backend could not be reached or prepared.
    #[error("state error: {0}")]
    State(#[from] chunkgate_state::StateError),

    /// Authentication failed (missing or invalid credentials).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request body was well-formed but not acceptable.
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// HTTP status for a gateway error.
pub fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::LinkExpired { .. } => StatusCode::GONE,
        GatewayError::LinkInvalid => StatusCode::FORBIDDEN,
        GatewayError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::RangeUnsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        GatewayError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
        GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::UnknownBackend(_) | GatewayError::InvalidLinkLifetime { .. } => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::State(_) | GatewayError::Configuration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Extra headers a gateway error response carries.
pub fn gateway_headers(err: &GatewayError) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match err {
        GatewayError::RangeUnsatisfiable { file_size } => {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{file_size}")) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }
        GatewayError::RateLimitExceeded {
            retry_after_secs, ..
        } => {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        _ => {}
    }
    headers
}

/// Message shown to clients. Internal failures are not described.
pub fn public_message(err: &GatewayError) -> String {
    match err {
        GatewayError::State(_) | GatewayError::Configuration(_) => {
            "internal server error".to_owned()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message, headers) = match &self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), HeaderMap::new()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), HeaderMap::new()),
            Self::Gateway(e) => (gateway_status(e), public_message(e), gateway_headers(e)),
            Self::Config(_) | Self::Io(_) | Self::State(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_owned(),
                HeaderMap::new(),
            ),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = match &self {
            Self::Gateway(GatewayError::RateLimitExceeded {
                retry_after_secs, ..
            }) => serde_json::json!({ "error": message, "retry_after": retry_after_secs }),
            _ => serde_json::json!({ "error": message }),
        };

        (status, headers, axum::Json(body)).into_response()
    }
}
