use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use chunkgate_crypto::ExposeSecret;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::AppState;
use crate::error::ServerError;

/// Compare two tokens without leaking where they differ. Only the length
/// comparison is variable-time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
}

/// Reject requests without the configured `Authorization: Bearer` token.
pub async fn require_admin(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ServerError::Unauthorized("administration is disabled".into()));
    };

    match bearer_token(&headers) {
        Some(token) if constant_time_eq(token, expected.expose_secret()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!("invalid admin token");
            Err(ServerError::Unauthorized("invalid token".into()))
        }
        None => Err(ServerError::Unauthorized("missing bearer token".into())),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq("t0ken", "t0ken"));
        assert!(!constant_time_eq("t0ken", "t0kem"));
        assert!(!constant_time_eq("t0ken", "t0ken2"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.remove(header::AUTHORIZATION);
        assert_eq!(bearer_token(&headers), None);
    }
}
