use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use super::AppState;
use super::schemas::{IssueLinkRequest, IssueLinkResponse};
use crate::error::ServerError;

/// `POST /v1/links` -- issue a signed link, subject to the user's rate
/// limits.
pub async fn issue(
    State(state): State<AppState>,
    Json(req): Json<IssueLinkRequest>,
) -> Result<(StatusCode, Json<IssueLinkResponse>), ServerError> {
    if req.issued_to.trim().is_empty() {
        return Err(ServerError::BadRequest("issued_to must not be empty".into()));
    }
    if req.ttl_seconds == Some(0) {
        return Err(ServerError::BadRequest(
            "ttl_seconds must be greater than zero".into(),
        ));
    }

    let link = state
        .gateway
        .issue_link(&req.resource_id, &req.issued_to, req.ttl_seconds)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssueLinkResponse {
            url: format!("{}{}", state.base_url, link.path),
            link_id: link.link_id,
            resource_id: link.resource_id,
            expiry: link.expiry,
            tag: link.tag,
            path: link.path,
        }),
    ))
}
