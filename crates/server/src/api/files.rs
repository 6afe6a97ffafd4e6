use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chunkgate_core::NewFile;
use chunkgate_gateway::Ingested;

use super::AppState;
use crate::error::ServerError;

/// `POST /v1/files` -- register a file, or add a backend locator to an
/// existing record with the same resource id.
///
/// Answers `201 Created` for a new record and `200 OK` otherwise.
pub async fn ingest(
    State(state): State<AppState>,
    Json(file): Json<NewFile>,
) -> Result<(StatusCode, Json<Ingested>), ServerError> {
    if file.resource_id.trim().is_empty() {
        return Err(ServerError::BadRequest("resource_id must not be empty".into()));
    }
    if file.resource_id.contains('/') {
        return Err(ServerError::BadRequest("resource_id must not contain '/'".into()));
    }
    if file.locator.trim().is_empty() {
        return Err(ServerError::BadRequest("locator must not be empty".into()));
    }

    let ingested = state.gateway.ingest(file).await?;
    let status = if ingested.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ingested)))
}
