use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{Extensions, HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use tracing::error;

use chunkgate_gateway::{GatewayError, StreamRequest, StreamResponse};

use super::AppState;
use crate::error::{gateway_headers, gateway_status};

/// Query parameters of the streaming route.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Backend to read from, if it holds the file. Values that are not a
    /// backend index are ignored.
    pub backend: Option<String>,
}

/// `GET /{resource_id}/{expiry}/{tag}` -- stream the file, or the byte
/// range named by the `Range` header.
pub async fn get_file(
    State(state): State<AppState>,
    Path((resource_id, expiry, tag)): Path<(String, String, String)>,
    Query(params): Query<StreamParams>,
    request: Request,
) -> Response {
    serve(&state, resource_id, expiry, tag, params, request, false).await
}

/// `HEAD /{resource_id}/{expiry}/{tag}` -- the headers `GET` would send.
pub async fn head_file(
    State(state): State<AppState>,
    Path((resource_id, expiry, tag)): Path<(String, String, String)>,
    Query(params): Query<StreamParams>,
    request: Request,
) -> Response {
    serve(&state, resource_id, expiry, tag, params, request, true).await
}

#[allow(clippy::too_many_arguments)]
async fn serve(
    state: &AppState,
    resource_id: String,
    expiry: String,
    integrity_tag: String,
    params: StreamParams,
    request: Request,
    head_only: bool,
) -> Response {
    let (parts, _body) = request.into_parts();
    let headers = &parts.headers;

    let stream_request = StreamRequest {
        resource_id,
        expiry,
        integrity_tag,
        range: header_str(headers, header::RANGE).map(str::to_owned),
        pinned_backend: params.backend.as_deref().and_then(|b| b.trim().parse().ok()),
        client_address: client_address(headers, &parts.extensions),
        user_agent: header_str(headers, header::USER_AGENT).map(str::to_owned),
        head_only,
    };

    match state.gateway.open(stream_request).await {
        Ok(response) => file_response(response),
        Err(e) => error_page(&e),
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// First `X-Forwarded-For` hop, else the peer address, else `"unknown"`.
fn client_address(headers: &HeaderMap, extensions: &Extensions) -> String {
    let forwarded = header_str(headers, header::HeaderName::from_static("x-forwarded-for"))
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = forwarded {
        return addr.to_owned();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_owned(), |info| info.0.ip().to_string())
}

fn file_response(response: StreamResponse) -> Response {
    let mut builder = Response::builder()
        .status(response.status)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, response.mime_type.as_str())
        .header(header::CONTENT_LENGTH, response.content_length)
        .header(header::CONTENT_DISPOSITION, response.content_disposition());
    if let Some(content_range) = response.content_range() {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }

    match builder.body(Body::from_stream(response.body)) {
        Ok(resp) => resp,
        Err(e) => {
            error!(error = %e, "failed to build file response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_message(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::LinkExpired { .. } => "This link has expired.",
        GatewayError::LinkInvalid => "This link is not valid.",
        GatewayError::ResourceNotFound(_) => "The requested file does not exist.",
        GatewayError::RangeUnsatisfiable { .. } => "The requested range is not satisfiable.",
        GatewayError::BackendUnavailable(_) => "The file is temporarily unavailable.",
        GatewayError::RateLimitExceeded { .. } => "Too many requests.",
        GatewayError::UnknownBackend(_) | GatewayError::InvalidLinkLifetime { .. } => {
            "Bad request."
        }
        GatewayError::State(_) | GatewayError::Configuration(_) => "Internal server error.",
    }
}

/// Small HTML page for a failed stream request.
fn error_page(err: &GatewayError) -> Response {
    let status = gateway_status(err);
    if status.is_server_error() {
        error!(error = %err, status = status.as_u16(), "stream request failed");
    }
    let title = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let page = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{}</p></body></html>\n",
        error_message(err)
    );
    (status, gateway_headers(err), Html(page)).into_response()
}
