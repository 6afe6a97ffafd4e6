pub mod auth;
pub mod files;
pub mod health;
pub mod links;
pub mod schemas;
pub mod stream;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use chunkgate_crypto::SecretString;
use chunkgate_gateway::Gateway;
use tower_http::trace::TraceLayer;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The gateway instance.
    pub gateway: Arc<Gateway>,
    /// Bearer token for `/v1`. `None` disables those routes.
    pub admin_token: Option<Arc<SecretString>>,
    /// Public base URL prepended to issued link paths.
    pub base_url: String,
}

/// Build the router: the streaming route, health and metrics, and the
/// token-protected administration routes when a token is configured.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route(
            "/{resource_id}/{expiry}/{tag}",
            get(stream::get_file).head(stream::head_file),
        );

    if state.admin_token.is_some() {
        let admin = Router::new()
            .route("/v1/files", post(files::ingest))
            .route("/v1/links", post(links::issue))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_admin,
            ));
        router = router.merge(admin);
    } else {
        tracing::info!("no admin token configured, /v1 routes disabled");
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
