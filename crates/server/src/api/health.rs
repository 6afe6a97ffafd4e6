use axum::Json;
use axum::extract::State;
use chunkgate_gateway::MetricsSnapshot;

use super::AppState;
use super::schemas::{BackendHealth, HealthResponse};

/// `GET /health` -- service status, per-backend sessions and metrics.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let gw = &state.gateway;
    let pool = gw.pool();
    let backends = pool
        .indices()
        .map(|index| BackendHealth {
            index,
            name: pool
                .get(index)
                .map(|source| source.name().to_owned())
                .unwrap_or_default(),
            primary: index == pool.primary(),
            active_sessions: gw.workload().active(index),
        })
        .collect();

    Json(HealthResponse {
        status: "ok".into(),
        backends,
        metrics: gw.metrics().snapshot(),
    })
}

/// `GET /metrics` -- gateway counters.
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.gateway.metrics().snapshot())
}
