//! `/health` endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::network::HealthState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub state: &'static str,
    pub connections: usize,
    pub in_flight: usize,
    pub uptime_secs: u64,
}

/// Always 200; `state` distinguishes a draining server from a ready one.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        state: state.shutdown.health_state().as_str(),
        connections: state.registry.count(),
        in_flight: state.shutdown.in_flight_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// 200 only while `Ready`.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    match state.shutdown.health_state() {
        HealthState::Ready => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}
