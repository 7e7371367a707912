use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use super::super::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: Vec<String>,
    pub service_uptime_secs: u64,
    pub pay_to: String,
    pub priced_routes: Vec<String>,
}

/// Health check endpoint (free)
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: vec![
            env!("CARGO_PKG_NAME").to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ],
        service_uptime_secs: state.started_at.elapsed().as_secs(),
        pay_to: state.pay_to.clone(),
        priced_routes: state.priced_routes.as_ref().clone(),
    })
}
