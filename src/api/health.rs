use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::store::TrackingStore;

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn TrackingStore>,
    pub storage_backend: &'static str,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Which storage backend was selected at startup ("sqlite" or "memory")
    pub storage_backend: String,
    /// Number of currently active trips
    pub active_trips: usize,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    let active_trips = match state.store.get_active_trips().await {
        Ok(trips) => trips.len(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not count active trips");
            0
        }
    };

    Json(HealthResponse {
        healthy: true,
        storage_backend: state.storage_backend.to_string(),
        active_trips,
    })
}

pub fn router(store: Arc<dyn TrackingStore>, storage_backend: &'static str) -> Router {
    let state = HealthState {
        store,
        storage_backend,
    };
    Router::new()
        .route("/", get(health_check))
        .with_state(state)
}
