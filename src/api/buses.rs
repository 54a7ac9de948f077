use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::sync::Arc;

use super::error::{internal_error, ErrorResponse};
use super::locations::collect_active;
use crate::models::ActiveBusLocation;
use crate::store::TrackingStore;

#[derive(Clone)]
pub struct BusesState {
    pub store: Arc<dyn TrackingStore>,
}

/// Buses currently on a trip with their latest position, the viewer's bus
/// picker source
#[utoipa::path(
    get,
    path = "/api/buses/active",
    responses(
        (status = 200, description = "Active buses with latest positions", body = [ActiveBusLocation])
    ),
    tag = "buses"
)]
pub async fn get_active_buses(
    State(state): State<BusesState>,
) -> Result<Json<Vec<ActiveBusLocation>>, (StatusCode, Json<ErrorResponse>)> {
    collect_active(state.store.as_ref())
        .await
        .map(Json)
        .map_err(internal_error)
}

pub fn router(store: Arc<dyn TrackingStore>) -> Router {
    let state = BusesState { store };
    Router::new()
        .route("/active", get(get_active_buses))
        .with_state(state)
}
