use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use super::error::{internal_error, not_found, ErrorResponse};
use crate::eta::{eta_minutes, haversine_km};
use crate::store::TrackingStore;

#[derive(Clone)]
pub struct StopsState {
    pub store: Arc<dyn TrackingStore>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopEta {
    pub bus_number: String,
    pub trip_id: String,
    pub eta_minutes: i64,
    pub distance_km: f64,
    pub stop_id: String,
    pub stop_name: Option<String>,
}

/// ETA of every active bus on the stop's route, from its latest position
#[utoipa::path(
    get,
    path = "/api/stops/{stop_id}/etas",
    responses(
        (status = 200, description = "ETA per active bus on the route", body = [StopEta]),
        (status = 404, description = "Unknown stop", body = ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn get_stop_etas(
    State(state): State<StopsState>,
    Path(stop_id): Path<String>,
) -> Result<Json<Vec<StopEta>>, (StatusCode, Json<ErrorResponse>)> {
    let store = state.store.as_ref();

    let stop = store
        .get_stop(&stop_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Stop not found"))?;

    let buses = store
        .buses_on_route(&stop.route_id)
        .await
        .map_err(internal_error)?;

    let mut etas = Vec::new();
    for bus_number in buses {
        let Some(trip) = store
            .get_active_trip_for_bus(&bus_number)
            .await
            .map_err(internal_error)?
        else {
            continue;
        };
        let Some(latest) = store
            .latest_sample(&trip.trip_id)
            .await
            .map_err(internal_error)?
        else {
            continue;
        };

        let distance_km = haversine_km(
            latest.latitude,
            latest.longitude,
            stop.latitude,
            stop.longitude,
        );
        etas.push(StopEta {
            bus_number,
            trip_id: trip.trip_id,
            eta_minutes: eta_minutes(distance_km),
            distance_km: (distance_km * 100.0).round() / 100.0,
            stop_id: stop.stop_id.clone(),
            stop_name: stop.name.clone(),
        });
    }

    Ok(Json(etas))
}

pub fn router(store: Arc<dyn TrackingStore>) -> Router {
    let state = StopsState { store };
    Router::new()
        .route("/{stop_id}/etas", get(get_stop_etas))
        .with_state(state)
}
