use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::error::{bad_request, internal_error, trip_error, ErrorResponse};
use crate::models::{ActiveBusLocation, LocationSample};
use crate::store::{StoreError, TrackingStore, DEFAULT_HISTORY_LIMIT};
use crate::trips::TripManager;

#[derive(Clone)]
pub struct LocationsState {
    pub trips: TripManager,
    pub store: Arc<dyn TrackingStore>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SaveLocationRequest {
    pub trip_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Defaults to receipt time
    pub timestamp: Option<String>,
    /// Client-side accuracy radius in meters; relayed to viewers but not
    /// persisted
    pub accuracy: Option<f64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct HistoryQuery {
    /// Exclusive timestamp watermark
    pub since: Option<String>,
    /// Maximum samples returned, counted from the newest (default 50)
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LatestLocationResponse {
    /// Most recent sample, or null when none exists
    pub location: Option<LocationSample>,
}

/// Persist one accepted location sample
#[utoipa::path(
    post,
    path = "/api/locations",
    request_body = SaveLocationRequest,
    responses(
        (status = 201, description = "Sample persisted", body = LocationSample),
        (status = 400, description = "Missing or malformed fields", body = ErrorResponse),
        (status = 404, description = "Unknown trip", body = ErrorResponse)
    ),
    tag = "locations"
)]
pub async fn save_location(
    State(state): State<LocationsState>,
    Json(req): Json<SaveLocationRequest>,
) -> Result<(StatusCode, Json<LocationSample>), (StatusCode, Json<ErrorResponse>)> {
    if req.trip_id.trim().is_empty() {
        return Err(bad_request("Trip ID, latitude, and longitude are required"));
    }
    state
        .trips
        .record_location(
            &req.trip_id,
            req.latitude,
            req.longitude,
            req.timestamp,
            req.accuracy,
        )
        .await
        .map(|sample| (StatusCode::CREATED, Json(sample)))
        .map_err(trip_error)
}

/// Location history for a trip, ascending by timestamp
#[utoipa::path(
    get,
    path = "/api/locations/trip/{trip_id}",
    params(
        ("trip_id" = String, Path, description = "Trip to read history for"),
        ("since" = Option<String>, Query, description = "Exclusive timestamp watermark"),
        ("limit" = Option<i64>, Query, description = "Maximum samples, counted from the newest")
    ),
    responses(
        (status = 200, description = "Ordered samples", body = [LocationSample])
    ),
    tag = "locations"
)]
pub async fn get_history(
    State(state): State<LocationsState>,
    Path(trip_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LocationSample>>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit <= 0 {
        return Err(bad_request("limit must be positive"));
    }
    state
        .store
        .sample_history(&trip_id, query.since.as_deref(), limit)
        .await
        .map(Json)
        .map_err(internal_error)
}

#[utoipa::path(
    get,
    path = "/api/locations/latest/{trip_id}",
    responses(
        (status = 200, description = "Latest sample or null", body = LatestLocationResponse)
    ),
    tag = "locations"
)]
pub async fn get_latest(
    State(state): State<LocationsState>,
    Path(trip_id): Path<String>,
) -> Result<Json<LatestLocationResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .store
        .latest_sample(&trip_id)
        .await
        .map(|location| Json(LatestLocationResponse { location }))
        .map_err(internal_error)
}

#[utoipa::path(
    get,
    path = "/api/locations/latest-by-bus/{bus_number}",
    responses(
        (status = 200, description = "Latest sample for the bus or null", body = LatestLocationResponse)
    ),
    tag = "locations"
)]
pub async fn get_latest_by_bus(
    State(state): State<LocationsState>,
    Path(bus_number): Path<String>,
) -> Result<Json<LatestLocationResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .store
        .latest_sample_for_bus(&bus_number)
        .await
        .map(|location| Json(LatestLocationResponse { location }))
        .map_err(internal_error)
}

/// Latest position of every active trip, the reconciliation-poll source for
/// the overview map
#[utoipa::path(
    get,
    path = "/api/locations/active",
    responses(
        (status = 200, description = "Latest sample per active trip", body = [ActiveBusLocation])
    ),
    tag = "locations"
)]
pub async fn get_active(
    State(state): State<LocationsState>,
) -> Result<Json<Vec<ActiveBusLocation>>, (StatusCode, Json<ErrorResponse>)> {
    collect_active(state.store.as_ref())
        .await
        .map(Json)
        .map_err(internal_error)
}

/// Latest sample per active trip. Trips with no samples yet are skipped.
pub(crate) async fn collect_active(
    store: &dyn TrackingStore,
) -> Result<Vec<ActiveBusLocation>, StoreError> {
    let trips = store.get_active_trips().await?;
    let mut results = Vec::with_capacity(trips.len());
    for trip in trips {
        if let Some(sample) = store.latest_sample(&trip.trip_id).await? {
            results.push(ActiveBusLocation {
                bus_number: trip.bus_number,
                trip_id: trip.trip_id,
                latitude: sample.latitude,
                longitude: sample.longitude,
                timestamp: sample.timestamp,
            });
        }
    }
    Ok(results)
}

pub fn router(trips: TripManager, store: Arc<dyn TrackingStore>) -> Router {
    let state = LocationsState { trips, store };
    Router::new()
        .route("/", post(save_location))
        .route("/active", get(get_active))
        .route("/trip/{trip_id}", get(get_history))
        .route("/latest/{trip_id}", get(get_latest))
        .route("/latest-by-bus/{bus_number}", get(get_latest_by_bus))
        .with_state(state)
}
