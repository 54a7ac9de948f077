use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::error::{bad_request, internal_error, not_found, trip_error, ErrorResponse};
use crate::models::{GeoPoint, Trip};
use crate::store::TrackingStore;
use crate::trips::TripManager;

#[derive(Clone)]
pub struct TripsState {
    pub trips: TripManager,
    pub store: Arc<dyn TrackingStore>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartTripRequest {
    pub driver_id: String,
    pub bus_number: String,
    pub starting_latitude: Option<f64>,
    pub starting_longitude: Option<f64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EndTripRequest {
    #[serde(default)]
    pub ending_latitude: Option<f64>,
    #[serde(default)]
    pub ending_longitude: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActiveTripResponse {
    /// The active trip, or null when the driver is not driving
    pub trip: Option<Trip>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TripStartResponse {
    pub latitude: f64,
    pub longitude: f64,
}

fn optional_point(
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Result<Option<GeoPoint>, (StatusCode, Json<ErrorResponse>)> {
    match (latitude, longitude) {
        (Some(lat), Some(lng)) => Ok(Some(GeoPoint::new(lat, lng))),
        (None, None) => Ok(None),
        _ => Err(bad_request("Latitude and longitude must be provided together")),
    }
}

/// Start a trip for a driver/bus pair
#[utoipa::path(
    post,
    path = "/api/trips/start",
    request_body = StartTripRequest,
    responses(
        (status = 201, description = "Trip created", body = Trip),
        (status = 409, description = "Driver already has an active trip", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn start_trip(
    State(state): State<TripsState>,
    Json(req): Json<StartTripRequest>,
) -> Result<(StatusCode, Json<Trip>), (StatusCode, Json<ErrorResponse>)> {
    if req.driver_id.trim().is_empty() || req.bus_number.trim().is_empty() {
        return Err(bad_request("Driver ID and bus number are required"));
    }
    let start = optional_point(req.starting_latitude, req.starting_longitude)?;
    state
        .trips
        .start_trip(&req.driver_id, &req.bus_number, start)
        .await
        .map(|trip| (StatusCode::CREATED, Json(trip)))
        .map_err(trip_error)
}

/// End a trip. Missing end coordinates are resolved from the last known
/// sample.
#[utoipa::path(
    post,
    path = "/api/trips/{trip_id}/end",
    request_body = EndTripRequest,
    responses(
        (status = 200, description = "Trip ended", body = Trip),
        (status = 404, description = "Unknown trip", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn end_trip(
    State(state): State<TripsState>,
    Path(trip_id): Path<String>,
    Json(req): Json<EndTripRequest>,
) -> Result<Json<Trip>, (StatusCode, Json<ErrorResponse>)> {
    let ending = optional_point(req.ending_latitude, req.ending_longitude)?;
    state
        .trips
        .end_trip(&trip_id, ending)
        .await
        .map(Json)
        .map_err(trip_error)
}

/// The driver's active trip, if any. Absence is a normal result, not an
/// error.
#[utoipa::path(
    get,
    path = "/api/trips/active/{driver_id}",
    responses(
        (status = 200, description = "Active trip or null", body = ActiveTripResponse)
    ),
    tag = "trips"
)]
pub async fn get_active_trip(
    State(state): State<TripsState>,
    Path(driver_id): Path<String>,
) -> Result<Json<ActiveTripResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .trips
        .active_trip(&driver_id)
        .await
        .map(|trip| Json(ActiveTripResponse { trip }))
        .map_err(trip_error)
}

#[utoipa::path(
    get,
    path = "/api/trips/{trip_id}",
    responses(
        (status = 200, description = "Trip detail", body = Trip),
        (status = 404, description = "Unknown trip", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn get_trip(
    State(state): State<TripsState>,
    Path(trip_id): Path<String>,
) -> Result<Json<Trip>, (StatusCode, Json<ErrorResponse>)> {
    match state.trips.trip(&trip_id).await.map_err(trip_error)? {
        Some(trip) => Ok(Json(trip)),
        None => Err(not_found("Trip not found")),
    }
}

/// The trip's starting coordinates, used by viewers to anchor the trail.
#[utoipa::path(
    get,
    path = "/api/trips/{trip_id}/start",
    responses(
        (status = 200, description = "Starting coordinates", body = TripStartResponse),
        (status = 404, description = "Trip unknown or start coordinates unset", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn get_trip_start(
    State(state): State<TripsState>,
    Path(trip_id): Path<String>,
) -> Result<Json<TripStartResponse>, (StatusCode, Json<ErrorResponse>)> {
    let trip = state
        .store
        .get_trip(&trip_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Trip not found"))?;

    match (trip.starting_latitude, trip.starting_longitude) {
        (Some(latitude), Some(longitude)) => Ok(Json(TripStartResponse {
            latitude,
            longitude,
        })),
        _ => Err(not_found("Start coordinates not found on trip")),
    }
}

pub fn router(trips: TripManager, store: Arc<dyn TrackingStore>) -> Router {
    let state = TripsState { trips, store };
    Router::new()
        .route("/start", post(start_trip))
        .route("/active/{driver_id}", get(get_active_trip))
        .route("/{trip_id}", get(get_trip))
        .route("/{trip_id}/start", get(get_trip_start))
        .route("/{trip_id}/end", post(end_trip))
        .with_state(state)
}
