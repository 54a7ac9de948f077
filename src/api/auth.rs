use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use super::error::{bad_request, trip_error, ErrorResponse};
use crate::trips::{Assignment, TripManager};

#[derive(Clone)]
pub struct AuthState {
    pub trips: TripManager,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub driver_id: String,
    pub bus_number: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub driver_id: String,
    pub bus_number: String,
}

/// Pair a driver with a bus for the shift
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Driver paired with bus", body = Assignment),
        (status = 401, description = "Unknown driver or bus", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AuthState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Assignment>, (StatusCode, Json<ErrorResponse>)> {
    if req.driver_id.trim().is_empty() || req.bus_number.trim().is_empty() {
        return Err(bad_request("Driver ID and bus number are required"));
    }
    state
        .trips
        .authenticate(&req.driver_id, &req.bus_number)
        .await
        .map(Json)
        .map_err(trip_error)
}

/// Release the driver/bus pairing. Fails while a trip is still active.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Pairing released", body = Assignment),
        (status = 409, description = "A trip is still active", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    State(state): State<AuthState>,
    Json(req): Json<LogoutRequest>,
) -> Result<Json<Assignment>, (StatusCode, Json<ErrorResponse>)> {
    if req.driver_id.trim().is_empty() || req.bus_number.trim().is_empty() {
        return Err(bad_request("Driver ID and bus number are required"));
    }
    state
        .trips
        .logout(&req.driver_id, &req.bus_number)
        .await
        .map(Json)
        .map_err(trip_error)
}

pub fn router(trips: TripManager) -> Router {
    let state = AuthState { trips };
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .with_state(state)
}
