pub mod auth;
pub mod buses;
pub mod error;
pub mod health;
pub mod locations;
pub mod stops;
pub mod trips;
pub mod ws;

pub use error::{internal_error, ErrorResponse};

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::relay::Relay;
use crate::store::TrackingStore;
use crate::trips::TripManager;

pub fn router(
    store: Arc<dyn TrackingStore>,
    manager: TripManager,
    relay: Relay,
    storage_backend: &'static str,
) -> Router {
    let ws_state = ws::WsState {
        relay: relay.clone(),
    };

    Router::new()
        .nest("/auth", auth::router(manager.clone()))
        .nest("/trips", trips::router(manager.clone(), store.clone()))
        .nest("/locations", locations::router(manager, store.clone()))
        .nest("/buses", buses::router(store.clone()))
        .nest("/stops", stops::router(store.clone()))
        .nest("/health", health::router(store, storage_backend))
        .route("/ws/events", get(ws::ws_events).with_state(ws_state))
}
