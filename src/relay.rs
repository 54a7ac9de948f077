use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;

use crate::models::{now_rfc3339, BusStatus};

/// Event pushed to connected viewers. Delivery is fire-and-forget and
/// at-most-once per trigger; viewers run a reconciliation poll against the
/// location store to heal anything they miss.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
pub enum RelayEvent {
    /// A new location sample was accepted for an active trip
    LocationUpdate {
        bus_number: String,
        trip_id: String,
        latitude: f64,
        longitude: f64,
        timestamp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        accuracy: Option<f64>,
    },
    /// A trip transition changed the bus status
    StatusUpdate {
        bus_id: String,
        status: BusStatus,
        timestamp: String,
    },
    /// Route/stop reference data changed externally
    RoutesUpdated {
        route_id: String,
        change_type: String,
    },
}

impl RelayEvent {
    /// Bus the event concerns, used for subscription filtering. Route
    /// reference updates are not scoped to a bus.
    pub fn bus_number(&self) -> Option<&str> {
        match self {
            RelayEvent::LocationUpdate { bus_number, .. } => Some(bus_number),
            RelayEvent::StatusUpdate { bus_id, .. } => Some(bus_id),
            RelayEvent::RoutesUpdated { .. } => None,
        }
    }
}

pub type RelayEventSender = broadcast::Sender<RelayEvent>;

/// Fan-out layer between the trip state machine and connected WebSocket
/// viewers.
#[derive(Clone)]
pub struct Relay {
    tx: RelayEventSender,
}

impl Relay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish_location(
        &self,
        bus_number: &str,
        trip_id: &str,
        latitude: f64,
        longitude: f64,
        timestamp: &str,
        accuracy: Option<f64>,
    ) {
        // Send errors just mean no one is listening
        let _ = self.tx.send(RelayEvent::LocationUpdate {
            bus_number: bus_number.to_string(),
            trip_id: trip_id.to_string(),
            latitude,
            longitude,
            timestamp: timestamp.to_string(),
            accuracy,
        });
    }

    pub fn publish_status(&self, bus_id: &str, status: BusStatus) {
        let _ = self.tx.send(RelayEvent::StatusUpdate {
            bus_id: bus_id.to_string(),
            status,
            timestamp: now_rfc3339(),
        });
    }

    pub fn publish_routes_updated(&self, route_id: &str, change_type: &str) {
        let _ = self.tx.send(RelayEvent::RoutesUpdated {
            route_id: route_id.to_string(),
            change_type: change_type.to_string(),
        });
    }
}
