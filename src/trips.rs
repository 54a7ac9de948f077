use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::models::{
    now_rfc3339, BusStatus, DriverStatus, GeoPoint, LocationSample, Trip, TripStatus,
};
use crate::relay::Relay;
use crate::store::{StoreError, TrackingStore};

#[derive(Debug, thiserror::Error)]
pub enum TripError {
    #[error("Invalid driver ID")]
    InvalidDriverId,
    #[error("Invalid bus number")]
    InvalidBusNumber,
    #[error("Driver already has an active trip")]
    AlreadyActive,
    #[error("Cannot logout while a trip is active. Please end the trip first.")]
    TripStillActive,
    #[error("Trip not found")]
    TripNotFound,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Driver/bus pairing state echoed back after login and logout.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Assignment {
    pub driver_id: String,
    pub bus_number: String,
    pub driver_status: DriverStatus,
    pub bus_status: BusStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The trip lifecycle state machine.
///
/// Owns every driver/bus status transition: statuses are never written
/// outside these methods, which keeps the "driver and bus always move
/// together" invariant mechanical rather than conventional. Each accepted
/// sample and each trip transition is mirrored onto the relay; relay
/// delivery is best-effort since viewers reconcile against the store.
#[derive(Clone)]
pub struct TripManager {
    store: Arc<dyn TrackingStore>,
    relay: Relay,
}

impl TripManager {
    pub fn new(store: Arc<dyn TrackingStore>, relay: Relay) -> Self {
        Self { store, relay }
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    /// Pair a driver with a bus for the shift: driver goes active, bus goes
    /// assigned, in one transaction.
    pub async fn authenticate(
        &self,
        driver_id: &str,
        bus_number: &str,
    ) -> Result<Assignment, TripError> {
        let driver = self
            .store
            .get_driver(driver_id)
            .await?
            .ok_or(TripError::InvalidDriverId)?;
        self.store
            .get_bus(bus_number)
            .await?
            .ok_or(TripError::InvalidBusNumber)?;

        self.store
            .update_assignment(driver_id, bus_number, DriverStatus::Active, BusStatus::Assigned)
            .await?;

        Ok(Assignment {
            driver_id: driver_id.to_string(),
            bus_number: bus_number.to_string(),
            driver_status: DriverStatus::Active,
            bus_status: BusStatus::Assigned,
            name: driver.name,
        })
    }

    /// Begin a trip. The service-level check gives the caller a clean
    /// conflict error; the store's uniqueness guarantee closes the window
    /// between check and insert.
    pub async fn start_trip(
        &self,
        driver_id: &str,
        bus_number: &str,
        start: Option<GeoPoint>,
    ) -> Result<Trip, TripError> {
        if let Some(point) = &start {
            validate_point(point)?;
        }
        if self.store.get_active_trip(driver_id).await?.is_some() {
            return Err(TripError::AlreadyActive);
        }

        let trip = Trip {
            trip_id: uuid::Uuid::new_v4().to_string(),
            driver_id: driver_id.to_string(),
            bus_number: bus_number.to_string(),
            status: TripStatus::Active,
            start_time: now_rfc3339(),
            end_time: None,
            starting_latitude: start.map(|p| p.latitude),
            starting_longitude: start.map(|p| p.longitude),
            ending_latitude: None,
            ending_longitude: None,
        };

        let trip = match self.store.insert_trip(trip).await {
            Ok(trip) => trip,
            Err(StoreError::ActiveTripExists) => return Err(TripError::AlreadyActive),
            Err(e) => return Err(e.into()),
        };

        self.store
            .update_assignment(driver_id, bus_number, DriverStatus::OnTrip, BusStatus::Running)
            .await?;
        self.relay.publish_status(bus_number, BusStatus::Running);

        tracing::info!(trip_id = %trip.trip_id, driver_id, bus_number, "Trip started");
        Ok(trip)
    }

    /// Persist one accepted location sample and fan it out to viewers.
    /// Lazily backfills the trip's starting coordinates; first sample wins.
    pub async fn record_location(
        &self,
        trip_id: &str,
        latitude: f64,
        longitude: f64,
        timestamp: Option<String>,
        accuracy: Option<f64>,
    ) -> Result<LocationSample, TripError> {
        if trip_id.is_empty() {
            return Err(TripError::Validation(
                "Trip ID, latitude, and longitude are required".to_string(),
            ));
        }
        let point = GeoPoint::new(latitude, longitude);
        validate_point(&point)?;

        let trip = self
            .store
            .get_trip(trip_id)
            .await?
            .ok_or(TripError::TripNotFound)?;

        let timestamp = timestamp.unwrap_or_else(now_rfc3339);
        let sample = self.store.insert_sample(trip_id, point, &timestamp).await?;

        if trip.starting_latitude.is_none() {
            if let Err(e) = self.store.backfill_start_coordinates(trip_id, point).await {
                tracing::warn!(trip_id, error = %e, "Failed to set starting coordinates for trip");
            }
        }

        self.relay.publish_location(
            &trip.bus_number,
            trip_id,
            sample.latitude,
            sample.longitude,
            &sample.timestamp,
            accuracy,
        );

        Ok(sample)
    }

    /// End a trip. Missing end coordinates are resolved best-effort from the
    /// most recent sample; a trip with no samples ends with null coordinates.
    /// The driver/bus pair returns to "logged in but not driving".
    pub async fn end_trip(
        &self,
        trip_id: &str,
        ending: Option<GeoPoint>,
    ) -> Result<Trip, TripError> {
        if let Some(point) = &ending {
            validate_point(point)?;
        }

        let ending = match ending {
            Some(point) => Some(point),
            None => match self.store.latest_sample(trip_id).await {
                Ok(sample) => sample.map(|s| GeoPoint::new(s.latitude, s.longitude)),
                Err(e) => {
                    tracing::warn!(trip_id, error = %e, "Could not fetch latest location for ending coordinates");
                    None
                }
            },
        };

        let trip = self
            .store
            .finish_trip(trip_id, &now_rfc3339(), ending)
            .await?
            .ok_or(TripError::TripNotFound)?;

        self.store
            .update_assignment(
                &trip.driver_id,
                &trip.bus_number,
                DriverStatus::Active,
                BusStatus::Assigned,
            )
            .await?;
        self.relay.publish_status(&trip.bus_number, BusStatus::Assigned);

        tracing::info!(trip_id = %trip.trip_id, bus_number = %trip.bus_number, "Trip ended");
        Ok(trip)
    }

    /// Release the driver/bus pairing. Only permitted once the trip has been
    /// ended.
    pub async fn logout(
        &self,
        driver_id: &str,
        bus_number: &str,
    ) -> Result<Assignment, TripError> {
        if self.store.get_active_trip(driver_id).await?.is_some() {
            return Err(TripError::TripStillActive);
        }

        self.store.clear_assignment(driver_id, bus_number).await?;

        Ok(Assignment {
            driver_id: driver_id.to_string(),
            bus_number: bus_number.to_string(),
            driver_status: DriverStatus::Inactive,
            bus_status: BusStatus::Halt,
            name: None,
        })
    }

    /// The driver's active trip, if any. Absence is a normal result.
    pub async fn active_trip(&self, driver_id: &str) -> Result<Option<Trip>, TripError> {
        Ok(self.store.get_active_trip(driver_id).await?)
    }

    pub async fn trip(&self, trip_id: &str) -> Result<Option<Trip>, TripError> {
        Ok(self.store.get_trip(trip_id).await?)
    }
}

fn validate_point(point: &GeoPoint) -> Result<(), TripError> {
    if !point.latitude.is_finite() || !point.longitude.is_finite() || !point.in_range() {
        return Err(TripError::Validation("Invalid coordinates".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayEvent;
    use crate::store::MemoryStore;

    async fn setup() -> (TripManager, Arc<MemoryStore>, Relay) {
        let store = Arc::new(MemoryStore::new());
        store.seed_driver("D1", Some("Asha")).await;
        store.seed_bus("B1", Some("R1")).await;
        store.seed_bus("B2", None).await;
        let relay = Relay::new(16);
        let manager = TripManager::new(store.clone(), relay.clone());
        (manager, store, relay)
    }

    #[tokio::test]
    async fn authenticate_pairs_driver_and_bus() {
        let (manager, store, _relay) = setup().await;

        let assignment = manager.authenticate("D1", "B1").await.unwrap();
        assert_eq!(assignment.driver_status, DriverStatus::Active);
        assert_eq!(assignment.bus_status, BusStatus::Assigned);
        assert_eq!(assignment.name.as_deref(), Some("Asha"));

        let driver = store.get_driver("D1").await.unwrap().unwrap();
        assert_eq!(driver.current_bus.as_deref(), Some("B1"));
        let bus = store.get_bus("B1").await.unwrap().unwrap();
        assert_eq!(bus.current_driver.as_deref(), Some("D1"));
    }

    #[tokio::test]
    async fn authenticate_rejects_unknown_driver_and_bus() {
        let (manager, _store, _relay) = setup().await;
        assert!(matches!(
            manager.authenticate("nobody", "B1").await,
            Err(TripError::InvalidDriverId)
        ));
        assert!(matches!(
            manager.authenticate("D1", "no-bus").await,
            Err(TripError::InvalidBusNumber)
        ));
    }

    #[tokio::test]
    async fn second_start_trip_fails_with_already_active() {
        let (manager, _store, _relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();

        let trip = manager.start_trip("D1", "B1", None).await.unwrap();
        assert_eq!(trip.status, TripStatus::Active);

        assert!(matches!(
            manager.start_trip("D1", "B2", None).await,
            Err(TripError::AlreadyActive)
        ));
    }

    #[tokio::test]
    async fn start_trip_transitions_statuses_and_publishes() {
        let (manager, store, relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();
        let mut rx = relay.subscribe();

        manager.start_trip("D1", "B1", None).await.unwrap();

        let driver = store.get_driver("D1").await.unwrap().unwrap();
        assert_eq!(driver.status, DriverStatus::OnTrip);
        let bus = store.get_bus("B1").await.unwrap().unwrap();
        assert_eq!(bus.status, BusStatus::Running);

        match rx.recv().await.unwrap() {
            RelayEvent::StatusUpdate { bus_id, status, .. } => {
                assert_eq!(bus_id, "B1");
                assert_eq!(status, BusStatus::Running);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn record_location_round_trips_and_orders_history() {
        let (manager, store, _relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();
        let trip = manager.start_trip("D1", "B1", None).await.unwrap();

        manager
            .record_location(
                &trip.trip_id,
                12.9716,
                77.5946,
                Some("2026-08-06T10:00:00.000Z".into()),
                None,
            )
            .await
            .unwrap();
        manager
            .record_location(
                &trip.trip_id,
                12.97,
                77.60,
                Some("2026-08-06T10:00:05.000Z".into()),
                None,
            )
            .await
            .unwrap();

        let latest = store.latest_sample(&trip.trip_id).await.unwrap().unwrap();
        assert!((latest.latitude - 12.97).abs() < 1e-6);
        assert!((latest.longitude - 77.60).abs() < 1e-6);

        let limited = store.sample_history(&trip.trip_id, None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].timestamp, "2026-08-06T10:00:05.000Z");

        let full = store.sample_history(&trip.trip_id, None, 50).await.unwrap();
        assert_eq!(full.len(), 2);
        assert!((full[0].latitude - 12.9716).abs() < 1e-6);
        assert_eq!(full[0].timestamp, "2026-08-06T10:00:00.000Z");
    }

    #[tokio::test]
    async fn record_location_publishes_to_relay() {
        let (manager, _store, relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();
        let trip = manager.start_trip("D1", "B1", None).await.unwrap();

        let mut rx = relay.subscribe();
        manager
            .record_location(&trip.trip_id, 12.9716, 77.5946, None, Some(8.0))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            RelayEvent::LocationUpdate {
                bus_number,
                trip_id,
                accuracy,
                ..
            } => {
                assert_eq!(bus_number, "B1");
                assert_eq!(trip_id, trip.trip_id);
                assert_eq!(accuracy, Some(8.0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn start_coordinates_backfill_is_idempotent() {
        let (manager, store, _relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();
        let trip = manager.start_trip("D1", "B1", None).await.unwrap();

        manager
            .record_location(&trip.trip_id, 12.90, 77.70, None, None)
            .await
            .unwrap();
        manager
            .record_location(&trip.trip_id, 13.00, 78.00, None, None)
            .await
            .unwrap();

        let trip = store.get_trip(&trip.trip_id).await.unwrap().unwrap();
        assert_eq!(trip.starting_latitude, Some(12.90));
        assert_eq!(trip.starting_longitude, Some(77.70));
    }

    #[tokio::test]
    async fn explicit_start_coordinates_are_never_overwritten() {
        let (manager, store, _relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();
        let trip = manager
            .start_trip("D1", "B1", Some(GeoPoint::new(10.0, 70.0)))
            .await
            .unwrap();

        manager
            .record_location(&trip.trip_id, 12.90, 77.70, None, None)
            .await
            .unwrap();

        let trip = store.get_trip(&trip.trip_id).await.unwrap().unwrap();
        assert_eq!(trip.starting_latitude, Some(10.0));
    }

    #[tokio::test]
    async fn end_trip_backfills_ending_coordinates_from_last_sample() {
        let (manager, _store, _relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();
        let trip = manager.start_trip("D1", "B1", None).await.unwrap();

        manager
            .record_location(
                &trip.trip_id,
                12.95,
                77.65,
                Some("2026-08-06T10:00:00.000Z".into()),
                None,
            )
            .await
            .unwrap();
        manager
            .record_location(
                &trip.trip_id,
                12.90,
                77.70,
                Some("2026-08-06T10:00:05.000Z".into()),
                None,
            )
            .await
            .unwrap();

        let ended = manager.end_trip(&trip.trip_id, None).await.unwrap();
        assert_eq!(ended.status, TripStatus::Ended);
        assert!(ended.end_time.is_some());
        assert_eq!(ended.ending_latitude, Some(12.90));
        assert_eq!(ended.ending_longitude, Some(77.70));
    }

    #[tokio::test]
    async fn end_trip_without_samples_ends_with_null_coordinates() {
        let (manager, _store, _relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();
        let trip = manager.start_trip("D1", "B1", None).await.unwrap();

        let ended = manager.end_trip(&trip.trip_id, None).await.unwrap();
        assert_eq!(ended.ending_latitude, None);
        assert_eq!(ended.ending_longitude, None);
    }

    #[tokio::test]
    async fn logout_blocked_while_trip_active_then_succeeds() {
        let (manager, store, _relay) = setup().await;
        manager.authenticate("D1", "B1").await.unwrap();
        let trip = manager.start_trip("D1", "B1", None).await.unwrap();

        assert!(matches!(
            manager.logout("D1", "B1").await,
            Err(TripError::TripStillActive)
        ));

        manager.end_trip(&trip.trip_id, None).await.unwrap();

        // Ending a trip returns the pair to "logged in but not driving"
        let driver = store.get_driver("D1").await.unwrap().unwrap();
        assert_eq!(driver.status, DriverStatus::Active);
        assert_eq!(driver.current_bus.as_deref(), Some("B1"));
        let bus = store.get_bus("B1").await.unwrap().unwrap();
        assert_eq!(bus.status, BusStatus::Assigned);

        let assignment = manager.logout("D1", "B1").await.unwrap();
        assert_eq!(assignment.driver_status, DriverStatus::Inactive);
        assert_eq!(assignment.bus_status, BusStatus::Halt);

        let driver = store.get_driver("D1").await.unwrap().unwrap();
        assert_eq!(driver.status, DriverStatus::Inactive);
        let bus = store.get_bus("B1").await.unwrap().unwrap();
        assert_eq!(bus.status, BusStatus::Halt);
        assert!(bus.current_driver.is_none());
    }

    #[tokio::test]
    async fn record_location_validates_input() {
        let (manager, _store, _relay) = setup().await;
        assert!(matches!(
            manager.record_location("", 12.0, 77.0, None, None).await,
            Err(TripError::Validation(_))
        ));
        assert!(matches!(
            manager.record_location("t", f64::NAN, 77.0, None, None).await,
            Err(TripError::Validation(_))
        ));
        assert!(matches!(
            manager.record_location("t", 95.0, 77.0, None, None).await,
            Err(TripError::Validation(_))
        ));
        assert!(matches!(
            manager.record_location("missing", 12.0, 77.0, None, None).await,
            Err(TripError::TripNotFound)
        ));
    }
}
