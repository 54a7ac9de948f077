pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::models::{
    Bus, BusStatus, Driver, DriverStatus, GeoPoint, LocationSample, RouteStop, Trip,
};

/// Default number of history samples returned when the caller does not ask
/// for a specific limit.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Driver already has an active trip")]
    ActiveTripExists,
}

/// Persistence contract for the trip/location pipeline.
///
/// The production backend is [`SqliteStore`]; [`MemoryStore`] is the
/// null-object fallback used when no database is configured, and the fixture
/// for service-level tests. Driver and bus status always change as a pair,
/// so the contract only exposes paired transitions, never single-row status
/// writes.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, StoreError>;
    async fn get_bus(&self, bus_number: &str) -> Result<Option<Bus>, StoreError>;

    /// Atomically set the driver's status/current bus and the bus's
    /// status/current driver.
    async fn update_assignment(
        &self,
        driver_id: &str,
        bus_number: &str,
        driver_status: DriverStatus,
        bus_status: BusStatus,
    ) -> Result<(), StoreError>;

    /// Atomically release the pair on logout: driver goes inactive with no
    /// current bus; the bus goes to halt only while it still belongs to this
    /// driver, so a concurrently reassigned bus is left alone.
    async fn clear_assignment(&self, driver_id: &str, bus_number: &str)
        -> Result<(), StoreError>;

    /// Insert a new trip. Fails with [`StoreError::ActiveTripExists`] when
    /// the driver already has an active trip.
    async fn insert_trip(&self, trip: Trip) -> Result<Trip, StoreError>;
    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, StoreError>;
    async fn get_active_trip(&self, driver_id: &str) -> Result<Option<Trip>, StoreError>;
    async fn get_active_trip_for_bus(&self, bus_number: &str)
        -> Result<Option<Trip>, StoreError>;
    async fn get_active_trips(&self) -> Result<Vec<Trip>, StoreError>;

    /// Mark a trip ended, recording the end time and (optionally) resolved
    /// ending coordinates. Returns the updated trip, or None for an unknown
    /// trip id.
    async fn finish_trip(
        &self,
        trip_id: &str,
        end_time: &str,
        ending: Option<GeoPoint>,
    ) -> Result<Option<Trip>, StoreError>;

    async fn insert_sample(
        &self,
        trip_id: &str,
        point: GeoPoint,
        timestamp: &str,
    ) -> Result<LocationSample, StoreError>;

    /// Set the trip's starting coordinates if they are still unset.
    /// First-sample-wins: a no-op once coordinates exist.
    async fn backfill_start_coordinates(
        &self,
        trip_id: &str,
        point: GeoPoint,
    ) -> Result<(), StoreError>;

    async fn latest_sample(&self, trip_id: &str) -> Result<Option<LocationSample>, StoreError>;
    async fn latest_sample_for_bus(
        &self,
        bus_number: &str,
    ) -> Result<Option<LocationSample>, StoreError>;

    /// The most recent `limit` samples after the optional exclusive `since`
    /// watermark, returned in ascending timestamp order.
    async fn sample_history(
        &self,
        trip_id: &str,
        since: Option<&str>,
        limit: i64,
    ) -> Result<Vec<LocationSample>, StoreError>;

    /// Ids of trips that ended strictly before the cutoff timestamp.
    async fn trips_ended_before(&self, cutoff: &str) -> Result<Vec<String>, StoreError>;

    /// Delete all but the most recent sample for a trip. Returns the number
    /// of rows removed.
    async fn prune_samples(&self, trip_id: &str) -> Result<u64, StoreError>;

    async fn get_stop(&self, stop_id: &str) -> Result<Option<RouteStop>, StoreError>;
    async fn buses_on_route(&self, route_id: &str) -> Result<Vec<String>, StoreError>;
}
