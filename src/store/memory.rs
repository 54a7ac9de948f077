use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{StoreError, TrackingStore};
use crate::models::{
    Bus, BusStatus, Driver, DriverStatus, GeoPoint, LocationSample, RouteStop, Trip, TripStatus,
};

/// In-memory store. Selected at startup when no database URL is configured
/// (the API starts, nothing persists), and used as the fixture for
/// service-level tests. All invariants the SQLite schema enforces are
/// enforced here under the write lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    drivers: HashMap<String, Driver>,
    buses: HashMap<String, Bus>,
    trips: HashMap<String, Trip>,
    /// Samples per trip, kept sorted by (timestamp, location_id).
    samples: HashMap<String, Vec<LocationSample>>,
    stops: HashMap<String, RouteStop>,
    next_location_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a roster driver. Rosters are maintained externally; this mirrors
    /// that seam for the in-memory backend.
    pub async fn seed_driver(&self, driver_id: &str, name: Option<&str>) {
        let mut inner = self.inner.write().await;
        inner.drivers.insert(
            driver_id.to_string(),
            Driver {
                driver_id: driver_id.to_string(),
                name: name.map(|n| n.to_string()),
                status: DriverStatus::Inactive,
                current_bus: None,
            },
        );
    }

    pub async fn seed_bus(&self, bus_number: &str, assigned_route: Option<&str>) {
        let mut inner = self.inner.write().await;
        inner.buses.insert(
            bus_number.to_string(),
            Bus {
                bus_number: bus_number.to_string(),
                status: BusStatus::Halt,
                current_driver: None,
                assigned_route: assigned_route.map(|r| r.to_string()),
            },
        );
    }

    pub async fn seed_stop(&self, stop: RouteStop) {
        let mut inner = self.inner.write().await;
        inner.stops.insert(stop.stop_id.clone(), stop);
    }
}

fn sort_samples(samples: &mut [LocationSample]) {
    samples.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.location_id.cmp(&b.location_id))
    });
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, StoreError> {
        Ok(self.inner.read().await.drivers.get(driver_id).cloned())
    }

    async fn get_bus(&self, bus_number: &str) -> Result<Option<Bus>, StoreError> {
        Ok(self.inner.read().await.buses.get(bus_number).cloned())
    }

    async fn update_assignment(
        &self,
        driver_id: &str,
        bus_number: &str,
        driver_status: DriverStatus,
        bus_status: BusStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(driver) = inner.drivers.get_mut(driver_id) {
            driver.status = driver_status;
            driver.current_bus = Some(bus_number.to_string());
        }
        if let Some(bus) = inner.buses.get_mut(bus_number) {
            bus.status = bus_status;
            bus.current_driver = Some(driver_id.to_string());
        }
        Ok(())
    }

    async fn clear_assignment(
        &self,
        driver_id: &str,
        bus_number: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(driver) = inner.drivers.get_mut(driver_id) {
            driver.status = DriverStatus::Inactive;
            driver.current_bus = None;
        }
        if let Some(bus) = inner.buses.get_mut(bus_number) {
            // Leave a reassigned bus alone
            if bus.current_driver.as_deref() == Some(driver_id) {
                bus.status = BusStatus::Halt;
                bus.current_driver = None;
            }
        }
        Ok(())
    }

    async fn insert_trip(&self, trip: Trip) -> Result<Trip, StoreError> {
        let mut inner = self.inner.write().await;
        let has_active = inner
            .trips
            .values()
            .any(|t| t.driver_id == trip.driver_id && t.status == TripStatus::Active);
        if has_active {
            return Err(StoreError::ActiveTripExists);
        }
        inner.trips.insert(trip.trip_id.clone(), trip.clone());
        Ok(trip)
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, StoreError> {
        Ok(self.inner.read().await.trips.get(trip_id).cloned())
    }

    async fn get_active_trip(&self, driver_id: &str) -> Result<Option<Trip>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .trips
            .values()
            .find(|t| t.driver_id == driver_id && t.status == TripStatus::Active)
            .cloned())
    }

    async fn get_active_trip_for_bus(
        &self,
        bus_number: &str,
    ) -> Result<Option<Trip>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .trips
            .values()
            .find(|t| t.bus_number == bus_number && t.status == TripStatus::Active)
            .cloned())
    }

    async fn get_active_trips(&self) -> Result<Vec<Trip>, StoreError> {
        let inner = self.inner.read().await;
        let mut trips: Vec<Trip> = inner
            .trips
            .values()
            .filter(|t| t.status == TripStatus::Active)
            .cloned()
            .collect();
        trips.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(trips)
    }

    async fn finish_trip(
        &self,
        trip_id: &str,
        end_time: &str,
        ending: Option<GeoPoint>,
    ) -> Result<Option<Trip>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(trip) = inner.trips.get_mut(trip_id) else {
            return Ok(None);
        };
        trip.status = TripStatus::Ended;
        trip.end_time = Some(end_time.to_string());
        if let Some(point) = ending {
            trip.ending_latitude = Some(point.latitude);
            trip.ending_longitude = Some(point.longitude);
        }
        Ok(Some(trip.clone()))
    }

    async fn insert_sample(
        &self,
        trip_id: &str,
        point: GeoPoint,
        timestamp: &str,
    ) -> Result<LocationSample, StoreError> {
        let mut inner = self.inner.write().await;
        inner.next_location_id += 1;
        let sample = LocationSample {
            location_id: inner.next_location_id,
            trip_id: trip_id.to_string(),
            latitude: point.latitude,
            longitude: point.longitude,
            timestamp: timestamp.to_string(),
        };
        let samples = inner.samples.entry(trip_id.to_string()).or_default();
        samples.push(sample.clone());
        sort_samples(samples);
        Ok(sample)
    }

    async fn backfill_start_coordinates(
        &self,
        trip_id: &str,
        point: GeoPoint,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(trip) = inner.trips.get_mut(trip_id) {
            if trip.starting_latitude.is_none() {
                trip.starting_latitude = Some(point.latitude);
                trip.starting_longitude = Some(point.longitude);
            }
        }
        Ok(())
    }

    async fn latest_sample(&self, trip_id: &str) -> Result<Option<LocationSample>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .samples
            .get(trip_id)
            .and_then(|s| s.last())
            .cloned())
    }

    async fn latest_sample_for_bus(
        &self,
        bus_number: &str,
    ) -> Result<Option<LocationSample>, StoreError> {
        let inner = self.inner.read().await;
        let mut latest: Option<&LocationSample> = None;
        for trip in inner.trips.values().filter(|t| t.bus_number == bus_number) {
            if let Some(sample) = inner.samples.get(&trip.trip_id).and_then(|s| s.last()) {
                let newer = match latest {
                    Some(current) => {
                        (&sample.timestamp, sample.location_id)
                            > (&current.timestamp, current.location_id)
                    }
                    None => true,
                };
                if newer {
                    latest = Some(sample);
                }
            }
        }
        Ok(latest.cloned())
    }

    async fn sample_history(
        &self,
        trip_id: &str,
        since: Option<&str>,
        limit: i64,
    ) -> Result<Vec<LocationSample>, StoreError> {
        let inner = self.inner.read().await;
        let Some(samples) = inner.samples.get(trip_id) else {
            return Ok(Vec::new());
        };
        let filtered: Vec<LocationSample> = samples
            .iter()
            .filter(|s| since.map_or(true, |w| s.timestamp.as_str() > w))
            .cloned()
            .collect();
        // Most recent `limit` entries, ascending order preserved
        let start = filtered.len().saturating_sub(limit.max(0) as usize);
        Ok(filtered[start..].to_vec())
    }

    async fn trips_ended_before(&self, cutoff: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .trips
            .values()
            .filter(|t| {
                t.status == TripStatus::Ended
                    && t.end_time.as_deref().map_or(false, |end| end < cutoff)
            })
            .map(|t| t.trip_id.clone())
            .collect())
    }

    async fn prune_samples(&self, trip_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(samples) = inner.samples.get_mut(trip_id) else {
            return Ok(0);
        };
        if samples.len() <= 1 {
            return Ok(0);
        }
        let removed = samples.len() - 1;
        samples.drain(..removed);
        Ok(removed as u64)
    }

    async fn get_stop(&self, stop_id: &str) -> Result<Option<RouteStop>, StoreError> {
        Ok(self.inner.read().await.stops.get(stop_id).cloned())
    }

    async fn buses_on_route(&self, route_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .buses
            .values()
            .filter(|b| b.assigned_route.as_deref() == Some(route_id))
            .map(|b| b.bus_number.clone())
            .collect())
    }
}
