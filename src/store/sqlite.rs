use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use super::{StoreError, TrackingStore};
use crate::models::{
    Bus, BusStatus, Driver, DriverStatus, GeoPoint, LocationSample, RouteStop, Trip, TripStatus,
};

/// SQLite-backed store. Multi-row status transitions run inside a single
/// transaction; the one-active-trip invariant is backed by a partial unique
/// index on trips(driver_id) WHERE status = 'active'.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[derive(Debug, FromRow)]
struct DriverRow {
    driver_id: String,
    name: Option<String>,
    status: String,
    current_bus: Option<String>,
}

impl DriverRow {
    fn into_driver(self) -> Result<Driver, StoreError> {
        let status = DriverStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Database(format!("unknown driver status '{}'", self.status))
        })?;
        Ok(Driver {
            driver_id: self.driver_id,
            name: self.name,
            status,
            current_bus: self.current_bus,
        })
    }
}

#[derive(Debug, FromRow)]
struct BusRow {
    bus_number: String,
    status: String,
    current_driver: Option<String>,
    assigned_route: Option<String>,
}

impl BusRow {
    fn into_bus(self) -> Result<Bus, StoreError> {
        let status = BusStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Database(format!("unknown bus status '{}'", self.status)))?;
        Ok(Bus {
            bus_number: self.bus_number,
            status,
            current_driver: self.current_driver,
            assigned_route: self.assigned_route,
        })
    }
}

#[derive(Debug, FromRow)]
struct TripRow {
    trip_id: String,
    driver_id: String,
    bus_number: String,
    status: String,
    start_time: String,
    end_time: Option<String>,
    starting_latitude: Option<f64>,
    starting_longitude: Option<f64>,
    ending_latitude: Option<f64>,
    ending_longitude: Option<f64>,
}

impl TripRow {
    fn into_trip(self) -> Result<Trip, StoreError> {
        let status = TripStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Database(format!("unknown trip status '{}'", self.status)))?;
        Ok(Trip {
            trip_id: self.trip_id,
            driver_id: self.driver_id,
            bus_number: self.bus_number,
            status,
            start_time: self.start_time,
            end_time: self.end_time,
            starting_latitude: self.starting_latitude,
            starting_longitude: self.starting_longitude,
            ending_latitude: self.ending_latitude,
            ending_longitude: self.ending_longitude,
        })
    }
}

#[derive(Debug, FromRow)]
struct SampleRow {
    location_id: i64,
    trip_id: String,
    latitude: f64,
    longitude: f64,
    timestamp: String,
}

impl SampleRow {
    fn into_sample(self) -> LocationSample {
        LocationSample {
            location_id: self.location_id,
            trip_id: self.trip_id,
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, FromRow)]
struct StopRow {
    stop_id: String,
    route_id: String,
    name: Option<String>,
    latitude: f64,
    longitude: f64,
    sequence: i64,
}

impl StopRow {
    fn into_stop(self) -> RouteStop {
        RouteStop {
            stop_id: self.stop_id,
            route_id: self.route_id,
            name: self.name,
            latitude: self.latitude,
            longitude: self.longitude,
            sequence: self.sequence,
        }
    }
}

const TRIP_COLUMNS: &str = "trip_id, driver_id, bus_number, status, start_time, end_time, \
     starting_latitude, starting_longitude, ending_latitude, ending_longitude";

#[async_trait]
impl TrackingStore for SqliteStore {
    async fn get_driver(&self, driver_id: &str) -> Result<Option<Driver>, StoreError> {
        let row: Option<DriverRow> =
            sqlx::query_as("SELECT driver_id, name, status, current_bus FROM drivers WHERE driver_id = ?")
                .bind(driver_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        row.map(DriverRow::into_driver).transpose()
    }

    async fn get_bus(&self, bus_number: &str) -> Result<Option<Bus>, StoreError> {
        let row: Option<BusRow> = sqlx::query_as(
            "SELECT bus_number, status, current_driver, assigned_route FROM buses WHERE bus_number = ?",
        )
        .bind(bus_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(BusRow::into_bus).transpose()
    }

    async fn update_assignment(
        &self,
        driver_id: &str,
        bus_number: &str,
        driver_status: DriverStatus,
        bus_status: BusStatus,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("UPDATE drivers SET status = ?, current_bus = ? WHERE driver_id = ?")
            .bind(driver_status.as_str())
            .bind(bus_number)
            .bind(driver_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("UPDATE buses SET status = ?, current_driver = ? WHERE bus_number = ?")
            .bind(bus_status.as_str())
            .bind(driver_id)
            .bind(bus_number)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn clear_assignment(
        &self,
        driver_id: &str,
        bus_number: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("UPDATE drivers SET status = 'inactive', current_bus = NULL WHERE driver_id = ?")
            .bind(driver_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        // Scoped by current_driver so a reassigned bus is not clobbered
        sqlx::query(
            "UPDATE buses SET status = 'halt', current_driver = NULL \
             WHERE bus_number = ? AND current_driver = ?",
        )
        .bind(bus_number)
        .bind(driver_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn insert_trip(&self, trip: Trip) -> Result<Trip, StoreError> {
        let result = sqlx::query(
            "INSERT INTO trips (trip_id, driver_id, bus_number, status, start_time, \
             starting_latitude, starting_longitude) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trip.trip_id)
        .bind(&trip.driver_id)
        .bind(&trip.bus_number)
        .bind(trip.status.as_str())
        .bind(&trip.start_time)
        .bind(trip.starting_latitude)
        .bind(trip.starting_longitude)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(trip),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::ActiveTripExists)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, StoreError> {
        let row: Option<TripRow> = sqlx::query_as(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE trip_id = ?"
        ))
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(TripRow::into_trip).transpose()
    }

    async fn get_active_trip(&self, driver_id: &str) -> Result<Option<Trip>, StoreError> {
        let row: Option<TripRow> = sqlx::query_as(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE driver_id = ? AND status = 'active'"
        ))
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(TripRow::into_trip).transpose()
    }

    async fn get_active_trip_for_bus(
        &self,
        bus_number: &str,
    ) -> Result<Option<Trip>, StoreError> {
        let row: Option<TripRow> = sqlx::query_as(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE bus_number = ? AND status = 'active' \
             ORDER BY start_time DESC LIMIT 1"
        ))
        .bind(bus_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(TripRow::into_trip).transpose()
    }

    async fn get_active_trips(&self) -> Result<Vec<Trip>, StoreError> {
        let rows: Vec<TripRow> = sqlx::query_as(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE status = 'active' ORDER BY start_time"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(TripRow::into_trip).collect()
    }

    async fn finish_trip(
        &self,
        trip_id: &str,
        end_time: &str,
        ending: Option<GeoPoint>,
    ) -> Result<Option<Trip>, StoreError> {
        let row: Option<TripRow> = sqlx::query_as(&format!(
            "UPDATE trips SET status = 'ended', end_time = ?, \
             ending_latitude = ?, ending_longitude = ? \
             WHERE trip_id = ? RETURNING {TRIP_COLUMNS}"
        ))
        .bind(end_time)
        .bind(ending.map(|p| p.latitude))
        .bind(ending.map(|p| p.longitude))
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(TripRow::into_trip).transpose()
    }

    async fn insert_sample(
        &self,
        trip_id: &str,
        point: GeoPoint,
        timestamp: &str,
    ) -> Result<LocationSample, StoreError> {
        let row: SampleRow = sqlx::query_as(
            "INSERT INTO trip_locations (trip_id, latitude, longitude, timestamp) \
             VALUES (?, ?, ?, ?) \
             RETURNING location_id, trip_id, latitude, longitude, timestamp",
        )
        .bind(trip_id)
        .bind(point.latitude)
        .bind(point.longitude)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.into_sample())
    }

    async fn backfill_start_coordinates(
        &self,
        trip_id: &str,
        point: GeoPoint,
    ) -> Result<(), StoreError> {
        // First-sample-wins: the IS NULL guard makes repeated calls no-ops
        sqlx::query(
            "UPDATE trips SET starting_latitude = ?, starting_longitude = ? \
             WHERE trip_id = ? AND starting_latitude IS NULL",
        )
        .bind(point.latitude)
        .bind(point.longitude)
        .bind(trip_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn latest_sample(&self, trip_id: &str) -> Result<Option<LocationSample>, StoreError> {
        let row: Option<SampleRow> = sqlx::query_as(
            "SELECT location_id, trip_id, latitude, longitude, timestamp \
             FROM trip_locations WHERE trip_id = ? \
             ORDER BY timestamp DESC, location_id DESC LIMIT 1",
        )
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(SampleRow::into_sample))
    }

    async fn latest_sample_for_bus(
        &self,
        bus_number: &str,
    ) -> Result<Option<LocationSample>, StoreError> {
        let row: Option<SampleRow> = sqlx::query_as(
            "SELECT tl.location_id, tl.trip_id, tl.latitude, tl.longitude, tl.timestamp \
             FROM trip_locations tl \
             JOIN trips t ON t.trip_id = tl.trip_id \
             WHERE t.bus_number = ? \
             ORDER BY tl.timestamp DESC, tl.location_id DESC LIMIT 1",
        )
        .bind(bus_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(SampleRow::into_sample))
    }

    async fn sample_history(
        &self,
        trip_id: &str,
        since: Option<&str>,
        limit: i64,
    ) -> Result<Vec<LocationSample>, StoreError> {
        // Take the most recent `limit` rows, then flip to ascending order
        // for playback.
        let mut rows: Vec<SampleRow> = sqlx::query_as(
            "SELECT location_id, trip_id, latitude, longitude, timestamp \
             FROM trip_locations \
             WHERE trip_id = ? AND (? IS NULL OR timestamp > ?) \
             ORDER BY timestamp DESC, location_id DESC LIMIT ?",
        )
        .bind(trip_id)
        .bind(since)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.reverse();
        Ok(rows.into_iter().map(SampleRow::into_sample).collect())
    }

    async fn trips_ended_before(&self, cutoff: &str) -> Result<Vec<String>, StoreError> {
        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT trip_id FROM trips WHERE status = 'ended' AND end_time < ?")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn prune_samples(&self, trip_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM trip_locations WHERE trip_id = ? AND location_id != ( \
                 SELECT location_id FROM trip_locations WHERE trip_id = ? \
                 ORDER BY timestamp DESC, location_id DESC LIMIT 1)",
        )
        .bind(trip_id)
        .bind(trip_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn get_stop(&self, stop_id: &str) -> Result<Option<RouteStop>, StoreError> {
        let row: Option<StopRow> = sqlx::query_as(
            "SELECT stop_id, route_id, name, latitude, longitude, sequence \
             FROM route_stops WHERE stop_id = ?",
        )
        .bind(stop_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(StopRow::into_stop))
    }

    async fn buses_on_route(&self, route_id: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT bus_number FROM buses WHERE assigned_route = ?")
                .bind(route_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(|(b,)| b).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::now_rfc3339;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteStore {
        // A pooled in-memory database gets a fresh database per connection,
        // so the pool is pinned to a single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    async fn seed_roster(store: &SqliteStore) {
        sqlx::query("INSERT INTO drivers (driver_id, name) VALUES ('D1', 'Asha')")
            .execute(store.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO buses (bus_number) VALUES ('B1')")
            .execute(store.pool())
            .await
            .unwrap();
    }

    fn make_trip(trip_id: &str, driver_id: &str, bus_number: &str) -> Trip {
        Trip {
            trip_id: trip_id.into(),
            driver_id: driver_id.into(),
            bus_number: bus_number.into(),
            status: TripStatus::Active,
            start_time: now_rfc3339(),
            end_time: None,
            starting_latitude: None,
            starting_longitude: None,
            ending_latitude: None,
            ending_longitude: None,
        }
    }

    #[tokio::test]
    async fn unique_index_rejects_second_active_trip() {
        let store = test_store().await;
        seed_roster(&store).await;

        store.insert_trip(make_trip("t1", "D1", "B1")).await.unwrap();
        let err = store.insert_trip(make_trip("t2", "D1", "B2")).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveTripExists));

        // Ending the first trip frees the slot
        store.finish_trip("t1", &now_rfc3339(), None).await.unwrap();
        store.insert_trip(make_trip("t2", "D1", "B2")).await.unwrap();
    }

    #[tokio::test]
    async fn backfill_is_first_sample_wins() {
        let store = test_store().await;
        seed_roster(&store).await;
        store.insert_trip(make_trip("t1", "D1", "B1")).await.unwrap();

        store
            .backfill_start_coordinates("t1", GeoPoint::new(12.9716, 77.5946))
            .await
            .unwrap();
        store
            .backfill_start_coordinates("t1", GeoPoint::new(13.0, 78.0))
            .await
            .unwrap();

        let trip = store.get_trip("t1").await.unwrap().unwrap();
        assert_eq!(trip.starting_latitude, Some(12.9716));
        assert_eq!(trip.starting_longitude, Some(77.5946));
    }

    #[tokio::test]
    async fn history_limit_keeps_most_recent_in_ascending_order() {
        let store = test_store().await;
        seed_roster(&store).await;
        store.insert_trip(make_trip("t1", "D1", "B1")).await.unwrap();

        for i in 0..5 {
            let ts = format!("2026-08-06T10:00:0{i}.000Z");
            store
                .insert_sample("t1", GeoPoint::new(12.0 + i as f64, 77.0), &ts)
                .await
                .unwrap();
        }

        let history = store.sample_history("t1", None, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, "2026-08-06T10:00:03.000Z");
        assert_eq!(history[1].timestamp, "2026-08-06T10:00:04.000Z");

        let since = store
            .sample_history("t1", Some("2026-08-06T10:00:02.000Z"), 50)
            .await
            .unwrap();
        assert_eq!(since.len(), 2);
    }

    #[tokio::test]
    async fn prune_keeps_only_latest_sample() {
        let store = test_store().await;
        seed_roster(&store).await;
        store.insert_trip(make_trip("t1", "D1", "B1")).await.unwrap();

        for i in 0..4 {
            let ts = format!("2026-08-06T10:00:0{i}.000Z");
            store
                .insert_sample("t1", GeoPoint::new(12.0, 77.0 + i as f64), &ts)
                .await
                .unwrap();
        }

        let deleted = store.prune_samples("t1").await.unwrap();
        assert_eq!(deleted, 3);

        let remaining = store.sample_history("t1", None, 50).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timestamp, "2026-08-06T10:00:03.000Z");
    }

    #[tokio::test]
    async fn clear_assignment_is_scoped_to_current_driver() {
        let store = test_store().await;
        seed_roster(&store).await;

        store
            .update_assignment("D1", "B1", DriverStatus::Active, BusStatus::Assigned)
            .await
            .unwrap();

        // Bus got reassigned to another driver in the meantime
        sqlx::query("UPDATE buses SET current_driver = 'D2' WHERE bus_number = 'B1'")
            .execute(store.pool())
            .await
            .unwrap();

        store.clear_assignment("D1", "B1").await.unwrap();

        let driver = store.get_driver("D1").await.unwrap().unwrap();
        assert_eq!(driver.status, DriverStatus::Inactive);
        assert!(driver.current_bus.is_none());

        // The reassigned bus keeps its new driver
        let bus = store.get_bus("B1").await.unwrap().unwrap();
        assert_eq!(bus.current_driver.as_deref(), Some("D2"));
        assert_eq!(bus.status, BusStatus::Assigned);
    }
}
