use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Driver lifecycle status. Mutated only by the trip state machine; every
/// transition is paired with the mirrored [`BusStatus`] transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Inactive,
    Active,
    OnTrip,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Inactive => "inactive",
            DriverStatus::Active => "active",
            DriverStatus::OnTrip => "on_trip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inactive" => Some(DriverStatus::Inactive),
            "active" => Some(DriverStatus::Active),
            "on_trip" => Some(DriverStatus::OnTrip),
            _ => None,
        }
    }
}

/// Bus lifecycle status, always updated together with the driver's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BusStatus {
    Halt,
    Assigned,
    Running,
}

impl BusStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusStatus::Halt => "halt",
            BusStatus::Assigned => "assigned",
            BusStatus::Running => "running",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "halt" => Some(BusStatus::Halt),
            "assigned" => Some(BusStatus::Assigned),
            "running" => Some(BusStatus::Running),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Active,
    Ended,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Active => "active",
            TripStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TripStatus::Active),
            "ended" => Some(TripStatus::Ended),
            _ => None,
        }
    }
}

/// A plain WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the pair lies inside valid latitude/longitude ranges.
    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Driver {
    pub driver_id: String,
    pub name: Option<String>,
    pub status: DriverStatus,
    pub current_bus: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Bus {
    pub bus_number: String,
    pub status: BusStatus,
    pub current_driver: Option<String>,
    pub assigned_route: Option<String>,
}

/// One driving session for a driver/bus pair. Starting coordinates are set
/// lazily from the first accepted sample when not supplied at creation;
/// ending coordinates default to the last known sample at end time.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Trip {
    pub trip_id: String,
    pub driver_id: String,
    pub bus_number: String,
    pub status: TripStatus,
    pub start_time: String,
    pub end_time: Option<String>,
    pub starting_latitude: Option<f64>,
    pub starting_longitude: Option<f64>,
    pub ending_latitude: Option<f64>,
    pub ending_longitude: Option<f64>,
}

/// One accepted location reading persisted for a trip.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LocationSample {
    pub location_id: i64,
    pub trip_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
}

/// Latest known position of a bus with an active trip.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActiveBusLocation {
    pub bus_number: String,
    pub trip_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
}

/// Route stop reference data, consulted by the ETA endpoint only.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouteStop {
    pub stop_id: String,
    pub route_id: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub sequence: i64,
}

/// Current wall-clock time as RFC 3339 UTC with millisecond precision.
/// All persisted timestamps use this format so that lexical ordering is
/// chronological ordering.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_timestamp_ms(ts: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.timestamp_millis())
}
