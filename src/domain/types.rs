//! Shared value types for location sharing

use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Finite and within [-90, 90] / [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// Last accepted position of one tracked party.
///
/// Replaced wholesale on every accepted update, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPosition {
    pub coordinate: Coordinate,
    pub accepted_at: Instant,
}

impl TrackedPosition {
    pub fn new(coordinate: Coordinate, accepted_at: Instant) -> Self {
        Self { coordinate, accepted_at }
    }
}

/// When the last analysis was attempted (successful or not)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnalysisState {
    pub last_run_at: Option<Instant>,
}

impl AnalysisState {
    pub fn record_run(&mut self, now: Instant) {
        self.last_run_at = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_run_at = None;
    }
}

/// Provenance of the counterpart coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterpartSource {
    /// Retrieved from the location store
    Live,
    /// Jittered near self because the store was unreachable
    Synthesized,
}

impl CounterpartSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterpartSource::Live => "live",
            CounterpartSource::Synthesized => "synthesized",
        }
    }
}

/// Provenance of an analysis text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Remote,
    Fallback,
}

impl AnalysisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisSource::Remote => "remote",
            AnalysisSource::Fallback => "fallback",
        }
    }
}

/// Situational analysis of the two positions (HTML prose)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub text: String,
    pub source: AnalysisSource,
    pub distance_m: f64,
}

/// Smallest box enclosing both markers, used to fit the map view.
///
/// When the shorter way between the two longitudes crosses the antimeridian
/// the box wraps: `south_west.longitude` is then greater than
/// `north_east.longitude`, the same convention GeoJSON bounding boxes use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewBounds {
    pub south_west: Coordinate,
    pub north_east: Coordinate,
}

impl ViewBounds {
    pub fn enclosing(a: Coordinate, b: Coordinate) -> Self {
        let (low, high) = if a.longitude <= b.longitude {
            (a.longitude, b.longitude)
        } else {
            (b.longitude, a.longitude)
        };
        let (west, east) = if high - low > 180.0 { (high, low) } else { (low, high) };

        Self {
            south_west: Coordinate::new(a.latitude.min(b.latitude), west),
            north_east: Coordinate::new(a.latitude.max(b.latitude), east),
        }
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.south_west.longitude > self.north_east.longitude
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        let west = self.south_west.longitude;
        let east = self.north_east.longitude;
        let in_lng = if self.crosses_antimeridian() {
            c.longitude >= west || c.longitude <= east
        } else {
            (west..=east).contains(&c.longitude)
        };
        (self.south_west.latitude..=self.north_east.latitude).contains(&c.latitude) && in_lng
    }
}
