//! Movement gate - suppresses updates for insignificant position changes

use crate::domain::types::{Coordinate, TrackedPosition};
use crate::services::geodesy::{distance_meters_with_radius, EARTH_RADIUS_M};
use std::time::Instant;

/// Default movement threshold in meters
pub const DEFAULT_MOVEMENT_THRESHOLD_M: f64 = 100.0;

/// True if there is no previous position, or the candidate moved strictly
/// more than `threshold_m` away from it.
pub fn should_accept(
    previous: Option<&TrackedPosition>,
    candidate: Coordinate,
    threshold_m: f64,
) -> bool {
    MovementGate::new(threshold_m).should_accept(previous, candidate)
}

/// Threshold filter shared by self and counterpart tracking.
///
/// The gate itself is stateless; each tracked party keeps its own slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementGate {
    threshold_m: f64,
    earth_radius_m: f64,
}

impl Default for MovementGate {
    fn default() -> Self {
        Self::new(DEFAULT_MOVEMENT_THRESHOLD_M)
    }
}

impl MovementGate {
    pub fn new(threshold_m: f64) -> Self {
        Self { threshold_m, earth_radius_m: EARTH_RADIUS_M }
    }

    pub fn with_earth_radius(mut self, earth_radius_m: f64) -> Self {
        self.earth_radius_m = earth_radius_m;
        self
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    pub fn earth_radius_m(&self) -> f64 {
        self.earth_radius_m
    }

    pub fn should_accept(&self, previous: Option<&TrackedPosition>, candidate: Coordinate) -> bool {
        match previous {
            None => true,
            Some(prev) => {
                distance_meters_with_radius(prev.coordinate, candidate, self.earth_radius_m)
                    > self.threshold_m
            }
        }
    }

    /// Evaluate the gate and, on acceptance, replace the slot with a fresh
    /// `TrackedPosition`. A rejected candidate leaves the slot untouched.
    pub fn offer(
        &self,
        slot: &mut Option<TrackedPosition>,
        candidate: Coordinate,
        now: Instant,
    ) -> bool {
        if !self.should_accept(slot.as_ref(), candidate) {
            return false;
        }
        *slot = Some(TrackedPosition::new(candidate, now));
        true
    }
}
