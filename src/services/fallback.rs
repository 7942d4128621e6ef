//! Degraded-mode fallbacks used when a remote collaborator is unreachable
//!
//! - `synthesize_counterpart` - a renderable stand-in near our own position
//! - `fallback_summary` - templated analysis text built from the distance

use crate::domain::types::Coordinate;
use rand::Rng;

/// Default full width of the jitter window in degrees (±0.005° per axis)
pub const DEFAULT_JITTER_DEG: f64 = 0.01;

/// Distance below which the two parties count as near each other
pub const DEFAULT_NEAR_THRESHOLD_M: f64 = 100.0;

pub const NEAR_SUGGESTION: &str = "You are close, you can meet on foot";
pub const FAR_SUGGESTION: &str = "You are far apart, consider using transport";

/// Pick a coordinate uniformly within `jitter_deg / 2` of `origin` on each axis.
///
/// This is an approximation for display only and must be tagged as such.
pub fn synthesize_counterpart<R: Rng + ?Sized>(
    origin: Coordinate,
    jitter_deg: f64,
    rng: &mut R,
) -> Coordinate {
    let lat = origin.latitude + (rng.gen::<f64>() - 0.5) * jitter_deg;
    let lng = origin.longitude + (rng.gen::<f64>() - 0.5) * jitter_deg;
    Coordinate::new(lat.clamp(-90.0, 90.0), wrap_longitude(lng))
}

fn wrap_longitude(lng: f64) -> f64 {
    if lng > 180.0 {
        lng - 360.0
    } else if lng < -180.0 {
        lng + 360.0
    } else {
        lng
    }
}

/// Suggestion phrase for a given distance
pub fn suggestion(distance_m: f64, near_threshold_m: f64) -> &'static str {
    if distance_m < near_threshold_m {
        NEAR_SUGGESTION
    } else {
        FAR_SUGGESTION
    }
}

/// Deterministic local analysis used when the AI service fails
pub fn fallback_summary(distance_m: f64, near_threshold_m: f64) -> String {
    format!(
        "<strong>Distance:</strong> You and your friend are about {distance_m:.2} meters apart<br>\n\
         <strong>Your area:</strong> You appear to be in an urban area<br>\n\
         <strong>Friend's area:</strong> Your friend may be in a nearby commercial district<br>\n\
         <strong>Suggestion:</strong> {}",
        suggestion(distance_m, near_threshold_m)
    )
}
