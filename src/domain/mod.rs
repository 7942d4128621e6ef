//! Domain models - coordinates, tracked positions and session events
//!
//! - `Coordinate` - latitude/longitude value type
//! - `TrackedPosition` - last accepted position of self or counterpart
//! - `AnalysisState` - analysis throttle bookkeeping
//! - `SessionEvent` - renderer-facing output of a sharing session

pub mod events;
pub mod types;

pub use events::SessionEvent;
pub use types::{
    Analysis, AnalysisSource, AnalysisState, Coordinate, CounterpartSource, TrackedPosition,
    ViewBounds,
};
