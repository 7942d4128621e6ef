//! Events emitted by a sharing session for the renderer

use crate::domain::types::{Analysis, Coordinate, CounterpartSource, ViewBounds};
use serde::Serialize;

/// What changed as a result of one position observation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Own marker moved
    SelfMoved { coordinate: Coordinate },
    /// Counterpart marker moved; `source` tells live data from synthesized
    CounterpartMoved { coordinate: Coordinate, source: CounterpartSource, bounds: ViewBounds },
    /// New analysis text is available
    AnalysisReady(Analysis),
}

impl SessionEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
