//! Analysis throttle - minimum interval between AI analysis attempts

use crate::domain::types::AnalysisState;
use std::time::{Duration, Instant};

/// Default minimum interval between analyses (3 minutes)
pub const DEFAULT_ANALYSIS_INTERVAL: Duration = Duration::from_secs(180);

/// True if no analysis has run yet, or at least `min_interval` has elapsed
/// since the last one. A `now` earlier than the last run counts as zero
/// elapsed time.
pub fn should_run(state: &AnalysisState, now: Instant, min_interval: Duration) -> bool {
    match state.last_run_at {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= min_interval,
    }
}

/// Owns the analysis state of one sharing session.
///
/// The interval restarts on every attempt, whatever the outcome of the
/// downstream call, so a failing service is not retried in a tight loop.
#[derive(Debug, Clone)]
pub struct AnalysisThrottle {
    min_interval: Duration,
    state: AnalysisState,
}

impl Default for AnalysisThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_ANALYSIS_INTERVAL)
    }
}

impl AnalysisThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, state: AnalysisState::default() }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    /// Claim a run slot. Records `now` as the last run when granted.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if !should_run(&self.state, now, self.min_interval) {
            return false;
        }
        self.state.record_run(now);
        true
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}
