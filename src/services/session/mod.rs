//! Location sync orchestrator
//!
//! Two states: `Idle` and `Sharing`. All mutable per-session data lives in
//! a `SharingSession` that is created on start and dropped on stop, so
//! stopping clears both tracked positions, the analysis throttle and the
//! position subscription in one step.
//!
//! Per accepted own position the causal chain is
//! push -> fetch counterpart -> gate counterpart -> maybe analyze
//! (see `sync.rs`). Everything runs on one task; no locks guard session state.

mod sync;
#[cfg(test)]
mod tests;

use crate::domain::events::SessionEvent;
use crate::domain::types::{new_uuid_v7, Coordinate, CounterpartSource, TrackedPosition};
use crate::infra::config::Config;
use crate::infra::metrics::SessionMetrics;
use crate::io::analysis::AnalysisService;
use crate::io::geolocation::{GeolocationError, NextFix, PositionSource, PositionWatch};
use crate::io::location_store::LocationStore;
use crate::services::analysis_throttle::{AnalysisThrottle, DEFAULT_ANALYSIS_INTERVAL};
use crate::services::fallback::{DEFAULT_JITTER_DEG, DEFAULT_NEAR_THRESHOLD_M};
use crate::services::geodesy::EARTH_RADIUS_M;
use crate::services::movement_gate::{MovementGate, DEFAULT_MOVEMENT_THRESHOLD_M};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0} must not be empty")]
    MissingIdentifier(&'static str),

    #[error("a sharing session is already running")]
    AlreadySharing,

    #[error(transparent)]
    Geolocation(#[from] GeolocationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sharing,
}

/// Tunables the orchestrator reads from configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub movement_threshold_m: f64,
    pub earth_radius_m: f64,
    pub analysis_min_interval: Duration,
    pub position_timeout: Duration,
    pub fallback_jitter_deg: f64,
    pub near_threshold_m: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            movement_threshold_m: DEFAULT_MOVEMENT_THRESHOLD_M,
            earth_radius_m: EARTH_RADIUS_M,
            analysis_min_interval: DEFAULT_ANALYSIS_INTERVAL,
            position_timeout: Duration::from_secs(5),
            fallback_jitter_deg: DEFAULT_JITTER_DEG,
            near_threshold_m: DEFAULT_NEAR_THRESHOLD_M,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            movement_threshold_m: config.movement_threshold_m(),
            earth_radius_m: config.earth_radius_m(),
            analysis_min_interval: config.analysis_min_interval(),
            position_timeout: config.position_timeout(),
            fallback_jitter_deg: config.fallback_jitter_deg(),
            near_threshold_m: config.near_threshold_m(),
        }
    }

    fn movement_gate(&self) -> MovementGate {
        MovementGate::new(self.movement_threshold_m).with_earth_radius(self.earth_radius_m)
    }
}

/// State owned by one `Sharing` period
pub struct SharingSession {
    id: String,
    user_id: String,
    friend_id: String,
    self_position: Option<TrackedPosition>,
    counterpart_position: Option<TrackedPosition>,
    counterpart_source: Option<CounterpartSource>,
    throttle: AnalysisThrottle,
    watch: PositionWatch,
}

impl SharingSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn friend_id(&self) -> &str {
        &self.friend_id
    }

    pub fn self_position(&self) -> Option<&TrackedPosition> {
        self.self_position.as_ref()
    }

    pub fn counterpart_position(&self) -> Option<&TrackedPosition> {
        self.counterpart_position.as_ref()
    }

    pub fn counterpart_source(&self) -> Option<CounterpartSource> {
        self.counterpart_source
    }

    pub fn throttle(&self) -> &AnalysisThrottle {
        &self.throttle
    }
}

/// Drives a sharing session against the store, the analysis service and a
/// position source
pub struct Orchestrator {
    settings: SessionSettings,
    gate: MovementGate,
    store: Arc<dyn LocationStore>,
    analysis: Arc<dyn AnalysisService>,
    source: Arc<dyn PositionSource>,
    metrics: Arc<SessionMetrics>,
    rng: StdRng,
    session: Option<SharingSession>,
}

impl Orchestrator {
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn LocationStore>,
        analysis: Arc<dyn AnalysisService>,
        source: Arc<dyn PositionSource>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            gate: settings.movement_gate(),
            settings,
            store,
            analysis,
            source,
            metrics,
            rng: StdRng::from_entropy(),
            session: None,
        }
    }

    /// Replace the jitter RNG (deterministic degraded-mode output in tests)
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> SessionState {
        if self.session.is_some() {
            SessionState::Sharing
        } else {
            SessionState::Idle
        }
    }

    pub fn session(&self) -> Option<&SharingSession> {
        self.session.as_ref()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// `Idle -> Sharing`.
    ///
    /// Identifiers are validated before the position source is touched;
    /// any failure leaves the orchestrator `Idle` with nothing subscribed.
    pub async fn start(&mut self, user_id: &str, friend_id: &str) -> Result<(), SessionError> {
        if self.session.is_some() {
            return Err(SessionError::AlreadySharing);
        }

        let user_id = user_id.trim();
        let friend_id = friend_id.trim();
        if user_id.is_empty() {
            return Err(SessionError::MissingIdentifier("user id"));
        }
        if friend_id.is_empty() {
            return Err(SessionError::MissingIdentifier("friend id"));
        }

        let watch = match self.source.watch().await {
            Ok(watch) => watch,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "position_source_failed");
                return Err(e.into());
            }
        };

        let session = SharingSession {
            id: new_uuid_v7(),
            user_id: user_id.to_string(),
            friend_id: friend_id.to_string(),
            self_position: None,
            counterpart_position: None,
            counterpart_source: None,
            throttle: AnalysisThrottle::new(self.settings.analysis_min_interval),
            watch,
        };

        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            friend_id = %session.friend_id,
            threshold_m = %self.settings.movement_threshold_m,
            analysis_interval_ms = %self.settings.analysis_min_interval.as_millis(),
            "sharing_started"
        );

        self.session = Some(session);
        Ok(())
    }

    /// `Sharing -> Idle`. Returns false if nothing was running.
    pub fn stop(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };

        session.watch.cancel();
        info!(session_id = %session.id, user_id = %session.user_id, "sharing_stopped");
        self.metrics.report().log();
        true
    }

    /// Wait for the next fix from the active subscription
    async fn next_fix(&mut self) -> NextFix {
        let timeout = self.settings.position_timeout;
        match self.session.as_mut() {
            Some(session) => session.watch.next_within(timeout).await,
            None => NextFix::Ended,
        }
    }

    /// Process fixes until shutdown is signalled or the source ends, then stop.
    ///
    /// Events are forwarded to `events`; a closed receiver does not end the
    /// session.
    pub async fn run(
        &mut self,
        events: mpsc::Sender<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let fix = tokio::select! {
                fix = self.next_fix() => fix,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("sharing_shutdown_requested");
                        break;
                    }
                    continue;
                }
            };

            match fix {
                NextFix::Position(candidate) => {
                    for event in self.handle_position(candidate, Instant::now()).await {
                        let _ = events.send(event).await;
                    }
                }
                NextFix::TimedOut => {
                    warn!(
                        timeout_ms = %self.settings.position_timeout.as_millis(),
                        "position_timeout"
                    );
                }
                NextFix::Ended => {
                    info!("position_source_ended");
                    break;
                }
            }
        }

        self.stop();
    }

    /// Current own position, if any
    pub fn self_coordinate(&self) -> Option<Coordinate> {
        self.session.as_ref()?.self_position.map(|p| p.coordinate)
    }
}
