//! Per-observation sync chain for the orchestrator
//!
//! Every remote failure here is recovered locally: the store falls back to
//! a synthesized counterpart, the analysis service to a templated summary.

use super::Orchestrator;
use crate::domain::events::SessionEvent;
use crate::domain::types::{Analysis, AnalysisSource, Coordinate, CounterpartSource, ViewBounds};
use crate::io::analysis::AnalysisRequest;
use crate::services::fallback::{fallback_summary, synthesize_counterpart};
use crate::services::geodesy::distance_meters_with_radius;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of talking to the location store for one accepted own position
enum CounterpartFix {
    Known(Coordinate, CounterpartSource),
    /// Store answered but holds no position for the counterpart yet
    Unknown,
}

impl Orchestrator {
    /// Handle one raw position observation.
    ///
    /// Returns the renderer events it produced; empty when idle, when the
    /// fix is invalid, or when the movement gate suppressed it.
    pub async fn handle_position(
        &mut self,
        candidate: Coordinate,
        now: Instant,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        let Some(session) = self.session.as_mut() else {
            debug!(position = %candidate, "position_ignored_idle");
            return events;
        };

        self.metrics.record_sample();

        if !candidate.is_valid() {
            self.metrics.record_sample_invalid();
            warn!(position = %candidate, "position_invalid");
            return events;
        }

        if !self.gate.offer(&mut session.self_position, candidate, now) {
            self.metrics.record_sample_suppressed();
            debug!(position = %candidate, "position_suppressed");
            return events;
        }
        events.push(SessionEvent::SelfMoved { coordinate: candidate });

        let user_id = session.user_id.clone();
        let friend_id = session.friend_id.clone();

        let (counterpart, source) = match self.fetch_counterpart(&user_id, &friend_id, candidate).await
        {
            CounterpartFix::Known(c, source) => (c, source),
            CounterpartFix::Unknown => {
                debug!(friend_id = %friend_id, "counterpart_unknown");
                return events;
            }
        };

        // Session is re-borrowed after the awaits above
        let Some(session) = self.session.as_mut() else {
            return events;
        };

        if !self.gate.offer(&mut session.counterpart_position, counterpart, now) {
            self.metrics.record_counterpart_suppressed();
            debug!(friend_id = %friend_id, position = %counterpart, "counterpart_suppressed");
            return events;
        }
        session.counterpart_source = Some(source);
        match source {
            CounterpartSource::Live => self.metrics.record_counterpart_live(),
            CounterpartSource::Synthesized => self.metrics.record_counterpart_synthesized(),
        }

        events.push(SessionEvent::CounterpartMoved {
            coordinate: counterpart,
            source,
            bounds: ViewBounds::enclosing(candidate, counterpart),
        });

        if let Some(analysis) = self.maybe_analyze(now).await {
            events.push(SessionEvent::AnalysisReady(analysis));
        }

        events
    }

    /// Push our position, then fetch the counterpart's.
    ///
    /// A failed push skips the fetch; either failure degrades to a
    /// coordinate jittered around `origin`.
    async fn fetch_counterpart(
        &mut self,
        user_id: &str,
        friend_id: &str,
        origin: Coordinate,
    ) -> CounterpartFix {
        let result = match self.store.push_location(user_id, origin).await {
            Ok(_) => {
                self.metrics.record_push();
                debug!(user_id = %user_id, position = %origin, "location_pushed");
                self.store.fetch_location(friend_id).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(Some(c)) => CounterpartFix::Known(c, CounterpartSource::Live),
            Ok(None) => CounterpartFix::Unknown,
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(user_id = %user_id, friend_id = %friend_id, error = %e, "location_store_failure");

                let synthesized =
                    synthesize_counterpart(origin, self.settings.fallback_jitter_deg, &mut self.rng);
                warn!(friend_id = %friend_id, position = %synthesized, "counterpart_synthesized");
                CounterpartFix::Known(synthesized, CounterpartSource::Synthesized)
            }
        }
    }

    /// Run an analysis if both positions are known and the throttle allows.
    ///
    /// The throttle window restarts before the call is made, so failures
    /// count as attempts.
    async fn maybe_analyze(&mut self, now: Instant) -> Option<Analysis> {
        let session = self.session.as_mut()?;
        let user = session.self_position?.coordinate;
        let friend = session.counterpart_position?.coordinate;

        if !session.throttle.try_acquire(now) {
            self.metrics.record_analysis_throttled();
            debug!(session_id = %session.id, "analysis_throttled");
            return None;
        }

        let distance_m = distance_meters_with_radius(user, friend, self.settings.earth_radius_m);
        let request = AnalysisRequest { user, friend, distance_m };

        let analysis = match self.analysis.analyze(&request).await {
            Ok(text) => {
                self.metrics.record_analysis_remote();
                info!(distance_m = %format!("{distance_m:.2}"), "analysis_received");
                Analysis { text, source: AnalysisSource::Remote, distance_m }
            }
            Err(e) => {
                self.metrics.record_analysis_fallback();
                warn!(error = %e, distance_m = %format!("{distance_m:.2}"), "analysis_service_failure");
                Analysis {
                    text: fallback_summary(distance_m, self.settings.near_threshold_m),
                    source: AnalysisSource::Fallback,
                    distance_m,
                }
            }
        };

        Some(analysis)
    }
}
