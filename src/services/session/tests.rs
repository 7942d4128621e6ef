//! Tests for the sync orchestrator

use super::*;
use crate::domain::types::{Analysis, AnalysisSource, CounterpartSource};
use crate::io::analysis::{AnalysisError, AnalysisRequest};
use crate::io::location_store::{StoreError, StoredLocation};
use crate::services::fallback::{FAR_SUGGESTION, NEAR_SUGGESTION};
use crate::services::geodesy::distance_meters;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const BEIJING: Coordinate = Coordinate::new(39.9042, 116.4074);

/// Move `meters` due north along the meridian
fn north_of(c: Coordinate, meters: f64) -> Coordinate {
    let deg_per_m = 180.0 / (EARTH_RADIUS_M * std::f64::consts::PI);
    Coordinate::new(c.latitude + meters * deg_per_m, c.longitude)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// How the mock store answers counterpart queries
#[derive(Clone, Copy)]
enum FetchBehavior {
    /// Counterpart sits at a fixed offset (degrees of longitude) from our last push
    OffsetFromSelf(f64),
    /// Store knows nothing about the counterpart
    Empty,
    /// Fetch fails (push still succeeds)
    FailFetch,
    /// Push fails, so fetch is never attempted
    FailPush,
}

struct MockStore {
    behavior: FetchBehavior,
    pushes: Mutex<Vec<(String, Coordinate)>>,
    fetches: Mutex<Vec<String>>,
}

impl MockStore {
    fn new(behavior: FetchBehavior) -> Arc<Self> {
        Arc::new(Self { behavior, pushes: Mutex::new(Vec::new()), fetches: Mutex::new(Vec::new()) })
    }

    fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }
}

#[async_trait]
impl LocationStore for MockStore {
    async fn push_location(
        &self,
        user_id: &str,
        coordinate: Coordinate,
    ) -> Result<serde_json::Value, StoreError> {
        if let FetchBehavior::FailPush = self.behavior {
            return Err(StoreError::Status(503));
        }
        self.pushes.lock().push((user_id.to_string(), coordinate));
        Ok(serde_json::json!({"status": "success"}))
    }

    async fn fetch_location(&self, user_id: &str) -> Result<Option<Coordinate>, StoreError> {
        self.fetches.lock().push(user_id.to_string());
        match self.behavior {
            FetchBehavior::OffsetFromSelf(d_lng) => {
                let last = self.pushes.lock().last().map(|(_, c)| *c);
                Ok(last.map(|c| Coordinate::new(c.latitude, c.longitude + d_lng)))
            }
            FetchBehavior::Empty => Ok(None),
            FetchBehavior::FailFetch | FetchBehavior::FailPush => Err(StoreError::Status(500)),
        }
    }

    async fn list_locations(&self) -> Result<BTreeMap<String, StoredLocation>, StoreError> {
        Ok(BTreeMap::new())
    }
}

struct MockAnalysis {
    fail: bool,
    calls: AtomicUsize,
    last_request: Mutex<Option<AnalysisRequest>>,
}

impl MockAnalysis {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self { fail, calls: AtomicUsize::new(0), last_request: Mutex::new(None) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisService for MockAnalysis {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(*request);
        if self.fail {
            Err(AnalysisError::Status(502))
        } else {
            Ok(format!("<p>{:.2} m apart</p>", request.distance_m))
        }
    }
}

/// Source handing out a pre-built channel; can be told to deny permission
struct MockSource {
    deny: bool,
    watches: AtomicUsize,
    rx: Mutex<Option<mpsc::Receiver<Coordinate>>>,
}

impl MockSource {
    fn new() -> (mpsc::Sender<Coordinate>, Arc<Self>) {
        let (tx, rx) = mpsc::channel(16);
        (tx, Arc::new(Self { deny: false, watches: AtomicUsize::new(0), rx: Mutex::new(Some(rx)) }))
    }

    fn denied() -> Arc<Self> {
        Arc::new(Self { deny: true, watches: AtomicUsize::new(0), rx: Mutex::new(None) })
    }

    fn watch_count(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionSource for MockSource {
    async fn watch(&self) -> Result<PositionWatch, GeolocationError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(GeolocationError::PermissionDenied("user declined".to_string()));
        }
        match self.rx.lock().take() {
            Some(rx) => Ok(PositionWatch::from_receiver(rx)),
            None => Err(GeolocationError::Unavailable("already watched".to_string())),
        }
    }
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<MockStore>,
    analysis: Arc<MockAnalysis>,
    source: Arc<MockSource>,
    metrics: Arc<SessionMetrics>,
    fix_tx: mpsc::Sender<Coordinate>,
}

fn harness(behavior: FetchBehavior, analysis_fails: bool) -> Harness {
    let store = MockStore::new(behavior);
    let analysis = MockAnalysis::new(analysis_fails);
    let (fix_tx, source) = MockSource::new();
    let metrics = Arc::new(SessionMetrics::new());
    let orchestrator = Orchestrator::new(
        SessionSettings::default(),
        store.clone(),
        analysis.clone(),
        source.clone(),
        metrics.clone(),
    )
    .with_rng(StdRng::seed_from_u64(2024));
    Harness { orchestrator, store, analysis, source, metrics, fix_tx }
}

async fn started(behavior: FetchBehavior, analysis_fails: bool) -> Harness {
    let mut h = harness(behavior, analysis_fails);
    h.orchestrator.start("alice", "bob").await.unwrap();
    h
}

fn analyses(events: &[SessionEvent]) -> Vec<&Analysis> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::AnalysisReady(a) => Some(a),
            _ => None,
        })
        .collect()
}

fn counterpart_moves(events: &[SessionEvent]) -> Vec<(Coordinate, CounterpartSource)> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::CounterpartMoved { coordinate, source, .. } => Some((*coordinate, *source)),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Start / stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_requires_identifiers() {
    let mut h = harness(FetchBehavior::Empty, false);

    let err = h.orchestrator.start("", "bob").await.unwrap_err();
    assert!(matches!(err, SessionError::MissingIdentifier("user id")));

    let err = h.orchestrator.start("alice", "   ").await.unwrap_err();
    assert!(matches!(err, SessionError::MissingIdentifier("friend id")));

    // No partial side effects
    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert_eq!(h.source.watch_count(), 0);
}

#[tokio::test]
async fn test_start_permission_denied_stays_idle() {
    let store = MockStore::new(FetchBehavior::Empty);
    let mut orchestrator = Orchestrator::new(
        SessionSettings::default(),
        store.clone(),
        MockAnalysis::new(false),
        MockSource::denied(),
        Arc::new(SessionMetrics::new()),
    );

    let err = orchestrator.start("alice", "bob").await.unwrap_err();
    assert!(matches!(err, SessionError::Geolocation(GeolocationError::PermissionDenied(_))));
    assert_eq!(orchestrator.state(), SessionState::Idle);
    assert!(orchestrator.session().is_none());
}

#[tokio::test]
async fn test_second_start_rejected() {
    let mut h = started(FetchBehavior::Empty, false).await;
    let err = h.orchestrator.start("carol", "dave").await.unwrap_err();
    assert!(matches!(err, SessionError::AlreadySharing));
    assert_eq!(h.orchestrator.session().unwrap().user_id(), "alice");
    assert_eq!(h.source.watch_count(), 1);
}

#[tokio::test]
async fn test_start_trims_identifiers() {
    let mut h = harness(FetchBehavior::Empty, false);
    h.orchestrator.start("  alice ", " bob").await.unwrap();
    let session = h.orchestrator.session().unwrap();
    assert_eq!(session.user_id(), "alice");
    assert_eq!(session.friend_id(), "bob");
    assert_eq!(session.id().len(), 36);
}

#[tokio::test]
async fn test_stop_clears_session_state() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let t0 = Instant::now();
    h.orchestrator.handle_position(BEIJING, t0).await;
    assert!(h.orchestrator.session().unwrap().counterpart_position().is_some());

    assert!(h.orchestrator.stop());
    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert!(h.orchestrator.self_coordinate().is_none());
    assert!(!h.orchestrator.stop());

    // Subscription is cancelled
    assert!(h.fix_tx.send(BEIJING).await.is_err());
}

#[tokio::test]
async fn test_positions_ignored_while_idle() {
    let mut h = harness(FetchBehavior::OffsetFromSelf(0.01), false);
    let events = h.orchestrator.handle_position(BEIJING, Instant::now()).await;
    assert!(events.is_empty());
    assert_eq!(h.store.push_count(), 0);
    assert_eq!(h.metrics.report().samples_received, 0);
}

// ---------------------------------------------------------------------------
// Movement gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_position_pushed_and_rendered() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let events = h.orchestrator.handle_position(BEIJING, Instant::now()).await;

    assert_eq!(events[0], SessionEvent::SelfMoved { coordinate: BEIJING });
    assert_eq!(h.store.pushes.lock().as_slice(), &[("alice".to_string(), BEIJING)]);
    assert_eq!(h.store.fetches.lock().as_slice(), &["bob".to_string()]);

    let moves = counterpart_moves(&events);
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].1, CounterpartSource::Live);
    assert_eq!(h.orchestrator.session().unwrap().counterpart_source(), Some(CounterpartSource::Live));
}

#[tokio::test]
async fn test_small_move_produces_no_push() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let t0 = Instant::now();

    h.orchestrator.handle_position(BEIJING, t0).await;
    let events = h.orchestrator.handle_position(north_of(BEIJING, 5.0), t0 + millis(1000)).await;

    assert!(events.is_empty());
    assert_eq!(h.store.push_count(), 1);
    assert_eq!(h.store.fetch_count(), 1);
    assert_eq!(h.orchestrator.self_coordinate(), Some(BEIJING));
    assert_eq!(h.metrics.report().samples_suppressed, 1);
}

#[tokio::test]
async fn test_large_move_triggers_push() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let t0 = Instant::now();
    let moved = north_of(BEIJING, 150.0);

    h.orchestrator.handle_position(BEIJING, t0).await;
    let events = h.orchestrator.handle_position(moved, t0 + millis(1000)).await;

    assert_eq!(events[0], SessionEvent::SelfMoved { coordinate: moved });
    assert_eq!(h.store.push_count(), 2);
    assert_eq!(h.store.pushes.lock()[1].1, moved);
    assert_eq!(h.orchestrator.self_coordinate(), Some(moved));
}

#[tokio::test]
async fn test_invalid_fix_dropped() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let events =
        h.orchestrator.handle_position(Coordinate::new(f64::NAN, 10.0), Instant::now()).await;
    assert!(events.is_empty());
    assert_eq!(h.store.push_count(), 0);
    assert_eq!(h.metrics.report().samples_invalid, 1);
}

#[tokio::test]
async fn test_static_counterpart_suppressed_and_not_reanalyzed() {
    // Counterpart stays put while we move: its gate rejects, so no analysis
    struct FixedFriend;

    #[async_trait]
    impl LocationStore for FixedFriend {
        async fn push_location(
            &self,
            _: &str,
            _: Coordinate,
        ) -> Result<serde_json::Value, StoreError> {
            Ok(serde_json::json!({"status": "success"}))
        }
        async fn fetch_location(&self, _: &str) -> Result<Option<Coordinate>, StoreError> {
            Ok(Some(Coordinate::new(39.95, 116.45)))
        }
        async fn list_locations(&self) -> Result<BTreeMap<String, StoredLocation>, StoreError> {
            Ok(BTreeMap::new())
        }
    }

    let analysis = MockAnalysis::new(false);
    let (_tx, source) = MockSource::new();
    let metrics = Arc::new(SessionMetrics::new());
    let mut orchestrator = Orchestrator::new(
        SessionSettings { analysis_min_interval: Duration::ZERO, ..SessionSettings::default() },
        Arc::new(FixedFriend),
        analysis.clone(),
        source,
        metrics.clone(),
    );
    orchestrator.start("alice", "bob").await.unwrap();

    let t0 = Instant::now();
    let first = orchestrator.handle_position(BEIJING, t0).await;
    assert_eq!(counterpart_moves(&first).len(), 1);
    assert_eq!(analyses(&first).len(), 1);

    let second = orchestrator.handle_position(north_of(BEIJING, 500.0), t0 + millis(10)).await;
    assert_eq!(second.len(), 1);
    assert!(matches!(second[0], SessionEvent::SelfMoved { .. }));
    assert_eq!(analysis.calls(), 1);
    assert_eq!(metrics.report().counterpart_suppressed, 1);
}

#[tokio::test]
async fn test_counterpart_without_position_renders_nothing() {
    let mut h = started(FetchBehavior::Empty, false).await;
    let events = h.orchestrator.handle_position(BEIJING, Instant::now()).await;

    assert_eq!(events, vec![SessionEvent::SelfMoved { coordinate: BEIJING }]);
    assert!(h.orchestrator.session().unwrap().counterpart_position().is_none());
    assert_eq!(h.analysis.calls(), 0);
}

// ---------------------------------------------------------------------------
// Degraded mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fetch_failure_synthesizes_counterpart_and_fallback_summary() {
    let mut h = started(FetchBehavior::FailFetch, true).await;
    let events = h.orchestrator.handle_position(BEIJING, Instant::now()).await;

    let moves = counterpart_moves(&events);
    assert_eq!(moves.len(), 1);
    let (friend, source) = moves[0];
    assert_eq!(source, CounterpartSource::Synthesized);
    assert!((friend.latitude - BEIJING.latitude).abs() <= 0.005);
    assert!((friend.longitude - BEIJING.longitude).abs() <= 0.005);

    let found = analyses(&events);
    assert_eq!(found.len(), 1);
    let analysis = found[0];
    assert_eq!(analysis.source, AnalysisSource::Fallback);
    assert!((analysis.distance_m - distance_meters(BEIJING, friend)).abs() < 1e-9);
    assert!(analysis.text.contains(&format!("{:.2}", analysis.distance_m)));
    assert!(analysis.text.contains(NEAR_SUGGESTION) || analysis.text.contains(FAR_SUGGESTION));

    let summary = h.metrics.report();
    assert_eq!(summary.store_failures, 1);
    assert_eq!(summary.counterpart_synthesized, 1);
    assert_eq!(summary.analyses_fallback, 1);
}

#[tokio::test]
async fn test_push_failure_skips_fetch() {
    let mut h = started(FetchBehavior::FailPush, false).await;
    let events = h.orchestrator.handle_position(BEIJING, Instant::now()).await;

    assert_eq!(h.store.fetch_count(), 0);
    let moves = counterpart_moves(&events);
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].1, CounterpartSource::Synthesized);
    // Analysis service itself is healthy
    assert_eq!(analyses(&events)[0].source, AnalysisSource::Remote);
}

#[tokio::test]
async fn test_remote_analysis_used_verbatim() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let events = h.orchestrator.handle_position(BEIJING, Instant::now()).await;

    let analysis = analyses(&events)[0].clone();
    assert_eq!(analysis.source, AnalysisSource::Remote);
    assert_eq!(analysis.text, format!("<p>{:.2} m apart</p>", analysis.distance_m));

    let request = (*h.analysis.last_request.lock()).expect("analysis was requested");
    assert_eq!(request.user, BEIJING);
    assert_eq!(request.friend, Coordinate::new(BEIJING.latitude, BEIJING.longitude + 0.01));
}

// ---------------------------------------------------------------------------
// Analysis throttle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_analysis_throttled_within_interval() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let t0 = Instant::now();

    let events = h.orchestrator.handle_position(BEIJING, t0).await;
    assert_eq!(analyses(&events).len(), 1);
    assert_eq!(h.analysis.calls(), 1);

    // Both parties moved 150 m, but only 60 s passed
    let p1 = north_of(BEIJING, 150.0);
    let events = h.orchestrator.handle_position(p1, t0 + millis(60_000)).await;
    assert_eq!(counterpart_moves(&events).len(), 1);
    assert!(analyses(&events).is_empty());
    assert_eq!(h.analysis.calls(), 1);

    let p2 = north_of(BEIJING, 300.0);
    let events = h.orchestrator.handle_position(p2, t0 + millis(180_001)).await;
    assert_eq!(analyses(&events).len(), 1);
    assert_eq!(h.analysis.calls(), 2);
    assert_eq!(h.metrics.report().analyses_throttled, 1);
}

#[tokio::test]
async fn test_failed_analysis_still_restarts_interval() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), true).await;
    let t0 = Instant::now();

    let events = h.orchestrator.handle_position(BEIJING, t0).await;
    assert_eq!(analyses(&events)[0].source, AnalysisSource::Fallback);

    let events =
        h.orchestrator.handle_position(north_of(BEIJING, 150.0), t0 + millis(1_000)).await;
    assert!(analyses(&events).is_empty());
    assert_eq!(h.analysis.calls(), 1);
}

#[tokio::test]
async fn test_restart_resets_throttle() {
    let mut h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let t0 = Instant::now();
    h.orchestrator.handle_position(BEIJING, t0).await;
    assert_eq!(h.analysis.calls(), 1);
    h.orchestrator.stop();

    // Fresh subscription for the second session
    let (tx, rx) = mpsc::channel(4);
    *h.source.rx.lock() = Some(rx);
    h.orchestrator.start("alice", "bob").await.unwrap();
    assert!(h.orchestrator.session().unwrap().throttle().state().last_run_at.is_none());

    let events = h.orchestrator.handle_position(BEIJING, t0 + millis(10)).await;
    assert_eq!(analyses(&events).len(), 1);
    assert_eq!(h.analysis.calls(), 2);
    drop(tx);
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_forwards_events_and_stops_when_source_ends() {
    let h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    h.fix_tx.send(BEIJING).await.unwrap();
    h.fix_tx.send(north_of(BEIJING, 5.0)).await.unwrap();
    h.fix_tx.send(north_of(BEIJING, 200.0)).await.unwrap();
    let Harness { mut orchestrator, fix_tx, store, .. } = h;
    drop(fix_tx);

    orchestrator.run(event_tx, shutdown_rx).await;

    assert_eq!(orchestrator.state(), SessionState::Idle);
    assert_eq!(store.push_count(), 2);

    let mut self_moves = 0;
    while let Ok(event) = event_rx.try_recv() {
        if matches!(event, SessionEvent::SelfMoved { .. }) {
            self_moves += 1;
        }
    }
    assert_eq!(self_moves, 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let h = started(FetchBehavior::OffsetFromSelf(0.01), false).await;
    let (event_tx, _event_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let Harness { mut orchestrator, fix_tx, .. } = h;

    let handle = tokio::spawn(async move {
        orchestrator.run(event_tx, shutdown_rx).await;
        orchestrator
    });

    tokio::time::sleep(millis(20)).await;
    shutdown_tx.send(true).unwrap();

    let orchestrator = handle.await.unwrap();
    assert_eq!(orchestrator.state(), SessionState::Idle);
    assert!(fix_tx.send(BEIJING).await.is_err());
}
