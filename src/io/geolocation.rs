//! Position sources - long-lived geolocation subscriptions
//!
//! A `PositionSource` hands out a `PositionWatch`, a channel of fixes fed by
//! a background task or reader thread. Dropping or cancelling the watch
//! stops delivery.
//!
//! Fix line formats accepted by the file and stdin sources:
//! - `39.9042,116.4074` (whitespace around the comma is ignored)
//! - `{"lat": 39.9042, "lng": 116.4074}`
//! - blank lines and lines starting with `#` are skipped

use crate::domain::types::Coordinate;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::{BufRead, ErrorKind};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const WATCH_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum GeolocationError {
    #[error("permission to read position denied: {0}")]
    PermissionDenied(String),

    #[error("position source unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for GeolocationError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::PermissionDenied => GeolocationError::PermissionDenied(e.to_string()),
            _ => GeolocationError::Unavailable(e.to_string()),
        }
    }
}

/// Result of waiting for the next fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NextFix {
    Position(Coordinate),
    /// No fix arrived within the timeout; the watch is still alive
    TimedOut,
    /// The source finished or was cancelled
    Ended,
}

/// Active subscription to a position source
pub struct PositionWatch {
    rx: mpsc::Receiver<Coordinate>,
    task: Option<JoinHandle<()>>,
}

impl PositionWatch {
    pub fn new(rx: mpsc::Receiver<Coordinate>, task: JoinHandle<()>) -> Self {
        Self { rx, task: Some(task) }
    }

    /// Watch fed directly by the sender side, with no producer task
    pub fn from_receiver(rx: mpsc::Receiver<Coordinate>) -> Self {
        Self { rx, task: None }
    }

    pub async fn next(&mut self) -> Option<Coordinate> {
        self.rx.recv().await
    }

    pub async fn next_within(&mut self, timeout: Duration) -> NextFix {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(c)) => NextFix::Position(c),
            Ok(None) => NextFix::Ended,
            Err(_) => NextFix::TimedOut,
        }
    }

    /// Stop the producer and refuse further fixes
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl Drop for PositionWatch {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Something that can be subscribed to for position fixes
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn watch(&self) -> Result<PositionWatch, GeolocationError>;
}

#[derive(Deserialize)]
struct JsonFix {
    lat: f64,
    lng: f64,
}

/// Parse one fix line; `None` for blank, comment or malformed lines
pub fn parse_fix(line: &str) -> Option<Coordinate> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let coordinate = if line.starts_with('{') {
        let fix: JsonFix = serde_json::from_str(line).ok()?;
        Coordinate::new(fix.lat, fix.lng)
    } else {
        let (lat, lng) = line.split_once(',')?;
        Coordinate::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?)
    };

    coordinate.is_valid().then_some(coordinate)
}

fn is_fix_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && !line.starts_with('#')
}

/// Replays a recorded track from a file, one fix per `interval`
pub struct ReplaySource {
    path: PathBuf,
    interval: Duration,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self { path: path.into(), interval }
    }
}

#[async_trait]
impl PositionSource for ReplaySource {
    async fn watch(&self) -> Result<PositionWatch, GeolocationError> {
        // Read up front so permission problems surface before sharing starts
        let content = tokio::fs::read_to_string(&self.path).await?;

        let mut fixes = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            match parse_fix(line) {
                Some(c) => fixes.push(c),
                None if is_fix_line(line) => {
                    warn!(path = %self.path.display(), line = lineno + 1, "replay_fix_malformed");
                }
                None => {}
            }
        }

        if fixes.is_empty() {
            return Err(GeolocationError::Unavailable(format!(
                "no fixes in {}",
                self.path.display()
            )));
        }

        info!(path = %self.path.display(), fixes = %fixes.len(), "replay_source_opened");

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        // interval() panics on a zero period
        let interval = self.interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for fix in fixes {
                ticker.tick().await;
                if tx.send(fix).await.is_err() {
                    break;
                }
            }
            debug!("replay_source_finished");
        });

        Ok(PositionWatch::new(rx, task))
    }
}

/// Reads fixes from standard input as they are typed or piped in
#[derive(Default)]
pub struct StdinSource;

#[async_trait]
impl PositionSource for StdinSource {
    async fn watch(&self) -> Result<PositionWatch, GeolocationError> {
        spawn_line_reader(std::io::BufReader::new(std::io::stdin()))
    }
}

/// Feed fixes from a blocking line reader on its own OS thread.
///
/// A blocked read cannot be interrupted, so the thread is detached rather
/// than owned by the runtime. Cancelling the watch closes the channel and
/// the thread exits at the next fix or at end of input.
fn spawn_line_reader<R>(reader: R) -> Result<PositionWatch, GeolocationError>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
    thread::Builder::new().name("fix-reader".to_string()).spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "stdin_read_error");
                    break;
                }
            };
            match parse_fix(&line) {
                Some(c) => {
                    if tx.blocking_send(c).is_err() {
                        break;
                    }
                }
                None if is_fix_line(&line) => warn!(line = %line, "stdin_fix_malformed"),
                None => {}
            }
        }
        debug!("stdin_source_finished");
    })?;

    Ok(PositionWatch::from_receiver(rx))
}
