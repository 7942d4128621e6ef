//! Services - sharing logic and state management
//!
//! - `geodesy` - Great-circle distance
//! - `movement_gate` - Suppresses position updates below a distance threshold
//! - `analysis_throttle` - Rate limit for remote analysis calls
//! - `fallback` - Degraded-mode counterpart and summary
//! - `session` - Sync orchestrator and sharing session lifecycle
//! - `self_test` - Store connectivity check

pub mod analysis_throttle;
pub mod fallback;
pub mod geodesy;
pub mod movement_gate;
pub mod session;

// Re-export commonly used types
pub use analysis_throttle::AnalysisThrottle;
pub use geodesy::distance_meters;
pub use movement_gate::MovementGate;
pub use self_test::{run_self_test, SelfTestReport};
pub use session::{Orchestrator, SessionError, SessionSettings, SessionState, SharingSession};
