//! Infrastructure - configuration, metrics and logging
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free counters for client and store
//! - `logging` - tracing subscriber setup

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use metrics::{SessionMetrics, StoreMetrics};
