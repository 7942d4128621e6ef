//! IO modules - external system interfaces
//!
//! - `location_store` - HTTP client for the shared location store
//! - `analysis` - HTTP client for the chat-completion analysis service
//! - `geolocation` - Position sources (replay file, stdin)
//! - `store_server` - Location store service with the analysis proxy

pub mod analysis;
pub mod geolocation;
pub mod location_store;
pub mod store_server;

// Re-export commonly used types
pub use analysis::{AnalysisService, HttpAnalysisClient};
pub use geolocation::{PositionSource, PositionWatch, ReplaySource, StdinSource};
pub use location_store::{HttpLocationStore, LocationStore};
pub use store_server::{AnalysisProxy, StoreServer, StoreState};
