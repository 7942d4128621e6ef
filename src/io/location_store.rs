//! Remote location store client
//!
//! Wire contract:
//! - `POST /api/location` `{userId, lat, lng}` -> arbitrary JSON ack
//! - `GET /api/location/{id}` -> `{lat, lng, timestamp}` or `{}`
//! - `GET /api/locations` -> `{id: {lat, lng, timestamp}, ...}`

use crate::domain::types::Coordinate;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("location store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("location store returned status {0}")]
    Status(u16),

    #[error("invalid location store URL: {0}")]
    InvalidUrl(String),
}

/// Body of `POST /api/location`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
}

impl LocationUpdate {
    pub fn new(user_id: &str, coordinate: Coordinate) -> Self {
        Self {
            user_id: user_id.to_string(),
            lat: coordinate.latitude,
            lng: coordinate.longitude,
        }
    }
}

/// A stored entry; every field may be absent for unknown users
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    /// Unix seconds when the server stored the entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl StoredLocation {
    /// Coordinate if both fields are present and in range
    pub fn coordinate(&self) -> Option<Coordinate> {
        let c = Coordinate::new(self.lat?, self.lng?);
        c.is_valid().then_some(c)
    }
}

/// Remote key/value store of last-known coordinates per user
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Publish our coordinate; returns the store's ack payload
    async fn push_location(
        &self,
        user_id: &str,
        coordinate: Coordinate,
    ) -> Result<serde_json::Value, StoreError>;

    /// Most recent coordinate of `user_id`, `None` when the store has none
    async fn fetch_location(&self, user_id: &str) -> Result<Option<Coordinate>, StoreError>;

    /// Every entry the store holds
    async fn list_locations(&self) -> Result<BTreeMap<String, StoredLocation>, StoreError>;
}

/// HTTP implementation of [`LocationStore`]
pub struct HttpLocationStore {
    client: Client,
    base_url: Url,
}

impl HttpLocationStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url =
            Url::parse(base_url).map_err(|e| StoreError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(base_url.to_string()));
        }

        // Built once for connection pooling
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Join path segments onto the base URL, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl LocationStore for HttpLocationStore {
    async fn push_location(
        &self,
        user_id: &str,
        coordinate: Coordinate,
    ) -> Result<serde_json::Value, StoreError> {
        let url = self.endpoint(&["api", "location"])?;
        let response =
            self.client.post(url).json(&LocationUpdate::new(user_id, coordinate)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }

        let ack: serde_json::Value = response.json().await?;
        debug!(user_id = %user_id, ack = %ack, "location_push_ack");
        Ok(ack)
    }

    async fn fetch_location(&self, user_id: &str) -> Result<Option<Coordinate>, StoreError> {
        let url = self.endpoint(&["api", "location", user_id])?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }

        let stored: StoredLocation = response.json().await?;
        Ok(stored.coordinate())
    }

    async fn list_locations(&self) -> Result<BTreeMap<String, StoredLocation>, StoreError> {
        let url = self.endpoint(&["api", "locations"])?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }

        Ok(response.json().await?)
    }
}
