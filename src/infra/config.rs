//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line flag
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub friend_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_movement_threshold_m")]
    pub movement_threshold_m: f64,
    #[serde(default = "default_earth_radius_m")]
    pub earth_radius_m: f64,
    /// Longest wait for a fix before `position_timeout` is logged
    #[serde(default = "default_position_timeout_ms")]
    pub position_timeout_ms: u64,
    /// Full width of the degraded-mode jitter window
    #[serde(default = "default_fallback_jitter_deg")]
    pub fallback_jitter_deg: f64,
    #[serde(default = "default_near_threshold_m")]
    pub near_threshold_m: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            movement_threshold_m: default_movement_threshold_m(),
            earth_radius_m: default_earth_radius_m(),
            position_timeout_ms: default_position_timeout_ms(),
            fallback_jitter_deg: default_fallback_jitter_deg(),
            near_threshold_m: default_near_threshold_m(),
        }
    }
}

fn default_movement_threshold_m() -> f64 {
    100.0
}

fn default_earth_radius_m() -> f64 {
    6_371_000.0
}

fn default_position_timeout_ms() -> u64 {
    5000
}

fn default_fallback_jitter_deg() -> f64 {
    0.01
}

fn default_near_threshold_m() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Track file to replay; stdin is read when absent
    #[serde(default)]
    pub replay_file: Option<String>,
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { replay_file: None, replay_interval_ms: default_replay_interval_ms() }
    }
}

fn default_replay_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { base_url: default_store_base_url(), timeout_ms: default_store_timeout_ms() }
    }
}

fn default_store_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Analysis proxy endpoint (chat-completion compatible)
    #[serde(default = "default_analysis_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_analysis_model")]
    pub model: String,
    #[serde(default = "default_analysis_temperature")]
    pub temperature: f32,
    #[serde(default = "default_analysis_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_analysis_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: default_analysis_endpoint(),
            model: default_analysis_model(),
            temperature: default_analysis_temperature(),
            min_interval_ms: default_analysis_min_interval_ms(),
            timeout_ms: default_analysis_timeout_ms(),
        }
    }
}

fn default_analysis_endpoint() -> String {
    "http://localhost:8000/api/analysis".to_string()
}

fn default_analysis_model() -> String {
    "deepseek-chat".to_string()
}

fn default_analysis_temperature() -> f32 {
    0.7
}

fn default_analysis_min_interval_ms() -> u64 {
    180_000
}

fn default_analysis_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Upstream chat-completion URL the analysis proxy forwards to
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Name of the environment variable holding the upstream API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_server_bind_address(),
            port: default_server_port(),
            upstream_url: default_upstream_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_server_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_upstream_url() -> String {
    "https://api.deepseek.com/v1/chat/completions".to_string()
}

fn default_api_key_env() -> String {
    "ANALYSIS_API_KEY".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    user_id: Option<String>,
    friend_id: Option<String>,
    movement_threshold_m: f64,
    earth_radius_m: f64,
    position_timeout_ms: u64,
    fallback_jitter_deg: f64,
    near_threshold_m: f64,
    replay_file: Option<String>,
    replay_interval_ms: u64,
    store_base_url: String,
    store_timeout_ms: u64,
    analysis_endpoint: String,
    analysis_model: String,
    analysis_temperature: f32,
    analysis_min_interval_ms: u64,
    analysis_timeout_ms: u64,
    server_bind_address: String,
    server_port: u16,
    upstream_url: String,
    api_key_env: String,
    metrics_interval_secs: u64,
    config_file: String,
}

/// Zero durations would spin the fix loop or panic the replay ticker
fn non_zero_ms(key: &str, value: u64, default: u64) -> u64 {
    if value == 0 {
        eprintln!("Warning: {key} must be greater than 0. Using {default}.");
        default
    } else {
        value
    }
}

fn non_negative(key: &str, value: f64, default: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        eprintln!("Warning: {key} = {value} is not a finite non-negative number. Using {default}.");
        default
    }
}

fn positive(key: &str, value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        eprintln!("Warning: {key} = {value} is not a finite positive number. Using {default}.");
        default
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { session, tracking, source, store, analysis, server, metrics } =
            toml_config;

        Self {
            user_id: session.user_id.filter(|s| !s.trim().is_empty()),
            friend_id: session.friend_id.filter(|s| !s.trim().is_empty()),
            movement_threshold_m: non_negative(
                "tracking.movement_threshold_m",
                tracking.movement_threshold_m,
                default_movement_threshold_m(),
            ),
            earth_radius_m: positive(
                "tracking.earth_radius_m",
                tracking.earth_radius_m,
                default_earth_radius_m(),
            ),
            position_timeout_ms: non_zero_ms(
                "tracking.position_timeout_ms",
                tracking.position_timeout_ms,
                default_position_timeout_ms(),
            ),
            fallback_jitter_deg: non_negative(
                "tracking.fallback_jitter_deg",
                tracking.fallback_jitter_deg,
                default_fallback_jitter_deg(),
            ),
            near_threshold_m: non_negative(
                "tracking.near_threshold_m",
                tracking.near_threshold_m,
                default_near_threshold_m(),
            ),
            replay_file: source.replay_file,
            replay_interval_ms: non_zero_ms(
                "source.replay_interval_ms",
                source.replay_interval_ms,
                default_replay_interval_ms(),
            ),
            store_base_url: store.base_url,
            store_timeout_ms: non_zero_ms(
                "store.timeout_ms",
                store.timeout_ms,
                default_store_timeout_ms(),
            ),
            analysis_endpoint: analysis.endpoint,
            analysis_model: analysis.model,
            analysis_temperature: analysis.temperature,
            analysis_min_interval_ms: analysis.min_interval_ms,
            analysis_timeout_ms: non_zero_ms(
                "analysis.timeout_ms",
                analysis.timeout_ms,
                default_analysis_timeout_ms(),
            ),
            server_bind_address: server.bind_address,
            server_port: server.port,
            upstream_url: server.upstream_url,
            api_key_env: server.api_key_env,
            metrics_interval_secs: metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path from the CLI flag or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn friend_id(&self) -> Option<&str> {
        self.friend_id.as_deref()
    }

    pub fn movement_threshold_m(&self) -> f64 {
        self.movement_threshold_m
    }

    pub fn earth_radius_m(&self) -> f64 {
        self.earth_radius_m
    }

    pub fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }

    pub fn fallback_jitter_deg(&self) -> f64 {
        self.fallback_jitter_deg
    }

    pub fn near_threshold_m(&self) -> f64 {
        self.near_threshold_m
    }

    pub fn replay_file(&self) -> Option<&str> {
        self.replay_file.as_deref()
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }

    pub fn store_base_url(&self) -> &str {
        &self.store_base_url
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn analysis_endpoint(&self) -> &str {
        &self.analysis_endpoint
    }

    pub fn analysis_model(&self) -> &str {
        &self.analysis_model
    }

    pub fn analysis_temperature(&self) -> f32 {
        self.analysis_temperature
    }

    pub fn analysis_min_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_min_interval_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn server_bind_address(&self) -> &str {
        &self.server_bind_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    pub fn api_key_env(&self) -> &str {
        &self.api_key_env
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the analysis interval
    #[cfg(test)]
    pub fn with_analysis_min_interval_ms(mut self, ms: u64) -> Self {
        self.analysis_min_interval_ms = ms;
        self
    }
}
