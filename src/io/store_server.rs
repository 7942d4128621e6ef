//! Location store HTTP service
//!
//! Routes:
//! - `POST /api/location` - store `{userId, lat, lng}` with a server timestamp
//! - `GET /api/location/{id}` - stored entry, or `{}` when unknown
//! - `GET /api/locations` - every stored entry keyed by user id
//! - `POST /api/analysis` - forwards a chat-completion body upstream, adding
//!   the API key held by this process
//! - `GET /health`, `GET /metrics`
//!
//! Every response carries `Access-Control-Allow-Origin: *` and `OPTIONS` is
//! answered as a CORS preflight on any path.

use crate::domain::types::Coordinate;
use crate::infra::metrics::{StoreMetrics, StoreMetricsSummary};
use crate::io::location_store::{LocationUpdate, StoredLocation};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Upper bound on accepted request bodies
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const LOCATION_PREFIX: &str = "/api/location/";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Last-known position per user, in memory only
#[derive(Default)]
pub struct LocationRegistry {
    entries: RwLock<FxHashMap<String, StoredLocation>>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for `user_id`, stamping it with the current time
    pub fn upsert(&self, user_id: &str, coordinate: Coordinate) -> StoredLocation {
        let entry = StoredLocation {
            lat: Some(coordinate.latitude),
            lng: Some(coordinate.longitude),
            timestamp: Some(Utc::now().timestamp_millis() as f64 / 1000.0),
        };
        self.entries.write().insert(user_id.to_string(), entry.clone());
        entry
    }

    pub fn get(&self, user_id: &str) -> Option<StoredLocation> {
        self.entries.read().get(user_id).cloned()
    }

    /// Sorted copy of every entry
    pub fn snapshot(&self) -> BTreeMap<String, StoredLocation> {
        self.entries.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Result of forwarding one analysis request
#[derive(Debug)]
pub enum ProxyOutcome {
    /// No API key available to this process
    NotConfigured,
    /// Upstream answered; status and body are passed through untouched
    Relayed { status: u16, body: Bytes },
    /// Upstream could not be reached
    Failed(String),
}

/// Forwards analysis calls to the upstream chat-completion API.
///
/// The key never leaves this process; clients call the proxy without
/// credentials.
pub struct AnalysisProxy {
    client: reqwest::Client,
    upstream_url: String,
    api_key: Option<String>,
}

impl AnalysisProxy {
    pub fn new(
        upstream_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        Ok(Self { client, upstream_url: upstream_url.into(), api_key })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    pub async fn forward(&self, body: Bytes) -> ProxyOutcome {
        let Some(key) = self.api_key.as_deref() else {
            return ProxyOutcome::NotConfigured;
        };

        let result = self
            .client
            .post(&self.upstream_url)
            .bearer_auth(key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => return ProxyOutcome::Failed(e.to_string()),
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => ProxyOutcome::Relayed { status, body },
            Err(e) => ProxyOutcome::Failed(e.to_string()),
        }
    }
}

/// Shared state behind every connection
pub struct StoreState {
    pub registry: LocationRegistry,
    pub proxy: AnalysisProxy,
    pub metrics: Arc<StoreMetrics>,
}

impl StoreState {
    pub fn new(proxy: AnalysisProxy, metrics: Arc<StoreMetrics>) -> Self {
        Self { registry: LocationRegistry::new(), proxy, metrics }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {typ}");
    let _ = writeln!(output, "{name} {val}");
}

fn format_prometheus_metrics(summary: &StoreMetricsSummary, stored_users: usize) -> String {
    let mut output = String::with_capacity(1024);
    write_metric(
        &mut output,
        "location_store_updates_total",
        "Location updates accepted",
        "counter",
        summary.location_updates,
    );
    write_metric(
        &mut output,
        "location_store_queries_total",
        "Single-user location queries",
        "counter",
        summary.location_queries,
    );
    write_metric(
        &mut output,
        "location_store_listings_total",
        "Full location listings",
        "counter",
        summary.location_listings,
    );
    write_metric(
        &mut output,
        "location_store_bad_requests_total",
        "Requests rejected as malformed",
        "counter",
        summary.bad_requests,
    );
    write_metric(
        &mut output,
        "location_store_proxy_requests_total",
        "Analysis requests forwarded upstream",
        "counter",
        summary.proxy_requests,
    );
    write_metric(
        &mut output,
        "location_store_proxy_failures_total",
        "Analysis requests that could not be forwarded",
        "counter",
        summary.proxy_failures,
    );
    write_metric(
        &mut output,
        "location_store_users",
        "Users with a stored position",
        "gauge",
        stored_users as u64,
    );
    output
}

/// Decode `%XX` escapes in a path segment. `None` on malformed escapes or
/// non-UTF-8 results.
fn percent_decode(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            // from_str_radix alone would accept a sign such as "+1"
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(body.into()))
        .expect("static response should not fail")
}

fn json(status: StatusCode, value: &impl serde::Serialize) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => {
            error!(error = %e, "response_serialize_error");
            respond(StatusCode::INTERNAL_SERVER_ERROR, "application/json", r#"{"error":"internal"}"#)
        }
    }
}

fn json_error(status: StatusCode, code: &str) -> Response<Full<Bytes>> {
    json(status, &serde_json::json!({ "status": "error", "error": code }))
}

/// Read a body up to [`MAX_BODY_BYTES`]
async fn read_body<B>(body: B) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(json_error(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large"))
        }
        Err(e) => {
            debug!(error = %e, "request_body_error");
            Err(json_error(StatusCode::BAD_REQUEST, "unreadable_body"))
        }
    }
}

async fn post_location<B>(body: B, state: &StoreState) -> Response<Full<Bytes>>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let bytes = match read_body(body).await {
        Ok(b) => b,
        Err(resp) => {
            state.metrics.record_bad_request();
            return resp;
        }
    };

    let update: LocationUpdate = match serde_json::from_slice(&bytes) {
        Ok(u) => u,
        Err(e) => {
            state.metrics.record_bad_request();
            warn!(error = %e, "location_update_malformed");
            return json_error(StatusCode::BAD_REQUEST, "malformed_location_update");
        }
    };

    let user_id = update.user_id.trim();
    let coordinate = Coordinate::new(update.lat, update.lng);
    if user_id.is_empty() || !coordinate.is_valid() {
        state.metrics.record_bad_request();
        warn!(user_id = %user_id, position = %coordinate, "location_update_rejected");
        return json_error(StatusCode::BAD_REQUEST, "invalid_location_update");
    }

    state.registry.upsert(user_id, coordinate);
    state.metrics.record_location_update();
    debug!(user_id = %user_id, position = %coordinate, "location_updated");
    json(StatusCode::OK, &serde_json::json!({ "status": "success" }))
}

fn get_location(raw_id: &str, state: &StoreState) -> Response<Full<Bytes>> {
    let Some(user_id) = percent_decode(raw_id) else {
        state.metrics.record_bad_request();
        return json_error(StatusCode::BAD_REQUEST, "malformed_user_id");
    };
    state.metrics.record_location_query();
    let entry = state.registry.get(&user_id).unwrap_or_default();
    json(StatusCode::OK, &entry)
}

async fn proxy_analysis<B>(body: B, state: &StoreState) -> Response<Full<Bytes>>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let bytes = match read_body(body).await {
        Ok(b) => b,
        Err(resp) => {
            state.metrics.record_bad_request();
            return resp;
        }
    };

    state.metrics.record_proxy_request();
    match state.proxy.forward(bytes).await {
        ProxyOutcome::Relayed { status, body } => {
            debug!(status = %status, bytes = %body.len(), "analysis_relayed");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            respond(status, "application/json", body)
        }
        ProxyOutcome::NotConfigured => {
            state.metrics.record_proxy_failure();
            warn!(reason = "api key not configured", "analysis_proxy_failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "analysis_not_configured")
        }
        ProxyOutcome::Failed(e) => {
            state.metrics.record_proxy_failure();
            warn!(error = %e, upstream = %state.proxy.upstream_url(), "analysis_proxy_failure");
            json_error(StatusCode::BAD_GATEWAY, "upstream_unreachable")
        }
    }
}

/// Route one request
async fn handle_request<B>(
    req: Request<B>,
    state: Arc<StoreState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"),
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok"),
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&state.metrics.report(), state.registry.len());
            respond(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::POST, "/api/location") => post_location(req.into_body(), &state).await,
        (&Method::GET, "/api/locations") => {
            state.metrics.record_location_listing();
            json(StatusCode::OK, &state.registry.snapshot())
        }
        (&Method::GET, p) if p.len() > LOCATION_PREFIX.len() && p.starts_with(LOCATION_PREFIX) => {
            get_location(&p[LOCATION_PREFIX.len()..], &state)
        }
        (&Method::POST, "/api/analysis") => proxy_analysis(req.into_body(), &state).await,
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

/// Bound location store listener
pub struct StoreServer {
    listener: TcpListener,
    state: Arc<StoreState>,
}

impl StoreServer {
    pub async fn bind(addr: SocketAddr, state: StoreState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state: Arc::new(state) })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<StoreState> {
        self.state.clone()
    }

    /// Accept connections until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), BoxError> {
        let addr = self.listener.local_addr()?;
        info!(
            addr = %addr,
            analysis_proxy = %self.state.proxy.is_configured(),
            "store_server_started"
        );

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _peer)) => {
                            let io = TokioIo::new(stream);
                            let state = self.state.clone();

                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let state = state.clone();
                                    async move { handle_request(req, state).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    error!(error = %e, "store_server_http_error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "store_server_accept_error");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("store_server_shutdown");
                        return Ok(());
                    }
                }
            }
        }
    }
}
