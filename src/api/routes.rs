//! API route definitions.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderMap},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::state::AppState;
use super::ApiError;
use crate::dns::LookupResult;
use crate::probes::{
    EventSink, Family, ProbeEvent, ProbeOptions, ProbeRequest, SessionOutcome, SinkClosed,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/dns", get(dns_lookup))
        .route("/ping", get(ping))
        .route("/settings", get(settings))
        .route("/settings/dns/add", post(add_dns_server))
        .route("/settings/dns/remove", post(remove_dns_server))
        .route("/settings/ping/add", post(add_ping_target))
        .route("/settings/ping/remove", post(remove_ping_target))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DnsQuery {
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    record_type: Option<String>,
    server: Option<String>,
}

async fn dns_lookup(
    State(state): State<AppState>,
    query: Result<Query<DnsQuery>, QueryRejection>,
) -> Result<Json<LookupResult>, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let record_type = q.record_type.as_deref().unwrap_or("A");
    let result = state
        .resolver
        .resolve(&q.name, record_type, q.server.as_deref())
        .await?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// Ping
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PingQuery {
    #[serde(default)]
    target: String,
    family: Option<String>,
    count: Option<u32>,
    size: Option<u32>,
    interval: Option<f64>,
    ttl: Option<u8>,
    df: Option<String>,
}

impl PingQuery {
    fn into_request(self) -> Result<ProbeRequest, ApiError> {
        let family: Family = self.family.as_deref().unwrap_or("auto").parse()?;
        let no_fragment = match self.df.as_deref() {
            None => false,
            Some(v) => parse_flag(v)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid df value {:?}", v)))?,
        };
        Ok(ProbeRequest {
            target: self.target.trim().to_string(),
            family,
            options: ProbeOptions {
                count: self.count,
                size: self.size,
                interval: self.interval,
                ttl: self.ttl,
                no_fragment,
            },
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "" | "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Whether the client will take `text/event-stream`. No `Accept` header
/// means anything goes.
fn accepts_event_stream(headers: &HeaderMap) -> bool {
    let values: Vec<&str> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        return true;
    }
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|item| item.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .any(|mime| matches!(mime.as_str(), "text/event-stream" | "text/*" | "*/*"))
}

/// Channel into the SSE body, tagged with whether the client can stream.
struct SseSink {
    tx: mpsc::Sender<ProbeEvent>,
    streaming: bool,
}

#[async_trait::async_trait]
impl EventSink for SseSink {
    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn send(&mut self, event: ProbeEvent) -> Result<(), SinkClosed> {
        EventSink::send(&mut self.tx, event).await
    }

    async fn closed(&mut self) {
        EventSink::closed(&mut self.tx).await
    }
}

async fn ping(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<PingQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request = q.into_request()?;

    // Capacity 1: an event is handed to the body before the next line is read.
    let (tx, rx) = mpsc::channel::<ProbeEvent>(1);
    let mut sink = SseSink {
        tx,
        streaming: accepts_event_stream(&headers),
    };

    let session = state
        .launcher
        .open(&request, state.lookup.as_ref(), &sink)
        .await?;
    let session_id = session.id();

    tokio::spawn(async move {
        match session.run(&mut sink).await {
            SessionOutcome::Completed(summary) => {
                tracing::debug!(session = %session_id, sent = summary.sent, "ping stream complete")
            }
            SessionOutcome::Disconnected => {
                tracing::debug!(session = %session_id, "ping client went away")
            }
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .map(sse_event);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: ProbeEvent) -> Result<Event, axum::Error> {
    let sse = Event::default().event(event.name());
    match &event {
        ProbeEvent::Reply(reply) => sse.json_data(reply),
        ProbeEvent::Summary(summary) => sse.json_data(summary),
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SettingsView {
    dns_servers: Vec<String>,
    ping_targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ServerBody {
    #[serde(default)]
    server: String,
}

#[derive(Debug, Deserialize)]
struct TargetBody {
    #[serde(default)]
    target: String,
}

async fn settings_view(state: &AppState) -> Json<SettingsView> {
    Json(SettingsView {
        dns_servers: state.settings.dns_servers().await,
        ping_targets: state.settings.ping_targets().await,
    })
}

async fn settings(State(state): State<AppState>) -> Json<SettingsView> {
    settings_view(&state).await
}

async fn add_dns_server(
    State(state): State<AppState>,
    body: Result<Json<ServerBody>, JsonRejection>,
) -> Result<Json<SettingsView>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.settings.add_dns_server(&body.server).await?;
    Ok(settings_view(&state).await)
}

async fn remove_dns_server(
    State(state): State<AppState>,
    body: Result<Json<ServerBody>, JsonRejection>,
) -> Result<Json<SettingsView>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.settings.remove_dns_server(&body.server).await?;
    Ok(settings_view(&state).await)
}

async fn add_ping_target(
    State(state): State<AppState>,
    body: Result<Json<TargetBody>, JsonRejection>,
) -> Result<Json<SettingsView>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.settings.add_ping_target(&body.target).await?;
    Ok(settings_view(&state).await)
}

async fn remove_ping_target(
    State(state): State<AppState>,
    body: Result<Json<TargetBody>, JsonRejection>,
) -> Result<Json<SettingsView>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.settings.remove_ping_target(&body.target).await?;
    Ok(settings_view(&state).await)
}

