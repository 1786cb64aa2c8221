// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Transport daemon for the Synapse exchange: the client wire-protocol
//! WebSocket, the `/observer` spectator stream, and the small System HTTP
//! surface (§6).
//!
//! The exchange itself never touches a socket (see `synapse-exchange`'s
//! [`Effect`](synapse_exchange::Effect) design); this crate is the only
//! place that does. Two [`axum::Router`]s are built because the client
//! protocol and the spectator surface bind to two different ports
//! (`SynapseConfig::port` and `SynapseConfig::spectator_port`) so an
//! operator can expose the observer/demo surface without opening the
//! agent-facing one.

pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use synapse_core::{AgentId, PROTOCOL_VERSION};
use synapse_error::{ErrorCode, SynapseError};
use synapse_exchange::{handle_client_message, system, Effect, Exchange, Recipient, SessionId};
use synapse_protocol::{ClientMessage, ObserverMessage, ServerMessage};
use synapse_telemetry::MetricsCollector;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use middleware::{request_id_middleware, CorsConfig, RequestLogger};

/// Shared application state handed to every route on both routers.
#[derive(Clone)]
pub struct DaemonState {
    /// The authoritative exchange aggregate.
    pub exchange: Arc<Exchange>,
    /// Job-lifecycle metrics, recorded as jobs settle.
    pub metrics: Arc<MetricsCollector>,
}

impl DaemonState {
    /// Build state wrapping an already-constructed exchange.
    #[must_use]
    pub fn new(exchange: Arc<Exchange>) -> Self {
        Self {
            exchange,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}

/// Build the client-facing router: the wire-protocol WebSocket plus a
/// health check. Bound to `SynapseConfig::port`.
#[must_use]
pub fn build_client_app(state: DaemonState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(client_ws_upgrade))
        .layer(axum::middleware::from_fn(RequestLogger::layer))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CorsConfig::default().to_cors_layer())
        .with_state(state)
}

/// Build the spectator router: the `/observer` WebSocket and the System
/// demo HTTP surface. Bound to `SynapseConfig::spectator_port`.
#[must_use]
pub fn build_spectator_app(state: DaemonState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/observer", get(observer_ws_upgrade))
        .route("/api/demo/timeout", post(demo_timeout))
        .layer(axum::middleware::from_fn(RequestLogger::layer))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(CorsConfig::default().to_cors_layer())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "protocolVersion": PROTOCOL_VERSION }))
}

// ---------------------------------------------------------------------------
// Client wire protocol (§4.1, §4.2, §6)
// ---------------------------------------------------------------------------

async fn client_ws_upgrade(ws: WebSocketUpgrade, State(state): State<DaemonState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_connection(socket, state))
}

/// Drive one client connection end to end: issue the auth challenge, route
/// inbound frames into [`handle_client_message`], and fan out effects
/// addressed to this session from the exchange's effect bus.
async fn client_connection(socket: WebSocket, state: DaemonState) {
    let (session_id, nonce) = state.exchange.open_session().await;
    let (mut sink, mut stream) = socket.split();

    let challenge = ServerMessage::Challenge {
        v: PROTOCOL_VERSION,
        nonce,
        server_time_ms: synapse_core::now_ms(),
    };
    if send_message(&mut sink, &challenge).await.is_err() {
        state.exchange.close_session(session_id).await;
        return;
    }

    let mut effects = state.exchange.subscribe_effects();
    let mut my_agent_id: Option<AgentId> = None;

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => handle_client_message(&state.exchange, session_id, message).await,
                            Err(err) => {
                                debug!(error = %err, "malformed client frame");
                                let code = SynapseError::new(ErrorCode::InvalidMessage);
                                state.exchange.publish_effect(Effect::to_session(
                                    session_id,
                                    ServerMessage::Error {
                                        v: PROTOCOL_VERSION,
                                        message: code.wire_message().to_string(),
                                    },
                                ));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(error = %err, "client socket error");
                        break;
                    }
                    _ => {}
                }
            }
            received = effects.recv() => {
                match received {
                    Ok(effect) => {
                        if !effect_is_for(&effect.to, session_id, &my_agent_id) {
                            continue;
                        }
                        if let ServerMessage::Authed { agent_id, .. } = &effect.message {
                            my_agent_id = Some(AgentId::from_raw(agent_id.clone()));
                        }
                        if send_message(&mut sink, &effect.message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.exchange.close_session(session_id).await;
}

fn effect_is_for(to: &Recipient, session_id: SessionId, agent_id: &Option<AgentId>) -> bool {
    match to {
        Recipient::Session(sid) => *sid == session_id,
        Recipient::Agent(aid) => agent_id.as_ref() == Some(aid),
        Recipient::Broadcast => true,
    }
}

async fn send_message(
    sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("ServerMessage always serializes");
    sink.send(Message::Text(text.into())).await
}

// ---------------------------------------------------------------------------
// Spectator stream (§4.7, §6)
// ---------------------------------------------------------------------------

async fn observer_ws_upgrade(ws: WebSocketUpgrade, State(state): State<DaemonState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observer_connection(socket, state))
}

/// Send the snapshot, then stream every subsequent tape event.
async fn observer_connection(socket: WebSocket, state: DaemonState) {
    let (mut sink, _stream) = socket.split();
    let snapshot = state.exchange.observer_snapshot().await;
    let envelope = ObserverMessage::Snapshot { data: snapshot };
    let Ok(text) = serde_json::to_string(&envelope) else {
        return;
    };
    if sink.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    let mut tape = state.exchange.subscribe_tape();
    loop {
        match tape.recv().await {
            Ok(event) => {
                let envelope = ObserverMessage::Event { data: event };
                let Ok(text) = serde_json::to_string(&envelope) else {
                    continue;
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// System HTTP surface (§6)
// ---------------------------------------------------------------------------

const DEMO_TIMEOUT_REQUESTER: &str = "agent_demo_requester";
const DEMO_TIMEOUT_WORKER: &str = "agent_demo_worker";
const DEMO_TIMEOUT_SECONDS: u64 = 1;
const DEMO_TIMEOUT_BUDGET: u64 = 20;

/// Seed a one-shot deadline-miss scenario (§8 scenario 3) and return the
/// seeded job's id. The deadline fires on its own after `DEMO_TIMEOUT_SECONDS`;
/// this handler only returns once the job is posted and awarded.
async fn demo_timeout(State(state): State<DaemonState>) -> impl IntoResponse {
    match seed_timeout_demo(&state).await {
        Ok(job_id) => Json(json!({ "ok": true, "jobId": job_id })),
        Err(err) => {
            warn!(code = %err.code, "demo timeout seed failed");
            Json(json!({ "ok": false, "error": err.wire_message() }))
        }
    }
}

async fn seed_timeout_demo(state: &DaemonState) -> Result<String, SynapseError> {
    let requester = AgentId::from_raw(DEMO_TIMEOUT_REQUESTER);
    let worker = AgentId::from_raw(DEMO_TIMEOUT_WORKER);
    system::ensure_account(&state.exchange, &requester).await?;
    system::ensure_account(&state.exchange, &worker).await?;

    let job = system::create_job(
        &state.exchange,
        requester,
        "Demo timeout job".to_string(),
        None,
        DEMO_TIMEOUT_BUDGET,
        None,
        Some(json!({ "timeoutSeconds": DEMO_TIMEOUT_SECONDS })),
    )
    .await?;

    system::award_job(&state.exchange, &job.id, worker).await?;
    Ok(job.id)
}

/// Run a periodic snapshot of job metrics into the tracing log. Intended to
/// be spawned once at startup; exits only when the collector is dropped.
pub async fn run_metrics_reporter(metrics: Arc<MetricsCollector>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if metrics.is_empty() {
            continue;
        }
        let summary = metrics.summary();
        tracing::info!(
            count = summary.count,
            mean_duration_ms = summary.mean_duration_ms,
            p99_duration_ms = summary.p99_duration_ms,
            failure_rate = summary.failure_rate,
            "job metrics summary"
        );
    }
}
