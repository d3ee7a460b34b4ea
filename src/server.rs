use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::AlertBroadcaster;
use crate::core::pipeline::MonitoringService;
use crate::core::tx::RawTransaction;
use crate::core::{Transaction, ValidationError};
use crate::signals::RiskEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RiskEngine>,
    pub monitor: Arc<MonitoringService>,
    pub broadcaster: Arc<AlertBroadcaster>,
    pub heartbeat: Duration,
    pub idle_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/analyze", post(analyze))
        .route("/api/status", get(status))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP listening on http://{addr}");
        info!("  WebSocket: ws://{addr}/ws");
        info!("  Analyze:   POST http://{addr}/api/analyze");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.status())
}

/// Score one transaction synchronously. Undecodable bodies are rejected
/// with the same 400 as any other validation failure.
async fn analyze(State(state): State<AppState>, body: Bytes) -> Response {
    let result = match decode_body(&body) {
        Ok(tx) => state.engine.analyze(&tx).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(assessment) => Json(assessment).into_response(),
        Err(e) => {
            debug!("Rejected analysis request: {e}");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

fn decode_body(body: &[u8]) -> Result<Transaction, ValidationError> {
    let raw: RawTransaction =
        serde_json::from_slice(body).map_err(|e| ValidationError::InvalidBody(e.to_string()))?;
    raw.into_transaction()
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One subscriber connection: forwards broadcaster frames out, control
/// messages in, and pings on the heartbeat interval.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (sink, mut frames) = mpsc::unbounded_channel::<String>();
    let id = state.broadcaster.register(sink);

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + state.heartbeat,
        state.heartbeat,
    );

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Unregistered by the broadcaster (failed write or shutdown).
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if state.broadcaster.is_idle(id, state.idle_timeout) {
                    info!(subscriber = id, "Closing idle subscriber");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => state.broadcaster.handle_message(id, text.as_str()),
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => state.broadcaster.touch(id),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(Message::Binary(_))) => {}
            },
        }
    }

    state.broadcaster.unregister(id);
}
