//! Progress channel over WebSocket.
//!
//! # Data Flow
//! ```text
//! EventBus ──broadcast──→ per-connection task ──text frames──→ client
//! client {"type":"status"} ──→ one status snapshot reply
//! ```
//!
//! # Design Decisions
//! - Each connection is just another broadcast subscriber
//! - A lagging client skips missed events instead of stalling publishers
//! - Unknown client messages are ignored

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::http::server::AppState;
use crate::orchestrator::{EventType, Orchestrator, ProgressEvent};

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut events = state.orchestrator.events().subscribe();
    let mut shutdown = state.shutdown.subscribe();
    let (mut sender, mut receiver) = socket.split();
    tracing::debug!("Progress subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Progress subscriber lagging, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let wants_status = serde_json::from_str::<ClientMessage>(text.as_str())
                    .map(|m| m.kind == "status")
                    .unwrap_or(false);
                if wants_status {
                    let snapshot = status_snapshot(&state.orchestrator);
                    if send_event(&mut sender, &snapshot).await.is_err() {
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::debug!("Progress subscriber disconnected");
}

async fn send_event<S>(sender: &mut S, event: &ProgressEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let payload = serde_json::to_string(event).map_err(|_| ())?;
    sender.send(Message::Text(payload.into())).await.map_err(|_| ())
}

/// The reply to a client status request.
pub fn status_snapshot(orchestrator: &Orchestrator) -> ProgressEvent {
    let report = orchestrator.current_health();
    ProgressEvent {
        event_type: EventType::Status,
        request_id: None,
        status: report.status.as_str().to_string(),
        payload: Some(json!({
            "agents": report.agents,
            "breakers": orchestrator.breakers().snapshots(),
        })),
    }
}
