use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::api::{ApiError, SharedState};
use crate::broadcast::{JobEvent, Subscription};
use crate::orchestrator::{JobSnapshot, JobStatus, ScanOrchestrator};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Stream message types ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Output {
        line: String,
        timestamp: DateTime<Utc>,
    },
    Progress {
        snapshot: JobSnapshot,
        timestamp: DateTime<Utc>,
    },
    Complete {
        snapshot: JobSnapshot,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl StreamMessage {
    pub fn from_event(event: JobEvent) -> Self {
        let timestamp = Utc::now();
        match event {
            JobEvent::Output(line) => StreamMessage::Output { line, timestamp },
            JobEvent::Progress(snapshot) => StreamMessage::Progress { snapshot, timestamp },
            JobEvent::Complete(snapshot) => StreamMessage::Complete { snapshot, timestamp },
            JobEvent::Error(message) => StreamMessage::Error { message, timestamp },
        }
    }

    /// Final message for an observer whose stream ended without a terminal
    /// event, i.e. one that attached after the job finished.
    pub fn closing(snapshot: JobSnapshot) -> Self {
        let timestamp = Utc::now();
        match (snapshot.status, snapshot.error.clone()) {
            (JobStatus::Failed, Some(message)) => StreamMessage::Error { message, timestamp },
            _ => StreamMessage::Complete { snapshot, timestamp },
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StreamMessage::Complete { .. } | StreamMessage::Error { .. })
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

/// Unknown jobs get a JSON 404 even when the request is not an upgrade.
pub async fn stream_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(job) = state.registry.get(&id) else {
        return ApiError::job_not_found(&id, &state).into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    // Subscribe before the upgrade completes so nothing is missed.
    let subscription = job.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, job, subscription))
}

async fn handle_socket(socket: WebSocket, job: Arc<ScanOrchestrator>, subscription: Subscription) {
    let (sender, receiver) = socket.split();
    debug!(
        job_id = %job.job_id(),
        observers = job.broadcast().observer_count(),
        "stream observer attached"
    );
    run_socket_loop(sender, receiver, subscription, &job).await;
    debug!(job_id = %job.job_id(), "stream observer detached");
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &StreamMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to serialize stream message");
            true
        }
    }
}

/// Forward job events to the socket with ping/pong keepalive. Ends after
/// the final message, on client close, or when no Pong arrives within
/// [`PONG_TIMEOUT`].
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
    job: &ScanOrchestrator,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = subscription.next() => {
                let msg = match event {
                    Some(event) => StreamMessage::from_event(event),
                    None => StreamMessage::closing(job.snapshot()),
                };
                if !send_message(&mut sender, &msg).await || msg.is_final() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
