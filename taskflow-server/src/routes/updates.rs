//! Bidirectional task-update multiplex (WebSocket).
//!
//! One stream carries both client commands and server-pushed change events.
//! The transport is single-writer: a dedicated sender task owns the sink and
//! drains an mpsc channel that both the command loop and the subscription
//! arm feed. The session loop selects between the wire and a global
//! subscription; when the wire closes, the channel senders drop, the sender
//! task drains its outstanding replies and exits, and the subscription
//! deregisters on drop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use taskflow_core::GLOBAL_KEY;

use crate::metrics::{self, StreamGauge};
use crate::schemas::{TaskChangeEventView, TaskUpdateRequest, TaskUpdateResponse, TaskView};
use crate::state::AppState;

/// Outstanding replies buffered towards the sender task.
const SEND_BUFFER: usize = 10;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/updates", get(task_updates))
}

/// Upgrade to the bidirectional update stream.
pub async fn task_updates(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| updates_session(socket, state))
}

async fn updates_session(socket: WebSocket, state: Arc<AppState>) {
    let _gauge = StreamGauge::enter(&metrics::global().update_streams);
    info!("update stream opened");

    let (sink, mut wire) = socket.split();
    let (send_tx, send_rx) = mpsc::channel::<TaskUpdateResponse>(SEND_BUFFER);
    let sender = tokio::spawn(sender_loop(sink, send_rx));

    let mut subscription = state.service.bus().subscribe(GLOBAL_KEY);

    loop {
        tokio::select! {
            incoming = wire.next() => {
                match incoming {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "update stream read error");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_command(&state, text.as_str()).await;
                        if send_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    // Pings are answered by the transport; other frame kinds
                    // carry no commands.
                    Some(Ok(_)) => {}
                }
            }
            event = subscription.recv() => {
                match event {
                    None => break,
                    Some(event) => {
                        let pushed = TaskUpdateResponse::pushed(
                            TaskChangeEventView::from_event(&event),
                        );
                        if send_tx.send(pushed).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    // Closing the channel lets the sender flush what is queued, then exit.
    drop(send_tx);
    drop(subscription);
    let _ = sender.await;
    info!("update stream closed");
}

/// Single writer to the wire; the transport forbids concurrent sends.
async fn sender_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<TaskUpdateResponse>,
) {
    while let Some(reply) = send_rx.recv().await {
        let json = serde_json::to_string(&reply).unwrap_or_default();
        if sink.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Dispatch one command envelope; always produces exactly one reply.
async fn handle_command(state: &Arc<AppState>, text: &str) -> TaskUpdateResponse {
    let req: TaskUpdateRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            return TaskUpdateResponse::reply_err(String::new(), format!("invalid JSON: {e}"));
        }
    };

    match req.update_type.as_str() {
        "create" => match req.create {
            None => TaskUpdateResponse::reply_err(req.request_id, "missing create payload"),
            Some(create) => match state.service.create_task(create).await {
                Ok(task) => {
                    TaskUpdateResponse::reply_ok(req.request_id, TaskView::from_task(&task, false))
                }
                Err(e) => TaskUpdateResponse::reply_err(req.request_id, e.to_string()),
            },
        },
        "update" => match req.update {
            None => TaskUpdateResponse::reply_err(req.request_id, "missing update payload"),
            Some(update) => match state.service.update_task(update).await {
                Ok(task) => {
                    TaskUpdateResponse::reply_ok(req.request_id, TaskView::from_task(&task, false))
                }
                Err(e) => TaskUpdateResponse::reply_err(req.request_id, e.to_string()),
            },
        },
        _ => TaskUpdateResponse::reply_err(req.request_id, "unknown update type"),
    }
}
