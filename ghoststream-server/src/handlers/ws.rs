//! `subscribe_progress` (spec §6): a WebSocket per job-id, relaying the
//! transport-agnostic progress/status wire contract. Subscribers filter by
//! connecting to a specific job's socket rather than a shared firehose.
//!
//! Grounded on `ferrex-server/src/handlers/handle_websocket.rs`'s
//! split-socket, forwarding-task pattern.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use ghoststream_core::job::JobId;
use serde::Serialize;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireMessage {
    Progress {
        job_id: JobId,
        percent: f32,
        frame: Option<u64>,
        fps: Option<f32>,
        source_time: f64,
        speed_multiplier: Option<f32>,
    },
    Status {
        job_id: JobId,
        state: String,
    },
}

pub async fn subscribe_progress(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, job_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, job_id: JobId) {
    let mut subscription = state.jobs.broadcaster().subscribe(job_id);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            changed = subscription.progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let sample = subscription.progress.borrow().clone();
                let msg = WireMessage::Progress {
                    job_id,
                    percent: sample.percent,
                    frame: sample.frame,
                    fps: sample.fps,
                    source_time: sample.current_time_secs,
                    speed_multiplier: sample.speed,
                };
                if send_json(&mut sender, &msg).await.is_err() {
                    break;
                }
            }
            status = subscription.status.recv() => {
                match status {
                    Ok(job_state) => {
                        let terminal = job_state.is_terminal();
                        let msg = WireMessage::Status { job_id, state: job_state.label().to_string() };
                        if send_json(&mut sender, &msg).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

async fn send_json(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    msg: &WireMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}
