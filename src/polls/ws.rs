//! Poll Dashboard WebSocket
//! Mission: Push live poll results to every socket subscribed to a subject
//!
//! Client frames: `subscribe {subjectId | shortCode}`, `unsubscribe {subjectId}`, `ping`.
//! Server frames: `results {data}`, `subscribed`, `unsubscribed`, `error {message}`, `pong`.

use crate::app::AppState;
use crate::polls::models::PollResults;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Subscriptions one socket may hold at once.
const MAX_SUBSCRIPTIONS: usize = 32;
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe {
        #[serde(rename = "subjectId")]
        subject_id: Option<String>,
        #[serde(rename = "shortCode")]
        short_code: Option<String>,
    },
    Unsubscribe {
        #[serde(rename = "subjectId")]
        subject_id: String,
    },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Results {
        data: PollResults,
    },
    Subscribed {
        #[serde(rename = "subjectId")]
        subject_id: String,
    },
    Unsubscribed {
        #[serde(rename = "subjectId")]
        subject_id: String,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ServerFrame {
    fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    fn to_message(&self) -> Message {
        let text = serde_json::to_string(self).unwrap_or_else(|e| {
            warn!("Failed to serialize ws frame: {}", e);
            r#"{"type":"error","message":"serialization failed"}"#.to_string()
        });
        Message::Text(text)
    }
}

/// GET /ws/polls
pub async fn poll_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (out_tx, mut out_rx) = mpsc::channel::<PollResults>(OUTBOUND_BUFFER);
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            Some(results) = out_rx.recv() => {
                if socket.send(ServerFrame::Results { data: results }.to_message()).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else {
                    break;
                };
                let replies = match msg {
                    Message::Text(text) => {
                        handle_frame(&text, &state, &out_tx, &mut subscriptions)
                    }
                    Message::Close(_) => break,
                    _ => Vec::new(),
                };
                for frame in replies {
                    if socket.send(frame.to_message()).await.is_err() {
                        abort_all(&mut subscriptions);
                        return;
                    }
                }
            }
        }
    }

    abort_all(&mut subscriptions);
    debug!("Poll socket closed");
}

fn handle_frame(
    text: &str,
    state: &AppState,
    out_tx: &mpsc::Sender<PollResults>,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
) -> Vec<ServerFrame> {
    // Plain-text keepalive from older dashboards
    if text.trim() == "ping" {
        return vec![ServerFrame::Pong];
    }
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => return vec![ServerFrame::error(format!("Invalid frame: {}", e))],
    };

    match frame {
        ClientFrame::Ping => vec![ServerFrame::Pong],
        ClientFrame::Unsubscribe { subject_id } => {
            if let Some(task) = subscriptions.remove(&subject_id) {
                task.abort();
            }
            vec![ServerFrame::Unsubscribed { subject_id }]
        }
        ClientFrame::Subscribe {
            subject_id,
            short_code,
        } => {
            let resolved = match (subject_id, short_code) {
                (Some(id), _) => Ok(Some(id)),
                (None, Some(code)) => state.polls.resolve_code(&code),
                (None, None) => {
                    return vec![ServerFrame::error("subscribe needs subjectId or shortCode")]
                }
            };
            let subject_id = match resolved {
                Ok(Some(id)) => id,
                Ok(None) => return vec![ServerFrame::error("Poll not found")],
                Err(e) => {
                    warn!("Poll lookup failed: {:#}", e);
                    return vec![ServerFrame::error("Poll lookup failed")];
                }
            };

            if !subscriptions.contains_key(&subject_id) && subscriptions.len() >= MAX_SUBSCRIPTIONS {
                return vec![ServerFrame::error("Too many subscriptions")];
            }

            // Subscribe before reading the snapshot so no update falls in between
            let rx = state.hub.subscribe(&subject_id);
            let snapshot = match state.polls.results(&subject_id) {
                Ok(Some(results)) => results,
                Ok(None) => return vec![ServerFrame::error("Poll not found")],
                Err(e) => {
                    warn!("Poll snapshot failed: {:#}", e);
                    return vec![ServerFrame::error("Poll lookup failed")];
                }
            };

            if !subscriptions.contains_key(&subject_id) {
                let task = tokio::spawn(forward(rx, out_tx.clone()));
                subscriptions.insert(subject_id.clone(), task);
            }
            vec![
                ServerFrame::Subscribed { subject_id },
                ServerFrame::Results { data: snapshot },
            ]
        }
    }
}

/// Relay one subject's broadcasts into the socket's outbound queue.
async fn forward(mut rx: broadcast::Receiver<PollResults>, out_tx: mpsc::Sender<PollResults>) {
    loop {
        let results = match rx.recv().await {
            Ok(results) => results,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Poll subscriber lagged, skipping to newest");
                let mut latest = None;
                loop {
                    match rx.try_recv() {
                        Ok(results) => latest = Some(results),
                        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                match latest {
                    Some(results) => results,
                    None => continue,
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if out_tx.send(results).await.is_err() {
            break;
        }
    }
}

fn abort_all(subscriptions: &mut HashMap<String, JoinHandle<()>>) {
    for (_, task) in subscriptions.drain() {
        task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe","shortCode":"abc234"}"#).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Subscribe { subject_id: None, short_code: Some(ref c) } if c == "abc234"
        ));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"unsubscribe","subjectId":"p1"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Unsubscribe { ref subject_id } if subject_id == "p1"));

        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#).unwrap(),
            ClientFrame::Ping
        ));
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_server_frames_serialize() {
        assert_eq!(
            serde_json::to_value(ServerFrame::Pong).unwrap(),
            serde_json::json!({"type": "pong"})
        );
        assert_eq!(
            serde_json::to_value(ServerFrame::Subscribed {
                subject_id: "p1".to_string()
            })
            .unwrap(),
            serde_json::json!({"type": "subscribed", "subjectId": "p1"})
        );
        assert_eq!(
            serde_json::to_value(ServerFrame::error("nope")).unwrap(),
            serde_json::json!({"type": "error", "message": "nope"})
        );
    }
}
