//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "WebSocket stream of telemetry and alarm events."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gridsim_core::TelemetryBroadcaster;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ApiState;

#[derive(Debug, Deserialize)]
struct ClientCommand {
    action: String,
    #[serde(default)]
    elements: HashSet<String>,
}

pub(crate) async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> Response {
    match state.broadcaster.clone() {
        Some(broadcaster) => ws.on_upgrade(move |socket| client_loop(socket, broadcaster)),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "event stream is only available in persist-publish mode",
        )
            .into_response(),
    }
}

async fn client_loop(mut socket: WebSocket, broadcaster: TelemetryBroadcaster) {
    let mut subscription = broadcaster.subscribe();
    // None streams every element
    let mut allowed: Option<HashSet<String>> = None;
    debug!(clients = broadcaster.receiver_count(), "websocket client connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client lagged behind; dropping events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if let Some(elements) = &allowed {
                    if !elements.contains(&event.element_id) {
                        continue;
                    }
                }

                let Ok(text) = serde_json::to_string(&event) else {
                    warn!("failed to serialise published event");
                    continue;
                };

                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(cmd) => handle_command(cmd, &mut allowed),
                        Err(err) => {
                            warn!(error = %err, "invalid websocket command payload");
                            let _ = socket
                                .send(Message::Text("{\"error\":\"invalid command\"}".into()))
                                .await;
                        }
                    },
                    Message::Binary(_) => {
                        let _ = socket
                            .send(Message::Text("{\"error\":\"binary unsupported\"}".into()))
                            .await;
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }
    debug!("websocket client disconnected");
}

fn handle_command(cmd: ClientCommand, allowed: &mut Option<HashSet<String>>) {
    match cmd.action.as_str() {
        "subscribe" => {
            let mut set = allowed.take().unwrap_or_default();
            set.extend(cmd.elements);
            *allowed = Some(set);
        }
        "unsubscribe" => {
            if let Some(set) = allowed.as_mut() {
                for element in cmd.elements {
                    set.remove(&element);
                }
            }
        }
        "unsubscribe_all" => {
            *allowed = None;
        }
        _ => warn!(action = %cmd.action, "unknown websocket command received"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(action: &str, elements: &[&str]) -> ClientCommand {
        ClientCommand {
            action: action.to_owned(),
            elements: elements.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn subscriptions_accumulate_and_reset() {
        let mut allowed = None;
        handle_command(command("subscribe", &["bus-1"]), &mut allowed);
        handle_command(command("subscribe", &["gen-1"]), &mut allowed);
        assert_eq!(allowed.as_ref().map(HashSet::len), Some(2));

        handle_command(command("unsubscribe", &["bus-1"]), &mut allowed);
        assert!(allowed.as_ref().is_some_and(|set| set.contains("gen-1") && set.len() == 1));

        handle_command(command("unsubscribe_all", &[]), &mut allowed);
        assert!(allowed.is_none());
    }
}
