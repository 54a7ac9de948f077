use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast;

use crate::relay::{Relay, RelayEvent};

#[derive(Clone)]
pub struct WsState {
    pub relay: Relay,
}

/// Client subscription message
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ClientMessage {
    /// Scope delivery to specific buses. An empty list returns to
    /// broadcast-to-all.
    Subscribe { bus_numbers: Vec<String> },
}

/// Non-event server messages
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ServerMessage {
    /// Initial connection acknowledgment
    Connected { message: String },
}

/// WebSocket endpoint for live tracking events
pub async fn ws_events(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.relay.subscribe();
    let mut subscribed_buses: HashSet<String> = HashSet::new();

    // Send connected message
    let connected_msg = ServerMessage::Connected {
        message: "Connected to live tracking. Send a subscribe message to scope to specific buses."
            .to_string(),
    };
    if let Ok(json) = serde_json::to_string(&connected_msg) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Channel to communicate subscriptions from receiver task to sender task
    let (sub_tx, mut sub_rx) = tokio::sync::mpsc::channel::<Vec<String>>(16);

    // Spawn task to forward relay events to the WebSocket
    let forward_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                // Handle subscription updates
                Some(bus_numbers) = sub_rx.recv() => {
                    subscribed_buses = bus_numbers.into_iter().collect();
                }
                // Handle relay events
                result = events.recv() => {
                    match result {
                        Ok(event) => {
                            if !event_matches(&event, &subscribed_buses) {
                                continue;
                            }
                            if let Ok(json) = serde_json::to_string(&event) {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                        // Missed events are healed by the reconciliation poll
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }
    });

    // Handle incoming messages from client
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) {
                    match client_msg {
                        ClientMessage::Subscribe { bus_numbers } => {
                            let _ = sub_tx.send(bus_numbers).await;
                        }
                    }
                }
            }
            Ok(Message::Ping(_)) => {
                // Axum handles pong automatically
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Cleanup
    forward_task.abort();
}

/// With no subscription every event is forwarded; a subscription scopes
/// bus-bound events, while route reference updates always pass through.
fn event_matches(event: &RelayEvent, subscribed: &HashSet<String>) -> bool {
    if subscribed.is_empty() {
        return true;
    }
    match event.bus_number() {
        Some(bus) => subscribed.contains(bus),
        None => true,
    }
}
