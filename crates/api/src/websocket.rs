//! Realtime output channel: every output event of the core is broadcast to
//! the connected clients, and clients send utterances back.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use rusty_dialogue_common::{AssistantError, OutputChannel, OutputEvent};
use rusty_dialogue_core::AssistantCore;
use serde::Deserialize;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Utterance(UtterancePayload),
    IsTalkingWithVoice(bool),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UtterancePayload {
    #[serde(alias = "utterance")]
    pub value: String,
    #[serde(default)]
    pub client: Option<String>,
}

pub struct WebSocketManager {
    tx: broadcast::Sender<OutputEvent>,
    connections: AtomicUsize,
}

impl WebSocketManager {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            connections: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.tx.subscribe()
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, core: Arc<AssistantCore>) {
        let connection_id = Uuid::new_v4();
        self.connections.fetch_add(1, Ordering::SeqCst);
        info!("WebSocket connection {} established", connection_id);

        let (mut sender, mut receiver) = socket.split();

        let mut events = BroadcastStream::new(self.subscribe());
        let mut send_task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagging, {} events dropped", skipped);
                        continue;
                    }
                };
                let json_msg = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize output event: {}", e);
                        continue;
                    }
                };

                if sender.send(Message::Text(json_msg)).await.is_err() {
                    break;
                }
            }
        });

        let mut recv_task = tokio::spawn(async move {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        debug!("Received WebSocket message: {}", text);
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => handle_client_event(event, &core),
                            Err(e) => warn!("Failed to parse WebSocket message: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        self.connections.fetch_sub(1, Ordering::SeqCst);
        info!("WebSocket connection {} closed", connection_id);
    }
}

impl Default for WebSocketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputChannel for WebSocketManager {
    fn emit(&self, event: OutputEvent) {
        // No receiver simply means no client is connected.
        let _ = self.tx.send(event);
    }
}

/// Turns run in the background so the socket keeps reading.
fn handle_client_event(event: ClientEvent, core: &Arc<AssistantCore>) {
    match event {
        ClientEvent::Utterance(payload) => {
            let core = core.clone();
            tokio::spawn(async move {
                match core.process_utterance(&payload.value).await {
                    Ok(result) => debug!("Turn finished with {:?}", result.outcome),
                    Err(AssistantError::TurnInProgress) => {
                        warn!("Utterance \"{}\" dropped, a turn is in progress", payload.value)
                    }
                    Err(e) => error!("Turn failed: {}", e),
                }
            });
        }
        ClientEvent::IsTalkingWithVoice(talking) => {
            debug!("Client talking with voice: {}", talking);
            core.set_talking_with_voice(talking);
        }
    }
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| state.websocket.clone().handle_socket(socket, state.core.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_events_parse() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"utterance","data":{"client":"webapp","value":"hello"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::Utterance(UtterancePayload {
                value: "hello".to_string(),
                client: Some("webapp".to_string()),
            })
        );

        let event: ClientEvent = serde_json::from_str(r#"{"event":"is-talking-with-voice","data":true}"#).unwrap();
        assert_eq!(event, ClientEvent::IsTalkingWithVoice(true));
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let manager = WebSocketManager::new();
        manager.emit(OutputEvent::IsTyping(true));

        let mut rx = manager.subscribe();
        manager.emit(OutputEvent::Answer("Hi".to_string()));
        assert_eq!(rx.recv().await.unwrap(), OutputEvent::Answer("Hi".to_string()));
    }
}
