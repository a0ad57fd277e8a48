//! WebSocket transport for notifications.

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use buildit_core::notification::{AttachedClient, Notification, NotificationError};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::AppState;

/// Qualifier that matches every qualifier of a topic.
pub const ANY_QUALIFIER: &str = "*";

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let client = Arc::new(WsClient::new(uuid::Uuid::new_v4().to_string(), tx));
    let session_id = client.session_id().to_string();

    state.notifier.attach_client(client.clone());
    info!(session_id = %session_id, "WebSocket connection established");

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<WsCommand>(&text) {
                Ok(cmd) => client.handle_command(cmd),
                Err(e) => client.reply(&WsMessage::Error {
                    message: format!("invalid command: {}", e),
                }),
            },
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "WebSocket connection closed");
                break;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    client.disable();
    state.notifier.detach_client(&session_id);
    writer.abort();
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsCommand {
    Subscribe {
        topic: String,
        #[serde(default = "any_qualifier")]
        qualifier: String,
    },
    Unsubscribe {
        topic: String,
        #[serde(default = "any_qualifier")]
        qualifier: String,
    },
}

fn any_qualifier() -> String {
    ANY_QUALIFIER.to_string()
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage<'a> {
    Subscribed { topic: &'a str, qualifier: &'a str },
    Unsubscribed { topic: &'a str, qualifier: &'a str },
    Error { message: String },
}

/// One connected WebSocket session.
///
/// Outgoing frames go through a channel to the socket's writer task, so
/// sending never waits on the network.
pub struct WsClient {
    session_id: String,
    enabled: AtomicBool,
    subscriptions: RwLock<HashSet<(String, String)>>,
    outbound: mpsc::UnboundedSender<String>,
}

impl WsClient {
    pub fn new(session_id: String, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            session_id,
            enabled: AtomicBool::new(true),
            subscriptions: RwLock::new(HashSet::new()),
            outbound,
        }
    }

    pub fn subscribe(&self, topic: &str, qualifier: &str) {
        self.subscriptions
            .write()
            .insert((topic.to_string(), qualifier.to_string()));
    }

    pub fn unsubscribe(&self, topic: &str, qualifier: &str) {
        self.subscriptions
            .write()
            .remove(&(topic.to_string(), qualifier.to_string()));
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn handle_command(&self, cmd: WsCommand) {
        match cmd {
            WsCommand::Subscribe { topic, qualifier } => {
                debug!(session_id = %self.session_id, topic = %topic, qualifier = %qualifier, "Client subscribed");
                self.subscribe(&topic, &qualifier);
                self.reply(&WsMessage::Subscribed {
                    topic: &topic,
                    qualifier: &qualifier,
                });
            }
            WsCommand::Unsubscribe { topic, qualifier } => {
                debug!(session_id = %self.session_id, topic = %topic, qualifier = %qualifier, "Client unsubscribed");
                self.unsubscribe(&topic, &qualifier);
                self.reply(&WsMessage::Unsubscribed {
                    topic: &topic,
                    qualifier: &qualifier,
                });
            }
        }
    }

    fn reply(&self, message: &WsMessage<'_>) {
        if let Ok(json) = serde_json::to_string(message) {
            let _ = self.outbound.send(json);
        }
    }
}

#[async_trait]
impl AttachedClient for WsClient {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_subscribed(&self, topic: &str, qualifier: &str) -> bool {
        let subscriptions = self.subscriptions.read();
        subscriptions.contains(&(topic.to_string(), qualifier.to_string()))
            || subscriptions.contains(&(topic.to_string(), ANY_QUALIFIER.to_string()))
    }

    async fn send_message(&self, message: &Notification) -> Result<(), NotificationError> {
        if !self.is_enabled() {
            return Err(NotificationError::Closed(self.session_id.clone()));
        }
        let json = serde_json::to_string(message)?;
        self.outbound.send(json).map_err(|_| {
            self.disable();
            NotificationError::Closed(self.session_id.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildit_core::notification::BUILD_STATUS_TOPIC;

    fn client() -> (WsClient, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WsClient::new("session-1".to_string(), tx), rx)
    }

    #[test]
    fn test_subscription_by_qualifier() {
        let (client, mut rx) = client();
        let cmd: WsCommand = serde_json::from_str(
            r#"{"type":"subscribe","topic":"build-status","qualifier":"cfg-1"}"#,
        )
        .unwrap();
        client.handle_command(cmd);

        assert!(client.is_subscribed(BUILD_STATUS_TOPIC, "cfg-1"));
        assert!(!client.is_subscribed(BUILD_STATUS_TOPIC, "cfg-2"));
        assert!(!client.is_subscribed("milestone-release", "cfg-1"));

        let ack: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["qualifier"], "cfg-1");
    }

    #[test]
    fn test_subscription_without_qualifier_matches_all() {
        let (client, _rx) = client();
        let cmd: WsCommand =
            serde_json::from_str(r#"{"type":"subscribe","topic":"build-status"}"#).unwrap();
        client.handle_command(cmd);

        assert!(client.is_subscribed(BUILD_STATUS_TOPIC, "anything"));

        client.unsubscribe(BUILD_STATUS_TOPIC, ANY_QUALIFIER);
        assert!(!client.is_subscribed(BUILD_STATUS_TOPIC, "anything"));
    }

    #[tokio::test]
    async fn test_send_fails_once_socket_is_gone() {
        let (client, rx) = client();
        let message = Notification::Message {
            text: "hello".to_string(),
        };

        drop(rx);
        let err = client.send_message(&message).await.unwrap_err();

        assert!(matches!(err, NotificationError::Closed(_)));
        assert!(!client.is_enabled());
    }

    #[tokio::test]
    async fn test_send_serializes_notification() {
        let (client, mut rx) = client();
        client
            .send_message(&Notification::Message {
                text: "hello".to_string(),
            })
            .await
            .unwrap();

        let sent: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent["type"], "message");
        assert_eq!(sent["text"], "hello");
    }
}
