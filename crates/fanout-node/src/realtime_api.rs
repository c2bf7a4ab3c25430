//! Real-time WebSocket API.
//!
//! This module provides WebSocket endpoints for real-time communication:
//!
//! - `/ws` - Main WebSocket endpoint
//! - `/api/realtime/stats` - Hub statistics
//!
//! ## WebSocket Protocol
//!
//! ```json
//! // Subscribe, optionally keeping only events whose data matches `filter`
//! {"type": "subscribe", "topic": "room-1", "filter": {"priority": "high"}}
//!
//! // Subscribe to a protected topic
//! {"type": "subscribe", "topic": "presence-lobby", "auth": "key:sig", "channel_data": "{\"user_id\":\"alice\"}"}
//!
//! // Unsubscribe
//! {"type": "unsubscribe", "topic": "room-1"}
//!
//! // Publish
//! {"type": "publish", "topic": "room-1", "event": "message", "data": {"text": "hi"}}
//!
//! // Ping for keepalive
//! {"type": "ping"}
//! ```
//!
//! Server frames are tagged the same way: `connected`, `subscribed`,
//! `unsubscribed`, `published`, `pong`, `error` and `event`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use fanout_core::{
    ChannelTransport, ConnectOptions, DeliveryReport, Event, HubStats, Outbound, ProbeMode,
    SubscriptionOptions, Topic, UserIdentity,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{ApiError, AppState};
use crate::auth::AuthError;

/// Commands sent by clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Subscribe to a topic.
    Subscribe {
        topic: String,
        /// Deliver only events whose data contains these fields.
        #[serde(default)]
        filter: Option<serde_json::Map<String, serde_json::Value>>,
        /// Signature for `private-` and `presence-` topics.
        #[serde(default)]
        auth: Option<String>,
        /// Presence member data (JSON string).
        #[serde(default)]
        channel_data: Option<String>,
    },
    /// Unsubscribe from a topic.
    Unsubscribe { topic: String },
    /// Publish an event.
    Publish {
        #[serde(default)]
        topic: Option<String>,
        event: String,
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Keepalive.
    Ping,
}

/// Messages sent to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the upgrade.
    Connected {
        client_id: String,
        heartbeat_interval_ms: u64,
    },
    /// Subscription confirmed.
    Subscribed { topic: String },
    /// Unsubscription confirmed.
    Unsubscribed { topic: String },
    /// Publish result.
    Published { report: DeliveryReport },
    /// Reply to `ping`.
    Pong,
    /// Command failed.
    Error { message: String },
    /// A delivered event.
    Event(Event),
}

impl ServerMessage {
    fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(error = %e, "Failed to serialize server message");
                None
            }
        }
    }
}

/// Create the real-time API routes.
pub fn realtime_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/realtime/stats", get(get_stats))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.hub.clone();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (transport, mut outbound) =
        ChannelTransport::new(hub.config().client_buffer, ProbeMode::Ping);
    let client_id = match hub.connect(transport.clone(), ConnectOptions::new()).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Failed to connect client");
            let error = ServerMessage::Error {
                message: e.to_string(),
            };
            if let Some(json) = error.to_json() {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(client_id = %client_id, "WebSocket client connected");

    let connected = ServerMessage::Connected {
        client_id: client_id.clone(),
        heartbeat_interval_ms: hub.config().heartbeat_interval_ms,
    };
    if let Some(json) = connected.to_json() {
        let _ = transport.send_text(json);
    }

    // Forward hub frames to the socket
    let send_client_id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                Outbound::Event(event) => match ServerMessage::Event(event).to_json() {
                    Some(json) => Message::Text(json.into()),
                    None => continue,
                },
                Outbound::Text(text) => Message::Text(text.into()),
                Outbound::Ping => Message::Ping(Bytes::new()),
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
        debug!(client_id = %send_client_id, "Send task ended");
    });

    // Handle incoming messages until either side goes away
    loop {
        tokio::select! {
            _ = &mut send_task => break,
            msg = ws_receiver.next() => {
                let Some(msg) = msg else { break };
                match msg {
                    Ok(Message::Text(text)) => {
                        hub.touch(&client_id);
                        let reply = match serde_json::from_str::<ClientCommand>(text.as_str()) {
                            Ok(cmd) => handle_command(&state, &client_id, cmd).await,
                            Err(e) => {
                                debug!(client_id = %client_id, error = %e, "Invalid message format");
                                ServerMessage::Error {
                                    message: format!("Invalid message format: {}", e),
                                }
                            }
                        };
                        if let Some(json) = reply.to_json() {
                            let _ = transport.send_text(json);
                        }
                    }
                    Ok(Message::Pong(_)) | Ok(Message::Ping(_)) => {
                        hub.touch(&client_id);
                    }
                    Ok(Message::Binary(_)) => {
                        hub.touch(&client_id);
                        debug!(client_id = %client_id, "Binary message ignored");
                    }
                    Ok(Message::Close(_)) => {
                        debug!(client_id = %client_id, "WebSocket close received");
                        break;
                    }
                    Err(e) => {
                        debug!(client_id = %client_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    // Clean up
    hub.disconnect(&client_id).await;
    send_task.abort();
    info!(client_id = %client_id, "WebSocket client disconnected");
}

/// Execute one client command and build the reply.
pub async fn handle_command(state: &AppState, client_id: &str, cmd: ClientCommand) -> ServerMessage {
    let result = match cmd {
        ClientCommand::Subscribe {
            topic,
            filter,
            auth,
            channel_data,
        } => subscribe(state, client_id, &topic, filter, auth, channel_data)
            .await
            .map(|()| ServerMessage::Subscribed { topic }),
        ClientCommand::Unsubscribe { topic } => state
            .hub
            .unsubscribe(client_id, [topic.as_str()])
            .await
            .map(|_| ServerMessage::Unsubscribed { topic })
            .map_err(ApiError::from),
        ClientCommand::Publish { topic, event, data } => state
            .hub
            .publish(topic.as_deref(), Event::new(event, data))
            .await
            .map(|report| ServerMessage::Published { report })
            .map_err(ApiError::from),
        ClientCommand::Ping => Ok(ServerMessage::Pong),
    };

    result.unwrap_or_else(|e| {
        debug!(client_id = %client_id, error = %e, "Command failed");
        ServerMessage::Error {
            message: e.to_string(),
        }
    })
}

async fn subscribe(
    state: &AppState,
    client_id: &str,
    topic: &str,
    filter: Option<serde_json::Map<String, serde_json::Value>>,
    auth: Option<String>,
    channel_data: Option<String>,
) -> Result<(), ApiError> {
    let topic = Topic::parse(topic)?;

    if topic.requires_authorization() {
        if let Some(authorizer) = &state.authorizer {
            let auth = auth.ok_or_else(|| AuthError::Missing(topic.to_string()))?;
            authorizer.verify(client_id, &topic, channel_data.as_deref(), &auth)?;
        }
    }

    let options = filter.map(SubscriptionOptions::matching_fields);

    if topic.is_presence() {
        // The identity is only attached once the subscription is accepted.
        let identity = parse_channel_data(channel_data.as_deref())?;
        state
            .hub
            .subscribe_as(client_id, topic.as_str(), identity, options.unwrap_or_default())
            .await?;
        return Ok(());
    }

    match options {
        Some(options) => {
            state
                .hub
                .subscribe_with(client_id, topic.as_str(), options)
                .await?;
        }
        None => {
            state.hub.subscribe(client_id, [topic.as_str()]).await?;
        }
    }
    Ok(())
}

/// Parse presence member data: `{"user_id": "...", "user_info": {...}}`.
pub fn parse_channel_data(channel_data: Option<&str>) -> Result<UserIdentity, AuthError> {
    let data = channel_data
        .ok_or_else(|| AuthError::InvalidChannelData("missing for presence topic".to_string()))?;
    let identity: UserIdentity = serde_json::from_str(data)
        .map_err(|e| AuthError::InvalidChannelData(e.to_string()))?;
    if identity.user_id.is_empty() {
        return Err(AuthError::InvalidChannelData("empty user_id".to_string()));
    }
    Ok(identity)
}

/// Get real-time statistics.
async fn get_stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.reader.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::{Hub, HubConfig};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_parse_commands() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type": "subscribe", "topic": "room-1"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Subscribe { ref topic, filter: None, .. } if topic == "room-1"));

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type": "publish", "topic": "room-1", "event": "message", "data": {"a": 1}}"#,
        )
        .unwrap();
        assert!(matches!(cmd, ClientCommand::Publish { event, .. } if event == "message"));

        let cmd: ClientCommand = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Ping));
    }

    #[test]
    fn test_event_frame_is_tagged() {
        let event = Event::new("message", json!({"text": "hi"})).with_id("evt-1");
        let value = serde_json::to_value(ServerMessage::Event(event)).unwrap();

        assert_eq!(value["type"], "event");
        assert_eq!(value["id"], "evt-1");
        assert_eq!(value["event"], "message");
        assert_eq!(value["data"]["text"], "hi");
    }

    #[test]
    fn test_parse_channel_data() {
        let identity =
            parse_channel_data(Some(r#"{"user_id": "alice", "user_info": {"name": "Alice"}}"#))
                .unwrap();
        assert_eq!(identity.user_id, "alice");

        assert!(parse_channel_data(None).is_err());
        assert!(parse_channel_data(Some("not json")).is_err());
        assert!(parse_channel_data(Some(r#"{"user_id": ""}"#)).is_err());
    }

    #[tokio::test]
    async fn test_command_flow() {
        let state = AppState::new(Arc::new(Hub::default()), None);
        let (transport, mut rx) = ChannelTransport::new(8, ProbeMode::Ping);
        let id = state
            .hub
            .connect(transport, ConnectOptions::new())
            .await
            .unwrap();

        let cmd = ClientCommand::Subscribe {
            topic: "room-1".to_string(),
            filter: None,
            auth: None,
            channel_data: None,
        };
        assert!(matches!(
            handle_command(&state, &id, cmd).await,
            ServerMessage::Subscribed { .. }
        ));

        let cmd = ClientCommand::Publish {
            topic: Some("room-1".to_string()),
            event: "message".to_string(),
            data: json!("hi"),
        };
        match handle_command(&state, &id, cmd).await {
            ServerMessage::Published { report } => assert_eq!(report.delivered, 1),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(matches!(rx.try_recv(), Ok(Outbound::Event(_))));

        let bad = ClientCommand::Unsubscribe {
            topic: "bad topic".to_string(),
        };
        assert!(matches!(
            handle_command(&state, &id, bad).await,
            ServerMessage::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_rejected_presence_subscribe_keeps_identity() {
        let hub = Hub::new(HubConfig {
            max_subscriptions_per_client: 1,
            ..HubConfig::default()
        });
        let state = AppState::new(Arc::new(hub), None);
        let (transport, _rx) = ChannelTransport::new(8, ProbeMode::Ping);
        let id = state
            .hub
            .connect(
                transport,
                ConnectOptions::new()
                    .with_identity(UserIdentity::new("alice"))
                    .with_topics(["room-1"]),
            )
            .await
            .unwrap();

        let cmd = ClientCommand::Subscribe {
            topic: "presence-lobby".to_string(),
            filter: None,
            auth: None,
            channel_data: Some(r#"{"user_id": "mallory"}"#.to_string()),
        };
        assert!(matches!(
            handle_command(&state, &id, cmd).await,
            ServerMessage::Error { .. }
        ));

        let info = state.hub.client(&id).unwrap();
        assert_eq!(info.identity.unwrap().user_id, "alice");
        assert!(state.hub.presence_members("presence-lobby").is_empty());
    }
}
