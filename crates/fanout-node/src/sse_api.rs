//! Server-Sent Events API.
//!
//! `GET /sse?topics=news,sports` opens a one-way stream subscribed to the
//! listed public topics. The first frame is a `connected` event carrying the
//! client ID. Each delivered event becomes one SSE frame with `id`, `event`
//! and a JSON `data` line; heartbeat probes are sent as comment lines.
//!
//! Protected topics need a signed subscription and are only available over
//! the WebSocket endpoint.

use axum::{
    extract::{Query, State},
    response::sse::{Event as SseEvent, Sse},
    routing::get,
    Router,
};
use fanout_core::{
    ChannelTransport, ClientId, ConnectOptions, Event, Hub, Outbound, OutboundReceiver, ProbeMode,
    Topic,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AppState};

/// Stream query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct SseQuery {
    /// Comma-separated topic list.
    #[serde(default)]
    pub topics: Option<String>,
}

impl SseQuery {
    fn topic_names(&self) -> Vec<String> {
        self.topics
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Create the SSE routes.
pub fn sse_routes() -> Router<AppState> {
    Router::new().route("/sse", get(sse_handler))
}

/// Open an event stream.
async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let names = query.topic_names();
    for topic in Topic::parse_all(&names)? {
        if topic.requires_authorization() {
            return Err(ApiError::BadRequest(format!(
                "{} requires a WebSocket subscription",
                topic
            )));
        }
    }

    let hub = state.hub.clone();
    let (transport, outbound) =
        ChannelTransport::new(hub.config().client_buffer, ProbeMode::KeepAlive);
    let client_id = hub
        .connect(transport, ConnectOptions::new().with_topics(names))
        .await?;
    info!(client_id = %client_id, "SSE client connected");

    let retry = Duration::from_millis(hub.config().sse_retry_ms);
    let hello = SseEvent::default()
        .event("connected")
        .retry(retry)
        .data(format!(r#"{{"client_id":"{}"}}"#, client_id));

    let stream = EventStream {
        outbound,
        guard: DisconnectGuard { hub, client_id },
    };
    let frames = futures::stream::once(async move { Ok(hello) }).chain(event_frames(stream));

    Ok(Sse::new(frames))
}

/// Per-connection state carried by the stream.
struct EventStream {
    outbound: OutboundReceiver,
    guard: DisconnectGuard,
}

/// Removes the client from the hub when the response body is dropped.
struct DisconnectGuard {
    hub: Arc<Hub>,
    client_id: ClientId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let client_id = std::mem::take(&mut self.client_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    hub.disconnect(&client_id).await;
                    info!(client_id = %client_id, "SSE client disconnected");
                });
            }
            Err(_) => warn!(client_id = %client_id, "No runtime to disconnect SSE client"),
        }
    }
}

/// Drain the outbound queue into SSE frames until the hub closes the client.
fn event_frames(stream: EventStream) -> impl Stream<Item = Result<SseEvent, Infallible>> + Send {
    futures::stream::unfold(stream, |mut state| async move {
        loop {
            let frame = match state.outbound.recv().await {
                Some(Outbound::Close) | None => {
                    debug!(client_id = %state.guard.client_id, "SSE stream closed");
                    return None;
                }
                Some(Outbound::Event(event)) => match to_sse_event(&event) {
                    Some(frame) => frame,
                    None => continue,
                },
                Some(Outbound::Text(text)) => SseEvent::default().data(text),
                Some(Outbound::Ping) => SseEvent::default().comment("ping"),
            };
            return Some((Ok(frame), state));
        }
    })
}

/// Frame one event. `None` if the event cannot be serialized or one of its
/// header fields spans several lines.
pub fn to_sse_event(event: &Event) -> Option<SseEvent> {
    let comment_ok = event.comment.as_deref().map_or(true, single_line);
    if !single_line(&event.id) || !single_line(&event.name) || !comment_ok {
        warn!(event_id = %event.id.escape_debug(), "Event fields cannot be framed as SSE");
        return None;
    }

    let data = match serde_json::to_string(event) {
        Ok(data) => data,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "Failed to serialize event");
            return None;
        }
    };

    let mut frame = SseEvent::default()
        .id(event.id.as_str())
        .event(event.name.as_str())
        .data(data);
    if let Some(retry_ms) = event.retry_ms {
        frame = frame.retry(Duration::from_millis(retry_ms));
    }
    if let Some(comment) = &event.comment {
        frame = frame.comment(comment.as_str());
    }
    Some(frame)
}

fn single_line(field: &str) -> bool {
    !field.contains(['\n', '\r', '\0'])
}
