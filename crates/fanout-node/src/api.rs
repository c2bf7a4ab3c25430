//! HTTP API for triggering events and inspecting the hub.
//!
//! ## Endpoints
//!
//! - `POST /api/events` - Publish an event to a topic, or to everyone
//! - `POST /api/auth` - Sign a `private-` or `presence-` subscription
//!   (requires `Authorization: Bearer <app_secret>`)
//! - `GET /api/clients` - Connected clients
//! - `GET /api/clients/{client_id}` - One client
//! - `GET /api/topics` - Topics with subscriber counts
//! - `GET /api/topics/{topic}/subscribers` - Subscribers of a topic
//! - `GET /api/topics/{topic}/presence` - Members of a presence topic
//! - `GET /metrics` - Prometheus metrics

use crate::auth::{bearer_token, AuthError, ChannelAuthorizer};
use crate::health::{health_routes, HealthState};
use crate::observability::{metrics_middleware, request_id_middleware, MetricsState};
use crate::realtime_api::realtime_routes;
use crate::sse_api::sse_routes;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fanout_core::{
    ClientId, ClientInfo, DeliveryReport, Event, FanoutError, Hub, HubReader, Topic,
    UserIdentity,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The fan-out hub.
    pub hub: Arc<Hub>,
    /// Query-only view of the hub.
    pub reader: HubReader,
    /// Channel authorizer; `None` when authorization is disabled.
    pub authorizer: Option<ChannelAuthorizer>,
    /// Prometheus metrics.
    pub metrics: MetricsState,
}

impl AppState {
    /// Build state around a hub.
    pub fn new(hub: Arc<Hub>, authorizer: Option<ChannelAuthorizer>) -> Self {
        Self {
            reader: hub.reader(),
            hub,
            authorizer,
            metrics: MetricsState::new(),
        }
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Fanout(#[from] FanoutError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Fanout(FanoutError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Fanout(FanoutError::CapacityExceeded(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Fanout(FanoutError::SubscriptionLimit(_)) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Fanout(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(AuthError::Missing(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Auth(AuthError::InvalidChannelData(_)) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Request to publish an event.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    /// Target topic; omit to reach every client.
    #[serde(default)]
    pub topic: Option<String>,
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Optional event ID; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
}

/// Request to authorize a subscription.
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    /// Client that will subscribe.
    pub client_id: ClientId,
    /// Protected topic.
    pub topic: String,
    /// Presence member data, signed along with the topic.
    #[serde(default)]
    pub channel_data: Option<String>,
}

/// Signed authorization.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    /// `<app_key>:<signature>`.
    pub auth: String,
    /// Echoed presence data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// Topic listing entry.
#[derive(Debug, Serialize)]
pub struct TopicSummary {
    /// Topic name.
    pub topic: Topic,
    /// Number of subscribers.
    pub subscribers: usize,
}

/// Presence topic members.
#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    /// Number of distinct users.
    pub count: usize,
    /// Members, sorted by user ID.
    pub members: Vec<UserIdentity>,
}

/// Creates the API router.
pub fn create_router(state: AppState, health: HealthState) -> Router {
    Router::new()
        // Real-time transports
        .merge(realtime_routes())
        .merge(sse_routes())
        // Trigger and authorization
        .route("/api/events", post(trigger_event))
        .route("/api/auth", post(authorize_channel))
        // Queries
        .route("/api/clients", get(list_clients))
        .route("/api/clients/{client_id}", get(get_client))
        .route("/api/topics", get(list_topics))
        .route("/api/topics/{topic}/subscribers", get(topic_subscribers))
        .route("/api/topics/{topic}/presence", get(topic_presence))
        // Metrics
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics_middleware,
        ))
        .with_state(state)
        .merge(health_routes(health))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Publishes an event.
async fn trigger_event(
    State(state): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<DeliveryReport>, ApiError> {
    let mut event = Event::new(req.event, req.data);
    if let Some(id) = req.id {
        event = event.with_id(id);
    }
    let report = state.hub.publish(req.topic.as_deref(), event).await?;
    Ok(Json(report))
}

/// Signs a subscription for a protected topic on behalf of the application
/// backend.
async fn authorize_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let authorizer = state
        .authorizer
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("channel authorization is disabled".to_string()))?;

    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| AuthError::Missing("/api/auth".to_string()))?;
    authorizer.verify_app_credential(credential)?;

    let topic = Topic::parse(&req.topic)?;
    if !topic.requires_authorization() {
        return Err(ApiError::BadRequest(format!(
            "{} does not require authorization",
            topic
        )));
    }
    if topic.is_presence() {
        crate::realtime_api::parse_channel_data(req.channel_data.as_deref())?;
    }

    let auth = authorizer.sign(&req.client_id, &topic, req.channel_data.as_deref())?;
    Ok(Json(AuthResponse {
        auth,
        channel_data: req.channel_data,
    }))
}

/// Lists connected clients.
async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientInfo>> {
    let clients = state
        .reader
        .list_clients()
        .iter()
        .filter_map(|id| state.reader.client(id))
        .collect();
    Json(clients)
}

/// Gets one client.
async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientInfo>, ApiError> {
    state
        .reader
        .client(&client_id)
        .map(Json)
        .ok_or(ApiError::NotFound(client_id))
}

/// Lists topics with subscriber counts.
async fn list_topics(State(state): State<AppState>) -> Json<Vec<TopicSummary>> {
    let topics = state
        .reader
        .list_topics()
        .into_iter()
        .map(|topic| TopicSummary {
            subscribers: state.reader.subscribers_of(topic.as_str()).len(),
            topic,
        })
        .collect();
    Json(topics)
}

/// Lists subscribers of a topic.
async fn topic_subscribers(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<Vec<ClientId>>, ApiError> {
    let topic = Topic::parse(&topic)?;
    Ok(Json(state.reader.subscribers_of(topic.as_str())))
}

/// Lists members of a presence topic.
async fn topic_presence(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<PresenceResponse>, ApiError> {
    let topic = Topic::parse(&topic)?;
    if !topic.is_presence() {
        return Err(ApiError::BadRequest(format!("{} is not a presence topic", topic)));
    }
    let members = state.reader.presence_members(topic.as_str());
    Ok(Json(PresenceResponse {
        count: members.len(),
        members,
    }))
}

/// Prometheus scrape endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    state.metrics.refresh(&state.reader.stats());

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            Body::from(body),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
