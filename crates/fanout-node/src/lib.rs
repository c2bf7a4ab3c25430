//! # Fanout Node
//!
//! HTTP server around a [`fanout_core::Hub`].
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                     Fanout Node                       │
//! ├───────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │                 HTTP API Layer                  │  │
//! │  │  • WebSocket (/ws) and SSE (/sse) transports    │  │
//! │  │  • Trigger and channel authorization endpoints  │  │
//! │  │  • Client, topic and presence queries           │  │
//! │  │  • Health checks and Prometheus metrics         │  │
//! │  └─────────────────────────────────────────────────┘  │
//! │                          │                            │
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │                  fanout-core                    │  │
//! │  │  • Registry, subscriptions, presence            │  │
//! │  │  • Broadcast engine and heartbeat monitor       │  │
//! │  └─────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin fanout-node -- --listen-addr 127.0.0.1:8080
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Router, shared state and HTTP endpoints
//! - [`realtime_api`] - WebSocket endpoint and protocol
//! - [`sse_api`] - Server-Sent Events endpoint
//! - [`auth`] - Signed subscriptions for `private-` and `presence-` topics
//! - [`config`] - Node configuration
//! - [`observability`] - Structured logging, metrics, and request tracing
//! - [`health`] - Health check endpoints
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanout_core::Hub;
//! use fanout_node::api::{create_router, AppState};
//! use fanout_node::health::HealthState;
//!
//! let hub = Arc::new(Hub::default());
//! let health = HealthState::new(hub.reader());
//! let state = AppState::new(hub, None);
//! let app = create_router(state, health);
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod health;
pub mod observability;
pub mod realtime_api;
pub mod sse_api;
