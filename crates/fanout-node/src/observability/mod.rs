//! # Observability Module
//!
//! Observability for the fan-out node:
//!
//! - **Structured Logging**: Pretty or JSON logs with request IDs
//! - **Prometheus Metrics**: HTTP traffic and hub statistics
//! - **Request Tracing**: Request ID propagation through every handler
//!
//! ## Usage
//!
//! ```rust,ignore
//! use axum::{middleware, Router};
//! use fanout_node::observability::{
//!     init_logging, metrics_middleware, request_id_middleware, LogFormat, MetricsState,
//! };
//!
//! // Initialize logging
//! init_logging("info", LogFormat::Json);
//!
//! // Create metrics state
//! let metrics = MetricsState::new();
//!
//! // Add request ID and metrics layers to a router
//! let app: Router<()> = Router::new()
//!     .layer(middleware::from_fn_with_state(metrics, metrics_middleware))
//!     .layer(middleware::from_fn(request_id_middleware));
//! ```

mod logging;
mod metrics;
pub mod middleware;

pub use logging::{init_logging, LogFormat};
pub use metrics::MetricsState;
pub use middleware::{metrics_middleware, request_id_middleware, RequestId, REQUEST_ID_HEADER};
