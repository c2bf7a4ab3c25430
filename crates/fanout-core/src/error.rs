//! Error types for the fan-out core.

use std::time::Duration;
use thiserror::Error;

/// Errors raised to callers of the hub.
///
/// Only whole-call-invalid inputs surface here. Per-recipient delivery
/// problems are collected into a [`DeliveryReport`](crate::DeliveryReport)
/// instead.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// The registry already holds the configured maximum of clients.
    #[error("capacity exceeded: max {0} concurrent clients")]
    CapacityExceeded(usize),

    /// Topic name failed validation.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Serialized event payload is larger than the configured limit.
    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Serialized size of the rejected payload.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Event ID, name or comment cannot be framed on a single line.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Subscription limit exceeded for a single client.
    #[error("subscription limit exceeded: max {0} subscriptions")]
    SubscriptionLimit(usize),

    /// Presence topics need a verified user identity on the client.
    #[error("presence topic {0} requires an identified client")]
    IdentityRequired(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures reported by a [`Transport`](crate::Transport).
///
/// Every variant is terminal for the client it was raised for.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The peer side of the transport is gone.
    #[error("transport closed")]
    Closed,

    /// The transport buffer is full.
    #[error("transport buffer full")]
    Full,

    /// A write or probe did not complete in time.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Any other I/O failure.
    #[error("transport i/o error: {0}")]
    Io(String),
}

/// Errors from the cross-node bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has shut down.
    #[error("bus closed")]
    Closed,
}

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, FanoutError>;
