//! Transport seam between the hub and the wire.
//!
//! The hub only decides who receives what and when. Framing and network I/O
//! belong to a [`Transport`] implementation owned by the connection handler.

use crate::error::TransportError;
use crate::event::Event;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// What a successful liveness probe means for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe was sent; the client stays unconfirmed until it answers.
    AwaitResponse,
    /// The write itself proves the peer is reading.
    Confirmed,
}

/// Per-client delivery handle.
///
/// Any error returned here is treated as terminal for the client.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Deliver one event.
    async fn write(&self, event: &Event) -> Result<(), TransportError>;

    /// Send a liveness probe.
    async fn probe(&self) -> Result<ProbeOutcome, TransportError>;

    /// Close the transport. Called once, best-effort.
    fn close(&self) -> Result<(), TransportError>;
}

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// An event to frame and write.
    Event(Event),
    /// A pre-serialized text frame addressed to this client only.
    Text(String),
    /// A liveness probe.
    Ping,
    /// The hub dropped the client; the writer should stop.
    Close,
}

/// How a [`ChannelTransport`] answers probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Ping frames answered by pong frames (WebSocket).
    Ping,
    /// Keep-alive comments with no answer channel (Server-Sent Events).
    KeepAlive,
}

/// A [`Transport`] backed by a bounded channel drained by a writer task.
#[derive(Debug)]
pub struct ChannelTransport {
    sender: mpsc::Sender<Outbound>,
    mode: ProbeMode,
    closed: AtomicBool,
}

/// Receiving half handed to the connection's writer task.
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

impl ChannelTransport {
    /// Create a transport and the receiver its writer task drains.
    pub fn new(capacity: usize, mode: ProbeMode) -> (Arc<Self>, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let transport = Arc::new(Self {
            sender,
            mode,
            closed: AtomicBool::new(false),
        });
        (transport, receiver)
    }

    /// Queue a direct text frame for this client, bypassing the hub.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.push(Outbound::Text(text))
    }

    /// Whether the transport has been closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.sender.is_closed()
    }

    fn push(&self, frame: Outbound) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn write(&self, event: &Event) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sender
            .send(Outbound::Event(event.clone()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn probe(&self) -> Result<ProbeOutcome, TransportError> {
        self.push(Outbound::Ping)?;
        Ok(match self.mode {
            ProbeMode::Ping => ProbeOutcome::AwaitResponse,
            ProbeMode::KeepAlive => ProbeOutcome::Confirmed,
        })
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.sender.try_send(Outbound::Close) {
            // The writer stops on its own once it drains the full buffer
            // and sees every sender dropped.
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }
}
