//! Broadcast engine.
//!
//! Delivers one event to a snapshot of recipients. No index or registry lock
//! is held here: the hub copies the recipient list first and writes happen
//! concurrently, so one slow client never stalls the rest.

use crate::client::{ClientEntry, ClientId};
use crate::error::{FanoutError, Result, TransportError};
use crate::event::Event;
use crate::subscription::Subscription;
use crate::topic::Topic;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of a publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    /// ID of the published event.
    pub event_id: String,
    /// Topic, or `None` for a global broadcast.
    pub topic: Option<Topic>,
    /// Clients considered for delivery.
    pub recipients: usize,
    /// Successful writes.
    pub delivered: usize,
    /// Recipients skipped by their subscription filter.
    pub filtered: usize,
    /// Recipients whose write failed; each was evicted.
    pub failed: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    /// Number of failed deliveries.
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// One failed delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryFailure {
    /// Client that could not be reached.
    pub client_id: ClientId,
    /// Why the write failed.
    pub reason: String,
}

/// A client picked for delivery, with its subscription when topic-scoped.
#[derive(Debug, Clone)]
pub(crate) struct Recipient {
    pub entry: Arc<ClientEntry>,
    pub subscription: Option<Subscription>,
}

enum Outcome {
    Delivered,
    Filtered,
    Failed(TransportError),
}

/// Payload validation and concurrent fan-out.
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    max_payload_bytes: usize,
    write_timeout: Duration,
}

impl BroadcastEngine {
    /// Create an engine with a payload limit and per-write timeout.
    pub fn new(max_payload_bytes: usize, write_timeout: Duration) -> Self {
        Self {
            max_payload_bytes,
            write_timeout,
        }
    }

    /// Reject oversized events before any write happens.
    pub fn check_payload(&self, event: &Event) -> Result<usize> {
        let size = event.payload_size()?;
        if size > self.max_payload_bytes {
            return Err(FanoutError::PayloadTooLarge {
                size,
                limit: self.max_payload_bytes,
            });
        }
        Ok(size)
    }

    /// Write `event` to every recipient.
    ///
    /// The timestamp is stamped here. Failures are collected, never raised;
    /// the caller evicts the returned clients.
    pub(crate) async fn deliver(
        &self,
        mut event: Event,
        recipients: Vec<Recipient>,
    ) -> (DeliveryReport, Vec<ClientId>) {
        event.stamp();

        let mut report = DeliveryReport {
            event_id: event.id.clone(),
            topic: event.topic.clone(),
            recipients: recipients.len(),
            ..Default::default()
        };

        let event = &event;
        let outcomes = join_all(recipients.iter().map(|recipient| async move {
            (recipient, self.deliver_one(event, recipient).await)
        }))
        .await;

        let mut failed_ids = Vec::new();
        for (recipient, outcome) in outcomes {
            match outcome {
                Outcome::Delivered => report.delivered += 1,
                Outcome::Filtered => report.filtered += 1,
                Outcome::Failed(err) => {
                    debug!(
                        client_id = %recipient.entry.id,
                        error = %err,
                        "Delivery failed"
                    );
                    report.failed.push(DeliveryFailure {
                        client_id: recipient.entry.id.clone(),
                        reason: err.to_string(),
                    });
                    failed_ids.push(recipient.entry.id.clone());
                }
            }
        }

        (report, failed_ids)
    }

    async fn deliver_one(&self, event: &Event, recipient: &Recipient) -> Outcome {
        // Evicted after the snapshot was taken.
        if recipient.entry.is_closed() {
            return Outcome::Failed(TransportError::Closed);
        }

        let payload = match &recipient.subscription {
            Some(sub) if !sub.accepts(event) => return Outcome::Filtered,
            Some(sub) => sub.apply(event.clone()),
            None => event.clone(),
        };

        match tokio::time::timeout(self.write_timeout, recipient.entry.transport.write(&payload))
            .await
        {
            Ok(Ok(())) => {
                recipient.entry.record_event();
                Outcome::Delivered
            }
            Ok(Err(err)) => Outcome::Failed(err),
            Err(_) => Outcome::Failed(TransportError::Timeout(self.write_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_payload_limit() {
        let engine = BroadcastEngine::new(16, Duration::from_secs(1));

        assert!(engine.check_payload(&Event::new("m", json!("short"))).is_ok());
        assert!(matches!(
            engine.check_payload(&Event::new("m", json!("a much longer payload"))),
            Err(FanoutError::PayloadTooLarge { limit: 16, .. })
        ));
    }

    #[tokio::test]
    async fn test_deliver_to_nobody() {
        let engine = BroadcastEngine::new(1024, Duration::from_secs(1));
        let (report, failed) = engine.deliver(Event::new("m", json!(null)), Vec::new()).await;

        assert_eq!(report.recipients, 0);
        assert_eq!(report.delivered, 0);
        assert!(failed.is_empty());
    }

    #[test]
    fn test_report_serialization() {
        let report = DeliveryReport {
            event_id: "evt-1".to_string(),
            topic: Some(Topic::parse("room-1").unwrap()),
            recipients: 2,
            delivered: 1,
            filtered: 0,
            failed: vec![DeliveryFailure {
                client_id: "c2".to_string(),
                reason: "transport closed".to_string(),
            }],
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["topic"], "room-1");
        assert_eq!(json["failed"][0]["client_id"], "c2");
    }
}
