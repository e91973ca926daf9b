//! In-memory event bus.
//!
//! Suitable for a single process. The transport contract is at-least-once:
//! a delivery that cannot be decoded is negatively acknowledged and queued
//! again until `max_delivery_attempts` is reached, then dead-lettered.

use super::channels::{Delivery, DeliveryReceiver, DeliverySender, delivery_channel};
use async_trait::async_trait;
use fairway_sdk::events::{DecodeError, Envelope};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    /// Envelope could not be serialized
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    /// Delivery queue receiver dropped
    #[error("event bus closed")]
    Closed,
}

/// Emits envelopes onto the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<(), PublishError>;
}

pub struct InMemoryBus {
    queue: DeliverySender,
    tap: broadcast::Sender<Envelope>,
    max_delivery_attempts: u32,
    published: AtomicU64,
    dead_lettered: AtomicU64,
}

impl InMemoryBus {
    /// Create a bus and the receiving end of its delivery queue.
    ///
    /// `tap_capacity` bounds the observer broadcast.
    pub fn new(tap_capacity: usize, max_delivery_attempts: u32) -> (Self, DeliveryReceiver) {
        let (queue, rx) = delivery_channel();
        let (tap, _) = broadcast::channel(tap_capacity.max(1));
        let bus = Self {
            queue,
            tap,
            max_delivery_attempts: max_delivery_attempts.max(1),
            published: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        };
        (bus, rx)
    }

    /// Observe every envelope published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tap.subscribe()
    }

    /// Enqueue an already-encoded message, as it would arrive from an
    /// external producer.
    pub fn publish_raw(&self, body: Vec<u8>) -> Result<(), PublishError> {
        self.queue
            .send(Delivery::first(body))
            .map_err(|_| PublishError::Closed)
    }

    /// Negative acknowledgement for a delivery that failed to decode.
    pub fn nack(&self, delivery: Delivery, reason: &DecodeError) {
        if delivery.attempt >= self.max_delivery_attempts {
            self.dead_lettered.fetch_add(1, Ordering::Relaxed);
            error!(
                attempt = delivery.attempt,
                error = %reason,
                bytes = delivery.body.len(),
                "Dead-lettering undecodable delivery"
            );
            return;
        }
        warn!(
            attempt = delivery.attempt,
            error = %reason,
            "Redelivering undecodable delivery"
        );
        let retry = Delivery {
            body: delivery.body,
            attempt: delivery.attempt + 1,
        };
        if self.queue.send(retry).is_err() {
            warn!("Delivery queue closed, dropping redelivery");
        }
    }

    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, envelope: Envelope) -> Result<(), PublishError> {
        let body = envelope.encode()?;
        self.queue
            .send(Delivery::first(body))
            .map_err(|_| PublishError::Closed)?;
        self.published.fetch_add(1, Ordering::Relaxed);

        debug!(
            event = %envelope.kind(),
            guild_id = %envelope.guild_id,
            correlation_id = %envelope.correlation_id,
            "Event published"
        );

        // No observers is fine.
        let _ = self.tap.send(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairway_sdk::events::RoundStartRequested;
    use fairway_sdk::objects::{GuildId, RoundId};

    fn envelope() -> Envelope {
        Envelope::originate(
            GuildId(1),
            RoundStartRequested {
                round_id: RoundId::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_publish_enqueues_and_taps() {
        let (bus, mut rx) = InMemoryBus::new(8, 3);
        let mut tap = bus.subscribe();
        let sent = envelope();
        bus.publish(sent.clone()).await.unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.attempt, 1);
        assert_eq!(Envelope::decode(&delivery.body).unwrap(), sent);
        assert_eq!(tap.recv().await.unwrap(), sent);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_nack_redelivers_then_dead_letters() {
        let (bus, mut rx) = InMemoryBus::new(8, 2);
        bus.publish_raw(b"not json".to_vec()).unwrap();

        let first = rx.recv().await.unwrap();
        let err = Envelope::decode(&first.body).unwrap_err();
        bus.nack(first, &err);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.attempt, 2);
        bus.nack(second, &err);

        assert!(rx.try_recv().is_err());
        assert_eq!(bus.dead_lettered(), 1);
    }
}
