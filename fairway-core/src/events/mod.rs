//! Event plumbing for the round lifecycle.
//!
//! Event and envelope types come from `fairway_sdk::events`. This module
//! adds the in-process transport: a delivery queue that carries encoded
//! envelopes to the worker pool, and a broadcast tap for observers.
//!
//! All handlers are stateless between hops: continuation state rides in
//! the payloads, and handlers re-read the round from the store.

pub mod bus;
pub mod channels;

pub use bus::{EventPublisher, InMemoryBus, PublishError};
pub use channels::{
    delivery_channel, Delivery, DeliveryReceiver, DeliverySender, DEFAULT_CHANNEL_BUFFER,
};
pub use fairway_sdk::events::*;
