//! Delivery queue handles.

use tokio::sync::mpsc;

/// Default capacity of the broadcast tap.
///
/// Observers lagging further than this lose the oldest envelopes.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// An encoded envelope on its way to a worker.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn first(body: Vec<u8>) -> Self {
        Self { body, attempt: 1 }
    }
}

/// Sender handle for the delivery queue.
pub type DeliverySender = mpsc::UnboundedSender<Delivery>;
/// Receiver handle for the delivery queue.
pub type DeliveryReceiver = mpsc::UnboundedReceiver<Delivery>;

/// Create the delivery queue.
///
/// Unbounded: workers publish follow-ups into the same queue they drain,
/// and a bounded queue would let a full pool block on itself.
pub fn delivery_channel() -> (DeliverySender, DeliveryReceiver) {
    mpsc::unbounded_channel()
}
