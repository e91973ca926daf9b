//! EventDispatcher processor.
//!
//! The EventDispatcher is responsible for:
//! - Running a pool of workers over the shared delivery queue
//! - Decoding each delivery into a typed [`Envelope`] exactly once
//! - Negatively acknowledging undecodable deliveries so the bus redelivers
//!   or dead-letters them
//! - Handing decoded envelopes to every [`EventHandler`] and publishing the
//!   follow-up envelopes they return
//!
//! Workers share nothing but the queue, so hops of the same round may run
//! on different workers.

use crate::events::{DeliveryReceiver, Envelope, EventPublisher, InMemoryBus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// One stage of the choreography.
///
/// Handlers are stateless between invocations. Every envelope they return
/// must be built with [`Envelope::follow_up`] on the incoming one.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle one event. Events the handler does not consume yield nothing.
    async fn handle(&self, envelope: &Envelope) -> Vec<Envelope>;
}

pub struct EventDispatcher {
    bus: Arc<InMemoryBus>,
    deliveries: Arc<Mutex<DeliveryReceiver>>,
    handlers: Arc<[Arc<dyn EventHandler>]>,
    workers: usize,
}

impl EventDispatcher {
    /// Create a new EventDispatcher.
    ///
    /// # Arguments
    ///
    /// * `bus` - The bus follow-ups are published to and nacks are sent to
    /// * `deliveries` - Receiving end of the bus queue
    /// * `handlers` - Handlers every decoded envelope is offered to
    /// * `workers` - Number of concurrent workers (at least one)
    pub fn new(
        bus: Arc<InMemoryBus>,
        deliveries: DeliveryReceiver,
        handlers: Vec<Arc<dyn EventHandler>>,
        workers: usize,
    ) -> Self {
        Self {
            bus,
            deliveries: Arc::new(Mutex::new(deliveries)),
            handlers: handlers.into(),
            workers: workers.max(1),
        }
    }

    /// Run the worker pool until shutdown is signaled or the queue closes.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        info!(workers = self.workers, "EventDispatcher started");

        let mut pool = JoinSet::new();
        for worker in 0..self.workers {
            let ctx = WorkerContext {
                worker,
                bus: self.bus.clone(),
                deliveries: self.deliveries.clone(),
                handlers: self.handlers.clone(),
            };
            pool.spawn(ctx.run(shutdown_rx.clone()));
        }

        while let Some(result) = pool.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Dispatcher worker terminated abnormally");
            }
        }

        info!("EventDispatcher shutdown complete");
    }
}

struct WorkerContext {
    worker: usize,
    bus: Arc<InMemoryBus>,
    deliveries: Arc<Mutex<DeliveryReceiver>>,
    handlers: Arc<[Arc<dyn EventHandler>]>,
}

impl WorkerContext {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(worker = self.worker, "Dispatcher worker started");

        loop {
            let delivery = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(worker = self.worker, "Dispatcher worker received shutdown signal");
                        break;
                    }
                    continue;
                }

                delivery = async { self.deliveries.lock().await.recv().await } => delivery,
            };

            let Some(delivery) = delivery else {
                info!(worker = self.worker, "Delivery queue closed");
                break;
            };

            match Envelope::decode(&delivery.body) {
                Ok(envelope) => self.dispatch(&envelope).await,
                Err(e) => self.bus.nack(delivery, &e),
            }
        }
    }

    async fn dispatch(&self, envelope: &Envelope) {
        debug!(
            worker = self.worker,
            event = %envelope.kind(),
            guild_id = %envelope.guild_id,
            correlation_id = %envelope.correlation_id,
            "Received event"
        );

        for handler in self.handlers.iter() {
            for follow_up in handler.handle(envelope).await {
                if let Err(e) = self.bus.publish(follow_up).await {
                    error!(
                        handler = handler.name(),
                        correlation_id = %envelope.correlation_id,
                        error = %e,
                        "Failed to publish follow-up event"
                    );
                }
            }
        }
    }
}
