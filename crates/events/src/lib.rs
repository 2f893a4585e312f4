//! In-process "new order" event topic.
//!
//! Fan-out with broadcast semantics: every live subscriber gets a copy of
//! every event published after it subscribed. Dropping the receiver is the
//! unsubscribe. Delivery is best-effort; a subscriber that falls behind the
//! channel capacity loses the oldest events rather than blocking order
//! intake.

use model::Order;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffers bursts while a subscriber catches up.
const BROADCAST_CAPACITY: usize = 256;

/// Events published by the order pipeline.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    /// A new order was persisted; carries the cleaned projection.
    Placed(Box<Order>),
}

/// The in-process order event topic.
#[derive(Debug, Clone)]
pub struct OrderEvents {
    tx: broadcast::Sender<OrderEvent>,
}

impl OrderEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Publish to all current subscribers. Returns how many received it;
    /// zero subscribers is not an error.
    pub fn publish(&self, event: OrderEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("order event dropped, no live subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.tx.subscribe()
    }
}

impl Default for OrderEvents {
    fn default() -> Self {
        Self::new()
    }
}
