//! Advisory billing events for the signaling/UI layer
//!
//! Everything here is a side-effect for display only and carries no
//! correctness obligation: the stream is lossy under lag, and consumers must
//! reconcile against the authoritative balance and call-status queries after
//! a reconnect.

use credit_ledger::CallStatus;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Advisory billing event
#[derive(Debug, Clone)]
pub enum BillingEvent {
    /// Billing started for a call
    Started {
        /// Call ID
        call_id: Uuid,
        /// Room the call runs in
        room_id: String,
        /// Rate in milli-credits per second
        rate_milli_per_second: i64,
    },

    /// One billing tick committed
    Tick {
        /// Call ID
        call_id: Uuid,
        /// Room the call runs in
        room_id: String,
        /// Cumulative whole seconds billed
        seconds_billed: u64,
        /// Cumulative milli-credits spent on the call
        credits_spent_milli: i64,
        /// Payer balance after the tick
        credits_left_milli: i64,
    },

    /// Billing ended for a call
    Ended {
        /// Call ID
        call_id: Uuid,
        /// Room the call ran in
        room_id: String,
        /// Terminal status
        status: CallStatus,
    },
}

/// Broadcast bus for advisory billing events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BillingEvent>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to billing events
    pub fn subscribe(&self) -> broadcast::Receiver<BillingEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream
    pub fn stream(&self) -> BroadcastStream<BillingEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Emit an event; dropped silently when nobody is listening
    pub fn emit(&self, event: BillingEvent) {
        tracing::debug!(?event, "Billing event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
