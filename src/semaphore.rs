// In-flight order gate for strategies. A strategy whose entry condition
// holds across several consecutive ticks would otherwise submit the same
// order once per tick while the first confirmation is still in transit.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct OrderSemaphore {
    in_flight: AtomicU32,
}

impl OrderSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a submitted order; `is_clear` turns false until a matching
    /// `notify` arrives.
    pub fn order_sent(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a received fill or rejection for a previously sent order.
    pub fn notify(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// True when no order is awaiting confirmation.
    pub fn is_clear(&self) -> bool {
        self.in_flight.load(Ordering::Relaxed) == 0
    }
}
