// Tick handoff between broker producers and the single tick consumer.
//
// The tick channel never blocks the producer: when the queue is full the
// oldest queued tick is discarded in favor of the newest, trading
// completeness for freshness. The other notification streams (fills, swap
// charges, funds transfers) use plain bounded tokio channels whose sends
// apply backpressure instead.

use crate::types::Tick;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

/// Tick queue depth.
pub const TICK_QUEUE_CAPACITY: usize = 300;

/// Depth of the order-fill, swap-charge and funds-transfer queues.
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 100;

struct TickQueueState {
    queue: VecDeque<Tick>,
    closed: bool,
    dropped: u64,
}

struct TickQueueShared {
    state: Mutex<TickQueueState>,
    notify: Notify,
    space: Notify,
    capacity: usize,
}

/// Creates the tick channel. The receiver belongs to the engine run loop;
/// the sender is handed to the broker's price subscription and may be
/// cloned. The channel closes when `close` is called or every sender is
/// dropped — that is how a finite backtest feed ends the session.
pub fn tick_channel(capacity: usize) -> (TickSender, TickReceiver) {
    let shared = Arc::new(TickQueueShared {
        state: Mutex::new(TickQueueState {
            queue: VecDeque::with_capacity(capacity),
            closed: false,
            dropped: 0,
        }),
        notify: Notify::new(),
        space: Notify::new(),
        capacity,
    });

    let guard = Arc::new(SenderGuard {
        shared: shared.clone(),
    });

    (
        TickSender {
            shared: shared.clone(),
            _guard: guard,
        },
        TickReceiver { shared },
    )
}

struct SenderGuard {
    shared: Arc<TickQueueShared>,
}

impl Drop for SenderGuard {
    fn drop(&mut self) {
        close_queue(&self.shared);
    }
}

fn close_queue(shared: &TickQueueShared) {
    shared.state.lock().expect("tick queue poisoned").closed = true;
    shared.notify.notify_one();
    shared.space.notify_waiters();
}

#[derive(Clone)]
pub struct TickSender {
    shared: Arc<TickQueueShared>,
    _guard: Arc<SenderGuard>,
}

impl TickSender {
    /// Enqueues a tick without ever blocking. A full queue drops its oldest
    /// entry first; a closed queue swallows the tick.
    pub fn send(&self, tick: Tick) {
        let mut state = self.shared.state.lock().expect("tick queue poisoned");
        if state.closed {
            return;
        }

        if state.queue.len() >= self.shared.capacity {
            state.queue.pop_front();
            state.dropped += 1;
            debug!(
                instrument = %tick.instrument,
                dropped_total = state.dropped,
                "tick queue full, dropped oldest tick"
            );
        }

        state.queue.push_back(tick);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Enqueues a tick, waiting for space when the queue is full. Finite
    /// replay sources use this so a fast producer loses nothing; live feeds
    /// use [`TickSender::send`] and shed the oldest ticks instead.
    pub async fn send_blocking(&self, tick: Tick) {
        loop {
            {
                let mut state = self.shared.state.lock().expect("tick queue poisoned");
                if state.closed {
                    return;
                }
                if state.queue.len() < self.shared.capacity {
                    state.queue.push_back(tick);
                    drop(state);
                    self.shared.notify.notify_one();
                    return;
                }
            }
            self.shared.space.notified().await;
        }
    }

    /// Marks the stream finished. Queued ticks remain receivable.
    pub fn close(&self) {
        close_queue(&self.shared);
    }

    /// Total ticks discarded by drop-oldest so far.
    pub fn dropped(&self) -> u64 {
        self.shared.state.lock().expect("tick queue poisoned").dropped
    }
}

pub struct TickReceiver {
    shared: Arc<TickQueueShared>,
}

impl TickReceiver {
    /// Next tick in production order, or `None` once the channel is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<Tick> {
        loop {
            {
                let mut state = self.shared.state.lock().expect("tick queue poisoned");
                if let Some(tick) = state.queue.pop_front() {
                    drop(state);
                    self.shared.space.notify_one();
                    return Some(tick);
                }
                if state.closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }
}
