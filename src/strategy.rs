//! The strategy capability set: what user code must implement to trade.

use crate::broker::OrderFill;
use crate::engine::Engine;
use crate::types::Tick;
use std::sync::Arc;

/// A trading strategy driven by the engine.
///
/// `set_engine` is called once before `initialize`; the handle is how the
/// strategy inspects the account and submits orders. `on_tick` runs on the
/// tick consumer after account caches were refreshed for that tick, so
/// reads of account/instrument figures inside it are a consistent snapshot.
pub trait Strategy: Send {
    fn set_engine(&mut self, engine: Arc<dyn Engine>);

    fn initialize(&mut self) {}

    fn on_tick(&mut self, tick: &Tick);

    fn on_order_fill(&mut self, fill: &OrderFill);

    fn on_stop(&mut self) {}
}
