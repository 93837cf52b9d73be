//! The evaluation loop: everything between the broker streams and the
//! strategy callbacks.
//!
//! Both execution modes drive the same tick step (update prices, refresh
//! conversion rates, recompute account caches, invoke the strategy) from a
//! single consumer per queue; they differ in where order fills come from —
//! the broker's fill stream in live mode, synthesized locally in backtests.

mod backtest;
mod core;
mod error;
mod live;
mod queues;

pub(crate) use self::core::EngineCore;
pub(crate) use backtest::{BacktestEngine, BacktestParams};
pub(crate) use live::LiveEngine;

pub use error::{ConfigError, EngineError};
pub use queues::{
    tick_channel, TickReceiver, TickSender, NOTIFICATION_QUEUE_CAPACITY, TICK_QUEUE_CAPACITY,
};

use crate::account::Account;
use std::sync::Arc;

/// The strategy-facing engine interface: inspect the account, submit market
/// orders, close trades, end the session.
///
/// `buy`/`sell`/`close_trade` never fail directly — every outcome, including
/// margin rejections and transport failures, is reported through
/// [`crate::strategy::Strategy::on_order_fill`].
pub trait Engine: Send + Sync {
    fn account(&self) -> Arc<Account>;

    /// Submits a market order to open a long trade of `units`.
    fn buy(&self, instrument: &str, units: u32);

    /// Submits a market order to open a short trade of `units`.
    fn sell(&self, instrument: &str, units: u32);

    /// Requests the close of one trade by id.
    fn close_trade(&self, instrument: &str, trade_id: &str);

    /// Gracefully ends the session; the run loop stops and `on_stop` runs.
    fn stop_session(&self);
}
