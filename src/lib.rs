//! Multi-instrument margin trading engine.
//!
//! Consumes bid/ask streams from a broker, keeps a consistent account view
//! (balance, equity, margin, open trades per instrument and side), resolves
//! home-currency conversion rates for every traded pair, and drives a
//! user-supplied strategy. The same strategy runs unchanged against a live
//! broker or a historical/synthetic tick source.
//!
//! All price, rate and cache cells are relaxed-atomic floats with a single
//! writer per tick step; every queue has exactly one consumer.

pub mod account;
pub mod broker;
pub mod convert;
pub mod engine;
pub mod instrument;
pub mod position;
pub mod semaphore;
pub mod seq;
pub mod session;
pub mod sim;
pub mod strategy;
pub mod trade;
pub mod types;

pub use account::*;
pub use broker::*;
pub use convert::*;
pub use engine::{
    tick_channel, ConfigError, Engine, EngineError, TickReceiver, TickSender,
    NOTIFICATION_QUEUE_CAPACITY, TICK_QUEUE_CAPACITY,
};
pub use instrument::*;
pub use position::*;
pub use semaphore::*;
pub use seq::*;
pub use session::*;
pub use sim::*;
pub use strategy::*;
pub use trade::*;
pub use types::*;
