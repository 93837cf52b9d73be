//! Broker capability surface.
//!
//! The engine consumes brokers through this trait: one-shot account/order
//! calls plus four streaming subscriptions delivered into engine-owned
//! channels. Concrete clients (REST + streaming JSON, a synthetic generator,
//! ...) adapt whatever protocol they speak to these types. Stream
//! reconnection and its backoff policy are the client's responsibility; the
//! engine only sees a subscription that either works or fails with a
//! [`TransportError`].

use crate::engine::TickSender;
use crate::types::{HedgePolicy, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Broker I/O failure. One-shot order calls that fail with this are turned
/// into synthetic [`OrderFill`]s by the engine; subscription failures surface
/// from session start-up.
#[derive(Debug, Clone, thiserror::Error)]
#[error("broker transport error: {0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    fn unsupported(capability: &str) -> Self {
        Self(format!("client does not support {capability}"))
    }
}

/// Order rejection code: the margin pre-check failed.
pub const NOT_ENOUGH_MARGIN: &str = "NOT_ENOUGH_MARGIN";

/// Order rejection code: a close referenced an unknown trade.
pub const TRADE_DOES_NOT_EXIST: &str = "TRADE_DOES_NOT_EXIST";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub name: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub leverage: f64,
    pub pip_location: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatus {
    pub currency: String,
    pub hedge: HedgePolicy,
    pub equity: f64,
    pub balance: f64,
    pub unrealized_gross_profit: f64,
    pub margin_used: f64,
    pub margin_free: f64,
    pub leverage: f64,
}

/// An already-open trade reported by the broker at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTradeRecord {
    pub id: String,
    pub instrument: String,
    pub side: Side,
    pub units: u32,
    pub open_price: f64,
    pub charged_fees: f64,
    pub open_time: DateTime<Utc>,
}

/// Confirmation (or rejection) of an order execution. A non-empty `error`
/// means nothing was executed and no state may be mutated from this fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub error: Option<String>,
    pub trade_close: bool,
    pub order_id: String,
    pub trade_id: String,
    pub side: Side,
    pub instrument: String,
    pub price: f64,
    pub units: u32,
    pub profit: f64,
    pub charged_fees: f64,
    pub time: DateTime<Utc>,
}

impl OrderFill {
    /// A synthetic rejection the engine posts when an order never reached
    /// the broker (margin pre-check, transport failure, unknown trade).
    pub fn rejection(
        error: impl Into<String>,
        instrument: &str,
        side: Side,
        units: u32,
        trade_close: bool,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            trade_close,
            order_id: String::new(),
            trade_id: String::new(),
            side,
            instrument: instrument.to_string(),
            price: 0.0,
            units,
            profit: 0.0,
            charged_fees: 0.0,
            time,
        }
    }
}

/// One rollover/financing charge against a single trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSwapCharge {
    pub trade_id: String,
    pub amount: f64,
    pub instrument: String,
}

/// A batch of rollover charges sharing one timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapCharge {
    pub charges: Vec<TradeSwapCharge>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundsTransfer {
    pub amount: f64,
    pub time: DateTime<Utc>,
}

/// What the engine needs from a broker. Backtest-only clients implement the
/// price side and leave the live-only capabilities at their defaults, which
/// fail with a descriptive [`TransportError`].
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn available_instruments(
        &self,
        account_id: &str,
    ) -> Result<Vec<InstrumentSpec>, TransportError>;

    /// Streams ticks for `instruments` into the engine's tick queue until
    /// the session ends or the source is exhausted (the client then closes
    /// the sender).
    async fn subscribe_prices(
        &self,
        account_id: &str,
        instruments: Vec<InstrumentSpec>,
        ticks: TickSender,
    ) -> Result<(), TransportError>;

    async fn account_status(&self, _account_id: &str) -> Result<AccountStatus, TransportError> {
        Err(TransportError::unsupported("account status"))
    }

    async fn open_trades(
        &self,
        _account_id: &str,
    ) -> Result<Vec<OpenTradeRecord>, TransportError> {
        Err(TransportError::unsupported("open trades"))
    }

    /// Fire-and-confirm: success arrives later through the fill
    /// subscription, not from this call.
    async fn open_market_order(
        &self,
        _account_id: &str,
        _instrument: &str,
        _units: u32,
        _side: Side,
    ) -> Result<(), TransportError> {
        Err(TransportError::unsupported("market orders"))
    }

    async fn close_trade(
        &self,
        _account_id: &str,
        _trade_id: &str,
    ) -> Result<(), TransportError> {
        Err(TransportError::unsupported("trade closes"))
    }

    async fn subscribe_order_fills(
        &self,
        _account_id: &str,
        _fills: mpsc::Sender<OrderFill>,
    ) -> Result<(), TransportError> {
        Err(TransportError::unsupported("order fill notifications"))
    }

    async fn subscribe_swap_charges(
        &self,
        _account_id: &str,
        _charges: mpsc::Sender<SwapCharge>,
    ) -> Result<(), TransportError> {
        Err(TransportError::unsupported("swap charge notifications"))
    }

    async fn subscribe_funds_transfers(
        &self,
        _account_id: &str,
        _transfers: mpsc::Sender<FundsTransfer>,
    ) -> Result<(), TransportError> {
        Err(TransportError::unsupported("funds transfer notifications"))
    }
}
