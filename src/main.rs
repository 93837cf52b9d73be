//! Random-walk backtest demo.
//!
//! Runs a small mean-exit strategy over two synthetic instruments and logs
//! the account state as the session progresses.

use fxengine::{
    Engine, EngineError, HedgePolicy, InstrumentSpec, OrderFill, OrderSemaphore,
    RandomWalkClient, Session, Strategy, Tick,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tracing::info;

const TRADE_UNITS: u32 = 1_000;
const TAKE_PROFIT: f64 = 0.5;
const STOP_LOSS: f64 = -1.0;

struct MeanExitStrategy {
    engine: Option<Arc<dyn Engine>>,
    gate: OrderSemaphore,
    ticks_seen: u64,
    opens: u32,
    closes: u32,
}

impl MeanExitStrategy {
    fn new() -> Self {
        Self {
            engine: None,
            gate: OrderSemaphore::new(),
            ticks_seen: 0,
            opens: 0,
            closes: 0,
        }
    }
}

impl Strategy for MeanExitStrategy {
    fn set_engine(&mut self, engine: Arc<dyn Engine>) {
        self.engine = Some(engine);
    }

    fn on_tick(&mut self, tick: &Tick) {
        let engine = self.engine.as_ref().expect("engine set before ticks");
        let account = engine.account();
        let instrument = account
            .instrument(&tick.instrument)
            .expect("on_tick only fires for traded instruments");

        for trade in instrument.trades_ascending(-1) {
            let profit = trade.unrealized_effective_profit();
            if profit > TAKE_PROFIT || profit < STOP_LOSS {
                engine.close_trade(&tick.instrument, trade.id());
            }
        }

        if instrument.trades_number() == 0 && self.gate.is_clear() {
            self.gate.order_sent();
            engine.buy(&tick.instrument, TRADE_UNITS);
        }

        self.ticks_seen += 1;
        if self.ticks_seen % 10_000 == 0 {
            info!(
                ticks = self.ticks_seen,
                balance = account.balance(),
                equity = account.equity(),
                margin_used = account.margin_used(),
                "session progress"
            );
        }
    }

    fn on_order_fill(&mut self, fill: &OrderFill) {
        self.gate.notify();

        if let Some(error) = &fill.error {
            info!(instrument = %fill.instrument, error = %error, "order rejected");
            return;
        }

        if fill.trade_close {
            self.closes += 1;
        } else {
            self.opens += 1;
        }
    }

    fn on_stop(&mut self) {
        info!(
            ticks = self.ticks_seen,
            opens = self.opens,
            closes = self.closes,
            "session finished"
        );
    }
}

fn instrument(name: &str, base: &str, quote: &str) -> InstrumentSpec {
    InstrumentSpec {
        name: name.to_string(),
        base_currency: base.to_string(),
        quote_currency: quote.to_string(),
        leverage: 50.0,
        pip_location: -4,
    }
}

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();

    let client = RandomWalkClient::new(
        vec![
            instrument("EUR_USD", "EUR", "USD"),
            instrument("GBP_USD", "GBP", "USD"),
        ],
        start,
        end,
        42,
    );

    Session::builder()
        .instruments(["EUR_USD", "GBP_USD"])
        .initial_balance(10_000.0)
        .home_currency("USD")
        .leverage(20.0)
        .hedge(HedgePolicy::NoHedge)
        .backtest()
        .strategy(MeanExitStrategy::new())
        .client(client)
        .build()?
        .run()
        .await
}
