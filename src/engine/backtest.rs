// Backtest execution: no broker round-trips. Orders fill immediately at the
// instrument's current ask (long) or bid (short), trade ids come from an
// atomic counter, and fills are handed to the strategy as soon as its
// in-flight callback returns.

use super::core::EngineCore;
use super::error::EngineError;
use super::queues::{tick_channel, TICK_QUEUE_CAPACITY};
use super::Engine;
use crate::account::Account;
use crate::broker::{BrokerClient, OrderFill, NOT_ENOUGH_MARGIN, TRADE_DOES_NOT_EXIST};
use crate::strategy::Strategy;
use crate::types::{HedgePolicy, Side};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::warn;

/// Account parameters a backtest cannot ask a broker for.
#[derive(Debug, Clone)]
pub(crate) struct BacktestParams {
    pub initial_balance: f64,
    pub home_currency: String,
    pub leverage: f64,
    pub hedge: HedgePolicy,
}

pub(crate) struct BacktestEngine {
    core: Arc<EngineCore>,
    trade_counter: AtomicU64,
    // Fills synthesized while a strategy callback is on the stack; delivered
    // right after it returns, before the next tick.
    pending: Mutex<VecDeque<OrderFill>>,
    stop_tx: watch::Sender<bool>,
}

impl BacktestEngine {
    /// Runs a backtest session until the tick source is exhausted or the
    /// strategy stops it.
    pub(crate) async fn run(
        account_id: String,
        instruments: Vec<String>,
        params: BacktestParams,
        client: Arc<dyn BrokerClient>,
        mut strategy: Box<dyn Strategy>,
    ) -> Result<(), EngineError> {
        let available = client.available_instruments(&account_id).await?;

        let core = Arc::new(EngineCore::build(
            &account_id,
            &params.home_currency,
            params.leverage,
            params.hedge,
            &instruments,
            available,
        )?);
        core.account.set_balance(params.initial_balance);

        let (tick_tx, mut tick_rx) = tick_channel(TICK_QUEUE_CAPACITY);
        client
            .subscribe_prices(
                &account_id,
                core.conversions.subscription_specs().to_vec(),
                tick_tx,
            )
            .await?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = Arc::new(BacktestEngine {
            core: core.clone(),
            trade_counter: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            stop_tx,
        });

        strategy.set_engine(engine.clone());
        strategy.initialize();
        engine.deliver_pending(strategy.as_mut());

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                tick = tick_rx.recv() => match tick {
                    Some(tick) => {
                        if core.apply_tick(&tick) {
                            strategy.on_tick(&tick);
                        }
                        engine.deliver_pending(strategy.as_mut());
                    }
                    // Exhausted tick source: end of the backtest.
                    None => break,
                },
            }
        }

        strategy.on_stop();

        Ok(())
    }

    fn stage(&self, fill: OrderFill) {
        self.pending
            .lock()
            .expect("pending fills poisoned")
            .push_back(fill);
    }

    fn deliver_pending(&self, strategy: &mut dyn Strategy) {
        // Delivering a fill may stage follow-up orders; keep draining until
        // quiet. The lock is released around each callback.
        loop {
            let next = self
                .pending
                .lock()
                .expect("pending fills poisoned")
                .pop_front();
            match next {
                Some(fill) => strategy.on_order_fill(&fill),
                None => break,
            }
        }
    }

    fn order_open(&self, instrument_name: &str, units: u32, side: Side) {
        let account = &self.core.account;
        let time = account.time();

        let Some(instrument) = account.instrument(instrument_name) else {
            warn!(instrument = %instrument_name, "order for untraded instrument rejected");
            self.stage(OrderFill::rejection(
                format!("instrument {instrument_name} is not traded in this session"),
                instrument_name,
                side,
                units,
                false,
                time,
            ));
            return;
        };

        if units == 0 {
            self.stage(OrderFill::rejection(
                "order units must be positive",
                instrument_name,
                side,
                units,
                false,
                time,
            ));
            return;
        }

        let price = match side {
            Side::Long => instrument.ask(),
            Side::Short => instrument.bid(),
        };

        let required =
            f64::from(units) / instrument.leverage() / instrument.conversion().base_rate();
        if required >= account.margin_free() {
            self.stage(OrderFill::rejection(
                NOT_ENOUGH_MARGIN,
                instrument_name,
                side,
                units,
                false,
                time,
            ));
            return;
        }

        let trade_id = (self.trade_counter.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        instrument.open_trade(&trade_id, side, time, units, price);
        account.recompute_margin_used();
        account.recompute_free_margin();

        self.stage(OrderFill {
            error: None,
            trade_close: false,
            order_id: trade_id.clone(),
            trade_id,
            side,
            instrument: instrument_name.to_string(),
            price,
            units,
            profit: 0.0,
            charged_fees: 0.0,
            time,
        });
    }

    fn order_close(&self, instrument_name: &str, trade_id: &str) {
        let account = &self.core.account;
        let time = account.time();

        if let Some(instrument) = account.instrument(instrument_name) {
            if let Some(trade) = instrument.trade(trade_id) {
                account.add_balance(trade.unrealized_effective_profit());
                instrument.close_trade(trade_id);
                account.recompute_unrealized();
                account.recompute_margin_used();
                account.recompute_free_margin();

                self.stage(OrderFill {
                    error: None,
                    trade_close: true,
                    order_id: trade_id.to_string(),
                    trade_id: trade_id.to_string(),
                    side: trade.side(),
                    instrument: instrument_name.to_string(),
                    price: trade.current_price(),
                    units: trade.units(),
                    profit: trade.unrealized_net_profit(),
                    charged_fees: 0.0,
                    time,
                });
                return;
            }
        }

        let mut fill = OrderFill::rejection(
            TRADE_DOES_NOT_EXIST,
            instrument_name,
            Side::Short,
            0,
            true,
            time,
        );
        fill.trade_id = trade_id.to_string();
        self.stage(fill);
    }
}

impl Engine for BacktestEngine {
    fn account(&self) -> Arc<Account> {
        self.core.account.clone()
    }

    fn buy(&self, instrument: &str, units: u32) {
        self.order_open(instrument, units, Side::Long);
    }

    fn sell(&self, instrument: &str, units: u32) {
        self.order_open(instrument, units, Side::Short);
    }

    fn close_trade(&self, instrument: &str, trade_id: &str) {
        self.order_close(instrument, trade_id);
    }

    fn stop_session(&self) {
        let _ = self.stop_tx.send(true);
    }
}
