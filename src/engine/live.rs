// Live execution: real broker, four notification streams, asynchronous
// order submission.

use super::core::EngineCore;
use super::error::EngineError;
use super::queues::{tick_channel, NOTIFICATION_QUEUE_CAPACITY, TICK_QUEUE_CAPACITY};
use super::Engine;
use crate::account::Account;
use crate::broker::{BrokerClient, OrderFill, NOT_ENOUGH_MARGIN};
use crate::strategy::Strategy;
use crate::types::Side;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

pub(crate) struct LiveEngine {
    account_id: String,
    core: Arc<EngineCore>,
    client: Arc<dyn BrokerClient>,
    fills_tx: mpsc::Sender<OrderFill>,
    stop_tx: watch::Sender<bool>,
}

impl LiveEngine {
    /// Runs a live session to completion: initialize from broker state,
    /// consume streams until stopped, then run the strategy's `on_stop`.
    pub(crate) async fn run(
        account_id: String,
        instruments: Vec<String>,
        client: Arc<dyn BrokerClient>,
        mut strategy: Box<dyn Strategy>,
    ) -> Result<(), EngineError> {
        let status = client.account_status(&account_id).await?;
        let available = client.available_instruments(&account_id).await?;

        let core = Arc::new(EngineCore::build(
            &account_id,
            &status.currency,
            status.leverage,
            status.hedge,
            &instruments,
            available,
        )?);
        core.account.set_balance(status.balance);

        // Rehydrate open positions, oldest first so the time order matches
        // the broker's.
        let mut open_trades = client.open_trades(&account_id).await?;
        open_trades.sort_by_key(|t| t.open_time);
        for record in open_trades {
            let Some(instrument) = core.account.instrument(&record.instrument) else {
                warn!(
                    instrument = %record.instrument,
                    trade_id = %record.id,
                    "open trade on untraded instrument not rehydrated"
                );
                continue;
            };
            let trade = instrument.open_trade(
                &record.id,
                record.side,
                record.open_time,
                record.units,
                record.open_price,
            );
            if record.charged_fees != 0.0 {
                trade.apply_fee(record.charged_fees);
            }
        }

        let (tick_tx, mut tick_rx) = tick_channel(TICK_QUEUE_CAPACITY);
        let (fills_tx, mut fills_rx) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);
        let (swaps_tx, mut swaps_rx) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);
        let (funds_tx, mut funds_rx) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);

        client
            .subscribe_prices(
                &account_id,
                core.conversions.subscription_specs().to_vec(),
                tick_tx,
            )
            .await?;
        client
            .subscribe_order_fills(&account_id, fills_tx.clone())
            .await?;
        client.subscribe_swap_charges(&account_id, swaps_tx).await?;
        client
            .subscribe_funds_transfers(&account_id, funds_tx)
            .await?;

        let (stop_tx, mut stop_rx) = watch::channel(false);

        let engine = Arc::new(LiveEngine {
            account_id,
            core: core.clone(),
            client,
            fills_tx,
            stop_tx,
        });

        strategy.set_engine(engine.clone());
        strategy.initialize();
        let strategy = Arc::new(Mutex::new(strategy));

        // One consumer per stream; each mutates state and never blocks on
        // anything but its own receive.
        let fill_core = core.clone();
        let fill_strategy = strategy.clone();
        let fill_consumer = tokio::spawn(async move {
            while let Some(fill) = fills_rx.recv().await {
                if fill.error.is_none() {
                    fill_core.apply_fill(&fill);
                }
                fill_strategy
                    .lock()
                    .expect("strategy poisoned")
                    .on_order_fill(&fill);
            }
        });

        let swap_core = core.clone();
        let swap_consumer = tokio::spawn(async move {
            while let Some(charge) = swaps_rx.recv().await {
                swap_core.apply_swap_charge(&charge);
            }
        });

        let funds_account = core.account.clone();
        let funds_consumer = tokio::spawn(async move {
            while let Some(transfer) = funds_rx.recv().await {
                funds_account.add_balance(transfer.amount);
            }
        });

        // An interrupt must end the session through the same path as
        // stop_session so on_stop always runs.
        let signal_engine = engine.clone();
        let signal_watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping session");
                signal_engine.stop_session();
            }
        });

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                tick = tick_rx.recv() => match tick {
                    Some(tick) => {
                        if core.apply_tick(&tick) {
                            strategy
                                .lock()
                                .expect("strategy poisoned")
                                .on_tick(&tick);
                        }
                    }
                    None => break,
                },
            }
        }

        strategy.lock().expect("strategy poisoned").on_stop();

        fill_consumer.abort();
        swap_consumer.abort();
        funds_consumer.abort();
        signal_watcher.abort();

        Ok(())
    }

    fn submit_order(&self, instrument: &str, units: u32, side: Side) {
        let core = self.core.clone();
        let client = self.client.clone();
        let fills = self.fills_tx.clone();
        let account_id = self.account_id.clone();
        let instrument = instrument.to_string();

        tokio::spawn(async move {
            let time = core.account.time();

            if units == 0 {
                let fill = OrderFill::rejection(
                    "order units must be positive",
                    &instrument,
                    side,
                    units,
                    false,
                    time,
                );
                let _ = fills.send(fill).await;
                return;
            }

            let rejection = match core.margin_required(&instrument, units) {
                None => Some(OrderFill::rejection(
                    format!("instrument {instrument} is not traded in this session"),
                    &instrument,
                    side,
                    units,
                    false,
                    time,
                )),
                // Only reach the broker when the margin pre-check passes.
                Some(required) if required >= core.account.margin_free() => Some(
                    OrderFill::rejection(NOT_ENOUGH_MARGIN, &instrument, side, units, false, time),
                ),
                Some(_) => client
                    .open_market_order(&account_id, &instrument, units, side)
                    .await
                    .err()
                    .map(|error| {
                        OrderFill::rejection(
                            error.to_string(),
                            &instrument,
                            side,
                            units,
                            false,
                            time,
                        )
                    }),
            };

            if let Some(fill) = rejection {
                let _ = fills.send(fill).await;
            }
        });
    }
}

impl Engine for LiveEngine {
    fn account(&self) -> Arc<Account> {
        self.core.account.clone()
    }

    fn buy(&self, instrument: &str, units: u32) {
        self.submit_order(instrument, units, Side::Long);
    }

    fn sell(&self, instrument: &str, units: u32) {
        self.submit_order(instrument, units, Side::Short);
    }

    fn close_trade(&self, instrument: &str, trade_id: &str) {
        let core = self.core.clone();
        let client = self.client.clone();
        let fills = self.fills_tx.clone();
        let account_id = self.account_id.clone();
        let instrument = instrument.to_string();
        let trade_id = trade_id.to_string();

        tokio::spawn(async move {
            if let Err(error) = client.close_trade(&account_id, &trade_id).await {
                let known = core
                    .account
                    .instrument(&instrument)
                    .and_then(|i| i.trade(&trade_id));
                let (side, units) = known
                    .map(|t| (t.side(), t.units()))
                    .unwrap_or((Side::Short, 0));

                let mut fill = OrderFill::rejection(
                    error.to_string(),
                    &instrument,
                    side,
                    units,
                    true,
                    core.account.time(),
                );
                fill.trade_id = trade_id;
                let _ = fills.send(fill).await;
            }
        });
    }

    fn stop_session(&self) {
        let _ = self.stop_tx.send(true);
    }
}
