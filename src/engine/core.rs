// Mode-independent engine state and the tick-step logic both run loops share.

use super::error::ConfigError;
use crate::account::Account;
use crate::broker::{InstrumentSpec, OrderFill, SwapCharge};
use crate::convert::ConversionEngine;
use crate::instrument::Instrument;
use crate::types::{HedgePolicy, Tick};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) struct EngineCore {
    pub(crate) account: Arc<Account>,
    pub(crate) conversions: ConversionEngine,
    ready: AtomicBool,
}

impl EngineCore {
    /// Builds the traded universe: filters the broker's available
    /// instruments down to the configured set, resolves conversion rates,
    /// and wires instruments to their conversion records. Per-instrument
    /// leverage is clamped to the account's.
    pub(crate) fn build(
        account_id: &str,
        home_currency: &str,
        account_leverage: f64,
        hedge: HedgePolicy,
        traded: &[String],
        available: Vec<InstrumentSpec>,
    ) -> Result<Self, ConfigError> {
        if traded.is_empty() {
            return Err(ConfigError::NoInstruments);
        }

        let available: HashMap<String, InstrumentSpec> = available
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect();

        let mut specs = HashMap::new();
        for name in traded {
            let spec = available
                .get(name)
                .ok_or_else(|| ConfigError::UnknownInstrument(name.clone()))?;
            specs.insert(name.clone(), spec.clone());
        }

        let traded_specs: Vec<InstrumentSpec> = specs.values().cloned().collect();
        let conversions = ConversionEngine::new(&traded_specs, &available, home_currency);

        let mut instruments = HashMap::new();
        for spec in specs.values() {
            let conversion = conversions
                .conversion(&spec.name)
                .expect("traded instrument always has a conversion record")
                .clone();
            instruments.insert(
                spec.name.clone(),
                Arc::new(Instrument::new(
                    &spec.name,
                    &spec.base_currency,
                    &spec.quote_currency,
                    spec.leverage.min(account_leverage),
                    spec.pip_location,
                    hedge,
                    conversion,
                )),
            );
        }

        let account = Arc::new(Account::new(
            account_id,
            home_currency,
            account_leverage,
            instruments,
        ));

        Ok(Self {
            account,
            conversions,
            ready: AtomicBool::new(false),
        })
    }

    /// One run-loop step. Returns true when the strategy should be invoked
    /// for this tick: the instrument is traded and the account is ready,
    /// with all caches already refreshed.
    pub(crate) fn apply_tick(&self, tick: &Tick) -> bool {
        if let Some(instrument) = self.account.instrument(&tick.instrument) {
            instrument.update_price(tick);
            self.conversions.refresh(&tick.instrument);
            self.account.set_time(tick.time);

            if self.is_ready() {
                self.account.recompute_unrealized();
                self.account.recompute_margin_used();
                self.account.recompute_free_margin();
                return true;
            }

            self.check_ready();
            return false;
        }

        // Auxiliary instruments keep price state only on the conversion
        // record; the strategy never sees their ticks.
        if let Some(conversion) = self.conversions.conversion(&tick.instrument) {
            conversion.update_price(tick);
            self.conversions.refresh(&tick.instrument);
        } else {
            warn!(instrument = %tick.instrument, "tick for unsubscribed instrument ignored");
        }

        false
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Flips to ready once every conversion instrument has shown a price.
    fn check_ready(&self) {
        if self.conversions.all_asks_seen() {
            info!(account = %self.account.id(), "all conversion instruments priced, account ready");
            self.ready.store(true, Ordering::Relaxed);
        }
    }

    /// Margin the order would consume, per the pre-check formula. `None`
    /// when the instrument is not traded.
    pub(crate) fn margin_required(&self, instrument: &str, units: u32) -> Option<f64> {
        let instrument = self.account.instrument(instrument)?;
        Some(f64::from(units) / instrument.leverage() / instrument.conversion().base_rate())
    }

    /// Applies a successful broker fill to account state: an open creates
    /// the trade, a close removes it and realizes its profit.
    pub(crate) fn apply_fill(&self, fill: &OrderFill) {
        let Some(instrument) = self.account.instrument(&fill.instrument) else {
            warn!(
                instrument = %fill.instrument,
                trade_id = %fill.trade_id,
                "fill for untraded instrument ignored"
            );
            return;
        };

        if fill.trade_close {
            instrument.close_trade(&fill.trade_id);
            self.account.add_balance(fill.profit);
        } else {
            let trade = instrument.open_trade(
                &fill.trade_id,
                fill.side,
                fill.time,
                fill.units,
                fill.price,
            );
            if fill.charged_fees != 0.0 {
                trade.apply_fee(fill.charged_fees);
            }
        }
    }

    /// Applies a batch of rollover charges. Charges referencing unknown
    /// trades are logged and skipped.
    pub(crate) fn apply_swap_charge(&self, swap: &SwapCharge) {
        for charge in &swap.charges {
            let trade = self
                .account
                .instrument(&charge.instrument)
                .and_then(|instrument| instrument.trade(&charge.trade_id));

            let Some(trade) = trade else {
                warn!(
                    instrument = %charge.instrument,
                    trade_id = %charge.trade_id,
                    amount = charge.amount,
                    "swap charge for unknown trade skipped"
                );
                continue;
            };

            trade.apply_fee(charge.amount);
            self.account.add_balance(charge.amount);
        }
    }
}
