//! Account state: balance plus the aggregation of every traded instrument.
//!
//! The balance and the cached aggregates live in atomic cells so that fill,
//! swap and funds consumers can mutate the balance concurrently while the
//! tick consumer refreshes the caches. A strategy reading these fields inside
//! `on_tick` sees the snapshot computed for that tick.

use crate::instrument::Instrument;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::types::PriceCell;

pub struct Account {
    id: String,
    home_currency: String,
    leverage: f64,
    instruments: HashMap<String, Arc<Instrument>>,
    balance: PriceCell,
    equity: PriceCell,
    unrealized_net: PriceCell,
    unrealized_effective: PriceCell,
    charged_fees: PriceCell,
    margin_used: PriceCell,
    margin_free: PriceCell,
    time_micros: AtomicI64,
}

impl Account {
    pub(crate) fn new(
        id: &str,
        home_currency: &str,
        leverage: f64,
        instruments: HashMap<String, Arc<Instrument>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            home_currency: home_currency.to_string(),
            leverage,
            instruments,
            balance: PriceCell::new(0.0),
            equity: PriceCell::new(0.0),
            unrealized_net: PriceCell::new(0.0),
            unrealized_effective: PriceCell::new(0.0),
            charged_fees: PriceCell::new(0.0),
            margin_used: PriceCell::new(0.0),
            margin_free: PriceCell::new(0.0),
            time_micros: AtomicI64::new(0),
        }
    }

    pub(crate) fn set_balance(&self, balance: f64) {
        self.balance.store(balance);
    }

    /// Atomic balance mutation; fills, rollover charges and funds transfers
    /// land here from their consumer tasks.
    pub(crate) fn add_balance(&self, amount: f64) {
        self.balance.add(amount);
    }

    pub(crate) fn set_time(&self, time: DateTime<Utc>) {
        self.time_micros
            .store(time.timestamp_micros(), Ordering::Relaxed);
    }

    pub(crate) fn recompute_unrealized(&self) {
        let mut net = 0.0;
        let mut effective = 0.0;
        let mut fees = 0.0;

        for instrument in self.instruments.values() {
            instrument.recompute_unrealized();
            net += instrument.unrealized_net_profit();
            effective += instrument.unrealized_effective_profit();
            fees += instrument.charged_fees();
        }

        self.unrealized_net.store(net);
        self.unrealized_effective.store(effective);
        self.charged_fees.store(fees);
        self.equity.store(self.balance.load() + net);
    }

    pub(crate) fn recompute_margin_used(&self) {
        let mut margin = 0.0;
        for instrument in self.instruments.values() {
            instrument.recompute_margin();
            margin += instrument.margin_used();
        }
        self.margin_used.store(margin);
    }

    pub(crate) fn recompute_free_margin(&self) {
        self.margin_free
            .store(self.equity.load() - self.margin_used.load());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn home_currency(&self) -> &str {
        &self.home_currency
    }

    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    pub fn instrument(&self, name: &str) -> Option<&Arc<Instrument>> {
        self.instruments.get(name)
    }

    pub fn instruments(&self) -> &HashMap<String, Arc<Instrument>> {
        &self.instruments
    }

    /// Engine time: the timestamp of the last processed tick.
    pub fn time(&self) -> DateTime<Utc> {
        Utc.timestamp_micros(self.time_micros.load(Ordering::Relaxed))
            .single()
            .unwrap_or_default()
    }

    pub fn balance(&self) -> f64 {
        self.balance.load()
    }

    /// Balance plus unrealized net profit, as of the last recompute.
    pub fn equity(&self) -> f64 {
        self.equity.load()
    }

    pub fn unrealized_net_profit(&self) -> f64 {
        self.unrealized_net.load()
    }

    pub fn unrealized_effective_profit(&self) -> f64 {
        self.unrealized_effective.load()
    }

    pub fn charged_fees(&self) -> f64 {
        self.charged_fees.load()
    }

    pub fn margin_used(&self) -> f64 {
        self.margin_used.load()
    }

    pub fn margin_free(&self) -> f64 {
        self.margin_free.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::InstrumentConversion;
    use crate::types::{HedgePolicy, Side, Tick};

    fn ready_instrument(name: &str, base: &str, quote: &str) -> Arc<Instrument> {
        let conversion = Arc::new(InstrumentConversion::standalone(name, base, quote));
        conversion.set_base_rate(1.0);
        conversion.set_quote_rate(1.0);
        Arc::new(Instrument::new(
            name,
            base,
            quote,
            20.0,
            -4,
            HedgePolicy::NoHedge,
            conversion,
        ))
    }

    fn account_with(instruments: &[Arc<Instrument>]) -> Account {
        let map = instruments
            .iter()
            .map(|i| (i.name().to_string(), i.clone()))
            .collect();
        let account = Account::new("test-account", "USD", 20.0, map);
        account.set_balance(10_000.0);
        account
    }

    fn tick(instrument: &str, bid: f64, ask: f64) -> Tick {
        Tick {
            instrument: instrument.to_string(),
            bid,
            ask,
            time: Utc::now(),
        }
    }

    #[test]
    fn equity_is_balance_plus_unrealized() {
        let inst = ready_instrument("EUR_USD", "EUR", "USD");
        let account = account_with(&[inst.clone()]);

        inst.update_price(&tick("EUR_USD", 1.10, 1.1002));
        inst.open_trade("1", Side::Long, Utc::now(), 1000, 1.10);
        inst.update_price(&tick("EUR_USD", 1.20, 1.2002));

        account.recompute_unrealized();
        account.recompute_margin_used();
        account.recompute_free_margin();

        assert!((account.unrealized_net_profit() - 100.0).abs() < 1e-9);
        assert!((account.equity() - 10_100.0).abs() < 1e-9);
        assert!((account.margin_used() - 50.0).abs() < 1e-9);
        assert!((account.margin_free() - 10_050.0).abs() < 1e-9);
    }

    #[test]
    fn margin_sums_across_instruments() {
        let eur = ready_instrument("EUR_USD", "EUR", "USD");
        let gbp = ready_instrument("GBP_USD", "GBP", "USD");
        let account = account_with(&[eur.clone(), gbp.clone()]);

        eur.update_price(&tick("EUR_USD", 1.10, 1.1002));
        gbp.update_price(&tick("GBP_USD", 1.30, 1.3002));
        eur.open_trade("1", Side::Long, Utc::now(), 1000, 1.1002);
        gbp.open_trade("2", Side::Short, Utc::now(), 2000, 1.30);

        account.recompute_unrealized();
        account.recompute_margin_used();

        // 1000/20 + 2000/20
        assert!((account.margin_used() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn balance_mutations_are_additive() {
        let account = account_with(&[]);

        account.add_balance(250.0);
        account.add_balance(-100.0);
        assert!((account.balance() - 10_150.0).abs() < 1e-9);
    }

    #[test]
    fn engine_time_round_trips() {
        let account = account_with(&[]);
        let stamp = Utc.with_ymd_and_hms(2024, 6, 3, 12, 30, 45).unwrap();

        account.set_time(stamp);
        assert_eq!(account.time(), stamp);
    }
}
