// 5.0: a tradable pair. Owns the long and short positions, a combined trade
// index, the live bid/ask cells, and the hedge-aware margin rollup.

use crate::convert::InstrumentConversion;
use crate::position::Position;
use crate::seq::IdSequence;
use crate::trade::Trade;
use crate::types::{HedgePolicy, PriceCell, Side, Tick};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

pub struct Instrument {
    name: String,
    base_currency: String,
    quote_currency: String,
    pip_location: i32,
    hedge: HedgePolicy,
    leverage: Arc<PriceCell>,
    // Shared with the conversion record; written only by the tick consumer.
    bid: Arc<PriceCell>,
    ask: Arc<PriceCell>,
    conversion: Arc<InstrumentConversion>,
    long_position: Position,
    short_position: Position,
    trades: RwLock<HashMap<String, Arc<Trade>>>,
    time_order: IdSequence,
    trades_number: AtomicU32,
    unrealized_net: PriceCell,
    unrealized_effective: PriceCell,
    margin_used: PriceCell,
    charged_fees: PriceCell,
}

impl Instrument {
    pub(crate) fn new(
        name: &str,
        base_currency: &str,
        quote_currency: &str,
        leverage: f64,
        pip_location: i32,
        hedge: HedgePolicy,
        conversion: Arc<InstrumentConversion>,
    ) -> Self {
        Self {
            name: name.to_string(),
            base_currency: base_currency.to_string(),
            quote_currency: quote_currency.to_string(),
            pip_location,
            hedge,
            leverage: Arc::new(PriceCell::new(leverage)),
            bid: conversion.bid_cell(),
            ask: conversion.ask_cell(),
            conversion,
            long_position: Position::new(Side::Long),
            short_position: Position::new(Side::Short),
            trades: RwLock::new(HashMap::new()),
            time_order: IdSequence::new(),
            trades_number: AtomicU32::new(0),
            unrealized_net: PriceCell::new(0.0),
            unrealized_effective: PriceCell::new(0.0),
            margin_used: PriceCell::new(0.0),
            charged_fees: PriceCell::new(0.0),
        }
    }

    /// Records a filled open order. Longs mark to the bid, shorts to the
    /// ask: the price the trade would close at.
    pub(crate) fn open_trade(
        &self,
        id: &str,
        side: Side,
        open_time: DateTime<Utc>,
        units: u32,
        open_price: f64,
    ) -> Arc<Trade> {
        let current_price = match side {
            Side::Long => self.bid.clone(),
            Side::Short => self.ask.clone(),
        };

        let trade = Arc::new(Trade::new(
            id.to_string(),
            self.name.clone(),
            side,
            units,
            open_time,
            open_price,
            current_price,
            self.leverage.clone(),
            self.conversion.clone(),
        ));

        self.trades_number.fetch_add(1, Ordering::Relaxed);
        self.trades
            .write()
            .expect("instrument trades poisoned")
            .insert(id.to_string(), trade.clone());
        self.time_order.append(id);

        self.position(side).open_trade(trade.clone());

        trade
    }

    /// Removes a closed trade. A close for an id this engine never saw is
    /// broker noise, not an error: it is logged and ignored.
    pub(crate) fn close_trade(&self, id: &str) -> Option<Arc<Trade>> {
        let removed = self
            .trades
            .write()
            .expect("instrument trades poisoned")
            .remove(id);

        let Some(trade) = removed else {
            warn!(instrument = %self.name, trade_id = %id, "close for unknown trade ignored");
            return None;
        };

        self.time_order.remove(id);
        self.trades_number.fetch_sub(1, Ordering::Relaxed);
        self.position(trade.side()).close_trade(&trade);

        Some(trade)
    }

    fn position(&self, side: Side) -> &Position {
        match side {
            Side::Long => &self.long_position,
            Side::Short => &self.short_position,
        }
    }

    pub(crate) fn update_price(&self, tick: &Tick) {
        self.ask.store(tick.ask);
        self.bid.store(tick.bid);
    }

    pub(crate) fn recompute_unrealized(&self) {
        self.short_position.recompute_unrealized();
        self.long_position.recompute_unrealized();

        self.unrealized_net.store(
            self.long_position.unrealized_net_profit()
                + self.short_position.unrealized_net_profit(),
        );
        self.unrealized_effective.store(
            self.long_position.unrealized_effective_profit()
                + self.short_position.unrealized_effective_profit(),
        );
        self.charged_fees
            .store(self.long_position.charged_fees() + self.short_position.charged_fees());
    }

    pub(crate) fn recompute_margin(&self) {
        self.short_position.recompute_margin();
        self.long_position.recompute_margin();

        self.margin_used.store(self.hedge.combine(
            self.long_position.margin_used(),
            self.short_position.margin_used(),
        ));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    pub fn long_position(&self) -> &Position {
        &self.long_position
    }

    pub fn short_position(&self) -> &Position {
        &self.short_position
    }

    pub fn hedge(&self) -> HedgePolicy {
        self.hedge
    }

    pub fn trade(&self, id: &str) -> Option<Arc<Trade>> {
        self.trades
            .read()
            .expect("instrument trades poisoned")
            .get(id)
            .cloned()
    }

    /// All open trades on both sides, unordered.
    pub fn trades(&self) -> Vec<Arc<Trade>> {
        self.trades
            .read()
            .expect("instrument trades poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// The `index`-th trade across both sides in open order (`-1` = newest).
    pub fn trade_at(&self, index: i64) -> Option<Arc<Trade>> {
        self.time_order.get(index).and_then(|id| self.trade(&id))
    }

    /// Up to `count` trades in opening order (`-1` = all). Ids snapshotted
    /// from the time sequence; trades removed concurrently are skipped.
    pub fn trades_ascending(&self, count: i64) -> Vec<Arc<Trade>> {
        self.collect_trades(self.time_order.ascending(count))
    }

    /// Up to `count` trades, newest first (`-1` = all).
    pub fn trades_descending(&self, count: i64) -> Vec<Arc<Trade>> {
        self.collect_trades(self.time_order.descending(count))
    }

    fn collect_trades(&self, ids: Vec<String>) -> Vec<Arc<Trade>> {
        let trades = self.trades.read().expect("instrument trades poisoned");
        ids.iter().filter_map(|id| trades.get(id).cloned()).collect()
    }

    pub fn trades_number(&self) -> u32 {
        self.trades_number.load(Ordering::Relaxed)
    }

    pub fn unrealized_net_profit(&self) -> f64 {
        self.unrealized_net.load()
    }

    pub fn unrealized_effective_profit(&self) -> f64 {
        self.unrealized_effective.load()
    }

    pub fn margin_used(&self) -> f64 {
        self.margin_used.load()
    }

    pub fn charged_fees(&self) -> f64 {
        self.charged_fees.load()
    }

    pub fn ask(&self) -> f64 {
        self.ask.load()
    }

    pub fn bid(&self) -> f64 {
        self.bid.load()
    }

    /// Quoted as `bid - ask`, so a normal market shows a negative spread.
    pub fn spread(&self) -> f64 {
        self.bid() - self.ask()
    }

    pub fn leverage(&self) -> f64 {
        self.leverage.load()
    }

    pub fn pip_location(&self) -> i32 {
        self.pip_location
    }

    pub(crate) fn conversion(&self) -> &Arc<InstrumentConversion> {
        &self.conversion
    }

    pub(crate) fn leverage_cell(&self) -> &Arc<PriceCell> {
        &self.leverage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(hedge: HedgePolicy) -> Instrument {
        let conversion = Arc::new(InstrumentConversion::standalone("EUR_USD", "EUR", "USD"));
        conversion.set_base_rate(1.0);
        conversion.set_quote_rate(1.0);
        Instrument::new("EUR_USD", "EUR", "USD", 20.0, -4, hedge, conversion)
    }

    fn tick(bid: f64, ask: f64) -> Tick {
        Tick {
            instrument: "EUR_USD".to_string(),
            bid,
            ask,
            time: Utc::now(),
        }
    }

    #[test]
    fn open_trade_marks_long_to_bid_and_short_to_ask() {
        let inst = instrument(HedgePolicy::NoHedge);
        inst.update_price(&tick(1.10, 1.1002));

        let long = inst.open_trade("1", Side::Long, Utc::now(), 1000, 1.1002);
        let short = inst.open_trade("2", Side::Short, Utc::now(), 1000, 1.10);

        assert_eq!(long.current_price(), 1.10);
        assert_eq!(short.current_price(), 1.1002);

        inst.update_price(&tick(1.20, 1.2002));
        assert_eq!(long.current_price(), 1.20);
        assert_eq!(short.current_price(), 1.2002);
    }

    #[test]
    fn combined_index_is_union_of_positions() {
        let inst = instrument(HedgePolicy::NoHedge);
        inst.update_price(&tick(1.10, 1.1002));

        inst.open_trade("1", Side::Long, Utc::now(), 1000, 1.1002);
        inst.open_trade("2", Side::Short, Utc::now(), 500, 1.10);
        inst.open_trade("3", Side::Long, Utc::now(), 200, 1.1002);

        assert_eq!(inst.trades_number(), 3);
        assert_eq!(inst.long_position().trades_number(), 2);
        assert_eq!(inst.short_position().trades_number(), 1);
        assert!(inst.trade("2").is_some());

        let ascending: Vec<String> = inst
            .trades_ascending(-1)
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(ascending, vec!["1", "2", "3"]);

        let newest_two: Vec<String> = inst
            .trades_descending(2)
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(newest_two, vec!["3", "2"]);
    }

    #[test]
    fn close_unknown_trade_is_ignored() {
        let inst = instrument(HedgePolicy::NoHedge);
        inst.update_price(&tick(1.10, 1.1002));
        inst.open_trade("1", Side::Long, Utc::now(), 1000, 1.1002);

        assert!(inst.close_trade("missing").is_none());
        assert_eq!(inst.trades_number(), 1);
    }

    #[test]
    fn margin_rollup_respects_hedge_policy() {
        for (hedge, expected) in [
            (HedgePolicy::NoHedge, 125.0),
            (HedgePolicy::FullHedge, 25.0),
            (HedgePolicy::HalfHedge, 75.0),
        ] {
            let inst = instrument(hedge);
            inst.update_price(&tick(1.10, 1.1002));

            // long margin 1500/20 = 75, short margin 1000/20 = 50
            inst.open_trade("l", Side::Long, Utc::now(), 1500, 1.1002);
            inst.open_trade("s", Side::Short, Utc::now(), 1000, 1.10);

            inst.recompute_margin();
            assert!(
                (inst.margin_used() - expected).abs() < 1e-9,
                "{hedge:?}: got {}",
                inst.margin_used()
            );
        }
    }

    #[test]
    fn unrealized_sums_both_sides() {
        let inst = instrument(HedgePolicy::NoHedge);
        inst.update_price(&tick(1.10, 1.1002));

        inst.open_trade("l", Side::Long, Utc::now(), 1000, 1.10);
        inst.open_trade("s", Side::Short, Utc::now(), 1000, 1.10);

        inst.update_price(&tick(1.12, 1.1202));
        inst.recompute_unrealized();

        // long: (1.12-1.10)*1000 = +20; short: (1.1202-1.10)*-1*1000 = -20.2
        assert!((inst.unrealized_net_profit() + 0.2).abs() < 1e-9);
    }

    #[test]
    fn spread_is_bid_minus_ask() {
        let inst = instrument(HedgePolicy::NoHedge);
        inst.update_price(&tick(1.10, 1.1002));
        assert!((inst.spread() + 0.0002).abs() < 1e-12);
    }
}
