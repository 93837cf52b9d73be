// 4.0: per-side aggregation of trades on one instrument. Keeps an indexed
// set plus an insertion-ordered id sequence, with cached aggregates that the
// tick consumer refreshes.

use crate::seq::IdSequence;
use crate::trade::Trade;
use crate::types::{PriceCell, Side};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

pub struct Position {
    side: Side,
    trades: RwLock<HashMap<String, Arc<Trade>>>,
    time_order: IdSequence,
    trades_number: AtomicU32,
    units: AtomicI64,
    average_price: PriceCell,
    margin_used: PriceCell,
    unrealized_net: PriceCell,
    unrealized_effective: PriceCell,
    charged_fees: PriceCell,
}

impl Position {
    pub(crate) fn new(side: Side) -> Self {
        Self {
            side,
            trades: RwLock::new(HashMap::new()),
            time_order: IdSequence::new(),
            trades_number: AtomicU32::new(0),
            units: AtomicI64::new(0),
            average_price: PriceCell::new(0.0),
            margin_used: PriceCell::new(0.0),
            unrealized_net: PriceCell::new(0.0),
            unrealized_effective: PriceCell::new(0.0),
            charged_fees: PriceCell::new(0.0),
        }
    }

    pub(crate) fn open_trade(&self, trade: Arc<Trade>) {
        self.time_order.append(trade.id());
        self.trades
            .write()
            .expect("position trades poisoned")
            .insert(trade.id().to_string(), trade.clone());

        self.trades_number.fetch_add(1, Ordering::Relaxed);

        // Fold the new trade into the incremental average; the next
        // recompute_unrealized re-derives it from scratch anyway.
        let units = self.units.load(Ordering::Relaxed) as f64;
        let added = f64::from(trade.units());
        let average = (self.average_price.load() * units + trade.open_price() * added)
            / (units + added);
        self.average_price.store(average);
        self.units.fetch_add(i64::from(trade.units()), Ordering::Relaxed);

        trade.recompute_margin();
        self.margin_used.add(trade.margin_used());
    }

    pub(crate) fn close_trade(&self, trade: &Trade) {
        self.time_order.remove(trade.id());
        self.trades
            .write()
            .expect("position trades poisoned")
            .remove(trade.id());

        self.trades_number.fetch_sub(1, Ordering::Relaxed);

        let units = self.units.load(Ordering::Relaxed) as f64;
        let removed = f64::from(trade.units());
        let remaining = units - removed;
        let average = if remaining > 0.0 {
            (self.average_price.load() * units - trade.open_price() * removed) / remaining
        } else {
            0.0
        };
        self.average_price.store(average);
        self.units.fetch_sub(i64::from(trade.units()), Ordering::Relaxed);

        trade.recompute_margin();
        self.margin_used.add(-trade.margin_used());
    }

    /// Refreshes every trade and re-derives the cached aggregates. The
    /// average price is rebuilt from scratch here so incremental rounding
    /// never accumulates.
    pub(crate) fn recompute_unrealized(&self) {
        let trades = self.snapshot();

        let mut net = 0.0;
        let mut effective = 0.0;
        let mut fees = 0.0;
        let mut weighted_open = 0.0;
        let mut units = 0.0;

        for trade in &trades {
            trade.recompute_unrealized();
            net += trade.unrealized_net_profit();
            effective += trade.unrealized_effective_profit();
            fees += trade.charged_fees();
            weighted_open += trade.open_price() * f64::from(trade.units());
            units += f64::from(trade.units());
        }

        self.unrealized_net.store(net);
        self.unrealized_effective.store(effective);
        self.charged_fees.store(fees);
        self.average_price
            .store(if units > 0.0 { weighted_open / units } else { 0.0 });
    }

    pub(crate) fn recompute_margin(&self) {
        let mut margin = 0.0;
        for trade in self.snapshot() {
            trade.recompute_margin();
            margin += trade.margin_used();
        }
        self.margin_used.store(margin);
    }

    fn snapshot(&self) -> Vec<Arc<Trade>> {
        self.trades
            .read()
            .expect("position trades poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn trade(&self, id: &str) -> Option<Arc<Trade>> {
        self.trades
            .read()
            .expect("position trades poisoned")
            .get(id)
            .cloned()
    }

    pub fn trades(&self) -> Vec<Arc<Trade>> {
        self.snapshot()
    }

    /// Id of the `index`-th trade in open order; `-1` addresses the newest.
    pub fn trade_id_at(&self, index: i64) -> Option<String> {
        self.time_order.get(index)
    }

    pub fn ascending_ids(&self, count: i64) -> Vec<String> {
        self.time_order.ascending(count)
    }

    pub fn descending_ids(&self, count: i64) -> Vec<String> {
        self.time_order.descending(count)
    }

    pub fn trades_number(&self) -> u32 {
        self.trades_number.load(Ordering::Relaxed)
    }

    pub fn units(&self) -> i64 {
        self.units.load(Ordering::Relaxed)
    }

    pub fn average_price(&self) -> f64 {
        self.average_price.load()
    }

    pub fn margin_used(&self) -> f64 {
        self.margin_used.load()
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
}
