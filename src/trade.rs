// 3.0: a single open transaction. Marks to market against the owning
// instrument's closing price cell (bid for longs, ask for shorts) and the
// account's conversion rates.

use crate::convert::InstrumentConversion;
use crate::types::{PriceCell, Side};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct Trade {
    id: String,
    instrument: String,
    side: Side,
    side_sign: f64,
    units: u32,
    open_time: DateTime<Utc>,
    open_price: f64,
    // Aliased to the owning instrument's bid or ask cell.
    current_price: Arc<PriceCell>,
    leverage: Arc<PriceCell>,
    conversion: Arc<InstrumentConversion>,
    charged_fees: PriceCell,
    unrealized_net: PriceCell,
    unrealized_effective: PriceCell,
    margin_used: PriceCell,
}

impl Trade {
    pub(crate) fn new(
        id: String,
        instrument: String,
        side: Side,
        units: u32,
        open_time: DateTime<Utc>,
        open_price: f64,
        current_price: Arc<PriceCell>,
        leverage: Arc<PriceCell>,
        conversion: Arc<InstrumentConversion>,
    ) -> Self {
        Self {
            id,
            instrument,
            side,
            side_sign: side.sign(),
            units,
            open_time,
            open_price,
            current_price,
            leverage,
            conversion,
            charged_fees: PriceCell::new(0.0),
            unrealized_net: PriceCell::new(0.0),
            unrealized_effective: PriceCell::new(0.0),
            margin_used: PriceCell::new(0.0),
        }
    }

    /// Refreshes both unrealized figures from the current price and quote
    /// conversion rate. Only the tick consumer calls this.
    pub(crate) fn recompute_unrealized(&self) {
        let net = (self.current_price.load() - self.open_price)
            * self.side_sign
            * f64::from(self.units)
            * self.conversion.quote_rate();
        self.unrealized_net.store(net);
        self.unrealized_effective.store(net + self.charged_fees.load());
    }

    /// Refreshes margin used from the leverage and base conversion rate.
    pub(crate) fn recompute_margin(&self) {
        let margin =
            f64::from(self.units) / self.leverage.load() * self.conversion.base_rate();
        self.margin_used.store(margin);
    }

    /// Accrues a rollover/financing fee into the trade and its effective
    /// profit. Safe to call from the swap-charge consumer.
    pub(crate) fn apply_fee(&self, fee: f64) {
        self.charged_fees.add(fee);
        self.unrealized_effective.add(fee);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn units(&self) -> u32 {
        self.units
    }

    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    pub fn open_price(&self) -> f64 {
        self.open_price
    }

    /// The price this trade would currently close at.
    pub fn current_price(&self) -> f64 {
        self.current_price.load()
    }

    /// Accumulated rollover and financing charges.
    pub fn charged_fees(&self) -> f64 {
        self.charged_fees.load()
    }

    pub fn unrealized_net_profit(&self) -> f64 {
        self.unrealized_net.load()
    }

    /// Net profit plus charged fees.
    pub fn unrealized_effective_profit(&self) -> f64 {
        self.unrealized_effective.load()
    }

    pub fn margin_used(&self) -> f64 {
        self.margin_used.load()
    }
}
