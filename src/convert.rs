//! Currency conversion engine.
//!
//! An account reports PnL in its home currency while trading arbitrary
//! `BASE/QUOTE` pairs, so every traded instrument continuously needs two
//! rates: base→home (margin) and quote→home (profit). Rates are resolved at
//! start-up to a [`RateSource`] per side — identity, the mid-price of some
//! instrument, or its inverse — and recomputed whenever an instrument they
//! depend on ticks. Instruments that are only referenced as a rate source are
//! auxiliary: subscribed for prices but never traded.

use crate::broker::InstrumentSpec;
use crate::types::{PriceCell, Tick};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// How a conversion rate is derived from observable prices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateSource {
    /// The currency is the home currency; the rate is a constant 1.
    Unity,
    /// Mid-price of the named instrument.
    Mid(String),
    /// Inverse mid-price of the named instrument.
    InverseMid(String),
}

/// Conversion state for one instrument: its two rate cells and the price
/// cells rates are computed from. For traded instruments the bid/ask cells
/// are the same allocations the [`crate::instrument::Instrument`] reads; for
/// auxiliary instruments they are owned here and written by the tick
/// consumer.
pub struct InstrumentConversion {
    name: String,
    base_currency: String,
    quote_currency: String,
    bid: Arc<PriceCell>,
    ask: Arc<PriceCell>,
    base_rate: PriceCell,
    quote_rate: PriceCell,
    base_source: Option<RateSource>,
    quote_source: Option<RateSource>,
}

impl InstrumentConversion {
    fn new(
        name: &str,
        base_currency: &str,
        quote_currency: &str,
        base_source: Option<RateSource>,
        quote_source: Option<RateSource>,
    ) -> Self {
        let conversion = Self {
            name: name.to_string(),
            base_currency: base_currency.to_string(),
            quote_currency: quote_currency.to_string(),
            bid: Arc::new(PriceCell::new(0.0)),
            ask: Arc::new(PriceCell::new(0.0)),
            base_rate: PriceCell::new(0.0),
            quote_rate: PriceCell::new(0.0),
            base_source,
            quote_source,
        };

        // Identity rates never tick; store them once.
        if conversion.base_source == Some(RateSource::Unity) {
            conversion.base_rate.store(1.0);
        }
        if conversion.quote_source == Some(RateSource::Unity) {
            conversion.quote_rate.store(1.0);
        }

        conversion
    }

    /// A record with no resolved sources. Used for auxiliary instruments
    /// (only their mid-price is ever read) and in tests.
    pub(crate) fn standalone(name: &str, base_currency: &str, quote_currency: &str) -> Self {
        Self::new(name, base_currency, quote_currency, None, None)
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

    /// Value of one base-currency unit in home currency.
    pub fn base_rate(&self) -> f64 {
        self.base_rate.load()
    }

    /// Value of one quote-currency unit in home currency.
    pub fn quote_rate(&self) -> f64 {
        self.quote_rate.load()
    }

    pub fn bid(&self) -> f64 {
        self.bid.load()
    }

    pub fn ask(&self) -> f64 {
        self.ask.load()
    }

    fn mid(&self) -> f64 {
        // An ask that has never been written means no price yet; rates
        // derived from it stay at 0 until the first observation.
        if self.ask.load() == 0.0 {
            return 0.0;
        }
        (self.bid.load() + self.ask.load()) / 2.0
    }

    pub(crate) fn bid_cell(&self) -> Arc<PriceCell> {
        self.bid.clone()
    }

    pub(crate) fn ask_cell(&self) -> Arc<PriceCell> {
        self.ask.clone()
    }

    pub(crate) fn update_price(&self, tick: &Tick) {
        self.ask.store(tick.ask);
        self.bid.store(tick.bid);
    }

    #[cfg(test)]
    pub(crate) fn set_base_rate(&self, rate: f64) {
        self.base_rate.store(rate);
    }

    #[cfg(test)]
    pub(crate) fn set_quote_rate(&self, rate: f64) {
        self.quote_rate.store(rate);
    }
}

pub struct ConversionEngine {
    conversions: HashMap<String, Arc<InstrumentConversion>>,
    // source instrument -> traded instruments whose base/quote rate reads it
    dependents_base: HashMap<String, HashSet<String>>,
    dependents_quote: HashMap<String, HashSet<String>>,
    subscription_specs: Vec<InstrumentSpec>,
    home_currency: String,
}

impl ConversionEngine {
    /// Resolves rate sources for every traded instrument against the broker's
    /// available universe and materializes auxiliary conversion records for
    /// instruments that are referenced but not traded.
    pub fn new(
        traded: &[InstrumentSpec],
        available: &HashMap<String, InstrumentSpec>,
        home_currency: &str,
    ) -> Self {
        let mut conversions = HashMap::new();
        let mut dependents_base: HashMap<String, HashSet<String>> = HashMap::new();
        let mut dependents_quote: HashMap<String, HashSet<String>> = HashMap::new();
        let mut needed: BTreeSet<String> = BTreeSet::new();

        // Stable resolution order regardless of map layout.
        let mut universe: Vec<&InstrumentSpec> = available.values().collect();
        universe.sort_by(|a, b| a.name.cmp(&b.name));

        for spec in traded {
            let base_source = resolve_source(
                &spec.base_currency,
                &spec.quote_currency,
                &spec.name,
                home_currency,
                &universe,
            );
            let quote_source = resolve_source(
                &spec.quote_currency,
                &spec.base_currency,
                &spec.name,
                home_currency,
                &universe,
            );

            if base_source.is_none() {
                warn!(
                    instrument = %spec.name,
                    "no conversion path from {} to {}; base rate stays 0",
                    spec.base_currency, home_currency
                );
            }
            if quote_source.is_none() {
                warn!(
                    instrument = %spec.name,
                    "no conversion path from {} to {}; quote rate stays 0",
                    spec.quote_currency, home_currency
                );
            }

            if let Some(source) = source_instrument(&base_source) {
                dependents_base
                    .entry(source.to_string())
                    .or_default()
                    .insert(spec.name.clone());
                needed.insert(source.to_string());
            }
            if let Some(source) = source_instrument(&quote_source) {
                dependents_quote
                    .entry(source.to_string())
                    .or_default()
                    .insert(spec.name.clone());
                needed.insert(source.to_string());
            }

            needed.insert(spec.name.clone());
            conversions.insert(
                spec.name.clone(),
                Arc::new(InstrumentConversion::new(
                    &spec.name,
                    &spec.base_currency,
                    &spec.quote_currency,
                    base_source,
                    quote_source,
                )),
            );
        }

        // Materialize auxiliaries: referenced instruments we do not trade.
        for name in &needed {
            if !conversions.contains_key(name) {
                if let Some(spec) = available.get(name) {
                    conversions.insert(
                        name.clone(),
                        Arc::new(InstrumentConversion::standalone(
                            &spec.name,
                            &spec.base_currency,
                            &spec.quote_currency,
                        )),
                    );
                }
            }
        }

        let subscription_specs = needed
            .iter()
            .filter_map(|name| available.get(name).cloned())
            .collect();

        Self {
            conversions,
            dependents_base,
            dependents_quote,
            subscription_specs,
            home_currency: home_currency.to_string(),
        }
    }

    /// Recomputes every rate that depends on `instrument`'s price. Called by
    /// the tick consumer after the price cells are updated and before the
    /// strategy runs.
    pub fn refresh(&self, instrument: &str) {
        if let Some(dependents) = self.dependents_base.get(instrument) {
            for name in dependents {
                if let Some(conversion) = self.conversions.get(name) {
                    if let Some(source) = &conversion.base_source {
                        conversion.base_rate.store(self.eval(source));
                    }
                }
            }
        }

        if let Some(dependents) = self.dependents_quote.get(instrument) {
            for name in dependents {
                if let Some(conversion) = self.conversions.get(name) {
                    if let Some(source) = &conversion.quote_source {
                        conversion.quote_rate.store(self.eval(source));
                    }
                }
            }
        }
    }

    fn eval(&self, source: &RateSource) -> f64 {
        match source {
            RateSource::Unity => 1.0,
            RateSource::Mid(name) => self.mid_of(name),
            RateSource::InverseMid(name) => {
                let mid = self.mid_of(name);
                if mid == 0.0 {
                    0.0
                } else {
                    1.0 / mid
                }
            }
        }
    }

    fn mid_of(&self, name: &str) -> f64 {
        self.conversions.get(name).map_or(0.0, |c| c.mid())
    }

    /// True once every subscribed conversion instrument has produced at
    /// least one price (non-zero ask).
    pub fn all_asks_seen(&self) -> bool {
        self.conversions.values().all(|c| c.ask.load() != 0.0)
    }

    pub fn conversion(&self, name: &str) -> Option<&Arc<InstrumentConversion>> {
        self.conversions.get(name)
    }

    /// Instruments the engine must subscribe prices for: every traded
    /// instrument plus its auxiliaries.
    pub fn subscription_specs(&self) -> &[InstrumentSpec] {
        &self.subscription_specs
    }

    pub fn home_currency(&self) -> &str {
        &self.home_currency
    }
}

/// Finds the rate source converting `currency` to `home`. `other` is the
/// opposite currency of the owning pair: when it is the home currency the
/// pair itself prices the conversion.
fn resolve_source(
    currency: &str,
    other: &str,
    own_name: &str,
    home: &str,
    universe: &[&InstrumentSpec],
) -> Option<RateSource> {
    if currency == home {
        return Some(RateSource::Unity);
    }

    if other == home {
        return Some(RateSource::InverseMid(own_name.to_string()));
    }

    for spec in universe {
        if spec.quote_currency == home && spec.base_currency == currency {
            return Some(RateSource::Mid(spec.name.clone()));
        }
        if spec.base_currency == home && spec.quote_currency == currency {
            return Some(RateSource::InverseMid(spec.name.clone()));
        }
    }

    None
}

fn source_instrument(source: &Option<RateSource>) -> Option<&str> {
    match source {
        Some(RateSource::Mid(name)) | Some(RateSource::InverseMid(name)) => Some(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn spec(name: &str, base: &str, quote: &str) -> InstrumentSpec {
        InstrumentSpec {
            name: name.to_string(),
            base_currency: base.to_string(),
            quote_currency: quote.to_string(),
            leverage: 50.0,
            pip_location: -4,
        }
    }

    fn universe(specs: &[InstrumentSpec]) -> HashMap<String, InstrumentSpec> {
        specs.iter().map(|s| (s.name.clone(), s.clone())).collect()
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
    fn home_base_is_unity() {
        let traded = [spec("USD_JPY", "USD", "JPY")];
        let available = universe(&traded);
        let engine = ConversionEngine::new(&traded, &available, "USD");

        let conversion = engine.conversion("USD_JPY").unwrap();
        assert_eq!(conversion.base_rate(), 1.0);
        // Quote rate still waits for a price.
        assert_eq!(conversion.quote_rate(), 0.0);
    }

    #[test]
    fn own_pair_prices_the_other_side() {
        let traded = [spec("USD_JPY", "USD", "JPY")];
        let available = universe(&traded);
        let engine = ConversionEngine::new(&traded, &available, "USD");

        let conversion = engine.conversion("USD_JPY").unwrap();
        conversion.update_price(&tick("USD_JPY", 150.0, 150.02));
        engine.refresh("USD_JPY");

        // JPY -> USD = 1 / mid(USD_JPY)
        assert!((conversion.quote_rate() - 1.0 / 150.01).abs() < 1e-12);
    }

    #[test]
    fn cross_pair_resolves_via_auxiliaries() {
        let traded = [spec("GBP_JPY", "GBP", "JPY")];
        let available = universe(&[
            spec("GBP_JPY", "GBP", "JPY"),
            spec("GBP_USD", "GBP", "USD"),
            spec("USD_JPY", "USD", "JPY"),
        ]);
        let engine = ConversionEngine::new(&traded, &available, "USD");

        // Both auxiliaries were materialized and must be subscribed.
        let mut subscribed: Vec<&str> = engine
            .subscription_specs()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        subscribed.sort();
        assert_eq!(subscribed, vec!["GBP_JPY", "GBP_USD", "USD_JPY"]);

        engine
            .conversion("GBP_USD")
            .unwrap()
            .update_price(&tick("GBP_USD", 1.30, 1.3002));
        engine.refresh("GBP_USD");

        engine
            .conversion("USD_JPY")
            .unwrap()
            .update_price(&tick("USD_JPY", 150.0, 150.02));
        engine.refresh("USD_JPY");

        let conversion = engine.conversion("GBP_JPY").unwrap();
        assert!((conversion.base_rate() - 1.3001).abs() < 1e-12);
        assert!((conversion.quote_rate() - 1.0 / 150.01).abs() < 1e-12);
    }

    #[test]
    fn unpriced_source_keeps_rate_at_zero() {
        let traded = [spec("GBP_JPY", "GBP", "JPY")];
        let available = universe(&[
            spec("GBP_JPY", "GBP", "JPY"),
            spec("GBP_USD", "GBP", "USD"),
            spec("USD_JPY", "USD", "JPY"),
        ]);
        let engine = ConversionEngine::new(&traded, &available, "USD");

        engine.refresh("GBP_USD");
        engine.refresh("USD_JPY");

        let conversion = engine.conversion("GBP_JPY").unwrap();
        assert_eq!(conversion.base_rate(), 0.0);
        assert_eq!(conversion.quote_rate(), 0.0);
        assert!(!engine.all_asks_seen());
    }

    #[test]
    fn missing_conversion_path_leaves_rate_unresolved() {
        // No instrument connects AUD to USD in this universe.
        let traded = [spec("AUD_JPY", "AUD", "JPY")];
        let available = universe(&[spec("AUD_JPY", "AUD", "JPY"), spec("USD_JPY", "USD", "JPY")]);
        let engine = ConversionEngine::new(&traded, &available, "USD");

        let conversion = engine.conversion("AUD_JPY").unwrap();
        conversion.update_price(&tick("AUD_JPY", 95.0, 95.02));
        engine.refresh("AUD_JPY");

        assert_eq!(conversion.base_rate(), 0.0);
    }

    #[test]
    fn ready_once_every_ask_seen() {
        let traded = [spec("EUR_USD", "EUR", "USD"), spec("USD_JPY", "USD", "JPY")];
        let available = universe(&traded);
        let engine = ConversionEngine::new(&traded, &available, "USD");

        assert!(!engine.all_asks_seen());

        engine
            .conversion("EUR_USD")
            .unwrap()
            .update_price(&tick("EUR_USD", 1.10, 1.1002));
        assert!(!engine.all_asks_seen());

        engine
            .conversion("USD_JPY")
            .unwrap()
            .update_price(&tick("USD_JPY", 150.0, 150.02));
        assert!(engine.all_asks_seen());
    }
}
