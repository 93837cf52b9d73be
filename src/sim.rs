//! Synthetic tick source for backtests.
//!
//! A seeded random walk per instrument: gaussian noise around a slowly
//! flipping trend, an occasional volatility-burst regime, and a uniform
//! bid/ask spread. Ticks from all instruments are interleaved in timestamp
//! order, and the stream closes at the configured end time, which ends the
//! backtest session. Identical seeds produce identical tick streams.

use crate::broker::{BrokerClient, InstrumentSpec, TransportError};
use crate::engine::TickSender;
use crate::types::Tick;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const TIME_PACE_RATE: f64 = 0.5;
const NOISE_SIGMA: f64 = 0.000_000_5;
const TREND_CHANGE_PROB: f64 = 0.20;
const TREND_MU: f64 = 0.000_000_5;
const BURST_ACTIVATION_PROB: f64 = 0.10;
const BURST_DEACTIVATION_PROB: f64 = 0.90;
const BURST_SIGMA: f64 = 0.000_05;
const SPREAD_MIN: f64 = 0.000_05;
const SPREAD_MAX: f64 = 0.000_25;

/// Noise + trend + burst random walk, emitting time/price increments and a
/// spread per step.
struct WalkGenerator {
    rng: ChaCha8Rng,
    trend: f64,
    burst_active: bool,
}

impl WalkGenerator {
    fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let trend = if rng.gen_bool(0.5) { TREND_MU } else { -TREND_MU };
        Self {
            rng,
            trend,
            burst_active: false,
        }
    }

    fn next(&mut self) -> (f64, f64, f64) {
        let time_increment = self.rng.gen::<f64>() * TIME_PACE_RATE;

        let mut price_increment = sample_normal(&mut self.rng) * NOISE_SIGMA + self.trend;

        if self.rng.gen::<f64>() < TREND_CHANGE_PROB {
            self.trend = -self.trend;
        }

        if !self.burst_active && self.rng.gen::<f64>() < BURST_ACTIVATION_PROB {
            self.burst_active = true;
        }
        if self.burst_active {
            price_increment += sample_normal(&mut self.rng) * BURST_SIGMA;
            if self.rng.gen::<f64>() < BURST_DEACTIVATION_PROB {
                self.burst_active = false;
            }
        }

        let spread = self.rng.gen::<f64>() * (SPREAD_MAX - SPREAD_MIN) + SPREAD_MIN;

        (time_increment, price_increment, spread)
    }
}

// Box-Muller standard normal from two uniforms.
fn sample_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

struct PriceGenerator {
    instrument: String,
    walk: WalkGenerator,
    price: f64,
    time: DateTime<Utc>,
}

impl PriceGenerator {
    fn new(instrument: String, start_time: DateTime<Utc>, start_price: f64, seed: u64) -> Self {
        Self {
            instrument,
            walk: WalkGenerator::new(seed),
            price: start_price,
            time: start_time,
        }
    }

    fn next_tick(&mut self) -> Tick {
        let (time_increment, price_increment, spread) = self.walk.next();
        self.price += price_increment;
        self.time += Duration::microseconds((time_increment * 1_000_000.0) as i64);

        Tick {
            instrument: self.instrument.clone(),
            bid: self.price,
            ask: self.price + spread,
            time: self.time,
        }
    }
}

/// Backtest broker feeding reproducible random-walk prices. Only the price
/// side of [`BrokerClient`] is implemented; order flow is synthesized by the
/// backtest engine itself.
pub struct RandomWalkClient {
    instruments: Vec<InstrumentSpec>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    seed: u64,
}

impl RandomWalkClient {
    pub fn new(
        instruments: Vec<InstrumentSpec>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        seed: u64,
    ) -> Self {
        Self {
            instruments,
            start_time,
            end_time,
            seed,
        }
    }
}

#[async_trait]
impl BrokerClient for RandomWalkClient {
    async fn available_instruments(
        &self,
        _account_id: &str,
    ) -> Result<Vec<InstrumentSpec>, TransportError> {
        Ok(self.instruments.clone())
    }

    async fn subscribe_prices(
        &self,
        _account_id: &str,
        instruments: Vec<InstrumentSpec>,
        ticks: TickSender,
    ) -> Result<(), TransportError> {
        if instruments.is_empty() {
            return Ok(());
        }

        let mut master = ChaCha8Rng::seed_from_u64(self.seed);
        let mut generators: Vec<PriceGenerator> = instruments
            .iter()
            .map(|spec| {
                let start_price = master.gen::<f64>() * 0.6 + 0.9;
                PriceGenerator::new(spec.name.clone(), self.start_time, start_price, master.gen())
            })
            .collect();

        let start_time = self.start_time;
        let end_time = self.end_time;

        tokio::spawn(async move {
            let mut current_time = start_time;

            while current_time < end_time {
                // One tick per instrument per round, replayed in time order.
                let mut batch: Vec<Tick> =
                    generators.iter_mut().map(|g| g.next_tick()).collect();
                batch.sort_by_key(|tick| tick.time);
                current_time = batch[batch.len() - 1].time;

                for tick in batch {
                    ticks.send_blocking(tick).await;
                }
            }
            // The sender drops here, closing the tick stream.
        });

        Ok(())
    }
}
