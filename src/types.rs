// 1.0: shared primitives. Sides, hedge policies, ticks and the atomic price
// cell that every piece of shared numeric state in the engine is built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Direction of an exposure. Long profits when the price rises, Short when it
/// falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

// 1.1: how opposing per-side margins combine into one instrument margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HedgePolicy {
    /// Both sides consume margin independently: `long + short`.
    NoHedge,
    /// Opposing exposure is fully netted: `|long - short|`.
    FullHedge,
    /// The larger side sets the requirement: `max(long, short)`.
    HalfHedge,
}

impl HedgePolicy {
    pub fn combine(&self, long_margin: f64, short_margin: f64) -> f64 {
        match self {
            HedgePolicy::NoHedge => long_margin + short_margin,
            HedgePolicy::FullHedge => (long_margin - short_margin).abs(),
            HedgePolicy::HalfHedge => long_margin.max(short_margin),
        }
    }
}

/// A single bid/ask observation for one instrument. Timestamps are assigned
/// by the broker; ties are resolved by arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub bid: f64,
    pub ask: f64,
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

// 1.2: lock-free f64 cell. The tick consumer is the only writer of any given
// cell within a tick step; everyone else reads. Relaxed ordering is the
// contract: readers want a recent value, not a synchronized one.
#[derive(Debug, Default)]
pub struct PriceCell(AtomicU64);

impl PriceCell {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Atomic read-modify-write add. Used for balance mutations and fee
    /// accrual, which may originate from handler tasks.
    pub fn add(&self, delta: f64) -> f64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return f64::from_bits(next),
                Err(actual) => current = actual,
            }
        }
    }
}
