//! Synthetic quote generator — the cascade's floor.
//!
//! Produces a plausible perturbation around a per-symbol baseline so the
//! terminal can always render something. Every quote is tagged
//! [`QuoteSource::Synthetic`]; nothing downstream may mistake these for
//! market data.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tdk_schemas::{Quote, QuoteSource};

/// Baseline last prices for familiar symbols; anything unknown gets
/// [`DEFAULT_BASELINE`].
const BASELINES: &[(&str, f64)] = &[
    ("AAPL", 175.0),
    ("GOOGL", 135.0),
    ("TSLA", 250.0),
    ("AMZN", 145.0),
    ("MSFT", 415.0),
    ("NVDA", 430.0),
    ("META", 485.0),
    ("SPY", 450.0),
    ("QQQ", 380.0),
    ("AMD", 140.0),
];

const DEFAULT_BASELINE: f64 = 100.0;

pub struct SyntheticQuotes {
    baselines: BTreeMap<&'static str, f64>,
    rng: Mutex<StdRng>,
}

impl SyntheticQuotes {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic generator for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            baselines: BASELINES.iter().copied().collect(),
            rng: Mutex::new(rng),
        }
    }

    fn baseline(&self, symbol: &str) -> f64 {
        self.baselines
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_BASELINE)
    }

    /// A fresh synthetic quote. `last` is always positive: the perturbation
    /// band is well inside every baseline.
    pub fn quote(&self, symbol: &str) -> Quote {
        let base = self.baseline(symbol);
        let (last, change, volume) = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            (
                base + rng.gen_range(-5.0..=5.0),
                rng.gen_range(-3.0..=3.0),
                rng.gen_range(1_000_000..=50_000_000),
            )
        };
        let last = round2(last);
        let change = round2(change);

        Quote {
            symbol: symbol.to_string(),
            last,
            bid: round2(last * 0.999),
            ask: round2(last * 1.001),
            volume,
            change,
            percent_change: round2(change / last * 100.0),
            source: QuoteSource::Synthetic,
            observed_at: Utc::now(),
        }
    }
}

impl Default for SyntheticQuotes {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_last_is_always_positive() {
        let gen = SyntheticQuotes::with_seed(7);
        for symbol in ["AAPL", "MSFT", "ZZZZ", "X"] {
            for _ in 0..100 {
                let q = gen.quote(symbol);
                assert!(q.last > 0.0, "{symbol}: {}", q.last);
                assert_eq!(q.source, QuoteSource::Synthetic);
            }
        }
    }

    #[test]
    fn unknown_symbol_uses_default_baseline() {
        let gen = SyntheticQuotes::with_seed(1);
        let q = gen.quote("NOPE");
        assert!((q.last - DEFAULT_BASELINE).abs() <= 5.0);
    }

    #[test]
    fn known_symbol_tracks_its_baseline() {
        let gen = SyntheticQuotes::with_seed(2);
        let q = gen.quote("NVDA");
        assert!((q.last - 430.0).abs() <= 5.0);
    }

    #[test]
    fn derived_bid_ask_straddle_last() {
        let gen = SyntheticQuotes::with_seed(3);
        let q = gen.quote("SPY");
        assert!(q.bid < q.last + f64::EPSILON);
        assert!(q.ask > q.last - f64::EPSILON);
    }

    #[test]
    fn seeded_generators_are_reproducible() {
        let a = SyntheticQuotes::with_seed(42);
        let b = SyntheticQuotes::with_seed(42);
        let qa = a.quote("AAPL");
        let qb = b.quote("AAPL");
        assert_eq!(qa.last, qb.last);
        assert_eq!(qa.volume, qb.volume);
    }
}
