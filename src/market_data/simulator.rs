//! Synthetic market generator used in mock mode and for demo batches.
//!
//! Each symbol walks around its base price. Now and then a symbol switches
//! into one of two anomaly patterns for a few events:
//!
//! - manipulation: 3-8 events of escalating volume, aggressor side flipping
//!   every event, price oscillating around an anchor with shrinking
//!   amplitude, then one reversal event back through the anchor.
//! - insider: a one-way drift over several events ahead of a synthetic
//!   announcement, then a 2-5% gap with a volume spike at the event.
//!
//! Patterns start only while the anomalous share of everything generated so
//! far is under `1/anomaly_every`, so long runs settle near that ratio.
//! Generated trades carry no hint of which pattern produced them.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::trace;

use crate::engine::types::{Ohlc, Side, Snapshot, Symbol, Trade};
use crate::errors::SourceResult;
use crate::market_data::adapters::{MarketSource, SnapshotMap};
use crate::market_data::normaliser::Normaliser;

pub const DEFAULT_ANOMALY_EVERY: u32 = 10;

const WALK_SIGMA: f64 = 0.002;
const WALK_BAND: f64 = 0.15;
const VOLUME_MU: f64 = 8.7; // ln(~6000)
const VOLUME_SIGMA: f64 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pattern {
    Normal,
    Manipulation { step: u32, len: u32, anchor: f64, amplitude: f64, first: Side, base_volume: f64 },
    Insider { step: u32, lead: u32, direction: f64, gap: f64, base_volume: f64 },
}

#[derive(Debug, Clone, Copy)]
struct SymbolState {
    price: f64,
    pattern: Pattern,
}

pub struct Simulator {
    rng: StdRng,
    anomaly_every: u32,
    normaliser: Normaliser,
    states: [SymbolState; 3],
    generated: u64,
    anomalous: u64,
}

impl Simulator {
    pub fn new(anomaly_every: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let states = Symbol::ALL.map(|s| SymbolState { price: s.base_price(), pattern: Pattern::Normal });
        Self {
            rng,
            anomaly_every: anomaly_every.max(2),
            normaliser: Normaliser::default(),
            states,
            generated: 0,
            anomalous: 0,
        }
    }

    fn idx(symbol: Symbol) -> usize {
        match symbol {
            Symbol::Nifty50 => 0,
            Symbol::Sensex => 1,
            Symbol::BankNifty => 2,
        }
    }

    fn clamp_price(symbol: Symbol, price: f64) -> f64 {
        let base = symbol.base_price();
        price.clamp(base * (1.0 - WALK_BAND), base * (1.0 + WALK_BAND))
    }

    fn normal_volume(&mut self) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        (VOLUME_MU + VOLUME_SIGMA * z).exp()
    }

    fn random_side(&mut self) -> Side {
        if self.rng.gen_bool(0.5) {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    fn maybe_start_pattern(&mut self, i: usize) {
        if self.states[i].pattern != Pattern::Normal {
            return;
        }
        let below_share = self.anomalous * (self.anomaly_every as u64) < self.generated;
        if !below_share || !self.rng.gen_bool(0.5) {
            return;
        }
        let anchor = self.states[i].price;
        let base_volume = self.normal_volume();
        let pattern = if self.rng.gen_bool(0.5) {
            let first = self.random_side();
            Pattern::Manipulation {
                step: 0,
                len: self.rng.gen_range(3..=8),
                anchor,
                amplitude: anchor * self.rng.gen_range(0.003..0.006),
                first,
                base_volume,
            }
        } else {
            Pattern::Insider {
                step: 0,
                lead: self.rng.gen_range(4..=8),
                direction: if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 },
                gap: self.rng.gen_range(0.02..=0.05),
                base_volume,
            }
        };
        self.states[i].pattern = pattern;
        trace!(idx = i, ?pattern, "Pattern started");
    }

    /// Next trade for `symbol`, stamped `ts`.
    pub fn next_trade(&mut self, symbol: Symbol, ts: DateTime<Utc>) -> Trade {
        let i = Self::idx(symbol);
        self.generated += 1;
        self.maybe_start_pattern(i);

        let state = self.states[i];
        let (price, volume, side, next) = match state.pattern {
            Pattern::Normal => {
                let z: f64 = self.rng.sample(StandardNormal);
                let price = state.price * (1.0 + WALK_SIGMA * z);
                let volume = self.normal_volume();
                let side = if z >= 0.0 { Side::Buy } else { Side::Sell };
                (price, volume, side, Pattern::Normal)
            }
            Pattern::Manipulation { step, len, anchor, amplitude, first, base_volume } => {
                self.anomalous += 1;
                if step < len {
                    let side = if step % 2 == 0 { first } else { first.opposite() };
                    let price = anchor + side.sign() * amplitude / (step + 1) as f64;
                    let volume = base_volume * (3.0 + 2.0 * step as f64);
                    let next = Pattern::Manipulation { step: step + 1, len, anchor, amplitude, first, base_volume };
                    (price, volume, side, next)
                } else {
                    // reversal through the anchor, against the opening side
                    let side = first.opposite();
                    let price = anchor + side.sign() * amplitude * 0.5;
                    (price, base_volume * 1.5, side, Pattern::Normal)
                }
            }
            Pattern::Insider { step, lead, direction, gap, base_volume } => {
                self.anomalous += 1;
                let side = if direction > 0.0 { Side::Buy } else { Side::Sell };
                if step < lead {
                    let drift = 0.0025 + self.rng.gen_range(0.0..0.001);
                    let price = state.price * (1.0 + direction * drift);
                    let next = Pattern::Insider { step: step + 1, lead, direction, gap, base_volume };
                    (price, base_volume * 1.3, side, next)
                } else {
                    let price = state.price * (1.0 + direction * gap);
                    (price, base_volume * 4.0, side, Pattern::Normal)
                }
            }
        };

        let price = self.normaliser.round_price(Self::clamp_price(symbol, price));
        self.states[i] = SymbolState { price, pattern: next };
        Trade::new(symbol, price, volume.round().max(0.0) as u64, side, ts)
    }

    /// One snapshot per symbol, OHLC spanning the previous and new price.
    pub fn next_snapshots(&mut self, ts: DateTime<Utc>) -> SnapshotMap {
        let mut out = SnapshotMap::new();
        for symbol in Symbol::ALL {
            let open = self.states[Self::idx(symbol)].price;
            let trade = self.next_trade(symbol, ts);
            let close = trade.price;
            let ohlc = Ohlc { open, high: open.max(close), low: open.min(close), close };
            out.insert(symbol, Snapshot { trade, ohlc: Some(ohlc) });
        }
        out
    }

    /// `n` trades round-robin over the universe, newest first, spaced 5s apart.
    pub fn demo_trades(&mut self, n: usize, now: DateTime<Utc>) -> Vec<Trade> {
        (0..n)
            .map(|k| {
                let symbol = Symbol::ALL[k % Symbol::ALL.len()];
                self.next_trade(symbol, now - Duration::seconds(5 * k as i64))
            })
            .collect()
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Mock-mode market source.
pub struct SimulatedSource {
    sim: Mutex<Simulator>,
}

impl SimulatedSource {
    pub fn new(sim: Simulator) -> Self {
        Self { sim: Mutex::new(sim) }
    }
}

#[async_trait::async_trait]
impl MarketSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn fetch(&self) -> SourceResult<SnapshotMap> {
        Ok(self.sim.lock().next_snapshots(Utc::now()))
    }
}
