//! Scoring capability plus the two reference heuristics shipped with the binary.
//!
//! The pipeline only ever sees `dyn AnomalyScorer`. The heuristics below keep a
//! short per-symbol rolling window and need no training; any model that maps a
//! trade to a suspicion score in [0, 1] can replace them.

use std::collections::VecDeque;

use ahash::AHashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::engine::types::{Side, Symbol, Trade};
use crate::errors::ScorerError;

pub trait AnomalyScorer: Send + Sync {
    fn name(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }

    /// Suspicion score for one trade. Values outside [0, 1] are clamped by the caller.
    fn score(&self, trade: &Trade) -> Result<f64, ScorerError>;
}

#[derive(Debug, Clone, Copy)]
struct Obs {
    price: f64,
    volume: f64,
    side: Side,
}

#[derive(Debug)]
struct Window {
    cap: usize,
    obs: VecDeque<Obs>,
}

impl Window {
    fn new(cap: usize) -> Self {
        Self { cap, obs: VecDeque::with_capacity(cap) }
    }

    fn push(&mut self, o: Obs) {
        if self.obs.len() == self.cap {
            self.obs.pop_front();
        }
        self.obs.push_back(o);
    }

    fn len(&self) -> usize {
        self.obs.len()
    }

    // log returns between consecutive observations, oldest first
    fn returns(&self) -> Vec<f64> {
        self.obs
            .iter()
            .zip(self.obs.iter().skip(1))
            .map(|(a, b)| if a.price > 0.0 && b.price > 0.0 { (b.price / a.price).ln() } else { 0.0 })
            .collect()
    }
}

fn mean_std(vals: &[f64]) -> (f64, f64) {
    if vals.is_empty() {
        return (0.0, 0.0);
    }
    let n = vals.len() as f64;
    let mean = vals.iter().sum::<f64>() / n;
    let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn ramp(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn validate_trade(name: &str, trade: &Trade) -> Result<(), ScorerError> {
    if !trade.price.is_finite() || trade.price <= 0.0 {
        return Err(ScorerError::Failed {
            scorer: name.to_string(),
            reason: format!("non-positive price {}", trade.price),
        });
    }
    Ok(())
}

/// Spoofing/layering signature: escalating volume bursts with the aggressor
/// side flipping back and forth.
pub struct ManipulationScorer {
    window: usize,
    warmup: usize,
    state: Mutex<AHashMap<Symbol, Window>>,
}

impl ManipulationScorer {
    pub const NAME: &'static str = "manipulation";

    pub fn new(window: usize) -> Self {
        let window = window.max(6);
        Self { window, warmup: 5, state: Mutex::new(AHashMap::new()) }
    }
}

impl Default for ManipulationScorer {
    fn default() -> Self {
        Self::new(20)
    }
}

impl AnomalyScorer for ManipulationScorer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn score(&self, trade: &Trade) -> Result<f64, ScorerError> {
        validate_trade(Self::NAME, trade)?;
        let mut state = self.state.lock();
        let w = state.entry(trade.symbol).or_insert_with(|| Window::new(self.window));

        // baseline excludes the current trade
        let history: Vec<f64> = w.obs.iter().map(|o| o.volume).collect();
        w.push(Obs { price: trade.price, volume: trade.volume as f64, side: trade.side });
        if history.len() < self.warmup {
            return Ok(0.0);
        }

        let (mean, std) = mean_std(&history);
        let vol_z = (trade.volume as f64 - mean) / std.max(1.0);
        let volume_spike = ramp(vol_z, 1.0, 4.0);

        let tail: Vec<&Obs> = w.obs.iter().rev().take(6).collect();
        let pairs = tail.len().saturating_sub(1).max(1) as f64;
        let flips = tail.windows(2).filter(|p| p[0].side != p[1].side).count() as f64;
        let alternation = flips / pairs;
        let rising = tail.windows(2).filter(|p| p[0].volume > p[1].volume).count() as f64;
        let escalation = rising / pairs;

        let score = 0.45 * volume_spike + 0.35 * alternation * escalation + 0.2 * alternation * volume_spike;
        trace!(symbol = %trade.symbol, vol_z, alternation, escalation, score, "manipulation score");
        Ok(score.clamp(0.0, 1.0))
    }
}

/// Informed-flow signature: persistent one-way drift followed by a gap.
pub struct InsiderScorer {
    window: usize,
    drift_len: usize,
    state: Mutex<AHashMap<Symbol, Window>>,
}

impl InsiderScorer {
    pub const NAME: &'static str = "insider";

    pub fn new(window: usize) -> Self {
        let window = window.max(12);
        Self { window, drift_len: 8, state: Mutex::new(AHashMap::new()) }
    }
}

impl Default for InsiderScorer {
    fn default() -> Self {
        Self::new(30)
    }
}

impl AnomalyScorer for InsiderScorer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn score(&self, trade: &Trade) -> Result<f64, ScorerError> {
        validate_trade(Self::NAME, trade)?;
        let mut state = self.state.lock();
        let w = state.entry(trade.symbol).or_insert_with(|| Window::new(self.window));
        w.push(Obs { price: trade.price, volume: trade.volume as f64, side: trade.side });
        if w.len() <= self.drift_len {
            return Ok(0.0);
        }

        let rets = w.returns();
        let (last, before) = match rets.split_last() {
            Some(split) => split,
            None => return Ok(0.0),
        };
        let (_, base_std) = mean_std(before);
        let base_std = base_std.max(1e-5);

        let drift: Vec<f64> = before.iter().rev().take(self.drift_len).copied().collect();
        let net: f64 = drift.iter().sum();
        let same_way = drift.iter().filter(|r| r.signum() == net.signum() && **r != 0.0).count() as f64
            / drift.len() as f64;
        let drift_t = net.abs() / (base_std * (drift.len() as f64).sqrt());
        let drift_score = ramp(drift_t, 1.0, 3.0) * ramp(same_way, 0.55, 0.9);

        let gap_z = last.abs() / base_std;
        let aligned = last.signum() == net.signum();
        let gap_score = if aligned { ramp(gap_z, 3.0, 8.0) } else { 0.5 * ramp(gap_z, 4.0, 10.0) };

        let score = (0.6 * drift_score + 0.6 * gap_score).max(drift_score * 0.7);
        trace!(symbol = %trade.symbol, drift_t, same_way, gap_z, score, "insider score");
        Ok(score.clamp(0.0, 1.0))
    }
}
