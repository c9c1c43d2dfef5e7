//! Bounded in-memory history shared by the fetch loop and the query path.
//!
//! Every buffer sits behind its own lock. Appends evict inside the same
//! critical section that inserts, and reads clone `Arc` handles out so the
//! writer is only held up for the copy.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::{error, trace};

use crate::engine::types::{Alert, EnrichedTrade, Snapshot, Symbol};
use crate::errors::PipelineError;
use crate::store::ring::RingBuffer;

pub const DEFAULT_TRADE_CAPACITY: usize = 25;
pub const DEFAULT_ALERT_CAPACITY: usize = 20;

#[derive(Debug)]
pub struct HistoryStore {
    trades: RwLock<RingBuffer<Arc<EnrichedTrade>>>,
    alerts: RwLock<RingBuffer<Alert>>,
    snapshots: RwLock<AHashMap<Symbol, Snapshot>>,
    total_trades: AtomicU64,
    total_alerts: AtomicU64,
}

impl HistoryStore {
    pub fn new(trade_capacity: usize, alert_capacity: usize) -> Self {
        Self {
            trades: RwLock::new(RingBuffer::with_capacity(trade_capacity)),
            alerts: RwLock::new(RingBuffer::with_capacity(alert_capacity)),
            snapshots: RwLock::new(AHashMap::new()),
            total_trades: AtomicU64::new(0),
            total_alerts: AtomicU64::new(0),
        }
    }

    pub fn append(&self, trade: Arc<EnrichedTrade>) -> Result<(), PipelineError> {
        let mut ring = self.trades.write();
        let evicted = ring.push(trade);
        check_bounds("trade", ring.len(), ring.capacity())?;
        drop(ring);
        self.total_trades.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = evicted {
            trace!(trade_id = %old.trade.trade_id, "Evicted trade");
        }
        Ok(())
    }

    pub fn append_alert(&self, alert: Alert) -> Result<(), PipelineError> {
        let mut ring = self.alerts.write();
        let evicted = ring.push(alert);
        check_bounds("alert", ring.len(), ring.capacity())?;
        drop(ring);
        self.total_alerts.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = evicted {
            trace!(trade_id = %old.trade.trade_id, "Evicted alert");
        }
        Ok(())
    }

    /// Last-write-wins per symbol.
    pub fn update_snapshot(&self, snapshot: Snapshot) {
        self.snapshots.write().insert(snapshot.symbol(), snapshot);
    }

    pub fn recent_trades(&self, n: usize) -> Vec<Arc<EnrichedTrade>> {
        self.trades.read().newest_first(n)
    }

    pub fn recent_alerts(&self, n: usize) -> Vec<Alert> {
        self.alerts.read().newest_first(n)
    }

    /// All current snapshots, ordered by symbol.
    pub fn snapshot(&self) -> BTreeMap<Symbol, Snapshot> {
        self.snapshots.read().iter().map(|(s, snap)| (*s, snap.clone())).collect()
    }

    pub fn snapshot_for(&self, symbol: Symbol) -> Option<Snapshot> {
        self.snapshots.read().get(&symbol).cloned()
    }

    pub fn len_trades(&self) -> usize {
        self.trades.read().len()
    }

    pub fn len_alerts(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn trade_capacity(&self) -> usize {
        self.trades.read().capacity()
    }

    pub fn alert_capacity(&self) -> usize {
        self.alerts.read().capacity()
    }

    pub fn total_appended(&self) -> u64 {
        self.total_trades.load(Ordering::Relaxed)
    }

    pub fn total_alerts(&self) -> u64 {
        self.total_alerts.load(Ordering::Relaxed)
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_TRADE_CAPACITY, DEFAULT_ALERT_CAPACITY)
    }
}

fn check_bounds(buffer: &'static str, len: usize, capacity: usize) -> Result<(), PipelineError> {
    if len > capacity {
        error!(buffer, len, capacity, "History buffer exceeded its capacity");
        return Err(PipelineError::InternalInvariant(format!(
            "{buffer} buffer holds {len} entries, capacity {capacity}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{RiskLevel, Side, Trade};
    use chrono::Utc;

    fn enriched(symbol: Symbol, price: f64) -> Arc<EnrichedTrade> {
        Arc::new(EnrichedTrade {
            trade: Trade::new(symbol, price, 100, Side::Buy, Utc::now()),
            manipulation_score: 0.1,
            insider_score: 0.2,
            latency_flag: false,
            risk_level: RiskLevel::Low,
        })
    }

    #[test]
    fn test_evicts_first_after_capacity_plus_one() {
        let store = HistoryStore::new(25, 20);
        let trades: Vec<_> = (0..26).map(|i| enriched(Symbol::Nifty50, 100.0 + i as f64)).collect();
        for t in &trades {
            store.append(Arc::clone(t)).unwrap();
        }
        assert_eq!(store.len_trades(), 25);
        let recent = store.recent_trades(25);
        assert!(recent.iter().all(|t| t.trade.trade_id != trades[0].trade.trade_id));
        let ids: Vec<_> = recent.iter().map(|t| t.trade.trade_id.clone()).collect();
        let expected: Vec<_> = trades[1..].iter().rev().map(|t| t.trade.trade_id.clone()).collect();
        assert_eq!(ids, expected);
        assert_eq!(store.total_appended(), 26);
    }

    #[test]
    fn test_recent_is_newest_first_and_idempotent() {
        let store = HistoryStore::default();
        for i in 0..5 {
            store.append(enriched(Symbol::Sensex, 80_000.0 + i as f64)).unwrap();
        }
        let a = store.recent_trades(3);
        let b = store.recent_trades(3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].trade.price, 80_004.0);
        assert_eq!(store.recent_trades(10).len(), 5);
    }

    #[test]
    fn test_alert_buffer_bounded() {
        let store = HistoryStore::new(5, 2);
        for i in 0..4 {
            store.append_alert(Alert::new(enriched(Symbol::BankNifty, i as f64 + 1.0))).unwrap();
        }
        let alerts = store.recent_alerts(10);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].trade.price, 4.0);
        assert_eq!(alerts[1].trade.price, 3.0);
        assert_eq!(store.total_alerts(), 4);
    }

    #[test]
    fn test_snapshot_last_write_wins() {
        let store = HistoryStore::default();
        assert!(store.snapshot().is_empty());
        let first = Trade::new(Symbol::Nifty50, 24_000.0, 1, Side::Buy, Utc::now());
        let second = Trade::new(Symbol::Nifty50, 24_100.0, 1, Side::Sell, Utc::now());
        store.update_snapshot(Snapshot::from_trade(first));
        store.update_snapshot(Snapshot::from_trade(second.clone()));
        store.update_snapshot(Snapshot::from_trade(Trade::new(Symbol::Sensex, 1.0, 1, Side::Buy, Utc::now())));
        let all = store.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&Symbol::Nifty50].trade, second);
        assert!(store.snapshot_for(Symbol::BankNifty).is_none());
    }

    #[test]
    fn test_concurrent_append_and_read() {
        let store = Arc::new(HistoryStore::new(25, 20));
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    store.append(enriched(Symbol::Nifty50, 1.0 + i as f64)).unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let recent = store.recent_trades(25);
                        assert!(recent.len() <= 25);
                        // newest first means strictly decreasing prices here
                        for pair in recent.windows(2) {
                            assert!(pair[0].trade.price > pair[1].trade.price);
                        }
                        for t in &recent {
                            assert_eq!(t.risk_level, RiskLevel::Low);
                            assert!(t.trade.trade_id.starts_with("NIFTY50_"));
                        }
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.len_trades(), 25);
    }
}
