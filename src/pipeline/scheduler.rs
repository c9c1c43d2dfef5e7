//! Timer-driven fetch loop.
//!
//! Each tick takes one config snapshot, pulls from the live or mock source,
//! scores everything, and only then commits to the history store. The commit
//! has no await points, so a shutdown either drops the cycle before it
//! touches the store or lets it finish.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::engine::enricher::{Enricher, Enrichment};
use crate::engine::types::Snapshot;
use crate::errors::PipelineError;
use crate::market_data::adapters::MarketSource;
use crate::pipeline::config::ConfigHandle;
use crate::store::history::HistoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchState {
    Idle,
    Fetching,
}

/// Observability counters shared with the query side.
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    running: AtomicBool,
    fetching: AtomicBool,
    faulted: AtomicBool,
    consecutive_failures: AtomicU64,
    cycles_completed: AtomicU64,
    last_success_ms: AtomicI64,
}

impl SchedulerStatus {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn state(&self) -> FetchState {
        if self.fetching.load(Ordering::Acquire) {
            FetchState::Fetching
        } else {
            FetchState::Idle
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Committed { trades: usize, alerts: usize },
    SourceFailed,
}

pub struct FetchScheduler {
    live: Arc<dyn MarketSource>,
    mock: Arc<dyn MarketSource>,
    enricher: Enricher,
    store: Arc<HistoryStore>,
    config: ConfigHandle,
    status: Arc<SchedulerStatus>,
}

impl FetchScheduler {
    pub fn new(
        live: Arc<dyn MarketSource>,
        mock: Arc<dyn MarketSource>,
        enricher: Enricher,
        store: Arc<HistoryStore>,
        config: ConfigHandle,
    ) -> Self {
        Self { live, mock, enricher, store, config, status: Arc::new(SchedulerStatus::default()) }
    }

    pub fn status(&self) -> Arc<SchedulerStatus> {
        Arc::clone(&self.status)
    }

    /// One IDLE -> FETCHING -> IDLE pass. Source failures are absorbed here;
    /// only a store invariant violation comes back as an error.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleOutcome, PipelineError> {
        let cfg = self.config.snapshot();
        let source = if cfg.use_mock { &self.mock } else { &self.live };

        self.status.fetching.store(true, Ordering::Release);
        let fetched = source.fetch().await;
        self.status.fetching.store(false, Ordering::Release);

        let snaps = match fetched {
            Ok(snaps) => snaps,
            Err(e) => {
                let failures = self.status.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(source = source.name(), error = %e, failures, "Fetch failed, keeping previous snapshots");
                metrics::counter!("surveil_fetch_failures_total").increment(1);
                metrics::gauge!("surveil_consecutive_fetch_failures").set(failures as f64);
                return Ok(CycleOutcome::SourceFailed);
            }
        };

        let batch: Vec<(Snapshot, Enrichment)> = snaps
            .into_values()
            .map(|snap| {
                let enrichment = self.enricher.enrich(snap.trade.clone(), &cfg);
                (snap, enrichment)
            })
            .collect();

        let outcome = self.commit(batch)?;
        debug!(source = source.name(), config_version = cfg.version, ?outcome, "Cycle committed");
        Ok(outcome)
    }

    fn commit(&self, batch: Vec<(Snapshot, Enrichment)>) -> Result<CycleOutcome, PipelineError> {
        let trades = batch.len();
        let mut alerts = 0;
        for (snap, enrichment) in batch {
            let risk = enrichment.trade.risk_level;
            self.store.append(enrichment.trade)?;
            if let Some(alert) = enrichment.alert {
                info!(
                    trade_id = %alert.trade.trade_id,
                    symbol = %alert.trade.symbol,
                    risk = risk.as_str(),
                    score = alert.combined_score(),
                    "Risk alert"
                );
                self.store.append_alert(alert)?;
                metrics::counter!("surveil_alerts_total", "risk_level" => risk.as_str()).increment(1);
                alerts += 1;
            }
            self.store.update_snapshot(snap);
        }

        metrics::counter!("surveil_trades_enriched_total").increment(trades as u64);
        metrics::gauge!("surveil_consecutive_fetch_failures").set(0.0);
        self.status.consecutive_failures.store(0, Ordering::Relaxed);
        self.status.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.status.last_success_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        Ok(CycleOutcome::Committed { trades, alerts })
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        let period = self.config.snapshot().fetch_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.status.running.store(true, Ordering::Release);
        info!(interval_secs = period.as_secs_f64(), "Fetch scheduler started");

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                _ = shutdown.changed() => break Ok(()),
                _ = ticker.tick() => {}
            }
            let cycle = tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown during fetch, abandoning cycle");
                    break Ok(());
                }
                r = self.run_cycle() => r,
            };
            if let Err(e) = cycle {
                error!(error = %e, "Fatal pipeline error, stopping scheduler");
                self.status.faulted.store(true, Ordering::Release);
                break Err(e);
            }
        };

        self.status.fetching.store(false, Ordering::Release);
        self.status.running.store(false, Ordering::Release);
        info!("Fetch scheduler stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scorer::AnomalyScorer;
    use crate::engine::types::{Side, Symbol, Trade};
    use crate::errors::{ScorerError, SourceError, SourceResult};
    use crate::market_data::adapters::SnapshotMap;
    use crate::pipeline::config::RuntimeConfig;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Fixed(f64);

    impl AnomalyScorer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn score(&self, _t: &Trade) -> Result<f64, ScorerError> {
            Ok(self.0)
        }
    }

    /// Plays back a queue of results; errors once the queue is empty.
    struct Scripted {
        name: &'static str,
        script: Mutex<VecDeque<SourceResult<SnapshotMap>>>,
        calls: AtomicU64,
    }

    impl Scripted {
        fn new(name: &'static str, script: Vec<SourceResult<SnapshotMap>>) -> Arc<Self> {
            Arc::new(Self { name, script: Mutex::new(script.into()), calls: AtomicU64::new(0) })
        }
    }

    #[async_trait::async_trait]
    impl MarketSource for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        async fn fetch(&self) -> SourceResult<SnapshotMap> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.script.lock().pop_front().unwrap_or(Err(SourceError::Empty))
        }
    }

    fn snaps(price: f64) -> SnapshotMap {
        Symbol::ALL
            .into_iter()
            .map(|s| (s, Snapshot::from_trade(Trade::new(s, price, 100, Side::Buy, Utc::now()))))
            .collect()
    }

    fn scheduler(live: Arc<Scripted>, mock: Arc<Scripted>, score: f64, cfg: RuntimeConfig) -> FetchScheduler {
        FetchScheduler::new(
            live,
            mock,
            Enricher::new(Arc::new(Fixed(score)), Arc::new(Fixed(0.0))),
            Arc::new(HistoryStore::new(25, 20)),
            ConfigHandle::new(cfg),
        )
    }

    #[tokio::test]
    async fn test_cycle_commits_trades_alerts_and_snapshots() {
        let live = Scripted::new("live", vec![Ok(snaps(100.0))]);
        let s = scheduler(live, Scripted::new("mock", vec![]), 0.9, RuntimeConfig::default());
        let out = s.run_cycle().await.unwrap();
        assert_eq!(out, CycleOutcome::Committed { trades: 3, alerts: 3 });
        assert_eq!(s.store.len_trades(), 3);
        assert_eq!(s.store.len_alerts(), 3);
        assert_eq!(s.store.snapshot().len(), 3);
        assert_eq!(s.status.cycles_completed(), 1);
        assert!(s.status.last_success().is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_snapshot() {
        let live = Scripted::new(
            "live",
            vec![Ok(snaps(100.0)), Err(SourceError::Transport("reset".into())), Err(SourceError::Empty)],
        );
        let s = scheduler(live, Scripted::new("mock", vec![]), 0.1, RuntimeConfig::default());
        s.run_cycle().await.unwrap();
        let before = s.store.snapshot();

        assert_eq!(s.run_cycle().await.unwrap(), CycleOutcome::SourceFailed);
        assert_eq!(s.run_cycle().await.unwrap(), CycleOutcome::SourceFailed);
        assert_eq!(s.store.snapshot(), before);
        assert_eq!(s.store.len_trades(), 3);
        assert_eq!(s.status.consecutive_failures(), 2);
        assert_eq!(s.status.state(), FetchState::Idle);
    }

    #[tokio::test]
    async fn test_partial_fetch_retains_missing_symbols() {
        let mut partial = SnapshotMap::new();
        partial.insert(
            Symbol::Sensex,
            Snapshot::from_trade(Trade::new(Symbol::Sensex, 200.0, 1, Side::Sell, Utc::now())),
        );
        let live = Scripted::new("live", vec![Ok(snaps(100.0)), Ok(partial)]);
        let s = scheduler(live, Scripted::new("mock", vec![]), 0.1, RuntimeConfig::default());
        s.run_cycle().await.unwrap();
        s.run_cycle().await.unwrap();
        let all = s.store.snapshot();
        assert_eq!(all.len(), 3);
        assert_eq!(all[&Symbol::Sensex].trade.price, 200.0);
        assert_eq!(all[&Symbol::Nifty50].trade.price, 100.0);
    }

    #[tokio::test]
    async fn test_mock_toggle_applies_next_cycle() {
        let live = Scripted::new("live", vec![Ok(snaps(1.0)), Ok(snaps(1.0))]);
        let mock = Scripted::new("mock", vec![Ok(snaps(2.0))]);
        let s = scheduler(Arc::clone(&live), Arc::clone(&mock), 0.1, RuntimeConfig::default());
        s.run_cycle().await.unwrap();
        s.config.set_mock_mode(Some(true));
        s.run_cycle().await.unwrap();
        assert_eq!(live.calls.load(Ordering::Relaxed), 1);
        assert_eq!(mock.calls.load(Ordering::Relaxed), 1);
        assert_eq!(s.store.snapshot()[&Symbol::Nifty50].trade.price, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_going_through_failures_and_stops_cleanly() {
        let live = Scripted::new("live", vec![Ok(snaps(100.0))]);
        let cfg = RuntimeConfig { fetch_interval: Duration::from_secs(1), ..RuntimeConfig::default() };
        let s = scheduler(Arc::clone(&live), Scripted::new("mock", vec![]), 0.1, cfg);
        let status = s.status();
        let store = Arc::clone(&s.store);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(s.run(rx));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(status.is_running());
        assert!(status.consecutive_failures() >= 2);
        assert_eq!(store.snapshot().len(), 3);
        assert!(live.calls.load(Ordering::Relaxed) >= 3);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert!(!status.is_running());
        assert!(!status.is_faulted());
        assert_eq!(store.len_trades(), 3);
    }
}
