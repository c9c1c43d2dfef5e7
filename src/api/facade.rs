//! Read/write surface used by the HTTP layer.
//!
//! Reads copy out of the store and never block on upstream I/O. When the
//! buffers are still empty a small demonstration batch is synthesised on the
//! fly (never stored), so dashboards have something to draw before the first
//! cycle lands.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::enricher::Enricher;
use crate::engine::types::{Alert, EnrichedTrade, RiskLevel, Symbol, Trade};
use crate::errors::{QueryError, QueryResult};
use crate::market_data::adapters::{MarketSource, SnapshotMap, SourceCheck};
use crate::market_data::simulator::Simulator;
use crate::pipeline::config::ConfigHandle;
use crate::pipeline::scheduler::SchedulerStatus;
use crate::store::history::HistoryStore;

pub const DEMO_TRADES: usize = 25;
pub const DEMO_ALERTS: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub healthy: bool,
    pub scorers_ready: bool,
    pub fetcher_active: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub queue_size: usize,
    pub alert_count: usize,
    pub symbols: Vec<&'static str>,
    pub risk_threshold: f64,
    pub mock_mode: bool,
    pub fetch_running: bool,
    pub consecutive_failures: u64,
    pub cycles_completed: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub config_version: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct QueryFacade {
    store: Arc<HistoryStore>,
    config: ConfigHandle,
    enricher: Enricher,
    scheduler: Arc<SchedulerStatus>,
    live: Arc<dyn MarketSource>,
    // None disables the demo fallback
    demo: Option<Mutex<Simulator>>,
}

impl QueryFacade {
    pub fn new(
        store: Arc<HistoryStore>,
        config: ConfigHandle,
        enricher: Enricher,
        scheduler: Arc<SchedulerStatus>,
        live: Arc<dyn MarketSource>,
        demo: Option<Simulator>,
    ) -> Self {
        Self { store, config, enricher, scheduler, live, demo: demo.map(Mutex::new) }
    }

    pub fn health(&self) -> Health {
        let scorers_ready = self.enricher.scorers_ready();
        Health {
            healthy: scorers_ready && !self.scheduler.is_faulted(),
            scorers_ready,
            fetcher_active: self.scheduler.is_running(),
            timestamp: Utc::now(),
        }
    }

    pub fn status(&self) -> Status {
        let cfg = self.config.snapshot();
        Status {
            queue_size: self.store.len_trades(),
            alert_count: self.store.len_alerts(),
            symbols: Symbol::ALL.iter().map(Symbol::as_str).collect(),
            risk_threshold: cfg.risk_threshold,
            mock_mode: cfg.use_mock,
            fetch_running: self.scheduler.is_running(),
            consecutive_failures: self.scheduler.consecutive_failures(),
            cycles_completed: self.scheduler.cycles_completed(),
            last_success: self.scheduler.last_success(),
            config_version: cfg.version,
            timestamp: Utc::now(),
        }
    }

    /// All snapshots, or just the one for `symbol`.
    pub fn latest_snapshot(&self, symbol: Option<&str>) -> QueryResult<SnapshotMap> {
        let wanted = symbol.map(str::parse::<Symbol>).transpose()?;
        if let Some(snap) = wanted.and_then(|s| self.store.snapshot_for(s)) {
            return Ok(SnapshotMap::from([(snap.symbol(), snap)]));
        }
        let mut all = self.store.snapshot();
        if all.is_empty() {
            if let Some(sim) = &self.demo {
                debug!("Store empty, serving synthetic snapshots");
                all = sim.lock().next_snapshots(Utc::now());
            }
        }
        match wanted {
            None => Ok(all),
            Some(s) => all
                .remove(&s)
                .map(|snap| SnapshotMap::from([(s, snap)]))
                .ok_or_else(|| QueryError::UnknownSymbol(s.to_string())),
        }
    }

    /// Newest first, at most `limit`.
    pub fn recent_trades(&self, limit: usize) -> Vec<Arc<EnrichedTrade>> {
        let trades = self.store.recent_trades(limit);
        if !trades.is_empty() || limit == 0 {
            return trades;
        }
        let Some(sim) = &self.demo else {
            return trades;
        };
        let mut sim = sim.lock();
        let batch = sim.demo_trades(DEMO_TRADES.min(limit), Utc::now());
        batch
            .into_iter()
            .map(|t| {
                let (m, i) = (sim.rng().gen_range(0.0..1.0), sim.rng().gen_range(0.0..1.0));
                Arc::new(demo_enriched(t, m, i))
            })
            .collect()
    }

    /// Newest first, at most `limit`.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let alerts = self.store.recent_alerts(limit);
        if !alerts.is_empty() || limit == 0 {
            return alerts;
        }
        let Some(sim) = &self.demo else {
            return alerts;
        };
        // demo alerts still have to clear the live threshold
        let threshold = self.config.snapshot().risk_threshold;
        let floor = threshold.max(0.65).min(1.0);
        let ceil = floor.max(0.95);
        let mut sim = sim.lock();
        let batch = sim.demo_trades(DEMO_ALERTS.min(limit), Utc::now());
        batch
            .into_iter()
            .map(|t| {
                let score = if floor < ceil { sim.rng().gen_range(floor..=ceil) } else { floor };
                let (m, i) = if sim.rng().gen_bool(0.5) { (score, score * 0.5) } else { (score * 0.5, score) };
                Alert::new(Arc::new(demo_enriched(t, m, i)))
            })
            .collect()
    }

    /// Fetch once from the live source and report per symbol. The result
    /// is not recorded anywhere.
    pub async fn check_live_source(&self) -> SourceCheck {
        let check = self.live.check().await;
        info!(source = %check.source, working = check.working, "Live source check");
        check
    }

    pub fn set_risk_threshold(&self, value: f64) -> QueryResult<f64> {
        Ok(self.config.set_risk_threshold(value)?.risk_threshold)
    }

    pub fn set_mock_mode(&self, enabled: Option<bool>) -> bool {
        self.config.set_mock_mode(enabled)
    }
}

fn demo_enriched(trade: Trade, manipulation_score: f64, insider_score: f64) -> EnrichedTrade {
    EnrichedTrade {
        trade,
        manipulation_score,
        insider_score,
        latency_flag: false,
        risk_level: RiskLevel::from_score(manipulation_score.max(insider_score)),
    }
}
