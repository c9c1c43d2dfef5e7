use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::engine::scorer::AnomalyScorer;
use crate::engine::types::{Alert, EnrichedTrade, RiskLevel, Trade};
use crate::errors::ScorerError;
use crate::pipeline::config::RuntimeConfig;

/// Trades older than this when enriched get `latency_flag` set.
pub const LATENCY_LIMIT_MS: i64 = 100;

/// Result of enriching one raw trade. `alert` is set only when the combined
/// score reached the configured risk threshold.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub trade: Arc<EnrichedTrade>,
    pub alert: Option<Alert>,
}

/// Pure enrichment step. Scorer failures never abort it: they score 0.
pub fn enrich(
    trade: Trade,
    manipulation: &dyn AnomalyScorer,
    insider: &dyn AnomalyScorer,
    config: &RuntimeConfig,
    now: DateTime<Utc>,
) -> Enrichment {
    let manipulation_score = safe_score(manipulation, &trade);
    let insider_score = safe_score(insider, &trade);

    let latency_flag = (now - trade.timestamp).num_milliseconds() > LATENCY_LIMIT_MS;
    let combined = manipulation_score.max(insider_score);
    let risk_level = RiskLevel::from_score(combined);
    let alerting = combined >= config.risk_threshold;

    debug!(
        trade_id = %trade.trade_id,
        symbol = %trade.symbol,
        manipulation_score,
        insider_score,
        latency_flag,
        risk = risk_level.as_str(),
        alerting,
        "Enriched trade"
    );

    let enriched = Arc::new(EnrichedTrade {
        trade,
        manipulation_score,
        insider_score,
        latency_flag,
        risk_level,
    });
    let alert = alerting.then(|| Alert::new(Arc::clone(&enriched)));
    Enrichment { trade: enriched, alert }
}

fn safe_score(scorer: &dyn AnomalyScorer, trade: &Trade) -> f64 {
    let err = match scorer.score(trade) {
        Ok(v) if v.is_finite() => return v.clamp(0.0, 1.0),
        Ok(_) => ScorerError::NonFinite { scorer: scorer.name().to_string() },
        Err(e) => e,
    };
    warn!(scorer = scorer.name(), trade_id = %trade.trade_id, error = %err, "Scoring failed, using 0");
    metrics::counter!("surveil_scorer_errors_total", "scorer" => scorer.name().to_string()).increment(1);
    0.0
}

/// Holds the two scoring capabilities used by every enrichment.
#[derive(Clone)]
pub struct Enricher {
    manipulation: Arc<dyn AnomalyScorer>,
    insider: Arc<dyn AnomalyScorer>,
}

impl Enricher {
    pub fn new(manipulation: Arc<dyn AnomalyScorer>, insider: Arc<dyn AnomalyScorer>) -> Self {
        Self { manipulation, insider }
    }

    #[instrument(level = "trace", skip_all, fields(symbol = %trade.symbol))]
    pub fn enrich(&self, trade: Trade, config: &RuntimeConfig) -> Enrichment {
        enrich(trade, self.manipulation.as_ref(), self.insider.as_ref(), config, Utc::now())
    }

    pub fn scorers_ready(&self) -> bool {
        self.manipulation.is_ready() && self.insider.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{Side, Symbol};
    use chrono::Duration;
    use proptest::prelude::*;

    struct Fixed(f64);

    impl AnomalyScorer for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn score(&self, _trade: &Trade) -> Result<f64, ScorerError> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl AnomalyScorer for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn is_ready(&self) -> bool {
            false
        }
        fn score(&self, _trade: &Trade) -> Result<f64, ScorerError> {
            Err(ScorerError::NotReady("broken".into()))
        }
    }

    fn cfg(threshold: f64) -> RuntimeConfig {
        RuntimeConfig { risk_threshold: threshold, ..RuntimeConfig::default() }
    }

    fn trade_at(ts: DateTime<Utc>) -> Trade {
        Trade::new(Symbol::Nifty50, 24_500.0, 3_000, Side::Buy, ts)
    }

    #[test]
    fn test_threshold_gates_alert_bands_label() {
        let now = Utc::now();
        let e = enrich(trade_at(now), &Fixed(0.75), &Fixed(0.1), &cfg(0.8), now);
        assert!(e.alert.is_none());
        assert_eq!(e.trade.risk_level, RiskLevel::Medium);

        let e = enrich(trade_at(now), &Fixed(0.75), &Fixed(0.1), &cfg(0.7), now);
        let alert = e.alert.expect("0.75 crosses 0.7");
        assert_eq!(alert.trade.trade_id, e.trade.trade.trade_id);
        assert_eq!(alert.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_low_threshold_alerts_low_band() {
        let now = Utc::now();
        let e = enrich(trade_at(now), &Fixed(0.3), &Fixed(0.2), &cfg(0.25), now);
        assert_eq!(e.trade.risk_level, RiskLevel::Low);
        assert!(e.alert.is_some());
    }

    #[test]
    fn test_scorer_error_scores_zero() {
        let now = Utc::now();
        let e = enrich(trade_at(now), &Broken, &Fixed(0.9), &cfg(0.7), now);
        assert_eq!(e.trade.manipulation_score, 0.0);
        assert_eq!(e.trade.insider_score, 0.9);
        assert_eq!(e.trade.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_non_finite_and_out_of_range() {
        let now = Utc::now();
        let e = enrich(trade_at(now), &Fixed(f64::NAN), &Fixed(f64::INFINITY), &cfg(0.7), now);
        assert_eq!(e.trade.manipulation_score, 0.0);
        assert_eq!(e.trade.insider_score, 0.0);
        assert!(e.alert.is_none());

        let e = enrich(trade_at(now), &Fixed(1.7), &Fixed(-0.2), &cfg(0.7), now);
        assert_eq!(e.trade.manipulation_score, 1.0);
        assert_eq!(e.trade.insider_score, 0.0);
    }

    #[test]
    fn test_latency_flag_does_not_move_risk() {
        let now = Utc::now();
        let fresh = enrich(trade_at(now - Duration::milliseconds(100)), &Fixed(0.5), &Fixed(0.1), &cfg(0.7), now);
        assert!(!fresh.trade.latency_flag);
        let stale = enrich(trade_at(now - Duration::milliseconds(101)), &Fixed(0.5), &Fixed(0.1), &cfg(0.7), now);
        assert!(stale.trade.latency_flag);
        assert_eq!(fresh.trade.risk_level, stale.trade.risk_level);
        // timestamps from the future are not late
        let ahead = enrich(trade_at(now + Duration::seconds(5)), &Fixed(0.5), &Fixed(0.1), &cfg(0.7), now);
        assert!(!ahead.trade.latency_flag);
    }

    #[test]
    fn test_enricher_readiness() {
        let ok = Enricher::new(Arc::new(Fixed(0.1)), Arc::new(Fixed(0.2)));
        assert!(ok.scorers_ready());
        let not = Enricher::new(Arc::new(Fixed(0.1)), Arc::new(Broken));
        assert!(!not.scorers_ready());
    }

    proptest! {
        #[test]
        fn scores_in_unit_range_and_risk_is_pure(m in -5.0f64..5.0, i in -5.0f64..5.0, th in 0.0f64..=1.0) {
            let now = Utc::now();
            let e = enrich(trade_at(now), &Fixed(m), &Fixed(i), &cfg(th), now);
            prop_assert!((0.0..=1.0).contains(&e.trade.manipulation_score));
            prop_assert!((0.0..=1.0).contains(&e.trade.insider_score));
            prop_assert_eq!(e.trade.risk_level, RiskLevel::from_score(e.trade.combined_score()));
            prop_assert_eq!(e.alert.is_some(), e.trade.combined_score() >= th);
        }
    }
}
