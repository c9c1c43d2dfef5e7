use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::errors::{QueryError, QueryResult};

pub const DEFAULT_RISK_THRESHOLD: f64 = 0.7;
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(60);

/// Process-wide runtime settings. Never mutated in place: writers publish a
/// new value with a bumped `version`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeConfig {
    pub risk_threshold: f64,
    pub use_mock: bool,
    #[serde(with = "duration_secs")]
    pub fetch_interval: Duration,
    pub version: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            risk_threshold: DEFAULT_RISK_THRESHOLD,
            use_mock: false,
            fetch_interval: DEFAULT_FETCH_INTERVAL,
            version: 0,
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

pub fn validate_threshold(value: f64) -> QueryResult<f64> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(QueryError::InvalidConfig(format!("threshold must be between 0.0 and 1.0, got {value}")))
    }
}

/// Single synchronization point for the runtime config. Readers get an
/// `Arc` snapshot that stays consistent for as long as they hold it.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<RuntimeConfig>>>,
}

impl ConfigHandle {
    pub fn new(initial: RuntimeConfig) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(initial))) }
    }

    pub fn snapshot(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.inner.read())
    }

    pub fn set_risk_threshold(&self, value: f64) -> QueryResult<Arc<RuntimeConfig>> {
        let value = validate_threshold(value)?;
        let updated = self.update(|c| c.risk_threshold = value);
        info!(threshold = value, version = updated.version, "Risk threshold updated");
        Ok(updated)
    }

    /// `None` flips the current mode. Returns the mode now in effect.
    pub fn set_mock_mode(&self, enabled: Option<bool>) -> bool {
        let updated = self.update(|c| c.use_mock = enabled.unwrap_or(!c.use_mock));
        info!(mock = updated.use_mock, version = updated.version, "Mock mode updated");
        updated.use_mock
    }

    fn update(&self, f: impl FnOnce(&mut RuntimeConfig)) -> Arc<RuntimeConfig> {
        let mut guard = self.inner.write();
        let mut next = RuntimeConfig::clone(&guard);
        f(&mut next);
        next.version = guard.version + 1;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        next
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
