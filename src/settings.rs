//! Startup settings.
//!
//! Layered lowest to highest: built-in defaults, an optional TOML file, then
//! `SURVEIL_*` environment variables (`SURVEIL_SOURCE__URL` for nested keys).
//! CLI flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::errors::SettingsError;
use crate::market_data::adapters::nse::DEFAULT_NSE_URL;
use crate::market_data::simulator::DEFAULT_ANOMALY_EVERY;
use crate::pipeline::config::{validate_threshold, RuntimeConfig, DEFAULT_FETCH_INTERVAL, DEFAULT_RISK_THRESHOLD};
use crate::store::history::{DEFAULT_ALERT_CAPACITY, DEFAULT_TRADE_CAPACITY};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self { url: DEFAULT_NSE_URL.to_string(), timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub risk_threshold: f64,
    pub use_mock: bool,
    pub fetch_interval_secs: u64,
    pub trade_capacity: usize,
    pub alert_capacity: usize,
    pub anomaly_every: u32,
    pub seed: Option<u64>,
    pub demo_fallback: bool,
    pub metrics_port: u16,
    pub log_filter: String,
    pub source: SourceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            risk_threshold: DEFAULT_RISK_THRESHOLD,
            use_mock: false,
            fetch_interval_secs: DEFAULT_FETCH_INTERVAL.as_secs(),
            trade_capacity: DEFAULT_TRADE_CAPACITY,
            alert_capacity: DEFAULT_ALERT_CAPACITY,
            anomaly_every: DEFAULT_ANOMALY_EVERY,
            seed: None,
            demo_fallback: true,
            metrics_port: 9000,
            log_filter: "info".to_string(),
            source: SourceSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("surveil").required(false));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("SURVEIL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |field, reason: &str| Err(SettingsError::Invalid { field, reason: reason.to_string() });

        if let Err(e) = validate_threshold(self.risk_threshold) {
            return Err(SettingsError::Invalid { field: "risk_threshold", reason: e.to_string() });
        }
        if self.fetch_interval_secs == 0 {
            return invalid("fetch_interval_secs", "must be at least 1");
        }
        if self.trade_capacity == 0 {
            return invalid("trade_capacity", "must be at least 1");
        }
        if self.alert_capacity == 0 {
            return invalid("alert_capacity", "must be at least 1");
        }
        if self.anomaly_every < 2 {
            return invalid("anomaly_every", "must be at least 2");
        }
        if self.source.timeout_secs == 0 {
            return invalid("source.timeout_secs", "must be at least 1");
        }
        Ok(())
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            risk_threshold: self.risk_threshold,
            use_mock: self.use_mock,
            fetch_interval: self.fetch_interval(),
            version: 0,
        }
    }
}
