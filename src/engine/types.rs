use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1.0 for buys, -1.0 for sells
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// The fixed universe of monitored indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Symbol {
    #[serde(rename = "NIFTY 50")]
    Nifty50,
    #[serde(rename = "SENSEX")]
    Sensex,
    #[serde(rename = "BANKNIFTY")]
    BankNifty,
}

impl Symbol {
    pub const ALL: [Symbol; 3] = [Symbol::Nifty50, Symbol::Sensex, Symbol::BankNifty];

    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::Nifty50 => "NIFTY 50",
            Symbol::Sensex => "SENSEX",
            Symbol::BankNifty => "BANKNIFTY",
        }
    }

    /// Space-free form used inside trade ids.
    pub fn code(&self) -> &'static str {
        match self {
            Symbol::Nifty50 => "NIFTY50",
            Symbol::Sensex => "SENSEX",
            Symbol::BankNifty => "BANKNIFTY",
        }
    }

    /// Reference level the simulator walks around.
    pub fn base_price(&self) -> f64 {
        match self {
            Symbol::Nifty50 => 24_579.0,
            Symbol::Sensex => 80_157.0,
            Symbol::BankNifty => 53_661.0,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Symbol {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();
        match key.as_str() {
            "NIFTY50" | "NIFTY" => Ok(Symbol::Nifty50),
            "SENSEX" => Ok(Symbol::Sensex),
            "BANKNIFTY" | "NIFTYBANK" => Ok(Symbol::BankNifty),
            _ => Err(QueryError::UnknownSymbol(s.to_string())),
        }
    }
}

// Raw trade as produced by a market source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub symbol: Symbol,
    pub price: f64,
    pub volume: u64,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    pub fn new(symbol: Symbol, price: f64, volume: u64, side: Side, timestamp: DateTime<Utc>) -> Self {
        Self {
            trade_id: format!("{}_{}", symbol.code(), Uuid::new_v4().simple()),
            symbol,
            price,
            volume,
            side,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Latest known quote for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub trade: Trade,
    #[serde(flatten)]
    pub ohlc: Option<Ohlc>,
}

impl Snapshot {
    pub fn from_trade(trade: Trade) -> Self {
        Self { trade, ohlc: None }
    }

    pub fn symbol(&self) -> Symbol {
        self.trade.symbol
    }
}

pub const HIGH_RISK_BAND: f64 = 0.8;
pub const MEDIUM_RISK_BAND: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Fixed display bands. Alerting is gated separately by the configured threshold.
    pub fn from_score(combined: f64) -> Self {
        if combined >= HIGH_RISK_BAND {
            RiskLevel::High
        } else if combined >= MEDIUM_RISK_BAND {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTrade {
    #[serde(flatten)]
    pub trade: Trade,
    pub manipulation_score: f64,
    pub insider_score: f64,
    pub latency_flag: bool,
    pub risk_level: RiskLevel,
}

impl EnrichedTrade {
    pub fn combined_score(&self) -> f64 {
        self.manipulation_score.max(self.insider_score)
    }
}

/// View over an enriched trade that crossed the risk threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Alert(Arc<EnrichedTrade>);

impl Alert {
    pub fn new(trade: Arc<EnrichedTrade>) -> Self {
        Self(trade)
    }

    pub fn trade(&self) -> &Arc<EnrichedTrade> {
        &self.0
    }
}

impl Deref for Alert {
    type Target = EnrichedTrade;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_symbol_parse() {
        assert_eq!("NIFTY 50".parse::<Symbol>().unwrap(), Symbol::Nifty50);
        assert_eq!("nifty50".parse::<Symbol>().unwrap(), Symbol::Nifty50);
        assert_eq!("BankNifty".parse::<Symbol>().unwrap(), Symbol::BankNifty);
        assert_eq!("NIFTY BANK".parse::<Symbol>().unwrap(), Symbol::BankNifty);
        assert_eq!("sensex".parse::<Symbol>().unwrap(), Symbol::Sensex);
        assert!(matches!("DOW".parse::<Symbol>(), Err(QueryError::UnknownSymbol(_))));
    }

    #[test]
    fn test_symbol_serde_uses_display_name() {
        let json = serde_json::to_string(&Symbol::Nifty50).unwrap();
        assert_eq!(json, "\"NIFTY 50\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Symbol::Nifty50);
    }

    #[test]
    fn test_risk_bands() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.5999), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.7999), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.8), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::High);
    }

    #[test]
    fn test_trade_ids_unique() {
        let now = Utc::now();
        let a = Trade::new(Symbol::Sensex, 80_000.0, 10, Side::Buy, now);
        let b = Trade::new(Symbol::Sensex, 80_000.0, 10, Side::Buy, now);
        assert_ne!(a.trade_id, b.trade_id);
        assert!(a.trade_id.starts_with("SENSEX_"));
    }

    #[test]
    fn test_enriched_trade_flattens() {
        let trade = Trade::new(Symbol::BankNifty, 53_600.0, 1200, Side::Sell, Utc::now());
        let enriched = EnrichedTrade {
            trade,
            manipulation_score: 0.4,
            insider_score: 0.9,
            latency_flag: false,
            risk_level: RiskLevel::High,
        };
        let v = serde_json::to_value(Alert::new(Arc::new(enriched))).unwrap();
        assert_eq!(v["symbol"], "BANKNIFTY");
        assert_eq!(v["risk_level"], "HIGH");
        assert_eq!(v["side"], "SELL");
        assert!(v.get("trade").is_none());
    }

    proptest! {
        #[test]
        fn risk_level_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(RiskLevel::from_score(lo) <= RiskLevel::from_score(hi));
        }
    }
}
