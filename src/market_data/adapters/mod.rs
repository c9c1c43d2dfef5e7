// Shared trait for market data sources

use std::collections::BTreeMap;

use serde::Serialize;

use crate::engine::types::{Snapshot, Symbol};
use crate::errors::SourceResult;

pub type SnapshotMap = BTreeMap<Symbol, Snapshot>;

/// Outcome of checking one symbol against a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolCheck {
    Success { data: Snapshot },
    NoData { error: String },
    Error { error: String },
}

/// Per-symbol connectivity report. Nothing here is fed into the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCheck {
    pub source: String,
    pub working: usize,
    pub symbols: BTreeMap<Symbol, SymbolCheck>,
}

impl SourceCheck {
    pub fn success(&self) -> bool {
        self.working > 0
    }
}

#[async_trait::async_trait]
pub trait MarketSource: Send + Sync {
    fn name(&self) -> &str;

    // One snapshot per symbol the source could produce this round.
    // Symbols it could not produce are simply absent.
    async fn fetch(&self) -> SourceResult<SnapshotMap>;

    /// One out-of-band fetch, reported per symbol.
    async fn check(&self) -> SourceCheck {
        let symbols: BTreeMap<Symbol, SymbolCheck> = match self.fetch().await {
            Ok(mut snaps) => Symbol::ALL
                .into_iter()
                .map(|s| {
                    let check = match snaps.remove(&s) {
                        Some(data) => SymbolCheck::Success { data },
                        None => SymbolCheck::NoData { error: format!("no data returned for {s}") },
                    };
                    (s, check)
                })
                .collect(),
            Err(e) => Symbol::ALL
                .into_iter()
                .map(|s| (s, SymbolCheck::Error { error: e.to_string() }))
                .collect(),
        };
        let working = symbols.values().filter(|c| matches!(c, SymbolCheck::Success { .. })).count();
        SourceCheck { source: self.name().to_string(), working, symbols }
    }
}

pub mod nse;
pub mod nse_types;
