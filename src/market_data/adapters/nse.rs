// NSE index-quote adapter: one REST call per cycle, one snapshot per symbol

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::nse_types::{AllIndices, IndexQuote};
use super::{MarketSource, SnapshotMap};
use crate::engine::types::{Ohlc, Side, Snapshot, Symbol, Trade};
use crate::errors::{SourceError, SourceResult};
use crate::market_data::normaliser::{Normaliser, WireNumber};

pub const DEFAULT_NSE_URL: &str = "https://www.nseindia.com/api/allIndices";

// NSE rejects requests without a browser-like agent
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub struct NseIndexSource {
    pub url: String,
    client: reqwest::Client,
    normaliser: Normaliser,
}

impl NseIndexSource {
    pub fn new(url: &str, timeout: Duration) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self { url: url.to_string(), client, normaliser: Normaliser::default() })
    }

    // Row names to try, in order, for each symbol
    fn row_names(symbol: Symbol) -> &'static [&'static str] {
        match symbol {
            Symbol::Nifty50 => &["NIFTY 50"],
            Symbol::Sensex => &["SENSEX"],
            Symbol::BankNifty => &["BANKNIFTY", "NIFTY BANK"],
        }
    }

    /// Map a decoded response onto our symbol universe. Rows that are missing
    /// or unparseable are skipped.
    pub fn snapshots_from(&self, body: &AllIndices, now: DateTime<Utc>) -> SnapshotMap {
        let mut out = SnapshotMap::new();
        for symbol in Symbol::ALL {
            let row = Self::row_names(symbol)
                .iter()
                .find_map(|name| body.data.iter().find(|q| q.index.eq_ignore_ascii_case(name)));
            let Some(row) = row else {
                debug!(%symbol, "No quote row for symbol");
                continue;
            };
            match self.quote_to_snapshot(symbol, row, now) {
                Some(snap) => {
                    out.insert(symbol, snap);
                }
                None => warn!(%symbol, index = %row.index, "Skipping unparseable quote row"),
            }
        }
        out
    }

    fn quote_to_snapshot(&self, symbol: Symbol, q: &IndexQuote, now: DateTime<Utc>) -> Option<Snapshot> {
        let n = &self.normaliser;
        let last = n.price(q.last.as_ref()?)?;
        let field = |v: &Option<WireNumber>| v.as_ref().and_then(|w| n.price(w));
        let open = field(&q.open).unwrap_or(last);
        let high = field(&q.high).unwrap_or(last).max(last);
        let low = field(&q.low).unwrap_or(last).min(last);
        let prev_close = field(&q.previous_close).unwrap_or(open);
        let volume = q.volume.as_ref().and_then(|w| n.volume(w)).unwrap_or(0);
        let side = if last >= prev_close { Side::Buy } else { Side::Sell };

        Some(Snapshot {
            trade: Trade::new(symbol, last, volume, side, now),
            ohlc: Some(Ohlc { open, high, low, close: last }),
        })
    }
}

#[async_trait::async_trait]
impl MarketSource for NseIndexSource {
    fn name(&self) -> &str {
        "nse"
    }

    async fn fetch(&self) -> SourceResult<SnapshotMap> {
        let res = self.client.get(&self.url).send().await?.error_for_status()?;
        let body: AllIndices = res.json().await?;
        let snaps = self.snapshots_from(&body, Utc::now());
        if snaps.is_empty() {
            return Err(SourceError::Empty);
        }
        debug!(symbols = snaps.len(), "Fetched NSE quotes");
        Ok(snaps)
    }
}
