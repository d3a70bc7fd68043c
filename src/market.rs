//! Market data records shared by connectors, feeders and the ranker.

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub quote_volume: f64,
    /// Exchange event time, epoch ms.
    pub timestamp: u64,
}

impl Ticker {
    pub fn mid(&self) -> Option<f64> {
        if self.bid > 0.0 && self.ask > 0.0 {
            Some((self.bid + self.ask) / 2.0)
        } else if self.last > 0.0 {
            Some(self.last)
        } else {
            None
        }
    }

    /// Merge a partial update. Fields absent from the update keep their
    /// previous value.
    pub fn merge(&mut self, update: &TickerUpdate) {
        if let Some(v) = update.bid {
            self.bid = v;
        }
        if let Some(v) = update.ask {
            self.ask = v;
        }
        if let Some(v) = update.last {
            self.last = v;
        }
        if let Some(v) = update.quote_volume {
            self.quote_volume = v;
        }
        self.timestamp = self.timestamp.max(update.timestamp);
    }
}

/// Ticker fields as they arrive on the wire. Some venues push only the
/// fields that changed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickerUpdate {
    pub symbol: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub quote_volume: Option<f64>,
    pub timestamp: u64,
}

/// (price, size)
pub type PriceLevel = (f64, f64);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    /// Descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price.
    pub asks: Vec<PriceLevel>,
    pub timestamp: u64,
    pub sequence_no: u64,
}

impl OrderBookSnapshot {
    /// Build a snapshot from unsorted levels. Zero or negative sizes and
    /// non-finite prices are discarded.
    pub fn from_levels(
        symbol: &str,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        timestamp: u64,
        sequence_no: u64,
    ) -> Self {
        let mut book = Self {
            symbol: symbol.to_string(),
            bids: bids.into_iter().filter(valid_level).collect(),
            asks: asks.into_iter().filter(valid_level).collect(),
            timestamp,
            sequence_no,
        };
        book.sort();
        book
    }

    fn sort(&mut self) {
        self.bids.sort_by(|a, b| b.0.total_cmp(&a.0));
        self.asks.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((b, _)), Some((a, _))) => Some((a + b) / 2.0),
            _ => None,
        }
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((b, _)), Some((a, _))) => b >= a,
            _ => false,
        }
    }

    pub fn check_uncrossed(&self) -> Result<(), FeedError> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) if bid >= ask => Err(FeedError::CrossedBook {
                symbol: self.symbol.clone(),
                bid,
                ask,
            }),
            _ => Ok(()),
        }
    }

    /// Apply an incremental diff in place. A size of zero removes the level.
    pub fn apply_diff(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], timestamp: u64, sequence_no: u64) {
        upsert_levels(&mut self.bids, bids);
        upsert_levels(&mut self.asks, asks);
        self.sort();
        self.timestamp = self.timestamp.max(timestamp);
        self.sequence_no = sequence_no;
    }

    /// Keep at most `depth` levels per side.
    pub fn truncate(&mut self, depth: usize) {
        if depth > 0 {
            self.bids.truncate(depth);
            self.asks.truncate(depth);
        }
    }

    /// Quote notional resting within `band` (fraction) of mid on both sides.
    pub fn depth_within(&self, band: f64) -> f64 {
        let Some(mid) = self.mid() else {
            return 0.0;
        };
        let lo = mid * (1.0 - band);
        let hi = mid * (1.0 + band);
        let bids: f64 = self.bids.iter().take_while(|(p, _)| *p >= lo).map(|(p, s)| p * s).sum();
        let asks: f64 = self.asks.iter().take_while(|(p, _)| *p <= hi).map(|(p, s)| p * s).sum();
        bids + asks
    }
}

fn valid_level(level: &PriceLevel) -> bool {
    level.0.is_finite() && level.1.is_finite() && level.0 > 0.0 && level.1 > 0.0
}

fn upsert_levels(side: &mut Vec<PriceLevel>, updates: &[PriceLevel]) {
    for &(price, size) in updates {
        if !price.is_finite() || price <= 0.0 {
            continue;
        }
        match side.iter().position(|(p, _)| *p == price) {
            Some(i) if size <= 0.0 || !size.is_finite() => {
                side.remove(i);
            }
            Some(i) => side[i].1 = size,
            None if size > 0.0 && size.is_finite() => side.push((price, size)),
            None => {}
        }
    }
}

/// Normalised inbound message produced by an exchange connector.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketMessage {
    Ticker(TickerUpdate),
    /// Full book replacement.
    BookSnapshot {
        symbol: String,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        timestamp: u64,
        sequence_no: u64,
    },
    /// Incremental diff covering update ids `first_seq..=last_seq`.
    BookDelta {
        symbol: String,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        timestamp: u64,
        first_seq: u64,
        last_seq: u64,
    },
}

impl MarketMessage {
    pub fn symbol(&self) -> &str {
        match self {
            MarketMessage::Ticker(t) => &t.symbol,
            MarketMessage::BookSnapshot { symbol, .. } | MarketMessage::BookDelta { symbol, .. } => symbol,
        }
    }
}

/// Quote assets recognised when splitting concatenated symbols, longest first
/// so `FDUSD` wins over `USD`.
const KNOWN_QUOTES: [&str; 10] = ["FDUSD", "USDT", "USDC", "BUSD", "TUSD", "USD", "EUR", "TRY", "BTC", "ETH"];

/// Split an exchange symbol into (base, quote). Accepts `BTC/USDT`,
/// `BTC-USDT`, `BTC_USDT`, `BTCUSDT` and perpetual suffixes such as
/// `BTC/USDT:USDT` or `BTC-USDT-SWAP`.
pub fn split_symbol(symbol: &str) -> Option<(String, String)> {
    let upper = symbol.trim().to_uppercase();
    let core = upper.split(':').next().unwrap_or("");
    let core = core.trim_end_matches("-SWAP").trim_end_matches("-PERP");
    if let Some((base, quote)) = core.split_once(|c: char| c == '/' || c == '-' || c == '_') {
        if !base.is_empty() && !quote.is_empty() {
            return Some((base.to_string(), quote.to_string()));
        }
        return None;
    }
    KNOWN_QUOTES.iter().find_map(|q| {
        core.strip_suffix(q)
            .filter(|base| !base.is_empty())
            .map(|base| (base.to_string(), q.to_string()))
    })
}

/// Canonical `BASE/QUOTE` form used to aggregate across exchanges.
pub fn canonical_symbol(symbol: &str) -> Option<String> {
    split_symbol(symbol).map(|(b, q)| format!("{}/{}", b, q))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> OrderBookSnapshot {
        OrderBookSnapshot::from_levels(
            "BTCUSDT",
            vec![(99.0, 1.0), (100.0, 2.0), (90.0, 5.0)],
            vec![(102.0, 1.0), (101.0, 3.0), (120.0, 1.0)],
            1,
            10,
        )
    }

    #[test]
    fn test_levels_sorted() {
        let b = book();
        assert_eq!(b.best_bid(), Some((100.0, 2.0)));
        assert_eq!(b.best_ask(), Some((101.0, 3.0)));
        assert!(!b.is_crossed());
        assert_eq!(b.mid(), Some(100.5));
    }

    #[test]
    fn test_diff_removes_and_inserts() {
        let mut b = book();
        b.apply_diff(&[(100.0, 0.0), (99.5, 4.0)], &[(101.0, 0.0)], 2, 11);
        assert_eq!(b.best_bid(), Some((99.5, 4.0)));
        assert_eq!(b.best_ask(), Some((102.0, 1.0)));
        assert_eq!(b.sequence_no, 11);
        assert_eq!(b.timestamp, 2);
    }

    #[test]
    fn test_crossed_detection() {
        let b = OrderBookSnapshot::from_levels("X", vec![(10.0, 1.0)], vec![(9.0, 1.0)], 0, 0);
        assert!(b.is_crossed());
        assert!(matches!(b.check_uncrossed(), Err(FeedError::CrossedBook { .. })));
    }

    #[test]
    fn test_depth_within_band() {
        let b = book();
        // mid 100.5, band 2% -> [98.49, 102.51]
        let d = b.depth_within(0.02);
        let expected = 100.0 * 2.0 + 99.0 * 1.0 + 101.0 * 3.0 + 102.0 * 1.0;
        assert!((d - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ticker_merge_keeps_missing_fields() {
        let mut t = Ticker { symbol: "BTCUSDT".into(), bid: 1.0, ask: 2.0, last: 1.5, quote_volume: 10.0, timestamp: 5 };
        t.merge(&TickerUpdate { symbol: "BTCUSDT".into(), last: Some(1.7), timestamp: 6, ..Default::default() });
        assert_eq!(t.bid, 1.0);
        assert_eq!(t.last, 1.7);
        assert_eq!(t.timestamp, 6);
    }

    #[test]
    fn test_split_symbol_forms() {
        assert_eq!(split_symbol("BTCUSDT"), Some(("BTC".into(), "USDT".into())));
        assert_eq!(split_symbol("eth-usdc"), Some(("ETH".into(), "USDC".into())));
        assert_eq!(split_symbol("SOL/USDT:USDT"), Some(("SOL".into(), "USDT".into())));
        assert_eq!(split_symbol("DOGE-USDT-SWAP"), Some(("DOGE".into(), "USDT".into())));
        assert_eq!(split_symbol("ENAFDUSD"), Some(("ENA".into(), "FDUSD".into())));
        assert_eq!(split_symbol("USDT"), None);
        assert_eq!(canonical_symbol("btc_usdt").as_deref(), Some("BTC/USDT"));
    }
}
