//! Hot-coin ranking over live feeder snapshots.
//!
//! Score is 24h quote volume plus resting notional within a band around mid,
//! both summed across every feeder that lists the symbol.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::adapter::MarketFeed;
use crate::config::RankerConfig;
use crate::market::split_symbol;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotCoinResult {
    /// Canonical `BASE/QUOTE`.
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub quote_volume: f64,
    pub orderbook_depth_usd: f64,
    pub score: f64,
    /// 1-based.
    pub rank: usize,
}

/// Ordering of base assets by market capitalisation, largest first.
pub trait MarketCapSource: Send + Sync {
    fn top_bases(&self, k: usize) -> Vec<String>;
}

/// Fixed ranking; good enough to keep majors out of a hot list.
#[derive(Debug, Clone)]
pub struct StaticMarketCap {
    bases: Vec<String>,
}

impl StaticMarketCap {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(bases: I) -> Self {
        Self {
            bases: bases.into_iter().map(|s| s.into().to_uppercase()).collect(),
        }
    }
}

impl Default for StaticMarketCap {
    fn default() -> Self {
        Self::new([
            "BTC", "ETH", "BNB", "SOL", "XRP", "DOGE", "ADA", "TRX", "TON", "AVAX", "SHIB", "LINK", "DOT",
            "BCH", "LTC", "NEAR", "UNI",
        ])
    }
}

impl MarketCapSource for StaticMarketCap {
    fn top_bases(&self, k: usize) -> Vec<String> {
        self.bases.iter().take(k).cloned().collect()
    }
}

/// Per canonical symbol: volume so far and where each feeder keeps it.
#[derive(Default)]
struct Candidate {
    base: String,
    quote: String,
    quote_volume: f64,
    /// (feeder index, feeder-local symbol)
    sources: Vec<(usize, String)>,
}

pub struct HotCoinRanker {
    cfg: RankerConfig,
    market_caps: Box<dyn MarketCapSource>,
}

impl HotCoinRanker {
    pub fn new(cfg: RankerConfig, market_caps: Box<dyn MarketCapSource>) -> Self {
        Self { cfg, market_caps }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.cfg
    }

    fn allowed(&self, base: &str, quote: &str) -> bool {
        self.cfg.quote_assets.iter().any(|q| q == quote) && !self.cfg.stablecoins.iter().any(|s| s == base)
    }

    pub fn find_hot_coins<'a, F, I>(&self, feeders: I, max_results: usize, exclude_top_by_marketcap: usize) -> Vec<HotCoinResult>
    where
        F: MarketFeed + ?Sized + 'a,
        I: IntoIterator<Item = &'a F>,
    {
        let feeders: Vec<&F> = feeders.into_iter().collect();
        if feeders.is_empty() || max_results == 0 {
            return Vec::new();
        }

        // 1. candidate universe
        let mut universe: BTreeMap<String, Candidate> = BTreeMap::new();
        let mut skipped = 0usize;
        for (idx, feeder) in feeders.iter().enumerate() {
            for (key, ticker) in feeder.get_tickers() {
                let Some((base, quote)) = split_symbol(&key) else {
                    skipped += 1;
                    continue;
                };
                if !self.allowed(&base, &quote) {
                    continue;
                }
                let entry = universe.entry(format!("{}/{}", base, quote)).or_insert_with(|| Candidate {
                    base,
                    quote,
                    ..Candidate::default()
                });
                if ticker.quote_volume.is_finite() && ticker.quote_volume > 0.0 {
                    entry.quote_volume += ticker.quote_volume;
                }
                entry.sources.push((idx, key));
            }
        }
        let mut candidates: Vec<(String, Candidate)> = universe
            .into_iter()
            .filter(|(_, c)| c.quote_volume >= self.cfg.min_quote_volume)
            .collect();
        candidates.sort_by(|a, b| b.1.quote_volume.total_cmp(&a.1.quote_volume).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(self.cfg.candidate_limit);

        // 2. depth score, 3. market-cap exclusion
        // stablecoins never reach the candidate list, so they do not use up K
        let excluded: HashSet<String> = self
            .market_caps
            .top_bases(exclude_top_by_marketcap.saturating_add(self.cfg.stablecoins.len()))
            .into_iter()
            .map(|b| b.to_uppercase())
            .filter(|b| !self.cfg.stablecoins.contains(b))
            .take(exclude_top_by_marketcap)
            .collect();
        let mut results: Vec<HotCoinResult> = candidates
            .into_iter()
            .filter(|(_, c)| !excluded.contains(&c.base))
            .map(|(symbol, c)| {
                let depth: f64 = c
                    .sources
                    .iter()
                    .filter_map(|(idx, key)| feeders[*idx].get_order_book(key))
                    .map(|book| book.depth_within(self.cfg.depth_band))
                    .filter(|d| d.is_finite())
                    .sum();
                HotCoinResult {
                    symbol,
                    base: c.base,
                    quote: c.quote,
                    quote_volume: c.quote_volume,
                    orderbook_depth_usd: depth,
                    score: depth + c.quote_volume,
                    rank: 0,
                }
            })
            .collect();

        // 4. order and rank
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.symbol.cmp(&b.symbol)));
        results.truncate(max_results);
        for (i, r) in results.iter_mut().enumerate() {
            r.rank = i + 1;
        }
        debug!(
            target: "ranker",
            feeders = feeders.len(),
            unparsed = skipped,
            excluded = excluded.len(),
            results = results.len(),
            "ranked hot coins"
        );
        results
    }
}
