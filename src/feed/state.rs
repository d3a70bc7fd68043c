use std::collections::HashMap;

use serde::Serialize;

use crate::error::FeedError;
use crate::market::{MarketMessage, OrderBookSnapshot, Ticker};

/// Ingestion counters, readable through `Feeder::stats`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub applied: u64,
    pub malformed: u64,
    pub stale: u64,
    pub ignored: u64,
    pub resyncs: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// Older than what is already held; dropped.
    Stale,
}

/// Snapshot state of one feeder. Lives behind the feeder's mutex; every
/// method runs with the lock held so readers see whole updates only.
#[derive(Debug, Default)]
pub struct FeedState {
    pub tickers: HashMap<String, Ticker>,
    pub books: HashMap<String, OrderBookSnapshot>,
    pub stats: FeedStats,
    depth: usize,
}

impl FeedState {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            ..Self::default()
        }
    }

    /// Apply one message under `symbol` (the caller-facing name).
    ///
    /// `Malformed` means drop and continue. `SequenceGap` and `CrossedBook`
    /// mean the local book can no longer be trusted and the caller must
    /// resubscribe.
    pub fn apply(&mut self, symbol: &str, msg: MarketMessage) -> Result<Applied, FeedError> {
        match msg {
            MarketMessage::Ticker(update) => {
                if let Some(existing) = self.tickers.get_mut(symbol) {
                    if update.timestamp < existing.timestamp {
                        return Ok(Applied::Stale);
                    }
                    existing.merge(&update);
                } else {
                    let mut t = Ticker {
                        symbol: symbol.to_string(),
                        ..Ticker::default()
                    };
                    t.merge(&update);
                    self.tickers.insert(symbol.to_string(), t);
                }
                Ok(Applied::Updated)
            }
            MarketMessage::BookSnapshot {
                bids,
                asks,
                timestamp,
                sequence_no,
                ..
            } => {
                // A snapshot replaces the book and resets the sequence baseline,
                // even when lower (venues restart their counters).
                let mut book = OrderBookSnapshot::from_levels(symbol, bids, asks, timestamp, sequence_no);
                if book.is_crossed() {
                    return Err(FeedError::Malformed(format!("crossed snapshot for {}", symbol)));
                }
                book.truncate(self.depth);
                self.books.insert(symbol.to_string(), book);
                Ok(Applied::Updated)
            }
            MarketMessage::BookDelta {
                bids,
                asks,
                timestamp,
                first_seq,
                last_seq,
                ..
            } => {
                let Some(existing) = self.books.get(symbol) else {
                    return Err(FeedError::SequenceGap {
                        symbol: symbol.to_string(),
                        expected: 0,
                        got: first_seq,
                    });
                };
                if last_seq <= existing.sequence_no {
                    return Ok(Applied::Stale);
                }
                let expected = existing.sequence_no + 1;
                if first_seq != expected {
                    return Err(FeedError::SequenceGap {
                        symbol: symbol.to_string(),
                        expected,
                        got: first_seq,
                    });
                }
                let mut next = existing.clone();
                next.apply_diff(&bids, &asks, timestamp, last_seq);
                next.check_uncrossed()?;
                next.truncate(self.depth);
                self.books.insert(symbol.to_string(), next);
                Ok(Applied::Updated)
            }
        }
    }

    pub fn clear_books(&mut self) {
        self.books.clear();
    }

    pub fn clear(&mut self) {
        self.tickers.clear();
        self.books.clear();
    }
}
