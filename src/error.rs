use thiserror::Error;

/// Errors raised by feeders, connectors and the registry.
///
/// Only `AlreadyRunning`, `UnknownExchange`, `TaskPanicked` and `Runtime`
/// ever reach callers. The rest are handled inside the ingestion task.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedError {
    #[error("feeder for {0} is already running")]
    AlreadyRunning(String),
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),
    #[error("connect to {exchange} failed: {reason}")]
    Connect { exchange: String, reason: String },
    #[error("stream disconnected: {0}")]
    Disconnected(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("sequence gap on {symbol}: expected {expected}, got {got}")]
    SequenceGap { symbol: String, expected: u64, got: u64 },
    #[error("crossed book on {symbol}: bid {bid} >= ask {ask}")]
    CrossedBook { symbol: String, bid: f64, ask: f64 },
    #[error("ingestion task for {0} panicked")]
    TaskPanicked(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl FeedError {
    /// Whether the error invalidates local book state and requires a fresh
    /// subscription.
    pub fn requires_resync(&self) -> bool {
        matches!(self, FeedError::SequenceGap { .. } | FeedError::CrossedBook { .. })
    }
}

/// Per-row failures when reading a signals file.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SignalError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("bad timestamp: {0}")]
    BadTimestamp(String),
    #[error("bad price: {0}")]
    BadPrice(String),
    #[error("bad funding rate: {0}")]
    BadFunding(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("expected {expected} columns, got {got}")]
    ColumnCount { expected: usize, got: usize },
    #[error("invalid json: {0}")]
    Json(String),
}
