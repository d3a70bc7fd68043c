//! Exchange capability interfaces.
//!
//! `MarketFeed` is the read/lifecycle surface every feeder exposes, so the
//! ranker and registry never depend on a concrete exchange. Feeders in turn
//! reach an exchange only through `ExchangeConnector`, which turns a symbol
//! list into a stream of normalised `MarketMessage`s.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::market::{MarketMessage, OrderBookSnapshot, Ticker};

pub mod binance;
pub mod bybit;
pub mod channel;
pub mod types;
pub mod unified;
mod ws;

pub trait MarketFeed: Send + Sync {
    fn name(&self) -> &str;
    fn start(&self) -> Result<(), FeedError>;
    fn stop(&self) -> Result<(), FeedError>;
    fn is_running(&self) -> bool;
    fn get_tickers(&self) -> HashMap<String, Ticker>;
    fn get_order_book(&self, symbol: &str) -> Option<OrderBookSnapshot>;
}

#[async_trait]
pub trait ExchangeStream: Send {
    /// Next normalised message. `None` means the connection closed.
    /// `Err(FeedError::Malformed)` is recoverable; any other error ends
    /// the session.
    async fn next_message(&mut self) -> Option<Result<MarketMessage, FeedError>>;
}

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    fn exchange(&self) -> &str;

    /// Exchange-native spelling of a symbol (`BTC/USDT` -> `BTCUSDT`).
    fn native_symbol(&self, symbol: &str) -> String {
        symbol.to_string()
    }

    /// Open a connection and subscribe to tickers and books for `symbols`
    /// (already in native form).
    async fn connect(&self, symbols: &[String]) -> Result<Box<dyn ExchangeStream>, FeedError>;
}

pub trait ConnectorFactory: Send + Sync {
    fn build(&self, exchange: &str) -> Result<Arc<dyn ExchangeConnector>, FeedError>;
}

impl<F> ConnectorFactory for F
where
    F: Fn(&str) -> Result<Arc<dyn ExchangeConnector>, FeedError> + Send + Sync,
{
    fn build(&self, exchange: &str) -> Result<Arc<dyn ExchangeConnector>, FeedError> {
        self(exchange)
    }
}

/// Builds the shipped public-stream connectors by exchange name.
#[derive(Debug, Clone, Default)]
pub struct VenueFactory {
    cfg: FeedConfig,
}

impl VenueFactory {
    pub fn new(cfg: FeedConfig) -> Self {
        Self { cfg }
    }
}

impl ConnectorFactory for VenueFactory {
    fn build(&self, exchange: &str) -> Result<Arc<dyn ExchangeConnector>, FeedError> {
        match exchange.trim().to_lowercase().as_str() {
            "binance" => Ok(Arc::new(binance::BinanceConnector::new(&self.cfg))),
            "bybit" => Ok(Arc::new(bybit::BybitConnector::new(&self.cfg))),
            _ => Err(FeedError::UnknownExchange(exchange.to_string())),
        }
    }
}

/// `BTC/USDT`, `btc-usdt`, `BTC_USDT` -> `BTCUSDT`
pub(crate) fn concat_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    let core = upper.split(':').next().unwrap_or("");
    core.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

pub(crate) fn parse_f64(raw: &str, what: &str) -> Result<f64, FeedError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FeedError::Malformed(format!("bad {}: {:?}", what, raw)))
}

pub(crate) fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<(f64, f64)>, FeedError> {
    raw.iter()
        .map(|[p, s]| Ok((parse_f64(p, "price")?, parse_f64(s, "size")?)))
        .collect()
}
