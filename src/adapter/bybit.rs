use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Duration;

use super::ws::WsStream;
use super::{concat_symbol, parse_f64, parse_levels, ExchangeConnector, ExchangeStream};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::market::{MarketMessage, TickerUpdate};

const MAX_ARGS_PER_SUBSCRIBE: usize = 10;
const PING_SECS: u64 = 20;

/// Bybit v5 public streams. Tickers arrive as a snapshot followed by deltas
/// carrying only changed fields; books as a snapshot followed by
/// update-id sequenced diffs.
pub struct BybitConnector {
    url: String,
    depth: usize,
}

impl BybitConnector {
    pub fn new(cfg: &FeedConfig) -> Self {
        let depth = match cfg.book_depth {
            0..=1 => 1,
            2..=50 => 50,
            51..=200 => 200,
            _ => 500,
        };
        Self {
            url: cfg.bybit_ws.clone(),
            depth,
        }
    }

    pub fn subscriptions(&self, symbols: &[String]) -> Vec<String> {
        let topics: Vec<String> = symbols
            .iter()
            .flat_map(|s| [format!("tickers.{}", s), format!("orderbook.{}.{}", self.depth, s)])
            .collect();
        topics
            .chunks(MAX_ARGS_PER_SUBSCRIBE)
            .map(|chunk| serde_json::json!({"op": "subscribe", "args": chunk}).to_string())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    ts: Option<u64>,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsTicker {
    symbol: String,
    last_price: Option<String>,
    #[serde(rename = "bid1Price")]
    bid1_price: Option<String>,
    #[serde(rename = "ask1Price")]
    ask1_price: Option<String>,
    #[serde(rename = "turnover24h")]
    turnover_24h: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsBook {
    s: String,
    b: Vec<[String; 2]>,
    a: Vec<[String; 2]>,
    u: u64,
}

fn opt_f64(raw: &Option<String>, what: &str) -> Result<Option<f64>, FeedError> {
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(v) => parse_f64(v, what).map(Some),
    }
}

pub(crate) fn parse_frame(text: &str) -> Result<Option<MarketMessage>, FeedError> {
    let frame: Frame =
        serde_json::from_str(text).map_err(|e| FeedError::Malformed(format!("bybit frame: {}", e)))?;
    // op acks and pongs carry no topic
    let Some(topic) = frame.topic else {
        return Ok(None);
    };
    let data = frame
        .data
        .ok_or_else(|| FeedError::Malformed(format!("bybit {} without data", topic)))?;
    let ts = frame.ts.unwrap_or(0);

    if topic.starts_with("tickers.") {
        let t: WsTicker =
            serde_json::from_value(data).map_err(|e| FeedError::Malformed(format!("bybit ticker: {}", e)))?;
        return Ok(Some(MarketMessage::Ticker(TickerUpdate {
            symbol: t.symbol,
            bid: opt_f64(&t.bid1_price, "bid")?,
            ask: opt_f64(&t.ask1_price, "ask")?,
            last: opt_f64(&t.last_price, "last")?,
            quote_volume: opt_f64(&t.turnover_24h, "turnover")?,
            timestamp: ts,
        })));
    }
    if topic.starts_with("orderbook.") {
        let book: WsBook =
            serde_json::from_value(data).map_err(|e| FeedError::Malformed(format!("bybit book: {}", e)))?;
        let bids = parse_levels(&book.b)?;
        let asks = parse_levels(&book.a)?;
        return match frame.kind.as_deref() {
            Some("snapshot") => Ok(Some(MarketMessage::BookSnapshot {
                symbol: book.s,
                bids,
                asks,
                timestamp: ts,
                sequence_no: book.u,
            })),
            Some("delta") => Ok(Some(MarketMessage::BookDelta {
                symbol: book.s,
                bids,
                asks,
                timestamp: ts,
                first_seq: book.u,
                last_seq: book.u,
            })),
            other => Err(FeedError::Malformed(format!("bybit book type {:?}", other))),
        };
    }
    Ok(None)
}

#[async_trait]
impl ExchangeConnector for BybitConnector {
    fn exchange(&self) -> &str {
        "bybit"
    }

    fn native_symbol(&self, symbol: &str) -> String {
        concat_symbol(symbol)
    }

    async fn connect(&self, symbols: &[String]) -> Result<Box<dyn ExchangeStream>, FeedError> {
        if symbols.is_empty() {
            return Err(FeedError::Connect {
                exchange: "bybit".to_string(),
                reason: "no symbols".to_string(),
            });
        }
        let subs = self.subscriptions(symbols);
        let ping = serde_json::json!({"op": "ping"}).to_string();
        let stream = WsStream::open(
            "bybit",
            &self.url,
            &subs,
            parse_frame,
            Some((Duration::from_secs(PING_SECS), ping)),
        )
        .await?;
        Ok(Box::new(stream))
    }
}
