use async_trait::async_trait;
use serde::Deserialize;

use super::ws::WsStream;
use super::{concat_symbol, parse_f64, parse_levels, ExchangeConnector, ExchangeStream};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::logging::ts_epoch_ms;
use crate::market::{MarketMessage, TickerUpdate};

/// Binance spot public streams: `<sym>@ticker` and `<sym>@depth20@100ms`.
/// The partial-depth stream pushes full top-20 books, so every book message
/// is a snapshot and no diff sequencing is needed.
pub struct BinanceConnector {
    base: String,
}

impl BinanceConnector {
    pub fn new(cfg: &FeedConfig) -> Self {
        Self {
            base: cfg.binance_ws.trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, symbols: &[String]) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .flat_map(|s| {
                let lower = s.to_lowercase();
                [format!("{}@ticker", lower), format!("{}@depth20@100ms", lower)]
            })
            .collect();
        format!("{}/stream?streams={}", self.base, streams.join("/"))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WsTicker {
    #[serde(rename = "E")]
    event_time: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
    #[serde(rename = "q")]
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsDepth {
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

pub(crate) fn parse_frame(text: &str) -> Result<Option<MarketMessage>, FeedError> {
    let env: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            // subscription acks look like {"result":null,"id":1}
            if text.contains("\"result\"") {
                return Ok(None);
            }
            return Err(FeedError::Malformed(format!("binance envelope: {}", e)));
        }
    };
    let mut parts = env.stream.split('@');
    let symbol = parts.next().unwrap_or_default().to_uppercase();
    let kind = parts.next().unwrap_or_default();

    if kind == "ticker" {
        let t: WsTicker = serde_json::from_value(env.data)
            .map_err(|e| FeedError::Malformed(format!("binance ticker: {}", e)))?;
        return Ok(Some(MarketMessage::Ticker(TickerUpdate {
            symbol: t.symbol,
            bid: Some(parse_f64(&t.bid, "bid")?),
            ask: Some(parse_f64(&t.ask, "ask")?),
            last: Some(parse_f64(&t.last, "last")?),
            quote_volume: Some(parse_f64(&t.quote_volume, "quote volume")?),
            timestamp: t.event_time,
        })));
    }
    if kind.starts_with("depth") {
        let d: WsDepth = serde_json::from_value(env.data)
            .map_err(|e| FeedError::Malformed(format!("binance depth: {}", e)))?;
        return Ok(Some(MarketMessage::BookSnapshot {
            symbol,
            bids: parse_levels(&d.bids)?,
            asks: parse_levels(&d.asks)?,
            timestamp: ts_epoch_ms(),
            sequence_no: d.last_update_id,
        }));
    }
    Ok(None)
}

#[async_trait]
impl ExchangeConnector for BinanceConnector {
    fn exchange(&self) -> &str {
        "binance"
    }

    fn native_symbol(&self, symbol: &str) -> String {
        concat_symbol(symbol)
    }

    async fn connect(&self, symbols: &[String]) -> Result<Box<dyn ExchangeStream>, FeedError> {
        if symbols.is_empty() {
            return Err(FeedError::Connect {
                exchange: "binance".to_string(),
                reason: "no symbols".to_string(),
            });
        }
        let url = self.stream_url(symbols);
        let stream = WsStream::open("binance", &url, &[], parse_frame, None).await?;
        Ok(Box::new(stream))
    }
}
