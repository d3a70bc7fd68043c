use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{interval_at, Duration, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::ExchangeStream;
use crate::error::FeedError;
use crate::market::MarketMessage;

/// Turns one text frame into a message. `Ok(None)` marks control traffic
/// (acks, pongs) that carries no market data.
pub(crate) type FrameParser = fn(&str) -> Result<Option<MarketMessage>, FeedError>;

struct Keepalive {
    interval: Interval,
    payload: String,
}

pub(crate) struct WsStream {
    exchange: String,
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    parse: FrameParser,
    keepalive: Option<Keepalive>,
}

enum Wake {
    Ping,
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

impl WsStream {
    /// Connect to `url` and send each subscription payload in order.
    pub(crate) async fn open(
        exchange: &str,
        url: &str,
        subscriptions: &[String],
        parse: FrameParser,
        keepalive: Option<(Duration, String)>,
    ) -> Result<Self, FeedError> {
        let connect_err = |reason: String| FeedError::Connect {
            exchange: exchange.to_string(),
            reason,
        };
        let parsed = url::Url::parse(url).map_err(|e| connect_err(format!("bad url {}: {}", url, e)))?;
        let (mut inner, _) = connect_async(parsed.as_str())
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        for sub in subscriptions {
            inner
                .send(Message::Text(sub.clone()))
                .await
                .map_err(|e| connect_err(format!("subscribe failed: {}", e)))?;
        }
        let keepalive = keepalive.map(|(period, payload)| Keepalive {
            interval: interval_at(Instant::now() + period, period),
            payload,
        });
        Ok(Self {
            exchange: exchange.to_string(),
            inner,
            parse,
            keepalive,
        })
    }
}

#[async_trait]
impl ExchangeStream for WsStream {
    async fn next_message(&mut self) -> Option<Result<MarketMessage, FeedError>> {
        loop {
            let wake = match self.keepalive.as_mut() {
                Some(ka) => tokio::select! {
                    _ = ka.interval.tick() => Wake::Ping,
                    frame = self.inner.next() => Wake::Frame(frame),
                },
                None => Wake::Frame(self.inner.next().await),
            };
            let frame = match wake {
                Wake::Ping => {
                    let payload = self.keepalive.as_ref().map(|k| k.payload.clone()).unwrap_or_default();
                    if let Err(e) = self.inner.send(Message::Text(payload)).await {
                        return Some(Err(FeedError::Disconnected(format!("{} ping failed: {}", self.exchange, e))));
                    }
                    continue;
                }
                Wake::Frame(frame) => frame?,
            };
            match frame {
                Ok(Message::Text(text)) => match (self.parse)(&text) {
                    Ok(Some(msg)) => return Some(Ok(msg)),
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e)),
                },
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.inner.send(Message::Pong(payload)).await {
                        return Some(Err(FeedError::Disconnected(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Some(Err(FeedError::Disconnected(format!("{} closed: {}", self.exchange, reason))));
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(FeedError::Disconnected(e.to_string()))),
            }
        }
    }
}
