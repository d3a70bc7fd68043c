//! In-process connector fed from channels. Used to replay recorded market
//! data through a real feeder and to drive feeders in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ExchangeConnector, ExchangeStream};
use crate::error::FeedError;
use crate::market::MarketMessage;

type Item = Result<MarketMessage, FeedError>;

/// Producer side of one queued session. Dropping it closes the session,
/// which the feeder sees as a disconnect.
#[derive(Debug, Clone)]
pub struct SessionSender {
    tx: mpsc::UnboundedSender<Item>,
}

impl SessionSender {
    /// Returns false once the consuming session is gone.
    pub fn send(&self, msg: MarketMessage) -> bool {
        self.tx.send(Ok(msg)).is_ok()
    }

    pub fn send_err(&self, err: FeedError) -> bool {
        self.tx.send(Err(err)).is_ok()
    }
}

/// Each `connect` consumes the next queued session; with none queued the
/// connect fails, exercising the feeder's backoff path.
pub struct ChannelConnector {
    exchange: String,
    sessions: Mutex<VecDeque<mpsc::UnboundedReceiver<Item>>>,
    connects: AtomicUsize,
    attempts: AtomicUsize,
}

impl ChannelConnector {
    pub fn new(exchange: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            sessions: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn add_session(&self) -> SessionSender {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut q) = self.sessions.lock() {
            q.push_back(rx);
        }
        SessionSender { tx }
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// All connect attempts, including failed ones.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

struct ChannelStream {
    rx: mpsc::UnboundedReceiver<Item>,
}

#[async_trait]
impl ExchangeStream for ChannelStream {
    async fn next_message(&mut self) -> Option<Item> {
        self.rx.recv().await
    }
}

#[async_trait]
impl ExchangeConnector for ChannelConnector {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    async fn connect(&self, _symbols: &[String]) -> Result<Box<dyn ExchangeStream>, FeedError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.sessions.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(rx) => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ChannelStream { rx }))
            }
            None => Err(FeedError::Connect {
                exchange: self.exchange.clone(),
                reason: "no session queued".to_string(),
            }),
        }
    }
}
