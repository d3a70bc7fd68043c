use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::state::{Applied, FeedState, FeedStats};
use crate::adapter::{ExchangeConnector, ExchangeStream, MarketFeed};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::market::{OrderBookSnapshot, Ticker};

fn lock_state(state: &Mutex<FeedState>) -> MutexGuard<'_, FeedState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct IngestTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Live ticker and order-book snapshot of one exchange.
///
/// `start` spawns a dedicated thread running a single-threaded tokio
/// runtime that owns the connection. Readers never touch the network: every
/// accessor copies out of the state mutex and returns immediately.
pub struct Feeder {
    exchange: String,
    symbols: Vec<String>,
    /// native spelling -> caller-facing symbol
    native: HashMap<String, String>,
    connector: Arc<dyn ExchangeConnector>,
    cfg: FeedConfig,
    state: Arc<Mutex<FeedState>>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<IngestTask>>,
}

impl Feeder {
    pub fn new(exchange: &str, symbols: &[String], connector: Arc<dyn ExchangeConnector>, cfg: FeedConfig) -> Self {
        let unique: BTreeSet<String> = symbols
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let symbols: Vec<String> = unique.into_iter().collect();
        let native = symbols
            .iter()
            .map(|s| (connector.native_symbol(s), s.clone()))
            .collect();
        Self {
            exchange: exchange.to_string(),
            symbols,
            native,
            connector,
            state: Arc::new(Mutex::new(FeedState::new(cfg.book_depth))),
            cfg,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// True while a connection is established and streaming.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True between `start` and `stop`, whether or not connected.
    pub fn is_started(&self) -> bool {
        self.task.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    pub fn start(&self) -> Result<(), FeedError> {
        let mut task = self
            .task
            .lock()
            .map_err(|_| FeedError::Runtime("task lock poisoned".to_string()))?;
        if task.is_some() {
            return Err(FeedError::AlreadyRunning(self.exchange.clone()));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let ingest = Ingest {
            exchange: self.exchange.clone(),
            native_symbols: self.native.keys().cloned().collect(),
            native: self.native.clone(),
            connector: self.connector.clone(),
            state: self.state.clone(),
            running: self.running.clone(),
            backoff: Backoff::from_config(&self.cfg),
            connect_timeout: Duration::from_millis(self.cfg.connect_timeout_ms.max(1)),
            stale_timeout: Duration::from_millis(self.cfg.stale_timeout_ms.max(1)),
        };
        let exchange = self.exchange.clone();
        let handle = std::thread::Builder::new()
            .name(format!("feed-{}", self.exchange))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!(target: "feed", exchange = %exchange, error = %e, "runtime build failed");
                        return;
                    }
                };
                rt.block_on(ingest.run(shutdown_rx));
            })
            .map_err(|e| FeedError::Runtime(e.to_string()))?;

        *task = Some(IngestTask { shutdown, handle });
        info!(
            target: "feed",
            exchange = %self.exchange,
            symbols = self.symbols.len(),
            "feeder started"
        );
        Ok(())
    }

    /// Stop ingestion and wait for the task to exit. Snapshot state is
    /// released; nothing mutates it once this returns.
    pub fn stop(&self) -> Result<(), FeedError> {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut result = Ok(());
        if let Some(t) = task.take() {
            let _ = t.shutdown.send(true);
            if t.handle.join().is_err() {
                result = Err(FeedError::TaskPanicked(self.exchange.clone()));
            }
            info!(target: "feed", exchange = %self.exchange, "feeder stopped");
        }
        self.running.store(false, Ordering::SeqCst);
        lock_state(&self.state).clear();
        result
    }

    /// Block the calling thread until the feeder is streaming or `timeout`
    /// elapses. Do not call from inside an async task.
    pub fn wait_until_running(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn get_tickers(&self) -> HashMap<String, Ticker> {
        lock_state(&self.state).tickers.clone()
    }

    pub fn get_ticker(&self, symbol: &str) -> Option<Ticker> {
        lock_state(&self.state).tickers.get(symbol).cloned()
    }

    pub fn get_order_book(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        lock_state(&self.state).books.get(symbol).cloned()
    }

    pub fn stats(&self) -> FeedStats {
        lock_state(&self.state).stats
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl MarketFeed for Feeder {
    fn name(&self) -> &str {
        self.exchange()
    }

    fn start(&self) -> Result<(), FeedError> {
        Feeder::start(self)
    }

    fn stop(&self) -> Result<(), FeedError> {
        Feeder::stop(self)
    }

    fn is_running(&self) -> bool {
        Feeder::is_running(self)
    }

    fn get_tickers(&self) -> HashMap<String, Ticker> {
        Feeder::get_tickers(self)
    }

    fn get_order_book(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        Feeder::get_order_book(self, symbol)
    }
}

enum SessionEnd {
    Shutdown,
    Resync(String),
    Disconnected(String),
}

/// Everything the ingestion thread owns.
struct Ingest {
    exchange: String,
    native_symbols: Vec<String>,
    native: HashMap<String, String>,
    connector: Arc<dyn ExchangeConnector>,
    state: Arc<Mutex<FeedState>>,
    running: Arc<AtomicBool>,
    backoff: Backoff,
    connect_timeout: Duration,
    stale_timeout: Duration,
}

impl Ingest {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        let mut sessions: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let connect = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.native_symbols));
            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                res = connect => res,
            };
            match outcome {
                Ok(Ok(stream)) => {
                    if sessions > 0 {
                        lock_state(&self.state).stats.reconnects += 1;
                    }
                    sessions += 1;
                    attempt = 0;
                    self.running.store(true, Ordering::SeqCst);
                    info!(target: "feed", exchange = %self.exchange, session = sessions, "connected");

                    let end = self.pump(stream, &mut shutdown).await;

                    self.running.store(false, Ordering::SeqCst);
                    // books built on the old session cannot be trusted
                    lock_state(&self.state).clear_books();
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Resync(reason) => {
                            lock_state(&self.state).stats.resyncs += 1;
                            warn!(target: "feed", exchange = %self.exchange, reason = %reason, "full resync");
                        }
                        SessionEnd::Disconnected(reason) => {
                            warn!(target: "feed", exchange = %self.exchange, reason = %reason, "disconnected");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(target: "feed", exchange = %self.exchange, attempt, error = %e, "connect failed");
                }
                Err(_) => {
                    warn!(
                        target: "feed",
                        exchange = %self.exchange,
                        attempt,
                        timeout_ms = self.connect_timeout.as_millis() as u64,
                        "connect timed out"
                    );
                }
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            debug!(target: "feed", exchange = %self.exchange, delay_ms = delay.as_millis() as u64, "reconnect backoff");
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn pump(&self, mut stream: Box<dyn ExchangeStream>, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => return SessionEnd::Shutdown,
                next = tokio::time::timeout(self.stale_timeout, stream.next_message()) => next,
            };
            let item = match next {
                Err(_) => {
                    return SessionEnd::Disconnected(format!(
                        "silent for {}ms",
                        self.stale_timeout.as_millis()
                    ))
                }
                Ok(None) => return SessionEnd::Disconnected("stream closed".to_string()),
                Ok(Some(item)) => item,
            };
            let msg = match item {
                Ok(msg) => msg,
                Err(FeedError::Malformed(reason)) => {
                    lock_state(&self.state).stats.malformed += 1;
                    warn!(target: "feed", exchange = %self.exchange, reason = %reason, "dropped malformed message");
                    continue;
                }
                Err(e) if e.requires_resync() => return SessionEnd::Resync(e.to_string()),
                Err(e) => return SessionEnd::Disconnected(e.to_string()),
            };

            let symbol = self
                .native
                .get(msg.symbol())
                .or_else(|| self.native.get(&msg.symbol().to_uppercase()))
                .cloned();
            let Some(symbol) = symbol else {
                lock_state(&self.state).stats.ignored += 1;
                debug!(target: "feed", exchange = %self.exchange, symbol = %msg.symbol(), "unsubscribed symbol");
                continue;
            };

            let result = {
                let mut state = lock_state(&self.state);
                let result = state.apply(&symbol, msg);
                match &result {
                    Ok(Applied::Updated) => state.stats.applied += 1,
                    Ok(Applied::Stale) => state.stats.stale += 1,
                    Err(FeedError::Malformed(_)) => state.stats.malformed += 1,
                    Err(_) => {}
                }
                result
            };
            match result {
                Ok(_) => {}
                Err(FeedError::Malformed(reason)) => {
                    warn!(target: "feed", exchange = %self.exchange, reason = %reason, "dropped malformed message");
                }
                Err(e) if e.requires_resync() => return SessionEnd::Resync(e.to_string()),
                Err(e) => {
                    warn!(target: "feed", exchange = %self.exchange, error = %e, "update rejected");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::channel::ChannelConnector;
    use crate::market::{MarketMessage, TickerUpdate};

    fn fast_cfg() -> FeedConfig {
        FeedConfig {
            backoff_base_ms: 5,
            backoff_max_ms: 20,
            backoff_jitter: 0.0,
            ..FeedConfig::default()
        }
    }

    fn wait_for<F: Fn() -> bool>(f: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let conn = Arc::new(ChannelConnector::new("sim"));
        let feeder = Feeder::new("sim", &["BTCUSDT".to_string()], conn, fast_cfg());
        feeder.start().unwrap();
        assert_eq!(feeder.start(), Err(FeedError::AlreadyRunning("sim".to_string())));
        feeder.stop().unwrap();
        assert!(!feeder.is_started());
    }

    #[test]
    fn test_unsubscribed_symbol_ignored() {
        let conn = Arc::new(ChannelConnector::new("sim"));
        let session = conn.add_session();
        let feeder = Feeder::new("sim", &["BTCUSDT".to_string()], conn.clone(), fast_cfg());
        feeder.start().unwrap();
        assert!(feeder.wait_until_running(Duration::from_secs(5)));
        session.send(MarketMessage::Ticker(TickerUpdate {
            symbol: "DOGEUSDT".into(),
            last: Some(0.1),
            timestamp: 1,
            ..Default::default()
        }));
        assert!(wait_for(|| feeder.stats().ignored == 1));
        assert!(feeder.get_tickers().is_empty());
        feeder.stop().unwrap();
    }
}
