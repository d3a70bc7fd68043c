use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hotfeed::adapter::channel::ChannelConnector;
use hotfeed::adapter::ExchangeConnector;
use hotfeed::config::{FeedConfig, RankerConfig};
use hotfeed::error::FeedError;
use hotfeed::feed::FeedRegistry;
use hotfeed::market::{MarketMessage, TickerUpdate};
use hotfeed::ranker::{HotCoinRanker, StaticMarketCap};

fn cfg() -> FeedConfig {
    FeedConfig {
        backoff_base_ms: 5,
        backoff_max_ms: 20,
        backoff_jitter: 0.0,
        ..FeedConfig::default()
    }
}

fn connectors(names: &[&str]) -> HashMap<String, Arc<ChannelConnector>> {
    names
        .iter()
        .map(|n| (n.to_string(), Arc::new(ChannelConnector::new(n))))
        .collect()
}

#[test]
fn start_all_skips_unbuildable_and_keeps_unconnected() {
    let conns = connectors(&["alpha", "beta"]);
    let factory = |name: &str| -> Result<Arc<dyn ExchangeConnector>, FeedError> {
        conns
            .get(name)
            .map(|c| c.clone() as Arc<dyn ExchangeConnector>)
            .ok_or_else(|| FeedError::UnknownExchange(name.to_string()))
    };
    let _alpha_session = conns["alpha"].add_session();

    let registry = FeedRegistry::new();
    let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
    let exchanges = vec!["alpha".to_string(), "beta".to_string(), "nope".to_string()];
    let feeders = registry.start_all(&symbols, &exchanges, &factory, &cfg());

    assert_eq!(feeders.len(), 2);
    assert_eq!(registry.names(), vec!["alpha".to_string(), "beta".to_string()]);
    assert!(registry.get("nope").is_none());
    assert!(feeders["alpha"].wait_until_running(Duration::from_secs(5)));
    // beta has no session to connect to but is still registered
    assert!(!feeders["beta"].is_running());
    assert_eq!(feeders["beta"].symbols(), symbols.as_slice());

    let failures = registry.stop_all(&feeders);
    assert!(failures.is_empty());
    assert!(registry.is_empty());
    assert!(feeders.values().all(|f| !f.is_running()));
}

#[test]
fn ranker_reads_live_feeders() {
    let conns = connectors(&["alpha", "beta"]);
    let factory = |name: &str| -> Result<Arc<dyn ExchangeConnector>, FeedError> {
        conns
            .get(name)
            .map(|c| c.clone() as Arc<dyn ExchangeConnector>)
            .ok_or_else(|| FeedError::UnknownExchange(name.to_string()))
    };
    let a = conns["alpha"].add_session();
    let b = conns["beta"].add_session();

    let registry = FeedRegistry::new();
    let symbols = vec!["PEPEUSDT".to_string(), "WIFUSDT".to_string()];
    let feeders = registry.start_all(&symbols, &["alpha".to_string(), "beta".to_string()], &factory, &cfg());
    for f in feeders.values() {
        assert!(f.wait_until_running(Duration::from_secs(5)));
    }

    let tick = |symbol: &str, volume: f64| {
        MarketMessage::Ticker(TickerUpdate {
            symbol: symbol.to_string(),
            last: Some(1.0),
            quote_volume: Some(volume),
            timestamp: 1,
            ..Default::default()
        })
    };
    a.send(tick("PEPEUSDT", 100.0));
    a.send(tick("WIFUSDT", 150.0));
    b.send(tick("PEPEUSDT", 100.0));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while (feeders["alpha"].get_tickers().len() < 2 || feeders["beta"].get_tickers().is_empty())
        && std::time::Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(5));
    }

    let ranker = HotCoinRanker::new(RankerConfig::default(), Box::new(StaticMarketCap::default()));
    let hot = ranker.find_hot_coins(feeders.values().map(|f| &**f), 10, 0);
    let symbols: Vec<&str> = hot.iter().map(|h| h.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["PEPE/USDT", "WIF/USDT"]);
    assert_eq!(hot[0].quote_volume, 200.0);

    assert!(registry.stop_all(&feeders).is_empty());
}

#[test]
fn registries_are_isolated() {
    let conns = connectors(&["alpha"]);
    let factory = |name: &str| -> Result<Arc<dyn ExchangeConnector>, FeedError> {
        conns
            .get(name)
            .map(|c| c.clone() as Arc<dyn ExchangeConnector>)
            .ok_or_else(|| FeedError::UnknownExchange(name.to_string()))
    };
    let one = FeedRegistry::new();
    let two = FeedRegistry::new();
    let feeders = one.start_all(&["BTCUSDT".to_string()], &["alpha".to_string()], &factory, &cfg());
    assert_eq!(one.len(), 1);
    assert!(two.is_empty());
    one.stop_all(&feeders);
}
