use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use super::feeder::Feeder;
use crate::adapter::ConnectorFactory;
use crate::config::FeedConfig;
use crate::error::FeedError;

/// Name -> feeder mapping. Passed around by reference; tests build their own.
#[derive(Default)]
pub struct FeedRegistry {
    feeders: RwLock<HashMap<String, Arc<Feeder>>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Feeder>>> {
        match self.feeders.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Feeder>>> {
        match self.feeders.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Store `feeder` under `name`, replacing any previous entry.
    pub fn register(&self, name: &str, feeder: Arc<Feeder>) {
        self.write().insert(name.to_string(), feeder);
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<Feeder>> {
        self.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Feeder>> {
        self.read().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Build, start and register one feeder per exchange.
    ///
    /// Exchanges the factory cannot build are logged and skipped. A feeder
    /// whose `start` fails is still registered and returned so the caller
    /// can inspect it.
    pub fn start_all(
        &self,
        symbols: &[String],
        exchanges: &[String],
        factory: &dyn ConnectorFactory,
        cfg: &FeedConfig,
    ) -> HashMap<String, Arc<Feeder>> {
        let mut started = HashMap::new();
        for exchange in exchanges {
            let name = exchange.trim().to_lowercase();
            if name.is_empty() || started.contains_key(&name) {
                continue;
            }
            let connector = match factory.build(&name) {
                Ok(c) => c,
                Err(e) => {
                    warn!(target: "registry", exchange = %name, error = %e, "skipping exchange");
                    continue;
                }
            };
            let feeder = Arc::new(Feeder::new(&name, symbols, connector, cfg.clone()));
            if let Err(e) = feeder.start() {
                warn!(target: "registry", exchange = %name, error = %e, "feeder start failed");
            }
            self.register(&name, feeder.clone());
            started.insert(name, feeder);
        }
        info!(
            target: "registry",
            requested = exchanges.len(),
            started = started.len(),
            symbols = symbols.len(),
            "start_all"
        );
        started
    }

    /// Stop and unregister every given feeder. Failures are collected, not
    /// fatal; the remaining feeders are still stopped.
    pub fn stop_all(&self, feeders: &HashMap<String, Arc<Feeder>>) -> Vec<(String, FeedError)> {
        let mut names: Vec<&String> = feeders.keys().collect();
        names.sort();
        let mut failures = Vec::new();
        for name in names {
            // unregister first so the registry lock is released before stop blocks
            self.unregister(name);
            if let Err(e) = feeders[name].stop() {
                warn!(target: "registry", exchange = %name, error = %e, "feeder stop failed");
                failures.push((name.clone(), e));
            }
        }
        info!(target: "registry", stopped = feeders.len(), failed = failures.len(), "stop_all");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::channel::ChannelConnector;
    use crate::adapter::ExchangeConnector;

    fn feeder(name: &str) -> Arc<Feeder> {
        let conn: Arc<dyn ExchangeConnector> = Arc::new(ChannelConnector::new(name));
        Arc::new(Feeder::new(name, &["BTCUSDT".to_string()], conn, FeedConfig::default()))
    }

    #[test]
    fn test_register_replace_unregister() {
        let reg = FeedRegistry::new();
        assert!(reg.is_empty());
        let a = feeder("a");
        reg.register("a", a.clone());
        reg.register("a", feeder("a"));
        assert_eq!(reg.len(), 1);
        assert!(!Arc::ptr_eq(&reg.get("a").unwrap(), &a));
        assert!(reg.unregister("a").is_some());
        assert!(reg.unregister("a").is_none());
        assert!(reg.get("a").is_none());
    }

    #[test]
    fn test_names_sorted() {
        let reg = FeedRegistry::new();
        reg.register("bybit", feeder("bybit"));
        reg.register("binance", feeder("binance"));
        assert_eq!(reg.names(), vec!["binance".to_string(), "bybit".to_string()]);
    }
}
