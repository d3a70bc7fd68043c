use std::path::PathBuf;
use std::str::FromStr;

pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Connection and resync settings shared by every feeder.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter: f64,
    pub connect_timeout_ms: u64,
    /// A connection with no inbound message for this long is recycled.
    pub stale_timeout_ms: u64,
    pub binance_ws: String,
    pub bybit_ws: String,
    pub book_depth: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            backoff_jitter: 0.2,
            connect_timeout_ms: 10_000,
            stale_timeout_ms: 30_000,
            binance_ws: "wss://stream.binance.com:9443".to_string(),
            bybit_ws: "wss://stream.bybit.com/v5/public/linear".to_string(),
            book_depth: 50,
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            backoff_base_ms: env_or("FEED_BACKOFF_BASE_MS", d.backoff_base_ms),
            backoff_max_ms: env_or("FEED_BACKOFF_MAX_MS", d.backoff_max_ms),
            backoff_jitter: env_or("FEED_BACKOFF_JITTER", d.backoff_jitter),
            connect_timeout_ms: env_or("FEED_CONNECT_TIMEOUT_MS", d.connect_timeout_ms),
            stale_timeout_ms: env_or("FEED_STALE_TIMEOUT_MS", d.stale_timeout_ms),
            binance_ws: std::env::var("BINANCE_WS").unwrap_or(d.binance_ws),
            bybit_ws: std::env::var("BYBIT_WS").unwrap_or(d.bybit_ws),
            book_depth: env_or("FEED_BOOK_DEPTH", d.book_depth),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankerConfig {
    /// Half-width of the band around mid used for depth, as a fraction.
    pub depth_band: f64,
    /// Upper bound on symbols scored per pass.
    pub candidate_limit: usize,
    pub quote_assets: Vec<String>,
    pub stablecoins: Vec<String>,
    pub min_quote_volume: f64,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            depth_band: 0.02,
            candidate_limit: 100,
            quote_assets: ["USDT", "USDC", "FDUSD", "USD"].iter().map(|s| s.to_string()).collect(),
            stablecoins: ["USDT", "USDC", "FDUSD", "BUSD", "DAI", "TUSD", "USDP", "USDE", "PYUSD"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_quote_volume: 0.0,
        }
    }
}

impl RankerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let quotes: Vec<&str> = d.quote_assets.iter().map(String::as_str).collect();
        let stables: Vec<&str> = d.stablecoins.iter().map(String::as_str).collect();
        Self {
            depth_band: env_or("HOT_DEPTH_BAND", d.depth_band),
            candidate_limit: env_or("HOT_CANDIDATES", d.candidate_limit),
            quote_assets: env_list("HOT_QUOTES", &quotes),
            stablecoins: env_list("HOT_STABLES", &stables),
            min_quote_volume: env_or("HOT_MIN_VOLUME", d.min_quote_volume),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub trace_dir: PathBuf,
    pub fee_rate: f64,
    pub slip_rate: f64,
    /// Quote notional committed per entry.
    pub notional_per_trade: f64,
    pub max_open_positions: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            trace_dir: PathBuf::from("out/runs"),
            fee_rate: 0.0004,
            slip_rate: 0.0005,
            notional_per_trade: 100.0,
            max_open_positions: 5,
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            trace_dir: std::env::var("TRACE_DIR").map(PathBuf::from).unwrap_or(d.trace_dir),
            fee_rate: env_or("FEE_RATE", d.fee_rate),
            slip_rate: env_or("SLIP_RATE", d.slip_rate),
            notional_per_trade: env_or("NOTIONAL_PER_TRADE", d.notional_per_trade),
            max_open_positions: env_or("MAX_OPEN_POSITIONS", d.max_open_positions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let f = FeedConfig::default();
        assert!(f.backoff_base_ms < f.backoff_max_ms);
        let r = RankerConfig::default();
        assert!(r.quote_assets.contains(&"USDT".to_string()));
        assert!(r.depth_band > 0.0 && r.depth_band < 1.0);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("HOTFEED_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("HOTFEED_TEST_GARBAGE", 7u32), 7);
        std::env::set_var("HOTFEED_TEST_GARBAGE", " 9 ");
        assert_eq!(env_or("HOTFEED_TEST_GARBAGE", 7u32), 9);
    }
}
