use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;

use hotfeed::adapter::VenueFactory;
use hotfeed::config::{ExecutorConfig, FeedConfig, RankerConfig};
use hotfeed::executor::{ExecMode, StrategyExecutor};
use hotfeed::feed::FeedRegistry;
use hotfeed::logging;
use hotfeed::ranker::{HotCoinRanker, StaticMarketCap};
use hotfeed::strategy::StrategyParams;

const USAGE: &str = "usage:
  hotfeed scan <exchanges> <symbols> [wait_secs] [max_results]
  hotfeed replay <signals> <run_id> [dry|live]

  exchanges and symbols are comma-separated, e.g. binance,bybit BTCUSDT,ETHUSDT";

fn csv_arg(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn scan(args: &[String]) -> Result<()> {
    let (Some(exchanges), Some(symbols)) = (args.first(), args.get(1)) else {
        bail!("{}", USAGE);
    };
    let wait_secs: u64 = match args.get(2) {
        Some(v) => v.parse().with_context(|| format!("wait_secs {:?}", v))?,
        None => 15,
    };
    let max_results: usize = match args.get(3) {
        Some(v) => v.parse().with_context(|| format!("max_results {:?}", v))?,
        None => 20,
    };
    let exclude_top: usize = std::env::var("HOT_EXCLUDE_TOP")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);

    let feed_cfg = FeedConfig::from_env();
    let registry = FeedRegistry::new();
    let factory = VenueFactory::new(feed_cfg.clone());
    let feeders = registry.start_all(&csv_arg(symbols), &csv_arg(exchanges), &factory, &feed_cfg);
    if feeders.is_empty() {
        bail!("no feeder could be built for {:?}", exchanges);
    }
    info!(target: "system", feeders = feeders.len(), wait_secs, "collecting");
    std::thread::sleep(Duration::from_secs(wait_secs));

    let ranker = HotCoinRanker::new(RankerConfig::from_env(), Box::new(StaticMarketCap::default()));
    let hot = ranker.find_hot_coins(feeders.values().map(|f| &**f), max_results, exclude_top);
    let mut names: Vec<&String> = feeders.keys().collect();
    names.sort();
    let stats: Vec<_> = names
        .iter()
        .map(|n| {
            let f = &feeders[*n];
            json!({"exchange": n, "running": f.is_running(), "stats": f.stats()})
        })
        .collect();

    for (name, err) in registry.stop_all(&feeders) {
        eprintln!("stop {}: {}", name, err);
    }
    println!("{}", serde_json::to_string_pretty(&json!({"feeders": stats, "hot_coins": hot}))?);
    Ok(())
}

fn replay(args: &[String]) -> Result<()> {
    let (Some(signals), Some(run_id)) = (args.first(), args.get(1)) else {
        bail!("{}", USAGE);
    };
    let mode: ExecMode = args.get(2).map(String::as_str).unwrap_or("dry").parse()?;
    let mut exec = StrategyExecutor::new(mode, ExecutorConfig::from_env()).with_params(StrategyParams::from_env());
    let summary = exec.run_from_signals_file(&PathBuf::from(signals), run_id)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    logging::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("scan") => scan(&args[1..]),
        Some("replay") => replay(&args[1..]),
        Some("-h") | Some("--help") | Some("help") => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => bail!("{}", USAGE),
    }
}
