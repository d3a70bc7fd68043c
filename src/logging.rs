//! Structured logging and audit helpers.
//!
//! Every component logs through `tracing` with a fixed target per domain so
//! output can be filtered the same way across binaries:
//!
//! - `feed`      connection lifecycle, resyncs, dropped messages
//! - `registry`  bulk start/stop
//! - `ranker`    hot-coin passes
//! - `strategy`  decisions
//! - `exec`      signal replay, fills, trace writes
//! - `system`    startup and shutdown
//!
//! `LOG_LEVEL` sets the minimum level (default `info`), `LOG_DOMAINS` limits
//! output to a comma-separated list of domains (or `all`), and
//! `LOG_FORMAT=json` switches to one JSON object per line.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Feed,
    Registry,
    Ranker,
    Strategy,
    Exec,
    System,
}

impl Domain {
    pub const ALL: [Domain; 6] = [
        Domain::Feed,
        Domain::Registry,
        Domain::Ranker,
        Domain::Strategy,
        Domain::Exec,
        Domain::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Feed => "feed",
            Domain::Registry => "registry",
            Domain::Ranker => "ranker",
            Domain::Strategy => "strategy",
            Domain::Exec => "exec",
            Domain::System => "system",
        }
    }
}

fn level_from(raw: Option<&str>) -> &'static str {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") => "warn",
        Some("error") | Some("fatal") => "error",
        _ => "info",
    }
}

/// Build an `EnvFilter` directive string from level and domain settings.
pub fn filter_directives(level: Option<&str>, domains: Option<&str>) -> String {
    let level = level_from(level);
    match domains.map(str::trim) {
        None | Some("") | Some("all") => level.to_string(),
        Some(list) => {
            let mut parts = vec!["off".to_string()];
            for d in Domain::ALL {
                if list.split(',').any(|x| x.trim() == d.as_str()) {
                    parts.push(format!("{}={}", d.as_str(), level));
                }
            }
            parts.join(",")
        }
    }
}

/// Install the global subscriber. Returns false if one was already set,
/// which is harmless (tests and binaries may both call this).
pub fn init() -> bool {
    let filter = match std::env::var("RUST_LOG") {
        Ok(raw) if !raw.trim().is_empty() => EnvFilter::new(raw),
        _ => EnvFilter::new(filter_directives(
            std::env::var("LOG_LEVEL").ok().as_deref(),
            std::env::var("LOG_DOMAINS").ok().as_deref(),
        )),
    };
    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Short stable hash of an arbitrary string (first 16 hex chars of sha256).
pub fn params_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
