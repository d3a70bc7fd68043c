//! Signal replay harness.
//!
//! Reads a signals file row by row, runs each row through risk bookkeeping
//! (and the decision engine for `auto` rows), fills it on paper or through
//! the order sink, and records every row in a run-scoped trace:
//!
//! ```text
//! <trace_dir>/<run_id>/trace.jsonl
//! <trace_dir>/<run_id>/manifest.json
//! <trace_dir>/<run_id>/ledger.json
//! ```

pub mod ledger;
pub mod signals;
pub mod trace;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adapter::types::{OrderRequest, OrderType, Side};
use crate::adapter::unified::{NullAdapter, UnifiedAdapter};
use crate::config::ExecutorConfig;
use crate::logging::{file_sha256, params_hash, ts_now};
use crate::strategy::{decide, Action, Decision, Position, StrategyParams};
use ledger::{paper_fill, Fill, Ledger};
use signals::{parse_signal, read_signals, RawSignal, SignalAction, SignalRecord};
use trace::{event_id, Outcome, TraceEvent, TraceWriter};

pub use trace::read_trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Paper fills, nothing leaves the process.
    Dry,
    /// Orders go to the configured sink.
    Live,
}

impl ExecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecMode::Dry => "dry",
            ExecMode::Live => "live",
        }
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dry" | "paper" => Ok(ExecMode::Dry),
            "live" => Ok(ExecMode::Live),
            other => bail!("unknown mode {:?} (expected dry|live)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub trace_path: PathBuf,
    pub events: u64,
    pub applied: u64,
    pub rejected: u64,
    pub realized_pnl: f64,
}

#[derive(Debug, Serialize)]
struct RunManifest<'a> {
    run_id: &'a str,
    mode: ExecMode,
    input_path: String,
    input_sha256: String,
    params_hash: String,
    params: &'a StrategyParams,
    fee_rate: f64,
    slip_rate: f64,
    notional_per_trade: f64,
    max_open_positions: usize,
    started_at: String,
    finished_at: String,
    events: u64,
    applied: u64,
    rejected: u64,
}

/// Run ids become directory names, so they must be a single plain path
/// component.
pub fn validate_run_id(run_id: &str) -> anyhow::Result<()> {
    if run_id.is_empty() {
        bail!("run id is empty");
    }
    if run_id.starts_with('.') || run_id.contains("..") {
        bail!("run id {:?} may not start with '.' or contain '..'", run_id);
    }
    if let Some(c) = run_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        bail!("run id {:?} contains {:?}", run_id, c);
    }
    Ok(())
}

/// Per-run mutable state. Nothing survives between runs.
#[derive(Default)]
struct RunState {
    ledger: Ledger,
    closes: HashMap<String, VecDeque<f64>>,
}

impl RunState {
    fn last_price(&self, symbol: &str) -> Option<f64> {
        self.closes.get(symbol).and_then(|c| c.back().copied())
    }

    fn record_price(&mut self, symbol: &str, price: f64, keep: usize) {
        let closes = self.closes.entry(symbol.to_string()).or_default();
        closes.push_back(price);
        while closes.len() > keep {
            closes.pop_front();
        }
    }
}

struct Leg {
    side: Side,
    qty: f64,
    closing: bool,
}

pub struct StrategyExecutor {
    mode: ExecMode,
    cfg: ExecutorConfig,
    params: StrategyParams,
    sink: Box<dyn UnifiedAdapter>,
}

impl StrategyExecutor {
    pub fn new(mode: ExecMode, cfg: ExecutorConfig) -> Self {
        Self {
            mode,
            cfg,
            params: StrategyParams::default(),
            sink: Box::new(NullAdapter),
        }
    }

    pub fn with_params(mut self, params: StrategyParams) -> Self {
        self.params = params;
        self
    }

    /// Order sink used in live mode. Ignored in dry mode.
    pub fn with_order_sink(mut self, sink: Box<dyn UnifiedAdapter>) -> Self {
        self.sink = sink;
        self
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.cfg.trace_dir.join(run_id)
    }

    pub fn run_from_signals_file(&mut self, path: &Path, run_id: &str) -> anyhow::Result<RunSummary> {
        validate_run_id(run_id)?;
        let started_at = ts_now();
        let rows = read_signals(path)?;
        let input_sha256 = file_sha256(path).with_context(|| format!("hash {}", path.display()))?;

        let dir = self.run_dir(run_id);
        let trace_path = dir.join("trace.jsonl");
        let mut writer = TraceWriter::create(&trace_path)?;
        info!(
            target: "exec",
            run_id,
            mode = %self.mode,
            input = %path.display(),
            rows = rows.len(),
            "run started"
        );

        let mut run = RunState::default();
        let mut applied = 0u64;
        let mut rejected = 0u64;
        for (i, raw) in rows.iter().enumerate() {
            let seq = i as u64 + 1;
            let id = event_id(run_id, seq);
            let (decision, outcome) = self.process(&mut run, raw, &id);
            if outcome.is_applied() {
                applied += 1;
            } else {
                rejected += 1;
            }
            writer.append(&TraceEvent {
                event_id: id,
                seq,
                timestamp: ts_now(),
                line: raw.line,
                signal: raw.fields.clone(),
                decision,
                outcome,
            })?;
        }
        let events = writer.written();

        let params_json = serde_json::to_string(&self.params)?;
        let manifest = RunManifest {
            run_id,
            mode: self.mode,
            input_path: path.display().to_string(),
            input_sha256,
            params_hash: params_hash(&params_json),
            params: &self.params,
            fee_rate: self.cfg.fee_rate,
            slip_rate: self.cfg.slip_rate,
            notional_per_trade: self.cfg.notional_per_trade,
            max_open_positions: self.cfg.max_open_positions,
            started_at,
            finished_at: ts_now(),
            events,
            applied,
            rejected,
        };
        write_json(&dir.join("manifest.json"), &manifest)?;
        write_json(&dir.join("ledger.json"), &run.ledger)?;

        info!(
            target: "exec",
            run_id,
            events,
            applied,
            rejected,
            realized_pnl = run.ledger.realized_pnl,
            open = run.ledger.open_count(),
            "run finished"
        );
        Ok(RunSummary {
            run_id: run_id.to_string(),
            trace_path,
            events,
            applied,
            rejected,
            realized_pnl: run.ledger.realized_pnl,
        })
    }

    fn process(&mut self, run: &mut RunState, raw: &RawSignal, id: &str) -> (Option<Decision>, Outcome) {
        let sig = match parse_signal(raw) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(target: "exec", line = raw.line, error = %e, "rejected row");
                return (None, Outcome::rejected(e.to_string()));
            }
        };
        let reference = sig.price.or_else(|| run.last_price(&sig.symbol));
        let decision = match sig.action {
            SignalAction::Auto => {
                let Some(price) = sig.price else {
                    return (None, blocked("auto signal without price"));
                };
                let history: Vec<f64> = run
                    .closes
                    .get(&sig.symbol)
                    .map(|c| c.iter().copied().collect())
                    .unwrap_or_default();
                let d = decide(&self.params, price, &history, sig.funding_rate, run.ledger.position(&sig.symbol));
                debug!(
                    target: "strategy",
                    symbol = %sig.symbol,
                    action = d.action.as_str(),
                    reason = %d.reason,
                    "decision"
                );
                d
            }
            explicit => Decision {
                action: match explicit {
                    SignalAction::Long => Action::Long,
                    SignalAction::Short => Action::Short,
                    SignalAction::Close => Action::Close,
                    _ => Action::Hold,
                },
                reason: "explicit signal".to_string(),
                confidence: None,
            },
        };
        if let Some(price) = sig.price {
            run.record_price(&sig.symbol, price, self.params.required_history());
        }
        let outcome = self.apply(run, &sig, decision.action, reference, id);
        (Some(decision), outcome)
    }

    fn apply(
        &mut self,
        run: &mut RunState,
        sig: &SignalRecord,
        action: Action,
        reference: Option<f64>,
        id: &str,
    ) -> Outcome {
        let current = run.ledger.position(&sig.symbol);
        let (legs, detail) = match action {
            Action::Hold => return applied("hold"),
            Action::Close => {
                let Some(pos) = run.ledger.positions.get(&sig.symbol) else {
                    return applied("already flat");
                };
                let side = if pos.side == Position::Long { Side::Sell } else { Side::Buy };
                (
                    vec![Leg {
                        side,
                        qty: pos.qty,
                        closing: true,
                    }],
                    format!("closed {}", position_name(pos.side)),
                )
            }
            Action::Long | Action::Short => {
                let (want, side) = if action == Action::Long {
                    (Position::Long, Side::Buy)
                } else {
                    (Position::Short, Side::Sell)
                };
                if current == want {
                    return applied(format!("already {}", position_name(want)));
                }
                let Some(price) = reference else {
                    return blocked("no reference price");
                };
                if current == Position::Flat && run.ledger.open_count() >= self.cfg.max_open_positions {
                    return blocked(format!(
                        "max open positions reached ({})",
                        self.cfg.max_open_positions
                    ));
                }
                let qty = self.cfg.notional_per_trade / price;
                if !qty.is_finite() || qty <= 0.0 {
                    return blocked("non-positive order size");
                }
                let mut legs = Vec::new();
                let detail = match run.ledger.positions.get(&sig.symbol) {
                    Some(pos) => {
                        legs.push(Leg {
                            side,
                            qty: pos.qty,
                            closing: true,
                        });
                        format!("flipped {} to {}", position_name(pos.side), position_name(want))
                    }
                    None => format!("opened {}", position_name(want)),
                };
                legs.push(Leg {
                    side,
                    qty,
                    closing: false,
                });
                (legs, detail)
            }
        };
        let Some(price) = reference else {
            return blocked("no reference price");
        };

        let mut fills = Vec::new();
        let mut orders = Vec::new();
        let mut realized: Option<f64> = None;
        for (i, leg) in legs.iter().enumerate() {
            let fill = match self.mode {
                ExecMode::Dry => paper_fill(leg.side, price, leg.qty, self.cfg.fee_rate, self.cfg.slip_rate),
                ExecMode::Live => {
                    let req = OrderRequest {
                        symbol: sig.symbol.clone(),
                        side: leg.side,
                        order_type: OrderType::Market,
                        price: None,
                        qty: leg.qty,
                        client_id: format!("{}-{}", id, i),
                    };
                    match self.sink.place_order(req) {
                        Ok(resp) => {
                            debug!(target: "exec", order_id = %resp.order_id, status = %resp.status, "order acknowledged");
                            orders.push(resp);
                            Fill {
                                side: leg.side,
                                price,
                                qty: leg.qty,
                                fee: leg.qty * price * self.cfg.fee_rate,
                            }
                        }
                        Err(e) if i == 0 => return blocked(format!("order sink: {}", e)),
                        Err(e) => {
                            // first leg already booked; report what happened
                            warn!(target: "exec", symbol = %sig.symbol, error = %e, "flip left flat");
                            return Outcome::Applied {
                                detail: format!("closed, reopen failed: {}", e),
                                fills,
                                orders,
                                realized_pnl: realized,
                            };
                        }
                    }
                }
            };
            if leg.closing {
                if let Some(pnl) = run.ledger.close(&sig.symbol, &fill) {
                    realized = Some(realized.unwrap_or(0.0) + pnl);
                }
            } else {
                run.ledger.open(&sig.symbol, &fill, sig.timestamp);
            }
            fills.push(fill);
        }
        debug!(target: "exec", symbol = %sig.symbol, detail = %detail, "applied");
        Outcome::Applied {
            detail,
            fills,
            orders,
            realized_pnl: realized,
        }
    }
}

fn applied(detail: impl Into<String>) -> Outcome {
    Outcome::Applied {
        detail: detail.into(),
        fills: Vec::new(),
        orders: Vec::new(),
        realized_pnl: None,
    }
}

/// A well-formed row the risk rules refused. Counted as applied; only rows
/// that fail to parse are rejected.
fn blocked(reason: impl std::fmt::Display) -> Outcome {
    applied(format!("blocked: {}", reason))
}

fn position_name(p: Position) -> &'static str {
    match p {
        Position::Flat => "flat",
        Position::Long => "long",
        Position::Short => "short",
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))
}
