use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use hotfeed::adapter::types::{OrderRequest, OrderResponse, Side};
use hotfeed::adapter::unified::UnifiedAdapter;
use hotfeed::config::ExecutorConfig;
use hotfeed::executor::trace::Outcome;
use hotfeed::executor::{read_trace, ExecMode, StrategyExecutor};
use hotfeed::strategy::{Action, StrategyParams};

fn cfg(dir: &TempDir) -> ExecutorConfig {
    ExecutorConfig {
        trace_dir: dir.path().join("runs"),
        fee_rate: 0.001,
        slip_rate: 0.0,
        notional_per_trade: 100.0,
        max_open_positions: 2,
    }
}

fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

const MIXED: &str = "timestamp,symbol,action,price,funding_rate,source
1700000000,BTCUSDT,long,100,,scanner
1700000060,BTCUSDT,hold,101,,scanner
1700000120,ETHUSDT,buy,50,0.0001,scanner
not-a-time,BTCUSDT,long,100,,scanner
1700000180,BTCUSDT,teleport,100,,scanner
1700000240,,long,100,,scanner
1700000300,BTCUSDT,close,110,,scanner
";

#[test]
fn every_row_becomes_one_event() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "signals.csv", MIXED);
    let mut exec = StrategyExecutor::new(ExecMode::Dry, cfg(&dir));
    let summary = exec.run_from_signals_file(&input, "mixed").unwrap();

    assert_eq!(summary.events, 7);
    assert_eq!(summary.applied, 4);
    assert_eq!(summary.rejected, 3);
    assert_eq!(summary.trace_path, dir.path().join("runs/mixed/trace.jsonl"));

    let events = read_trace(&summary.trace_path).unwrap();
    assert_eq!(events.len(), 7);
    for (i, ev) in events.iter().enumerate() {
        assert_eq!(ev.seq, i as u64 + 1);
        assert_eq!(ev.event_id, format!("mixed-{:06}", i + 1));
    }
    // extra columns are carried through untouched
    assert_eq!(events[0].signal.get("source").map(String::as_str), Some("scanner"));
    assert!(matches!(&events[3].outcome, Outcome::Rejected { reason } if reason.contains("timestamp")));
    assert!(matches!(&events[4].outcome, Outcome::Rejected { reason } if reason.contains("teleport")));
    assert!(events[3].decision.is_none());

    // long 1 BTC @100 closed @110; the opening fee goes to fees, the closing fee nets out of pnl
    let pnl = summary.realized_pnl;
    assert!((pnl - (10.0 - 0.11)).abs() < 1e-9, "pnl {}", pnl);

    let manifest = read_json(&dir.path().join("runs/mixed/manifest.json"));
    assert_eq!(manifest["run_id"], "mixed");
    assert_eq!(manifest["mode"], "dry");
    assert_eq!(manifest["events"], 7);
    assert_eq!(manifest["input_sha256"].as_str().unwrap().len(), 64);

    let ledger = read_json(&dir.path().join("runs/mixed/ledger.json"));
    assert_eq!(ledger["positions"]["ETHUSDT"]["side"], "long");
    assert!(ledger["positions"].get("BTCUSDT").is_none());
}

#[test]
fn rerun_of_same_run_id_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "signals.csv", MIXED);
    let mut exec = StrategyExecutor::new(ExecMode::Dry, cfg(&dir));
    let first = exec.run_from_signals_file(&input, "again").unwrap();
    let second = exec.run_from_signals_file(&input, "again").unwrap();
    assert_eq!(first.events, second.events);
    assert_eq!(read_trace(&second.trace_path).unwrap().len(), 7);

    let other = exec.run_from_signals_file(&input, "other").unwrap();
    assert_ne!(other.trace_path, first.trace_path);
    assert_eq!(read_trace(&other.trace_path).unwrap().len(), 7);
    assert_eq!(read_trace(&first.trace_path).unwrap().len(), 7);
}

#[test]
fn bad_run_id_is_refused_before_writing() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "signals.csv", MIXED);
    let mut exec = StrategyExecutor::new(ExecMode::Dry, cfg(&dir));
    assert!(exec.run_from_signals_file(&input, "../up").is_err());
    assert!(!dir.path().join("runs").exists());
}

#[test]
fn risk_blocks_are_applied_not_rejected() {
    let dir = TempDir::new().unwrap();
    let input = write(
        &dir,
        "signals.csv",
        "timestamp,symbol,action,price
1,AAAUSDT,long,
2,AAAUSDT,long,10
3,AAAUSDT,long,11
4,BBBUSDT,short,20
5,CCCUSDT,long,30
6,DDDUSDT,close,
",
    );
    let mut exec = StrategyExecutor::new(ExecMode::Dry, cfg(&dir));
    let summary = exec.run_from_signals_file(&input, "risk").unwrap();
    let events = read_trace(&summary.trace_path).unwrap();

    let detail = |i: usize| match &events[i].outcome {
        Outcome::Applied { detail, .. } => detail.clone(),
        other => panic!("row {} not applied: {:?}", i, other),
    };
    assert_eq!(detail(0), "blocked: no reference price");
    assert_eq!(detail(1), "opened long");
    assert_eq!(detail(2), "already long");
    assert_eq!(detail(3), "opened short");
    assert_eq!(detail(4), "blocked: max open positions reached (2)");
    assert_eq!(detail(5), "already flat");
    assert_eq!(summary.applied, 6);
    assert_eq!(summary.rejected, 0);
}

#[test]
fn only_unparseable_rows_count_as_rejected() {
    let dir = TempDir::new().unwrap();
    let input = write(
        &dir,
        "signals.csv",
        "timestamp,symbol,action,price\n1,AAAUSDT,long,\n2,BBBUSDT,close,\n3,CCCUSDT,long,5\nbad,X,long,1\n",
    );
    let mut exec = StrategyExecutor::new(ExecMode::Dry, cfg(&dir));
    let summary = exec.run_from_signals_file(&input, "counts").unwrap();
    assert_eq!(summary.events, 4);
    assert_eq!(summary.applied, 3);
    assert_eq!(summary.rejected, 1);

    let events = read_trace(&summary.trace_path).unwrap();
    assert!(events[..3].iter().all(|e| e.outcome.is_applied()));
    assert!(matches!(events[3].outcome, Outcome::Rejected { .. }));
}

#[test]
fn auto_rows_run_the_decision_engine() {
    let dir = TempDir::new().unwrap();
    let mut body = String::from("{\"timestamp\":1,\"symbol\":\"SOLUSDT\",\"action\":\"auto\"}\n");
    for i in 0..10 {
        body.push_str(&format!(
            "{{\"timestamp\":{},\"symbol\":\"SOLUSDT\",\"action\":\"auto\",\"price\":{}}}\n",
            1_700_000_000 + i * 60,
            100 + i
        ));
    }
    let input = write(&dir, "signals.jsonl", &body);
    let params = StrategyParams {
        momentum_lookback: 2,
        htf_lookback: 5,
        ..StrategyParams::default()
    };
    let mut exec = StrategyExecutor::new(ExecMode::Dry, cfg(&dir)).with_params(params);
    let summary = exec.run_from_signals_file(&input, "auto").unwrap();
    assert_eq!(summary.events, 11);
    assert_eq!(summary.applied, 11);
    assert_eq!(summary.rejected, 0);

    let events = read_trace(&summary.trace_path).unwrap();
    let actions: Vec<Action> = events
        .iter()
        .filter_map(|e| e.decision.as_ref().map(|d| d.action))
        .collect();
    // five closes of history before the trend gate opens
    assert!(actions[..5].iter().all(|a| *a == Action::Hold));
    assert_eq!(actions[5], Action::Long);
    assert!(actions[6..].iter().all(|a| *a == Action::Hold));

    let ledger = read_json(&dir.path().join("runs/auto/ledger.json"));
    assert_eq!(ledger["positions"]["SOLUSDT"]["side"], "long");
}

#[derive(Clone, Default)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<OrderRequest>>>,
    fail: bool,
}

impl UnifiedAdapter for RecordingSink {
    fn place_order(&mut self, req: OrderRequest) -> Result<OrderResponse, String> {
        if self.fail {
            return Err("venue unavailable".to_string());
        }
        let id = format!("ord-{}", req.client_id);
        self.seen.lock().unwrap().push(req);
        Ok(OrderResponse {
            order_id: id,
            status: "FILLED".to_string(),
        })
    }
}

#[test]
fn live_mode_forwards_to_sink() {
    let dir = TempDir::new().unwrap();
    let input = write(
        &dir,
        "signals.csv",
        "timestamp,symbol,action,price\n1,BTCUSDT,long,100\n2,BTCUSDT,sell,90\n",
    );
    let sink = RecordingSink::default();
    let seen = sink.seen.clone();
    let mut exec = StrategyExecutor::new(ExecMode::Live, cfg(&dir)).with_order_sink(Box::new(sink));
    let summary = exec.run_from_signals_file(&input, "live").unwrap();
    assert_eq!(summary.applied, 2);

    let orders = seen.lock().unwrap();
    let sides: Vec<Side> = orders.iter().map(|o| o.side).collect();
    // open, then flip = close + open
    assert_eq!(sides, vec![Side::Buy, Side::Sell, Side::Sell]);
    assert_eq!(orders[0].client_id, "live-000001-0");

    let events = read_trace(&summary.trace_path).unwrap();
    match &events[1].outcome {
        Outcome::Applied { orders, .. } => assert_eq!(orders.len(), 2),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn sink_failure_blocks_the_row() {
    let dir = TempDir::new().unwrap();
    let input = write(&dir, "signals.csv", "timestamp,symbol,action,price\n1,BTCUSDT,long,100\n");
    let sink = RecordingSink {
        fail: true,
        ..RecordingSink::default()
    };
    let mut exec = StrategyExecutor::new(ExecMode::Live, cfg(&dir)).with_order_sink(Box::new(sink));
    let summary = exec.run_from_signals_file(&input, "fail").unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(summary.rejected, 0);
    let events = read_trace(&summary.trace_path).unwrap();
    match &events[0].outcome {
        Outcome::Applied { detail, fills, .. } => {
            assert_eq!(detail, "blocked: order sink: venue unavailable");
            assert!(fills.is_empty());
        }
        other => panic!("unexpected {:?}", other),
    }
    let ledger = read_json(&dir.path().join("runs/fail/ledger.json"));
    assert!(ledger["positions"].as_object().unwrap().is_empty());
}
