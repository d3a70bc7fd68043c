//! Append-only execution trace, one JSON object per line.

use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::ledger::Fill;
use crate::adapter::types::OrderResponse;
use crate::strategy::Decision;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Applied {
        detail: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fills: Vec<Fill>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        orders: Vec<OrderResponse>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        realized_pnl: Option<f64>,
    },
    Rejected {
        reason: String,
    },
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Outcome::Rejected { reason: reason.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// `{run_id}-{seq:06}`
    pub event_id: String,
    pub seq: u64,
    /// Wall-clock time the row was processed, RFC 3339.
    pub timestamp: String,
    /// Input line the row came from.
    pub line: usize,
    /// Fields exactly as read, including columns the executor ignores.
    pub signal: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub outcome: Outcome,
}

pub fn event_id(run_id: &str, seq: u64) -> String {
    format!("{}-{:06}", run_id, seq)
}

#[derive(Debug)]
pub struct TraceWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl TraceWriter {
    /// Create (or truncate) the trace at `path`.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("create trace {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append(&mut self, event: &TraceEvent) -> anyhow::Result<()> {
        let line = serde_json::to_string(event)?;
        writeln!(self.writer, "{}", line).with_context(|| format!("write {}", self.path.display()))?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Re-read a trace for audit. Fails on the first line that does not parse.
pub fn read_trace(path: &Path) -> anyhow::Result<Vec<TraceEvent>> {
    let file = File::open(path).with_context(|| format!("open trace {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let ev: TraceEvent =
            serde_json::from_str(&line).with_context(|| format!("{} line {}", path.display(), idx + 1))?;
        events.push(ev);
    }
    Ok(events)
}
