//! Signal file readers.
//!
//! Two layouts are accepted: CSV with a header row, or JSON lines when the
//! file ends in `.jsonl`/`.ndjson`. Reading never fails per row; a row that
//! cannot be split into fields carries its error forward so the executor
//! can record it as rejected.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::SignalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Long,
    Short,
    Close,
    Hold,
    /// Let the decision engine choose.
    Auto,
}

impl SignalAction {
    pub fn parse(raw: &str) -> Result<Self, SignalError> {
        match raw.trim().to_lowercase().as_str() {
            "long" | "buy" => Ok(SignalAction::Long),
            "short" | "sell" => Ok(SignalAction::Short),
            "close" | "exit" | "flat" => Ok(SignalAction::Close),
            "hold" => Ok(SignalAction::Hold),
            "auto" => Ok(SignalAction::Auto),
            "" => Err(SignalError::MissingField("action")),
            other => Err(SignalError::UnknownAction(other.to_string())),
        }
    }
}

/// One record as read from disk, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    /// 1-based line in the input file.
    pub line: usize,
    pub fields: BTreeMap<String, String>,
    pub invalid: Option<SignalError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    /// Epoch ms.
    pub timestamp: u64,
    pub symbol: String,
    pub action: SignalAction,
    pub price: Option<f64>,
    pub funding_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalFormat {
    Csv,
    JsonLines,
}

impl SignalFormat {
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()).as_deref() {
            Some("jsonl") | Some("ndjson") => SignalFormat::JsonLines,
            _ => SignalFormat::Csv,
        }
    }
}

pub fn read_signals(path: &Path) -> anyhow::Result<Vec<RawSignal>> {
    let file = File::open(path).with_context(|| format!("open signals {}", path.display()))?;
    let reader = BufReader::new(file);
    let format = SignalFormat::detect(path);

    let mut header: Option<Vec<String>> = None;
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read {} line {}", path.display(), idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match format {
            SignalFormat::JsonLines => out.push(json_row(idx + 1, trimmed)),
            SignalFormat::Csv => match &header {
                None => {
                    let cols: Vec<String> = split_csv(trimmed).iter().map(|c| c.to_lowercase()).collect();
                    for required in ["timestamp", "symbol", "action"] {
                        if !cols.iter().any(|c| c == required) {
                            bail!("{}: header missing column {:?}", path.display(), required);
                        }
                    }
                    header = Some(cols);
                }
                Some(cols) => out.push(csv_row(idx + 1, cols, trimmed)),
            },
        }
    }
    Ok(out)
}

/// Split one CSV line. Double-quoted fields may contain commas; `""` inside
/// quotes is a literal quote. Unquoted fields are trimmed.
fn split_csv(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.trim().is_empty() && !quoted => {
                field.clear();
                quoted = true;
                in_quotes = true;
            }
            ',' if !in_quotes => {
                fields.push(finish_field(&mut field, quoted));
                quoted = false;
            }
            _ => field.push(c),
        }
    }
    fields.push(finish_field(&mut field, quoted));
    fields
}

fn finish_field(field: &mut String, quoted: bool) -> String {
    let out = std::mem::take(field);
    if quoted {
        // keep quoted content verbatim, drop padding after the closing quote
        out.trim_end().to_string()
    } else {
        out.trim().to_string()
    }
}

fn csv_row(line: usize, header: &[String], text: &str) -> RawSignal {
    let values = split_csv(text);
    let fields = header
        .iter()
        .zip(values.iter())
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect();
    let invalid = (values.len() != header.len()).then(|| SignalError::ColumnCount {
        expected: header.len(),
        got: values.len(),
    });
    RawSignal { line, fields, invalid }
}

fn json_row(line: usize, text: &str) -> RawSignal {
    let parsed: Result<serde_json::Map<String, serde_json::Value>, _> = serde_json::from_str(text);
    match parsed {
        Ok(map) => {
            let fields = map
                .into_iter()
                .filter_map(|(k, v)| {
                    let v = match v {
                        serde_json::Value::Null => return None,
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    Some((k.to_lowercase(), v))
                })
                .collect();
            RawSignal {
                line,
                fields,
                invalid: None,
            }
        }
        Err(e) => RawSignal {
            line,
            fields: BTreeMap::from([("raw".to_string(), text.to_string())]),
            invalid: Some(SignalError::Json(e.to_string())),
        },
    }
}

/// Epoch seconds, epoch milliseconds or RFC 3339, normalised to epoch ms.
pub fn parse_timestamp(raw: &str) -> Result<u64, SignalError> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        // below 1e11 can only be seconds for any date after 1973
        return Ok(if n < 100_000_000_000 { n * 1000 } else { n });
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok())
        .ok_or_else(|| SignalError::BadTimestamp(raw.to_string()))
}

fn optional(fields: &BTreeMap<String, String>, key: &str) -> Option<String> {
    fields.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn parse_signal(raw: &RawSignal) -> Result<SignalRecord, SignalError> {
    if let Some(err) = &raw.invalid {
        return Err(err.clone());
    }
    let ts = optional(&raw.fields, "timestamp").ok_or(SignalError::MissingField("timestamp"))?;
    let symbol = optional(&raw.fields, "symbol").ok_or(SignalError::MissingField("symbol"))?;
    let action = SignalAction::parse(&optional(&raw.fields, "action").unwrap_or_default())?;

    let price = match optional(&raw.fields, "price") {
        None => None,
        Some(p) => match p.parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => Some(v),
            _ => return Err(SignalError::BadPrice(p)),
        },
    };
    let funding_rate = match optional(&raw.fields, "funding_rate") {
        None => None,
        Some(f) => match f.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => return Err(SignalError::BadFunding(f)),
        },
    };

    Ok(SignalRecord {
        timestamp: parse_timestamp(&ts)?,
        symbol: symbol.to_uppercase(),
        action,
        price,
        funding_rate,
    })
}
