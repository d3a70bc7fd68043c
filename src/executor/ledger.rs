use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::adapter::types::Side;
use crate::strategy::Position;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub side: Side,
    pub price: f64,
    /// Unsigned base quantity.
    pub qty: f64,
    pub fee: f64,
}

/// Paper fill: price moved against the taker by `slip_rate`, fee charged on
/// the reference notional.
pub fn paper_fill(side: Side, price: f64, qty: f64, fee_rate: f64, slip_rate: f64) -> Fill {
    let fill_price = match side {
        Side::Buy => price * (1.0 + slip_rate),
        Side::Sell => price * (1.0 - slip_rate),
    };
    Fill {
        side,
        price: fill_price,
        qty,
        fee: qty * price * fee_rate,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: Position,
    pub qty: f64,
    pub entry_price: f64,
    pub opened_at: u64,
}

/// Per-run bookkeeping written to `ledger.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub positions: BTreeMap<String, OpenPosition>,
    pub realized_pnl: f64,
    pub fees: f64,
    pub trades: u64,
}

impl Ledger {
    pub fn position(&self, symbol: &str) -> Position {
        self.positions.get(symbol).map(|p| p.side).unwrap_or(Position::Flat)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn open(&mut self, symbol: &str, fill: &Fill, ts: u64) {
        let side = match fill.side {
            Side::Buy => Position::Long,
            Side::Sell => Position::Short,
        };
        self.fees += fill.fee;
        self.trades += 1;
        self.positions.insert(
            symbol.to_string(),
            OpenPosition {
                side,
                qty: fill.qty,
                entry_price: fill.price,
                opened_at: ts,
            },
        );
    }

    /// Close the whole position with `fill`. Returns PnL net of the closing
    /// fee, or `None` when flat.
    pub fn close(&mut self, symbol: &str, fill: &Fill) -> Option<f64> {
        let pos = self.positions.remove(symbol)?;
        let gross = match pos.side {
            Position::Long => (fill.price - pos.entry_price) * pos.qty,
            Position::Short => (pos.entry_price - fill.price) * pos.qty,
            Position::Flat => 0.0,
        };
        let net = gross - fill.fee;
        self.realized_pnl += net;
        self.fees += fill.fee;
        self.trades += 1;
        Some(net)
    }
}
