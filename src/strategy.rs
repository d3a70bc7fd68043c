//! Multi-timeframe decision engine.
//!
//! `decide` is a pure function: the same price, history, funding rate and
//! position always produce the same `Decision`, which is what makes executor
//! runs replayable.

use serde::{Deserialize, Serialize};

use crate::config::env_or;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Long,
    Short,
    Close,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Long => "long",
            Action::Short => "short",
            Action::Close => "close",
            Action::Hold => "hold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Flat,
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    /// In [0, 1]. Absent for plain holds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<f64>,
}

impl Decision {
    fn hold(reason: &str) -> Self {
        Self {
            action: Action::Hold,
            reason: reason.to_string(),
            confidence: None,
        }
    }

    fn with(action: Action, reason: String, confidence: f64) -> Self {
        Self {
            action,
            reason,
            confidence: Some(confidence.clamp(0.0, 1.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StrategyParams {
    /// Closes back used for short-term momentum.
    pub momentum_lookback: usize,
    /// Closes averaged for the higher-timeframe trend.
    pub htf_lookback: usize,
    /// Minimum |momentum| for an entry, as a fraction.
    pub momentum_threshold: f64,
    /// Price must clear the HTF average by this fraction to count as trending.
    pub htf_band: f64,
    /// Longs are skipped above this funding rate, shorts below its negative.
    pub max_funding_rate: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            momentum_lookback: 20,
            htf_lookback: 1000,
            momentum_threshold: 0.002,
            htf_band: 0.001,
            max_funding_rate: 0.0005,
        }
    }
}

impl StrategyParams {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            momentum_lookback: env_or("STRAT_MOMENTUM_LOOKBACK", d.momentum_lookback),
            htf_lookback: env_or("STRAT_HTF_LOOKBACK", d.htf_lookback),
            momentum_threshold: env_or("STRAT_MOMENTUM_THRESHOLD", d.momentum_threshold),
            htf_band: env_or("STRAT_HTF_BAND", d.htf_band),
            max_funding_rate: env_or("STRAT_MAX_FUNDING", d.max_funding_rate),
        }
    }

    /// Longest history any gate needs.
    pub fn required_history(&self) -> usize {
        self.htf_lookback.max(self.momentum_lookback).max(1)
    }
}

// =============================================================================
// Gates
// =============================================================================

/// Higher-timeframe trend and the price's distance from the HTF average
/// (`price / sma - 1`). `None` when the history is too short or degenerate.
pub fn htf_trend(params: &StrategyParams, price: f64, closes: &[f64]) -> Option<(Trend, f64)> {
    let n = params.htf_lookback.max(1);
    if closes.len() < n {
        return None;
    }
    let window = &closes[closes.len() - n..];
    let sma = window.iter().sum::<f64>() / n as f64;
    if !sma.is_finite() || sma <= 0.0 {
        return None;
    }
    let first = window[0];
    let last = window[n - 1];
    let distance = price / sma - 1.0;
    let trend = if price > sma * (1.0 + params.htf_band) && last > first {
        Trend::Up
    } else if price < sma * (1.0 - params.htf_band) && last < first {
        Trend::Down
    } else {
        Trend::Flat
    };
    Some((trend, distance))
}

/// `price / close[len - lookback] - 1`.
pub fn momentum(params: &StrategyParams, price: f64, closes: &[f64]) -> Option<f64> {
    let n = params.momentum_lookback.max(1);
    if closes.len() < n {
        return None;
    }
    let reference = closes[closes.len() - n];
    if !reference.is_finite() || reference <= 0.0 {
        return None;
    }
    Some(price / reference - 1.0)
}

fn strength(value: f64, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 1.0;
    }
    // saturates at 4x the threshold
    (value.abs() / (scale * 4.0)).min(1.0)
}

// =============================================================================
// Decision
// =============================================================================

pub fn decide(
    params: &StrategyParams,
    price: f64,
    recent_closes: &[f64],
    funding_rate: Option<f64>,
    position: Position,
) -> Decision {
    if !price.is_finite() || price <= 0.0 {
        return Decision::hold("invalid price");
    }
    let Some((trend, distance)) = htf_trend(params, price, recent_closes) else {
        return Decision::hold("insufficient history for trend");
    };
    let trend_strength = strength(distance, params.htf_band.max(params.momentum_threshold));

    // exits first
    match (position, trend) {
        (Position::Long, Trend::Down) => {
            return Decision::with(
                Action::Close,
                format!("trend turned down against long ({:+.4})", distance),
                trend_strength,
            )
        }
        (Position::Short, Trend::Up) => {
            return Decision::with(
                Action::Close,
                format!("trend turned up against short ({:+.4})", distance),
                trend_strength,
            )
        }
        (Position::Flat, _) => {}
        _ => return Decision::hold("position open, trend intact"),
    }

    let Some(mom) = momentum(params, price, recent_closes) else {
        return Decision::hold("insufficient history for momentum");
    };
    let thr = params.momentum_threshold;
    let action = if mom >= thr && trend == Trend::Up {
        Action::Long
    } else if mom <= -thr && trend == Trend::Down {
        Action::Short
    } else if (mom >= thr && trend == Trend::Down) || (mom <= -thr && trend == Trend::Up) {
        return Decision::hold("momentum against trend");
    } else {
        return Decision::hold("no signal");
    };

    if let Some(f) = funding_rate.filter(|f| f.is_finite()) {
        if action == Action::Long && f > params.max_funding_rate {
            return Decision::hold("funding too high for long");
        }
        if action == Action::Short && f < -params.max_funding_rate {
            return Decision::hold("funding too negative for short");
        }
    }

    let confidence = (strength(mom, thr) + trend_strength) / 2.0;
    Decision::with(
        action,
        format!("momentum {:+.4} with {:?} trend", mom, trend),
        confidence,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StrategyParams {
        StrategyParams {
            momentum_lookback: 20,
            htf_lookback: 200,
            ..StrategyParams::default()
        }
    }

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.05).collect()
    }

    fn falling(n: usize) -> Vec<f64> {
        (0..n).map(|i| 200.0 - i as f64 * 0.05).collect()
    }

    #[test]
    fn short_history_holds() {
        let p = StrategyParams::default();
        let closes = rising(999);
        let d = decide(&p, 200.0, &closes, None, Position::Flat);
        assert_eq!(d.action, Action::Hold);
        let d = decide(&p, 200.0, &[], None, Position::Long);
        assert_eq!(d.action, Action::Hold);
    }

    #[test]
    fn aligned_uptrend_goes_long() {
        let closes = rising(200);
        let last = *closes.last().unwrap();
        let d = decide(&params(), last + 0.5, &closes, None, Position::Flat);
        assert_eq!(d.action, Action::Long);
        let c = d.confidence.unwrap();
        assert!((0.0..=1.0).contains(&c));
    }

    #[test]
    fn aligned_downtrend_goes_short() {
        let closes = falling(200);
        let last = *closes.last().unwrap();
        let d = decide(&params(), last - 0.5, &closes, Some(0.0), Position::Flat);
        assert_eq!(d.action, Action::Short);
    }

    #[test]
    fn momentum_against_trend_holds() {
        let closes = rising(200);
        // still above the HTF average but below the close 20 bars back
        let d = decide(&params(), 106.0, &closes, None, Position::Flat);
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, "momentum against trend");
    }

    #[test]
    fn crowded_funding_blocks_long_but_absent_funding_does_not() {
        let closes = rising(200);
        let price = closes[199] + 0.5;
        assert_eq!(decide(&params(), price, &closes, Some(0.01), Position::Flat).action, Action::Hold);
        assert_eq!(decide(&params(), price, &closes, None, Position::Flat).action, Action::Long);
    }

    #[test]
    fn reversal_closes_before_entry() {
        let closes = falling(200);
        let price = closes[199] - 0.5;
        let d = decide(&params(), price, &closes, None, Position::Long);
        assert_eq!(d.action, Action::Close);
        let d = decide(&params(), price, &closes, None, Position::Short);
        assert_eq!(d.action, Action::Hold);
    }

    #[test]
    fn invalid_price_holds() {
        let closes = rising(200);
        assert_eq!(decide(&params(), f64::NAN, &closes, None, Position::Flat).action, Action::Hold);
        assert_eq!(decide(&params(), 0.0, &closes, None, Position::Flat).action, Action::Hold);
    }

    #[test]
    fn replay_is_deterministic() {
        let closes = rising(200);
        let a = decide(&params(), 110.2, &closes, Some(0.0001), Position::Flat);
        let b = decide(&params(), 110.2, &closes, Some(0.0001), Position::Flat);
        assert_eq!(a, b);
    }
}
