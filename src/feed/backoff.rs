use rand::Rng;
use tokio::time::Duration;

use crate::config::FeedConfig;

/// Reconnect delay schedule: exponential from `base_delay_ms`, clamped at
/// `max_delay_ms`, with ±`jitter_factor` spread.
#[derive(Clone, Debug)]
pub struct Backoff {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

impl Backoff {
    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self {
            base_delay_ms: cfg.backoff_base_ms,
            max_delay_ms: cfg.backoff_max_ms.max(cfg.backoff_base_ms),
            jitter_factor: cfg.backoff_jitter.clamp(0.0, 1.0),
        }
    }

    /// Calculate delay with exponential backoff and jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt.min(30) as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (clamped + jitter).clamp(0.0, self.max_delay_ms as f64);

        Duration::from_millis(final_delay as u64)
    }
}
