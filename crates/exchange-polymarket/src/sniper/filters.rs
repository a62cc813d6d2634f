//! Per-candle statistical filters feeding the scan cascade.
//!
//! Small stateful trackers, all reset at the candle boundary: momentum sign
//! ring, open-cross counter, 60-tick range, velocity EMA. Plus the pure
//! candle-phase and time-bonus functions over Eastern-Time candle position.

use std::collections::VecDeque;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::US::Eastern;

/// Signs tracked for momentum consistency.
const MOMENTUM_WINDOW: usize = 10;

/// Ring of sign-of-move entries; consistency is the mean in [-1, +1].
#[derive(Debug, Clone, Default)]
pub struct MomentumRing {
    ticks: VecDeque<i8>,
}

impl MomentumRing {
    /// Records the sign of the current open-relative move.
    pub fn push(&mut self, price_diff_pct: f64) {
        self.ticks.push_back(if price_diff_pct >= 0.0 { 1 } else { -1 });
        while self.ticks.len() > MOMENTUM_WINDOW {
            self.ticks.pop_front();
        }
    }

    /// Mean of the ring; 0 under three samples (direction unknown).
    #[must_use]
    pub fn consistency(&self) -> f64 {
        if self.ticks.len() < 3 {
            return 0.0;
        }
        let sum: i32 = self.ticks.iter().map(|&t| i32::from(t)).sum();
        f64::from(sum) / self.ticks.len() as f64
    }

    /// Clears at the candle boundary.
    pub fn reset(&mut self) {
        self.ticks.clear();
    }
}

/// Counts sign flips of the open-relative move; five or more within one
/// candle marks chop.
#[derive(Debug, Clone, Default)]
pub struct CrossCounter {
    count: u32,
    last_dir: i8,
}

impl CrossCounter {
    /// Records the sign of the current move.
    pub fn push(&mut self, price_diff_pct: f64) {
        let dir: i8 = if price_diff_pct >= 0.0 { 1 } else { -1 };
        if self.last_dir == 0 {
            self.last_dir = dir;
            return;
        }
        if self.last_dir != dir {
            self.count += 1;
            self.last_dir = dir;
        }
    }

    /// Open-cross count this candle.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Clears at the candle boundary.
    pub fn reset(&mut self) {
        self.count = 0;
        self.last_dir = 0;
    }
}

/// Rolling 60-tick high/low; a pinched range means the price is going
/// nowhere regardless of the open-relative move.
#[derive(Debug, Clone)]
pub struct RangeTracker {
    min: f64,
    max: f64,
    ticks: u32,
}

impl Default for RangeTracker {
    fn default() -> Self {
        Self {
            min: f64::MAX,
            max: f64::MIN,
            ticks: 0,
        }
    }
}

impl RangeTracker {
    /// Records a price.
    pub fn push(&mut self, price: f64) {
        self.min = self.min.min(price);
        self.max = self.max.max(price);
        self.ticks += 1;
        if self.ticks > 60 {
            self.min = price;
            self.max = price;
            self.ticks = 1;
        }
    }

    /// Range as a percentage of the low; -1 under ten samples.
    #[must_use]
    pub fn range_pct(&self) -> f64 {
        if self.ticks < 10 || self.min <= 0.0 {
            return -1.0;
        }
        (self.max - self.min) / self.min * 100.0
    }

    /// Clears at the candle boundary.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// EMA-smoothed price velocity in %/s (α = 0.3 over raw per-tick velocity).
#[derive(Debug, Clone, Default)]
pub struct VelocityTracker {
    last_price: f64,
    last_time_ms: i64,
    ema: f64,
}

impl VelocityTracker {
    /// Feeds a price observation; returns the smoothed velocity.
    ///
    /// Sub-50 ms windows are skipped; the raw quotient becomes noise.
    pub fn update(&mut self, price: f64, now_ms: i64) -> f64 {
        if self.last_price <= 0.0 || self.last_time_ms <= 0 {
            self.last_price = price;
            self.last_time_ms = now_ms;
            return 0.0;
        }
        let elapsed_ms = now_ms - self.last_time_ms;
        if elapsed_ms < 50 {
            return self.ema;
        }

        let elapsed_s = elapsed_ms as f64 / 1000.0;
        let raw = ((price - self.last_price) / self.last_price * 100.0) / elapsed_s;
        self.ema = 0.3 * raw + 0.7 * self.ema;
        self.last_price = price;
        self.last_time_ms = now_ms;
        self.ema
    }

    /// Current smoothed velocity.
    #[must_use]
    pub fn velocity(&self) -> f64 {
        self.ema
    }
}

// =============================================================================
// Candle phase (Eastern Time)
// =============================================================================

/// Seconds elapsed in the current 5-minute candle, Eastern Time.
#[must_use]
pub fn candle_elapsed_secs(now: DateTime<Utc>) -> i64 {
    let et = now.with_timezone(&Eastern);
    i64::from(et.minute() % 5) * 60 + i64::from(et.second())
}

/// Candle phase: 0 = oracle-sync window (first 5 s), -1 = close-of-book
/// guard (last 15 s), 1/2/3 = early/mid/late.
#[must_use]
pub fn candle_position(elapsed_secs: i64) -> i32 {
    if elapsed_secs < 5 {
        return 0;
    }
    if elapsed_secs >= 285 {
        return -1;
    }
    if elapsed_secs < 90 {
        1
    } else if elapsed_secs < 210 {
        2
    } else {
        3
    }
}

/// Early-entry tiered override for the first 40 seconds.
///
/// T1: |Δ| ≥ 0.10 and target ≤ 0.45. T2 (from 30 s): |Δ| ≥ 0.08 and
/// target ≤ 0.50. Anything else this early is blocked.
#[must_use]
pub fn early_entry_allowed(elapsed_secs: i64, abs_diff_pct: f64, target_odds: f64) -> bool {
    debug_assert!(elapsed_secs < 40);
    if abs_diff_pct >= 0.10 && target_odds <= 0.45 {
        return true;
    }
    if elapsed_secs >= 30 && abs_diff_pct >= 0.08 && target_odds <= 0.50 {
        return true;
    }
    false
}

/// Confidence bonus for time elapsed in the candle: the later the tick,
/// the more of the candle is already decided.
#[must_use]
pub fn time_bonus(elapsed_secs: i64) -> f64 {
    let minute = elapsed_secs / 60;
    match minute {
        m if m >= 4 => 0.07,
        3 => 0.05,
        2 => 0.03,
        1 => 0.01,
        _ => 0.0,
    }
}

// =============================================================================
// Tests
// =============================================================================
