//! One-sided CUSUM drift detector (Lopez de Prado symmetric filter).
//!
//! Accumulates per-tick percent returns into `S⁺ = max(0, S⁺ + r)` and
//! `S⁻ = min(0, S⁻ + r)`; the first excursion past the threshold arms the
//! detector for the rest of the candle. A candle where nothing fires within
//! the first ten ticks is treated as driftless and skipped by the scanner.

/// CUSUM trigger threshold when ATR is not yet available.
const FALLBACK_THRESHOLD: f64 = 0.025;

/// Ticks without a trigger before the candle counts as driftless.
const NO_TRIGGER_TICK_LIMIT: u32 = 10;

/// Per-candle CUSUM state.
#[derive(Debug, Clone)]
pub struct CusumDetector {
    s_pos: f64,
    s_neg: f64,
    reference_price: f64,
    triggered: bool,
    ticks_seen: u32,
}

impl CusumDetector {
    /// Fresh detector (also the state after a candle-boundary reset).
    #[must_use]
    pub fn new() -> Self {
        Self {
            s_pos: 0.0,
            s_neg: 0.0,
            reference_price: 0.0,
            triggered: false,
            ticks_seen: 0,
        }
    }

    /// Resets at a candle boundary.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feeds one tick.
    ///
    /// `threshold` is `ATR% × cusumMult` for the active regime, or the
    /// fallback when ATR is not ready. Returns whether the detector is
    /// (now or already) triggered.
    pub fn update(&mut self, price: f64, threshold: f64) -> bool {
        if price <= 0.0 {
            return self.triggered;
        }
        if self.reference_price <= 0.0 {
            self.reference_price = price;
            self.ticks_seen = 1;
            return self.triggered;
        }

        let r = (price - self.reference_price) / self.reference_price * 100.0;
        self.reference_price = price;
        self.ticks_seen += 1;

        self.s_pos = (self.s_pos + r).max(0.0);
        self.s_neg = (self.s_neg + r).min(0.0);

        if !self.triggered && (self.s_pos > threshold || -self.s_neg > threshold) {
            self.triggered = true;
        }
        self.triggered
    }

    /// Effective threshold for the current ATR state.
    #[must_use]
    pub fn threshold(atr_pct: f64, atr_ready: bool, cusum_mult: f64) -> f64 {
        if atr_ready {
            atr_pct * cusum_mult
        } else {
            FALLBACK_THRESHOLD
        }
    }

    /// Whether the detector has fired this candle.
    #[must_use]
    pub fn triggered(&self) -> bool {
        self.triggered
    }

    /// True when enough ticks have passed without a trigger to call the
    /// candle driftless.
    #[must_use]
    pub fn stalled(&self) -> bool {
        !self.triggered && self.ticks_seen >= NO_TRIGGER_TICK_LIMIT
    }

    /// Positive accumulator (metrics).
    #[must_use]
    pub fn s_pos(&self) -> f64 {
        self.s_pos
    }

    /// Negative accumulator (metrics).
    #[must_use]
    pub fn s_neg(&self) -> f64 {
        self.s_neg
    }
}

impl Default for CusumDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upward_drift_triggers_positive_side() {
        let mut cusum = CusumDetector::new();
        let mut price = 100_000.0;
        let mut fired = false;
        for _ in 0..5 {
            price *= 1.0002; // +0.02% per tick
            fired = cusum.update(price, 0.05);
        }
        assert!(fired);
        assert!(cusum.s_pos() > 0.05);
    }

    #[test]
    fn downward_drift_triggers_negative_side() {
        let mut cusum = CusumDetector::new();
        let mut price = 100_000.0;
        for _ in 0..5 {
            price *= 0.9998;
            cusum.update(price, 0.05);
        }
        assert!(cusum.triggered());
        assert!(cusum.s_neg() < 0.0);
    }

    #[test]
    fn oscillation_does_not_trigger() {
        let mut cusum = CusumDetector::new();
        for i in 0..20 {
            let price = if i % 2 == 0 { 100_000.0 } else { 100_010.0 };
            cusum.update(price, 0.05);
        }
        assert!(!cusum.triggered());
        assert!(cusum.stalled());
    }

    #[test]
    fn stalls_after_ten_quiet_ticks() {
        let mut cusum = CusumDetector::new();
        for _ in 0..9 {
            cusum.update(100_000.0, 0.05);
        }
        assert!(!cusum.stalled());
        cusum.update(100_000.0, 0.05);
        assert!(cusum.stalled());
    }

    #[test]
    fn reset_clears_everything() {
        let mut cusum = CusumDetector::new();
        let mut price = 100_000.0;
        for _ in 0..5 {
            price *= 1.0003;
            cusum.update(price, 0.02);
        }
        assert!(cusum.triggered());

        cusum.reset();
        assert!(!cusum.triggered());
        assert!((cusum.s_pos() - 0.0).abs() < f64::EPSILON);
        assert!((cusum.s_neg() - 0.0).abs() < f64::EPSILON);
        assert!(!cusum.stalled());
    }

    #[test]
    fn threshold_scales_with_atr_or_falls_back() {
        assert!((CusumDetector::threshold(0.08, true, 0.40) - 0.032).abs() < 1e-9);
        assert!((CusumDetector::threshold(0.08, false, 0.40) - 0.025).abs() < 1e-9);
    }

    #[test]
    fn trigger_latches_for_the_candle() {
        let mut cusum = CusumDetector::new();
        let mut price = 100_000.0;
        for _ in 0..5 {
            price *= 1.0003;
            cusum.update(price, 0.02);
        }
        assert!(cusum.triggered());
        // Flat ticks afterwards do not un-trigger.
        for _ in 0..10 {
            assert!(cusum.update(price, 0.02));
        }
    }
}
