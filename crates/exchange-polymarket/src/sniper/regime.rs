//! Volatility regime classification and per-regime thresholds.
//!
//! ATR(14) as a percentage of the last close buckets the market into four
//! regimes; every adaptive threshold in the scanner scales off the regime.

use serde::{Deserialize, Serialize};

/// Coarse volatility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolRegime {
    /// ATR% < 0.04: overnight/weekend drift, thin tape.
    Low,
    /// 0.04 ≤ ATR% < 0.10: ordinary session.
    Normal,
    /// 0.10 ≤ ATR% < 0.18: US open, news flow.
    High,
    /// ATR% ≥ 0.18: FOMC/CPI-grade moves.
    Extreme,
}

impl VolRegime {
    /// Classifies an ATR percentage.
    #[must_use]
    pub fn classify(atr_pct: f64) -> Self {
        if atr_pct < 0.04 {
            VolRegime::Low
        } else if atr_pct < 0.10 {
            VolRegime::Normal
        } else if atr_pct < 0.18 {
            VolRegime::High
        } else {
            VolRegime::Extreme
        }
    }

    /// Threshold set for this regime.
    #[must_use]
    pub fn thresholds(&self) -> RegimeThresholds {
        match self {
            VolRegime::Low => RegimeThresholds {
                entry_mult: 0.40,
                range_mult: 0.25,
                momentum_min: 0.35,
                cusum_mult: 0.35,
                gap_adj: -0.01,
            },
            VolRegime::Normal => RegimeThresholds {
                entry_mult: 0.50,
                range_mult: 0.30,
                momentum_min: 0.40,
                cusum_mult: 0.40,
                gap_adj: 0.00,
            },
            VolRegime::High => RegimeThresholds {
                entry_mult: 0.60,
                range_mult: 0.35,
                momentum_min: 0.50,
                cusum_mult: 0.50,
                gap_adj: 0.01,
            },
            VolRegime::Extreme => RegimeThresholds {
                entry_mult: 0.70,
                range_mult: 0.40,
                momentum_min: 0.60,
                cusum_mult: 0.60,
                gap_adj: 0.02,
            },
        }
    }

    /// Short label for metrics/logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            VolRegime::Low => "LOW",
            VolRegime::Normal => "NORMAL",
            VolRegime::High => "HIGH",
            VolRegime::Extreme => "EXTREME",
        }
    }
}

impl std::fmt::Display for VolRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Regime-scaled scanner thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeThresholds {
    /// Multiplier on ATR% for the minimum entry move.
    pub entry_mult: f64,
    /// Multiplier on ATR% for the minimum 60-tick range.
    pub range_mult: f64,
    /// Minimum momentum consistency (|mean of sign ring|).
    pub momentum_min: f64,
    /// Multiplier on ATR% for the CUSUM trigger threshold.
    pub cusum_mult: f64,
    /// Additive adjustment to the adaptive EV gap.
    pub gap_adj: f64,
}

/// `dynamicMinMove = clamp(ATR% × entryMult, 0.01, 0.10)`, 0.03 fallback.
#[must_use]
pub fn dynamic_min_move(atr_pct: f64, atr_ready: bool, thresholds: &RegimeThresholds) -> f64 {
    if !atr_ready {
        return 0.03;
    }
    (atr_pct * thresholds.entry_mult).clamp(0.01, 0.10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_boundaries() {
        assert_eq!(VolRegime::classify(0.039), VolRegime::Low);
        assert_eq!(VolRegime::classify(0.04), VolRegime::Normal);
        assert_eq!(VolRegime::classify(0.099), VolRegime::Normal);
        assert_eq!(VolRegime::classify(0.10), VolRegime::High);
        assert_eq!(VolRegime::classify(0.179), VolRegime::High);
        assert_eq!(VolRegime::classify(0.18), VolRegime::Extreme);
    }

    #[test]
    fn threshold_table_matches_regime_tuning() {
        let normal = VolRegime::Normal.thresholds();
        assert!((normal.entry_mult - 0.50).abs() < 1e-9);
        assert!((normal.gap_adj - 0.0).abs() < 1e-9);

        let extreme = VolRegime::Extreme.thresholds();
        assert!((extreme.entry_mult - 0.70).abs() < 1e-9);
        assert!((extreme.momentum_min - 0.60).abs() < 1e-9);
        assert!((extreme.gap_adj - 0.02).abs() < 1e-9);
    }

    #[test]
    fn dynamic_min_move_clamps_and_falls_back() {
        let t = VolRegime::Normal.thresholds();
        assert!((dynamic_min_move(0.07, true, &t) - 0.035).abs() < 1e-9);
        assert!((dynamic_min_move(0.001, true, &t) - 0.01).abs() < 1e-9);
        assert!((dynamic_min_move(0.5, true, &t) - 0.10).abs() < 1e-9);
        assert!((dynamic_min_move(0.5, false, &t) - 0.03).abs() < 1e-9);
    }
}
