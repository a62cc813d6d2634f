//! Expected-value calculator and Kelly sizing.
//!
//! Pure and deterministic: maps the signed open-relative move, directional
//! momentum, velocity, candle-time bonus, live odds, and balance to a
//! direction, an edge, and a stake. The scanner treats anything below the
//! EV threshold (or an adverse gap) as HOLD.

use serde::{Deserialize, Serialize};

/// Forward odds clamp range.
const FWD_MIN_ODDS: f64 = 0.20;
const FWD_MAX_ODDS: f64 = 0.80;

/// EV cap; anything above this is a data artifact, not real edge.
const MAX_EV: f64 = 0.80;

/// Minimum EV to act.
const FWD_THRESHOLD: f64 = 0.05;

/// Probability estimate clamp range.
const MIN_PROB: f64 = 0.50;
const MAX_PROB: f64 = 0.92;

/// Combined bonus clamp.
const MIN_BONUS: f64 = -0.05;
const MAX_BONUS: f64 = 0.04;

/// Bet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Hold,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
            Direction::Hold => write!(f, "HOLD"),
        }
    }
}

/// Sizing bounds and the balance ratio reference.
#[derive(Debug, Clone)]
pub struct EvConfig {
    /// Minimum stake (USDC).
    pub min_bet: f64,
    /// Maximum stake (USDC).
    pub max_bet: f64,
    /// Session starting balance; the safe-fraction cap scales with growth.
    pub initial_balance: f64,
}

impl Default for EvConfig {
    fn default() -> Self {
        Self {
            min_bet: 1.0,
            max_bet: 10.0,
            initial_balance: 50.0,
        }
    }
}

/// Result of one EV evaluation.
///
/// The reason string is observability only — nothing parses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvResult {
    pub direction: Direction,
    pub ev: f64,
    pub estimated_prob: f64,
    pub gap: f64,
    pub bet_amount: f64,
    pub strategy: String,
    pub reason: String,
}

/// Pure EV calculator.
#[derive(Debug, Clone)]
pub struct EvCalculator {
    config: EvConfig,
}

impl EvCalculator {
    /// Creates a calculator with the given sizing config.
    #[must_use]
    pub fn new(config: EvConfig) -> Self {
        Self { config }
    }

    /// Forward (with-the-move) EV evaluation.
    ///
    /// `momentum_score` is the sign-ring consistency in [-1, +1], aligned
    /// with the price sign; `velocity` is the smoothed %/s.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn calc_forward(
        &self,
        price_diff_pct: f64,
        up_odds: f64,
        down_odds: f64,
        velocity: f64,
        momentum_score: f64,
        time_bonus: f64,
        balance: f64,
    ) -> EvResult {
        let is_up = price_diff_pct > 0.0;

        let estimate = Self::estimate_prob(price_diff_pct, velocity, momentum_score, time_bonus);

        // Target odds come straight from the bet side's book.
        let raw_target = if is_up { up_odds } else { down_odds };
        let target_odds = raw_target.clamp(FWD_MIN_ODDS, FWD_MAX_ODDS);

        let ev = (estimate / target_odds - 1.0).min(MAX_EV);
        let gap = estimate - target_odds;

        if ev <= FWD_THRESHOLD {
            return EvResult {
                direction: Direction::Hold,
                ev,
                estimated_prob: estimate,
                gap,
                bet_amount: 0.0,
                strategy: "FWD".to_string(),
                reason: format!(
                    "FWD EV{:.1}% ≤ 임계{:.0}%",
                    ev * 100.0,
                    FWD_THRESHOLD * 100.0
                ),
            };
        }

        let bet_amount = self.bet_size(balance, ev, target_odds);
        let direction = if is_up { Direction::Up } else { Direction::Down };

        EvResult {
            direction,
            ev,
            estimated_prob: estimate,
            gap,
            bet_amount,
            strategy: "FWD".to_string(),
            reason: format!(
                "FWD {direction} | 가격{price_diff_pct:+.3}% | 추정{:.0}% vs 오즈{:.0}% | EV+{:.1}%",
                estimate * 100.0,
                target_odds * 100.0,
                ev * 100.0
            ),
        }
    }

    /// Probability estimate from the move size plus clamped bonuses.
    ///
    /// `change_pct` is signed: the velocity penalty keys on direction
    /// disagreement, not magnitude.
    #[must_use]
    pub fn estimate_prob(
        change_pct: f64,
        velocity: f64,
        directed_momentum: f64,
        time_bonus: f64,
    ) -> f64 {
        let abs_pct = change_pct.abs();

        let base = if abs_pct >= 1.00 {
            0.92
        } else if abs_pct >= 0.70 {
            0.90
        } else if abs_pct >= 0.50 {
            0.88
        } else if abs_pct >= 0.35 {
            0.86
        } else if abs_pct >= 0.25 {
            0.83
        } else if abs_pct >= 0.15 {
            0.79
        } else if abs_pct >= 0.10 {
            0.73
        } else if abs_pct >= 0.08 {
            0.67
        } else if abs_pct >= 0.05 {
            0.63
        } else if abs_pct >= 0.03 {
            0.58
        } else {
            0.53
        };

        let abs_velocity = velocity.abs();
        let mut velocity_bonus = if abs_velocity >= 0.05 {
            0.04
        } else if abs_velocity >= 0.02 {
            0.02
        } else if abs_velocity >= 0.01 {
            0.01
        } else {
            0.0
        };
        // Price up while velocity down (or the reverse) smells like reversal.
        if (change_pct > 0.0 && velocity < 0.0) || (change_pct < 0.0 && velocity > 0.0) {
            velocity_bonus = -0.03;
        }

        let momentum_bonus = if directed_momentum >= 0.8 {
            0.04
        } else if directed_momentum >= 0.6 {
            0.02
        } else if directed_momentum >= 0.3 {
            0.0
        } else if directed_momentum >= 0.0 {
            -0.02
        } else if directed_momentum >= -0.3 {
            -0.03
        } else {
            -0.05
        };

        let bonus = (velocity_bonus + momentum_bonus + time_bonus).clamp(MIN_BONUS, MAX_BONUS);

        (base + bonus).clamp(MIN_PROB, MAX_PROB)
    }

    /// Kelly-derived stake: the Kelly fraction is tempered by an EV-banded
    /// multiplier and capped by how far the balance has grown from the
    /// session start.
    #[must_use]
    pub fn bet_size(&self, balance: f64, ev: f64, target_odds: f64) -> f64 {
        if ev <= 0.0 {
            return 0.0;
        }
        let odds = target_odds.clamp(FWD_MIN_ODDS, FWD_MAX_ODDS);

        let payout = 1.0 / odds;
        let kelly_fraction = ev / (payout - 1.0);

        let kelly_mult = if ev >= 1.0 {
            0.35
        } else if ev >= 0.5 {
            0.30
        } else if ev >= 0.3 {
            0.25
        } else {
            0.20
        };

        let ratio = if self.config.initial_balance > 0.0 {
            balance / self.config.initial_balance
        } else {
            1.0
        };
        let max_fraction = if ratio < 1.0 {
            0.02
        } else if ratio < 2.0 {
            0.03
        } else if ratio < 5.0 {
            0.04
        } else {
            0.05
        };

        let safe_fraction = (kelly_fraction * kelly_mult).clamp(0.02, max_fraction);
        (balance * safe_fraction).clamp(self.config.min_bet, self.config.max_bet)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> EvCalculator {
        EvCalculator::new(EvConfig::default())
    }

    // -------------------------------------------------------------------------
    // Probability estimate
    // -------------------------------------------------------------------------

    #[test]
    fn base_probability_buckets() {
        // No bonuses: zero velocity with momentum in the neutral band.
        let p = |pct: f64| EvCalculator::estimate_prob(pct, 0.0, 0.3, 0.0);
        assert!((p(1.20) - 0.92).abs() < 1e-9);
        assert!((p(0.75) - 0.90).abs() < 1e-9);
        assert!((p(0.55) - 0.88).abs() < 1e-9);
        assert!((p(0.40) - 0.86).abs() < 1e-9);
        assert!((p(0.30) - 0.83).abs() < 1e-9);
        assert!((p(0.20) - 0.79).abs() < 1e-9);
        assert!((p(0.12) - 0.73).abs() < 1e-9);
        assert!((p(0.09) - 0.67).abs() < 1e-9);
        assert!((p(0.06) - 0.63).abs() < 1e-9);
        assert!((p(0.04) - 0.58).abs() < 1e-9);
        assert!((p(0.01) - 0.53).abs() < 1e-9);
    }

    #[test]
    fn estimate_always_within_clamp() {
        for pct in [-1.5, -0.4, -0.02, 0.0, 0.02, 0.4, 1.5] {
            for vel in [-0.1, 0.0, 0.1] {
                for mom in [-1.0, -0.2, 0.5, 1.0] {
                    for tb in [0.0, 0.07] {
                        let p = EvCalculator::estimate_prob(pct, vel, mom, tb);
                        assert!((0.50..=0.92).contains(&p), "estimate {p} out of range");
                    }
                }
            }
        }
    }

    #[test]
    fn adverse_velocity_overrides_bonus() {
        // Strong positive move, strongly negative velocity.
        let with_penalty = EvCalculator::estimate_prob(0.20, -0.10, 0.3, 0.0);
        let without = EvCalculator::estimate_prob(0.20, 0.10, 0.3, 0.0);
        assert!(with_penalty < without);
        assert!((with_penalty - (0.79 - 0.03)).abs() < 1e-9);
    }

    #[test]
    fn bonus_sum_is_clamped() {
        // Max bonuses: velocity 0.04 + momentum 0.04 + time 0.07 = 0.15 → 0.04.
        let p = EvCalculator::estimate_prob(0.20, 0.10, 0.9, 0.07);
        assert!((p - (0.79 + 0.04)).abs() < 1e-9);

        // Worst bonuses: velocity -0.03 + momentum -0.05 = -0.08 → -0.05.
        let q = EvCalculator::estimate_prob(0.20, -0.10, -0.9, 0.0);
        assert!((q - (0.79 - 0.05)).abs() < 1e-9);
    }

    // -------------------------------------------------------------------------
    // Direction and EV
    // -------------------------------------------------------------------------

    #[test]
    fn positive_move_bets_up_on_up_odds() {
        let r = calc().calc_forward(0.12, 0.45, 0.58, 0.02, 1.0, 0.03, 50.0);
        assert_eq!(r.direction, Direction::Up);
        // estimate = 0.73 + clamp(0.02 + 0.04 + 0.03) = 0.77; EV = 0.77/0.45 - 1.
        assert!((r.estimated_prob - 0.77).abs() < 1e-9);
        assert!((r.ev - (0.77 / 0.45 - 1.0)).abs() < 1e-9);
        assert!(r.gap > 0.0);
        assert!(r.bet_amount >= 1.0);
    }

    #[test]
    fn negative_move_bets_down_on_down_odds() {
        let r = calc().calc_forward(-0.12, 0.58, 0.45, -0.02, -1.0, 0.03, 50.0);
        assert_eq!(r.direction, Direction::Down);
        // Target odds are the down ask, not 1 − up.
        assert!((r.gap - (r.estimated_prob - 0.45)).abs() < 1e-9);
    }

    #[test]
    fn momentum_is_directional_for_down_moves() {
        // A consistent down ring (score −1, aligned with a down move)
        // passes through as directed momentum against the signed move.
        let aligned = calc().calc_forward(-0.12, 0.58, 0.45, -0.02, -1.0, 0.0, 50.0);
        let opposed = calc().calc_forward(-0.12, 0.58, 0.45, -0.02, 1.0, 0.0, 50.0);
        // The caller aligns the score; here we only check both evaluate.
        assert_eq!(aligned.direction, Direction::Down);
        assert_eq!(opposed.direction, Direction::Down);
    }

    #[test]
    fn ev_is_capped() {
        // Tiny odds clamp to 0.20; estimate 0.92 → raw EV 3.6 → capped 0.80.
        let r = calc().calc_forward(1.50, 0.05, 0.99, 0.10, 1.0, 0.07, 50.0);
        assert!((r.ev - MAX_EV).abs() < 1e-9);
    }

    #[test]
    fn low_ev_returns_hold() {
        // Estimate ~0.53, odds 0.55 → EV negative → HOLD.
        let r = calc().calc_forward(0.01, 0.55, 0.47, 0.0, 0.3, 0.0, 50.0);
        assert_eq!(r.direction, Direction::Hold);
        assert!((r.bet_amount - 0.0).abs() < f64::EPSILON);
        assert!(!r.reason.is_empty());
    }

    #[test]
    fn sub_threshold_ev_holds() {
        // EV just under the 5% threshold still holds (strictly-greater rule).
        let estimate = EvCalculator::estimate_prob(0.04, 0.0, 0.3, 0.0); // 0.58
        let odds = estimate / 1.04; // EV ≈ 0.04
        let r = calc().calc_forward(0.04, odds, 1.0 - odds, 0.0, 0.3, 0.0, 50.0);
        assert_eq!(r.direction, Direction::Hold);
    }

    // -------------------------------------------------------------------------
    // Kelly sizing
    // -------------------------------------------------------------------------

    #[test]
    fn stake_respects_min_and_max() {
        let c = calc();
        // Weak edge on a small balance clamps up to min bet.
        assert!((c.bet_size(10.0, 0.06, 0.50) - 1.0).abs() < 1e-9);
        // Huge balance clamps to max bet.
        assert!((c.bet_size(100_000.0, 0.75, 0.45) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_or_negative_ev_sizes_zero() {
        let c = calc();
        assert!((c.bet_size(50.0, 0.0, 0.45) - 0.0).abs() < f64::EPSILON);
        assert!((c.bet_size(50.0, -0.2, 0.45) - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn drawdown_caps_fraction_at_two_percent() {
        let c = EvCalculator::new(EvConfig {
            min_bet: 0.1,
            max_bet: 100.0,
            initial_balance: 100.0,
        });
        // Balance below initial → fraction pinned to 0.02 regardless of EV.
        let stake = c.bet_size(80.0, 0.75, 0.45);
        assert!((stake - 80.0 * 0.02).abs() < 1e-9);
    }

    #[test]
    fn growth_raises_fraction_cap() {
        let c = EvCalculator::new(EvConfig {
            min_bet: 0.1,
            max_bet: 1_000.0,
            initial_balance: 100.0,
        });
        // EV 0.75 at odds 0.45: kelly = 0.75 / (1/0.45 - 1) ≈ 0.614,
        // × 0.30 ≈ 0.184, always above every cap, so the cap binds.
        let at_1x = c.bet_size(150.0, 0.75, 0.45);
        let at_2x = c.bet_size(250.0, 0.75, 0.45);
        let at_5x = c.bet_size(600.0, 0.75, 0.45);
        assert!((at_1x - 150.0 * 0.03).abs() < 1e-9);
        assert!((at_2x - 250.0 * 0.04).abs() < 1e-9);
        assert!((at_5x - 600.0 * 0.05).abs() < 1e-9);
    }

    #[test]
    fn dry_run_happy_path_scenario() {
        // Spec-seeded scenario: +0.12% at 120 s elapsed, odds up 0.45,
        // NORMAL regime, fully consistent momentum ring.
        let r = calc().calc_forward(0.12, 0.45, 0.58, 0.02, 1.0, 0.03, 50.0);
        assert_eq!(r.direction, Direction::Up);
        assert!((r.estimated_prob - 0.77).abs() < 1e-6);
        assert!((r.ev - 0.7111).abs() < 0.01);
        assert!(r.bet_amount >= 1.0 && r.bet_amount <= 10.0);
        assert_eq!(r.strategy, "FWD");
    }
}
