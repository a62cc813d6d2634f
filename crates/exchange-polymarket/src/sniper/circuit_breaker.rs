//! Consecutive-loss circuit breaker.
//!
//! Three straight losses arm the breaker for five minutes. Re-arming
//! requires a loss newer than the one that armed it last, so a stale streak
//! cannot re-trip the breaker the moment the pause expires.

use parking_lot::RwLock;
use thiserror::Error;

/// Losses in a row that trip the breaker.
const CONSECUTIVE_LOSSES: usize = 3;

/// Pause after tripping (ms).
const PAUSE_MS: i64 = 300_000;

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Losses in a row before halting.
    pub consecutive_losses: usize,
    /// Halt duration in milliseconds.
    pub pause_ms: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            consecutive_losses: CONSECUTIVE_LOSSES,
            pause_ms: PAUSE_MS,
        }
    }
}

/// Reason trading is currently halted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CircuitBreakerError {
    /// In the post-streak pause.
    #[error("Circuit breaker armed, {remaining_secs}s remaining")]
    Armed {
        /// Seconds until the pause expires.
        remaining_secs: i64,
    },
}

#[derive(Debug, Default)]
struct BreakerState {
    armed_until_ms: i64,
    armed_at_trade_id: i64,
}

/// Thread-safe breaker; the scanner polls it and feeds it resolved trades.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(BreakerState::default()),
        }
    }

    /// Creates a breaker with default tuning.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Whether trading is allowed right now.
    ///
    /// # Errors
    /// Returns the arming reason while halted.
    pub fn can_trade(&self, now_ms: i64) -> Result<(), CircuitBreakerError> {
        let state = self.state.read();
        if now_ms < state.armed_until_ms {
            return Err(CircuitBreakerError::Armed {
                remaining_secs: (state.armed_until_ms - now_ms) / 1000,
            });
        }
        Ok(())
    }

    /// Inspects the latest resolved trades (newest first) and arms the
    /// breaker when they are all losses.
    ///
    /// `results` pairs trade id with whether the trade lost. Arming only
    /// happens when the newest loss post-dates the loss that armed the
    /// breaker last time.
    ///
    /// Returns true when the breaker armed on this inspection.
    pub fn inspect(&self, results: &[(i64, bool)], now_ms: i64) -> bool {
        if results.len() < self.config.consecutive_losses {
            return false;
        }
        let window = &results[..self.config.consecutive_losses];
        if !window.iter().all(|&(_, lost)| lost) {
            return false;
        }

        let newest_id = window[0].0;
        let mut state = self.state.write();
        if newest_id <= state.armed_at_trade_id || now_ms < state.armed_until_ms {
            return false;
        }

        state.armed_until_ms = now_ms + self.config.pause_ms;
        state.armed_at_trade_id = newest_id;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_trading_by_default() {
        let breaker = CircuitBreaker::with_defaults();
        assert!(breaker.can_trade(1_000_000).is_ok());
    }

    #[test]
    fn three_losses_arm_for_five_minutes() {
        let breaker = CircuitBreaker::with_defaults();
        let armed = breaker.inspect(&[(30, true), (29, true), (28, true)], 1_000_000);
        assert!(armed);
        assert!(matches!(
            breaker.can_trade(1_000_000),
            Err(CircuitBreakerError::Armed { .. })
        ));
        assert!(breaker.can_trade(1_000_000 + PAUSE_MS).is_ok());
    }

    #[test]
    fn mixed_results_do_not_arm() {
        let breaker = CircuitBreaker::with_defaults();
        assert!(!breaker.inspect(&[(30, true), (29, false), (28, true)], 1_000_000));
        assert!(breaker.can_trade(1_000_000).is_ok());
    }

    #[test]
    fn under_three_resolved_never_arms() {
        let breaker = CircuitBreaker::with_defaults();
        assert!(!breaker.inspect(&[(2, true), (1, true)], 1_000_000));
    }

    #[test]
    fn stale_streak_cannot_rearm() {
        let breaker = CircuitBreaker::with_defaults();
        assert!(breaker.inspect(&[(30, true), (29, true), (28, true)], 1_000_000));

        // Pause over, same streak: no re-arm.
        let later = 1_000_000 + PAUSE_MS + 1;
        assert!(!breaker.inspect(&[(30, true), (29, true), (28, true)], later));
        assert!(breaker.can_trade(later).is_ok());

        // A fresh loss extends the streak: arms again.
        assert!(breaker.inspect(&[(31, true), (30, true), (29, true)], later));
    }

    #[test]
    fn inspection_while_armed_is_ignored() {
        let breaker = CircuitBreaker::with_defaults();
        assert!(breaker.inspect(&[(30, true), (29, true), (28, true)], 1_000_000));
        // A newer loss during the pause does not extend it.
        assert!(!breaker.inspect(&[(31, true), (30, true), (29, true)], 1_010_000));
    }
}
