//! Verification budget tracking (spec §4.8 step 5, §5 timeouts).
//!
//! Grounded in `examples/original_source/examples/post_deployment_verifier.py`'s
//! `VerificationBudget` dataclass: three independently-tripping limits
//! (elapsed time, user impact, consumed error budget), any one of which
//! aborts verification with `BUDGET_EXCEEDED`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerificationBudget {
    pub max_time: Duration,
    pub max_user_impact_pct: f64,
    pub max_error_budget_pct: f64,

    pub time_elapsed: Duration,
    pub user_impact_pct: f64,
    pub error_budget_consumed_pct: f64,
}

impl Default for VerificationBudget {
    fn default() -> Self {
        Self {
            max_time: Duration::from_secs(600),
            max_user_impact_pct: 5.0,
            max_error_budget_pct: 2.0,
            time_elapsed: Duration::ZERO,
            user_impact_pct: 0.0,
            error_budget_consumed_pct: 0.0,
        }
    }
}

impl VerificationBudget {
    pub fn is_exceeded(&self) -> bool {
        self.time_elapsed >= self.max_time
            || self.user_impact_pct >= self.max_user_impact_pct
            || self.error_budget_consumed_pct >= self.max_error_budget_pct
    }

    pub fn record_elapsed(&mut self, elapsed: Duration) {
        self.time_elapsed = elapsed;
    }

    pub fn record_impact(&mut self, user_impact_pct: f64, error_budget_consumed_pct: f64) {
        self.user_impact_pct = user_impact_pct;
        self.error_budget_consumed_pct = error_budget_consumed_pct;
    }

    pub fn time_used_pct(&self) -> f64 {
        if self.max_time.is_zero() {
            return 100.0;
        }
        (self.time_elapsed.as_secs_f64() / self.max_time.as_secs_f64()) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_budget_is_not_exceeded() {
        assert!(!VerificationBudget::default().is_exceeded());
    }

    #[test]
    fn time_budget_trips_independently() {
        let mut b = VerificationBudget::default();
        b.record_elapsed(Duration::from_secs(601));
        assert!(b.is_exceeded());
    }

    #[test]
    fn impact_budget_trips_independently() {
        let mut b = VerificationBudget::default();
        b.record_impact(5.1, 0.0);
        assert!(b.is_exceeded());
    }

    #[test]
    fn error_budget_trips_independently() {
        let mut b = VerificationBudget::default();
        b.record_impact(0.0, 2.5);
        assert!(b.is_exceeded());
    }
}
