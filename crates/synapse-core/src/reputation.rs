// SPDX-License-Identifier: MIT OR Apache-2.0
//! Laplace-smoothed reputation counters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Completed/failed settlement counters for a single agent.
///
/// Both counters are monotonically increasing; they change only on
/// settlement (§4.5). The smoothed [`Reputation::score`] is always derived,
/// never stored, so the counters remain the single source of truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Reputation {
    /// Number of contracts this agent has completed successfully.
    pub completed: u64,
    /// Number of contracts this agent has failed (timeout, rejection, or
    /// explicit system failure).
    pub failed: u64,
}

impl Reputation {
    /// Laplace-smoothed success rate in `[0, 1]`.
    ///
    /// An agent with no history at all scores exactly `0.5`.
    ///
    /// # Examples
    ///
    /// ```
    /// use synapse_core::Reputation;
    ///
    /// assert_eq!(Reputation::default().score(), 0.5);
    ///
    /// let rep = Reputation { completed: 1, failed: 1 };
    /// assert!((rep.score() - 0.5).abs() < f64::EPSILON);
    /// ```
    #[must_use]
    pub fn score(&self) -> f64 {
        (self.completed as f64 + 1.0) / (self.completed as f64 + self.failed as f64 + 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_bounded() {
        let rep = Reputation {
            completed: 9,
            failed: 1,
        };
        let s = rep.score();
        assert!(s > 0.0 && s < 1.0);
        assert!((s - (10.0 / 12.0)).abs() < 1e-9);
    }

    #[test]
    fn fresh_agent_scores_half() {
        assert_eq!(Reputation::default().score(), 0.5);
    }
}
