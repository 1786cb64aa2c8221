// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-agent credit and locked-budget accounting.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A per-agent ledger account: total credits and the portion reserved
/// (locked) against in-flight contracts or stake.
///
/// Invariant held at every quiescent instant: `0 <= locked <= credits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerAccount {
    /// Total credits owned by the agent.
    pub credits: u64,
    /// Portion of `credits` currently reserved by escrow or stake locks.
    pub locked: u64,
}

impl LedgerAccount {
    /// Open a fresh account with the given starting balance and no locks.
    #[must_use]
    pub fn new(starting_credits: u64) -> Self {
        Self {
            credits: starting_credits,
            locked: 0,
        }
    }

    /// Credits available to spend or lock right now.
    #[must_use]
    pub fn spendable(&self) -> u64 {
        self.credits.saturating_sub(self.locked)
    }

    /// Whether the account currently satisfies its invariant.
    #[must_use]
    pub fn is_sound(&self) -> bool {
        self.locked <= self.credits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spendable_excludes_locked() {
        let acc = LedgerAccount {
            credits: 100,
            locked: 40,
        };
        assert_eq!(acc.spendable(), 60);
        assert!(acc.is_sound());
    }

    #[test]
    fn fresh_account_has_no_locks() {
        let acc = LedgerAccount::new(1000);
        assert_eq!(acc.credits, 1000);
        assert_eq!(acc.locked, 0);
        assert_eq!(acc.spendable(), 1000);
    }
}
