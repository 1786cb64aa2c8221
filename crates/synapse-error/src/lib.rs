// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified, wire-stable error taxonomy for the Synapse exchange (§6, §7).
//!
//! Every [`ErrorCode`] serializes to exactly the snake_case string the wire
//! protocol sends back to the offending session as `error{message}`. The
//! enum is the single source of truth for that string: the client-facing
//! and the internal representation of an error are the same value.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Broad family an [`ErrorCode`] belongs to, used only for logging/metrics
/// grouping — never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Envelope/schema/dispatch errors (§4.2).
    Protocol,
    /// Auth handshake errors (§4.1).
    Auth,
    /// Job/bid/negotiation/review state machine errors (§4.3).
    JobState,
    /// Ledger/escrow/stake errors (§4.4).
    Ledger,
    /// Persistence-layer errors (§4.9, §7).
    Persistence,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Protocol => "protocol",
            Self::Auth => "auth",
            Self::JobState => "job_state",
            Self::Ledger => "ledger",
            Self::Persistence => "persistence",
        };
        f.write_str(s)
    }
}

/// The complete on-wire error taxonomy (§6).
///
/// `#[serde(rename_all = "snake_case")]` guarantees the serialized form is
/// exactly the wire string named in the spec, so `serde_json::to_value` and
/// [`ErrorCode::as_str`] always agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Inbound message failed closed-schema validation.
    InvalidMessage,
    /// Inbound message `type` is not recognized.
    UnknownType,
    /// A non-`auth` message arrived before the session authenticated.
    NotAuthenticated,
    /// The echoed auth nonce does not match the session's challenge.
    BadNonce,
    /// `agentName` was empty or otherwise malformed.
    BadAgentName,
    /// The Ed25519 signature did not verify against the supplied public key.
    SignatureVerificationFailed,
    /// Persistence failed during the auth handshake; the handshake is rolled back.
    DbErrorAuth,
    /// The requester or worker has no ledger account.
    NoLedgerAccount,
    /// The requester lacks spendable credits to cover the operation.
    InsufficientCredits,
    /// The worker has no ledger account.
    WorkerNoLedgerAccount,
    /// The worker lacks spendable credits to cover the required stake.
    WorkerInsufficientStake,
    /// The referenced job does not exist.
    JobNotFound,
    /// The job is not in the `open` state required for this operation.
    JobNotOpen,
    /// The job is not in the `awarded` state required for this operation.
    JobNotAwarded,
    /// The job is not in the `in_review` state required for this operation.
    JobNotInReview,
    /// The job has no assigned worker.
    JobMissingWorker,
    /// The caller is not the job's requester.
    NotJobOwner,
    /// The caller is not the job's assigned worker.
    NotAssignedWorker,
    /// The target worker has no bid recorded on this job.
    WorkerHasNoBid,
    /// A bid's price exceeds the job's budget.
    BidOverBudget,
    /// An accepted negotiation price exceeds the job's budget.
    AgreedPriceOverBudget,
    /// A negotiation is already active with a different worker.
    NegotiationInProgress,
    /// The negotiation round cap was exceeded.
    NegotiationMaxRounds,
    /// There is no active offer to respond to.
    NoActiveOffer,
    /// The caller is not the target of the active offer.
    NotOfferTarget,
    /// The negotiation is not in the `pending` state required for this operation.
    NegotiationNotPending,
    /// The caller is not the job's requester (negotiation path).
    BadRequester,
    /// A requester counter-offer price exceeds the job's budget.
    OfferOverBudget,
    /// A worker counter-offer price exceeds the job's budget.
    CounterOverBudget,
    /// An expected ledger account is unexpectedly absent.
    LedgerMissing,
    /// The job still has an outstanding escrow/stake lock and cannot be
    /// reopened without settling it first.
    JobNotReopenable,
}

impl ErrorCode {
    /// The exact snake_case wire string for this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidMessage => "invalid_message",
            Self::UnknownType => "unknown_type",
            Self::NotAuthenticated => "not_authenticated",
            Self::BadNonce => "bad_nonce",
            Self::BadAgentName => "bad_agent_name",
            Self::SignatureVerificationFailed => "signature_verification_failed",
            Self::DbErrorAuth => "db_error_auth",
            Self::NoLedgerAccount => "no_ledger_account",
            Self::InsufficientCredits => "insufficient_credits",
            Self::WorkerNoLedgerAccount => "worker_no_ledger_account",
            Self::WorkerInsufficientStake => "worker_insufficient_stake",
            Self::JobNotFound => "job_not_found",
            Self::JobNotOpen => "job_not_open",
            Self::JobNotAwarded => "job_not_awarded",
            Self::JobNotInReview => "job_not_in_review",
            Self::JobMissingWorker => "job_missing_worker",
            Self::NotJobOwner => "not_job_owner",
            Self::NotAssignedWorker => "not_assigned_worker",
            Self::WorkerHasNoBid => "worker_has_no_bid",
            Self::BidOverBudget => "bid_over_budget",
            Self::AgreedPriceOverBudget => "agreed_price_over_budget",
            Self::NegotiationInProgress => "negotiation_in_progress",
            Self::NegotiationMaxRounds => "negotiation_max_rounds",
            Self::NoActiveOffer => "no_active_offer",
            Self::NotOfferTarget => "not_offer_target",
            Self::NegotiationNotPending => "negotiation_not_pending",
            Self::BadRequester => "bad_requester",
            Self::OfferOverBudget => "offer_over_budget",
            Self::CounterOverBudget => "counter_over_budget",
            Self::LedgerMissing => "ledger_missing",
            Self::JobNotReopenable => "job_not_reopenable",
        }
    }

    /// Broad category this code belongs to (logging/metrics only).
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidMessage | Self::UnknownType => ErrorCategory::Protocol,

            Self::NotAuthenticated
            | Self::BadNonce
            | Self::BadAgentName
            | Self::SignatureVerificationFailed
            | Self::DbErrorAuth => ErrorCategory::Auth,

            Self::JobNotFound
            | Self::JobNotOpen
            | Self::JobNotAwarded
            | Self::JobNotInReview
            | Self::JobMissingWorker
            | Self::NotJobOwner
            | Self::NotAssignedWorker
            | Self::WorkerHasNoBid
            | Self::BidOverBudget
            | Self::AgreedPriceOverBudget
            | Self::NegotiationInProgress
            | Self::NegotiationMaxRounds
            | Self::NoActiveOffer
            | Self::NotOfferTarget
            | Self::NegotiationNotPending
            | Self::BadRequester
            | Self::OfferOverBudget
            | Self::CounterOverBudget
            | Self::JobNotReopenable => ErrorCategory::JobState,

            Self::NoLedgerAccount
            | Self::InsufficientCredits
            | Self::WorkerNoLedgerAccount
            | Self::WorkerInsufficientStake
            | Self::LedgerMissing => ErrorCategory::Ledger,
        }
    }

    /// A `db_error_<op>` tape-event kind for a persistence failure on the
    /// given operation name (§4.9, §7 tier 2). This is never sent on the
    /// client wire; it names the internal recoverable-error tape kind.
    #[must_use]
    pub fn db_error_kind(op: &str) -> String {
        format!("db_error_{op}")
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified exchange error: a stable [`ErrorCode`] plus diagnostic
/// context that never reaches the wire.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}")]
pub struct SynapseError {
    /// The stable, wire-visible code.
    pub code: ErrorCode,
    /// Structured diagnostic context (logged, never sent to clients).
    pub context: BTreeMap<String, serde_json::Value>,
}

impl SynapseError {
    /// Construct an error carrying only a code.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair of diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; a conversion
    /// failure silently drops the entry rather than panicking.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// The literal string to send back on the wire as `error{message}`.
    #[must_use]
    pub fn wire_message(&self) -> &'static str {
        self.code.as_str()
    }
}

impl From<ErrorCode> for SynapseError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_match_spec_literals() {
        assert_eq!(ErrorCode::InvalidMessage.as_str(), "invalid_message");
        assert_eq!(ErrorCode::BidOverBudget.as_str(), "bid_over_budget");
        assert_eq!(ErrorCode::LedgerMissing.as_str(), "ledger_missing");
    }

    #[test]
    fn serde_agrees_with_as_str() {
        for code in [
            ErrorCode::InvalidMessage,
            ErrorCode::NegotiationMaxRounds,
            ErrorCode::WorkerInsufficientStake,
        ] {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json.as_str().unwrap(), code.as_str());
        }
    }

    #[test]
    fn context_is_diagnostic_only() {
        let err = SynapseError::new(ErrorCode::JobNotFound).with_context("job_id", "job_42");
        assert_eq!(err.wire_message(), "job_not_found");
        assert_eq!(
            err.context.get("job_id").and_then(|v| v.as_str()),
            Some("job_42")
        );
    }
}
