// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job, bid, terms, and negotiation entities (§3, §4.3).

use crate::reputation::Reputation;
use crate::AgentId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Structural validation failures for core entities.
///
/// These are distinct from the wire-level error taxonomy in `synapse-error`:
/// they check shape invariants on the data model itself, independent of any
/// particular protocol or business-rule context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A string field that must be non-empty was empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A numeric field was outside its allowed range.
    #[error("{field} out of range: {detail}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable description of the violated range.
        detail: String,
    },
}

/// Job lifecycle status (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Posted, accepting bids and negotiation, not yet awarded.
    Open,
    /// Awarded to a worker; escrow and stake are locked.
    Awarded,
    /// Worker has submitted a result; awaiting requester review.
    InReview,
    /// Settled successfully; terminal.
    Completed,
    /// Withdrawn by the requester before award; terminal.
    Cancelled,
    /// Settled unsuccessfully (timeout, rejection, or explicit failure).
    Failed,
}

/// Negotiation terms: upfront share, deadline, and revision allowance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Terms {
    /// Fraction of the locked budget paid immediately at award, in `[0, 1]`.
    pub upfront_pct: f64,
    /// Seconds before an awarded-but-idle contract is auto-failed.
    pub deadline_seconds: u64,
    /// Maximum number of `changes` review rounds, in `[0, 10]`.
    pub max_revisions: u8,
}

impl Terms {
    /// Validate this set of terms against §3's invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `upfront_pct` is outside `[0, 1]`,
    /// `deadline_seconds` is zero, or `max_revisions` exceeds 10.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.upfront_pct) {
            return Err(ValidationError::OutOfRange {
                field: "upfrontPct",
                detail: "must be within [0, 1]".into(),
            });
        }
        if self.deadline_seconds == 0 {
            return Err(ValidationError::OutOfRange {
                field: "deadlineSeconds",
                detail: "must be > 0".into(),
            });
        }
        if self.max_revisions > 10 {
            return Err(ValidationError::OutOfRange {
                field: "maxRevisions",
                detail: "must be within [0, 10]".into(),
            });
        }
        Ok(())
    }
}

/// Which side of a negotiation produced a given round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The job's requester.
    Boss,
    /// The candidate worker.
    Worker,
}

/// Outcome state of a negotiation (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    /// Awaiting a response to the most recent offer.
    Pending,
    /// The worker accepted; award follows.
    Accept,
    /// The worker rejected; negotiation is closed.
    Reject,
    /// The round cap was exceeded; negotiation is closed.
    MaxRounds,
}

/// A single historical round in a negotiation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationEntry {
    /// 1-based round number.
    pub round: u32,
    /// Which side produced this round.
    pub from_role: Role,
    /// Price offered in this round.
    pub price: u64,
    /// Terms offered in this round.
    pub terms: Terms,
    /// Optional free-text note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Epoch milliseconds when this round was recorded.
    pub at_ms: i64,
}

/// At most one active negotiation per (job, candidate worker) (§3).
///
/// Stored as a sub-document on the job's payload so persistence is a single
/// job update.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Negotiation {
    /// Candidate worker this negotiation is with.
    pub worker_id: AgentId,
    /// The bid that originated this negotiation.
    pub bid_id: String,
    /// The bidder's original price.
    pub bid_price: u64,
    /// Current offered price.
    pub price: u64,
    /// Current offered terms.
    pub terms: Terms,
    /// Current negotiation status.
    pub status: NegotiationStatus,
    /// 1-based round counter; strictly increasing.
    pub round: u32,
    /// Chronological history of every round.
    pub history: Vec<NegotiationEntry>,
}

/// Outcome of the advisory code evaluator (§4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoVerifyResult {
    /// Whether the evaluator judged the submission to pass.
    pub ok: bool,
    /// Reason for failure, when `ok` is `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The worker's most recent submission for a job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastSubmission {
    /// Epoch milliseconds of submission.
    pub at_ms: i64,
    /// The submitting agent.
    pub by: AgentId,
    /// The raw submitted result.
    pub result: String,
}

/// Bidirectional GitHub issue/PR linkage for a job (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubLink {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Linked issue number, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    /// Linked pull request number, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
}

/// The free-form, extensible payload bag attached to a job (§3, §9).
///
/// Known keys are modeled as typed fields so the exchange can reason about
/// them directly; any other key the client sends is preserved verbatim in
/// `extra` for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    /// Per-job deadline override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Terms locked in at award time, from a prior accepted negotiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_terms: Option<Terms>,
    /// Price locked in at award time, from a prior accepted negotiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_price: Option<u64>,
    /// The active or most recently closed negotiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiation: Option<Negotiation>,
    /// The worker's most recent submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_submission: Option<LastSubmission>,
    /// Outcome of the advisory evaluator for a `"coding"` submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_verify: Option<AutoVerifyResult>,
    /// Keyword the default evaluator checks for in a coding submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_keyword: Option<String>,
    /// GitHub issue/PR this job is linked to, if ingressed from GitHub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubLink>,
    /// Any other client-supplied keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A unit of work with a budget (§3).
///
/// Invariant: `worker_id` is `Some` iff `status` is one of
/// `{awarded, in_review, completed, failed-with-prior-award}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique opaque job id.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Total budget the requester is willing to escrow.
    pub budget: u64,
    /// The posting agent.
    pub requester_id: AgentId,
    /// Epoch milliseconds of creation.
    pub created_at_ms: i64,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Assigned worker, once awarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<AgentId>,
    /// Free-form job kind, e.g. `"simple"` or `"coding"`.
    pub kind: String,
    /// Extensible payload bag.
    #[serde(default)]
    pub payload: JobPayload,
    /// Requester credits currently locked against this contract.
    pub locked_budget: u64,
    /// Worker credits currently locked as stake against this contract.
    pub locked_stake: u64,
    /// Portion of the budget already paid to the worker at award time.
    pub paid_upfront: u64,
    /// Epoch milliseconds of award, once awarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awarded_at_ms: Option<i64>,
}

impl Job {
    /// Validate structural invariants that hold regardless of lifecycle
    /// state: non-empty title and a strictly positive budget.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `title` is empty or `budget` is zero.
    pub fn validate_new(title: &str, budget: u64) -> Result<(), ValidationError> {
        if title.trim().is_empty() {
            return Err(ValidationError::Empty { field: "title" });
        }
        if budget == 0 {
            return Err(ValidationError::OutOfRange {
                field: "budget",
                detail: "must be > 0".into(),
            });
        }
        Ok(())
    }

    /// The effective timeout for this job: its payload override, or the
    /// process default (§4.6).
    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        match self.payload.timeout_seconds {
            Some(secs) if secs > 0 => secs,
            _ => crate::DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

/// A worker's offer to perform a job (§3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    /// Unique opaque bid id.
    pub id: String,
    /// The job being bid on.
    pub job_id: String,
    /// The bidding agent.
    pub bidder_id: AgentId,
    /// Requested price; must not exceed the job's budget at acceptance.
    pub price: u64,
    /// Estimated completion time, in seconds.
    pub eta_seconds: u64,
    /// Epoch milliseconds of creation.
    pub created_at_ms: i64,
    /// Optional free-text pitch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    /// Optional proposed terms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<Terms>,
    /// Snapshot of the bidder's reputation at bid time.
    pub bidder_reputation: Reputation,
}

impl Bid {
    /// Validate structural invariants: strictly positive price and eta.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `price` or `eta_seconds` is zero.
    pub fn validate_new(price: u64, eta_seconds: u64) -> Result<(), ValidationError> {
        if price == 0 {
            return Err(ValidationError::OutOfRange {
                field: "price",
                detail: "must be > 0".into(),
            });
        }
        if eta_seconds == 0 {
            return Err(ValidationError::OutOfRange {
                field: "etaSeconds",
                detail: "must be > 0".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_reject_out_of_range_upfront() {
        let terms = Terms {
            upfront_pct: 1.5,
            deadline_seconds: 60,
            max_revisions: 1,
        };
        assert!(terms.validate().is_err());
    }

    #[test]
    fn terms_accept_boundary_values() {
        let terms = Terms {
            upfront_pct: 1.0,
            deadline_seconds: 1,
            max_revisions: 10,
        };
        assert!(terms.validate().is_ok());
    }

    #[test]
    fn job_payload_round_trips_unknown_keys() {
        let mut extra = Map::new();
        extra.insert("customKey".into(), Value::String("value".into()));
        let payload = JobPayload {
            extra,
            ..Default::default()
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: JobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.extra.get("customKey"),
            Some(&Value::String("value".into()))
        );
    }

    #[test]
    fn job_validate_new_rejects_empty_title() {
        assert!(Job::validate_new("", 10).is_err());
        assert!(Job::validate_new("  ", 10).is_err());
        assert!(Job::validate_new("ok", 0).is_err());
        assert!(Job::validate_new("ok", 10).is_ok());
    }

    #[test]
    fn job_timeout_falls_back_to_default() {
        let job = Job {
            id: "job_1".into(),
            title: "t".into(),
            description: None,
            budget: 10,
            requester_id: AgentId::from_raw("agent_a"),
            created_at_ms: 0,
            status: JobStatus::Open,
            worker_id: None,
            kind: "simple".into(),
            payload: JobPayload::default(),
            locked_budget: 0,
            locked_stake: 0,
            paid_upfront: 0,
            awarded_at_ms: None,
        };
        assert_eq!(job.timeout_seconds(), crate::DEFAULT_TIMEOUT_SECONDS);
    }
}
