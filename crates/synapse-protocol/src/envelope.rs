// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire envelopes: the closed set of inbound client messages and outbound
//! server messages (§4.2, §6).
//!
//! Every variant corresponds 1:1 to a `type` tag on the wire. Unknown
//! fields are rejected (`deny_unknown_fields`) so a malformed or
//! protocol-drifted client fails closed with `invalid_message` rather than
//! silently ignoring fields it misspelled.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_core::{Bid, EvidenceItem, Job, Terms};

/// Decision carried by a `review` message (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Accept the submission; triggers settlement-success.
    Accept,
    /// Reject the submission; triggers settlement-failure then reopen.
    Reject,
    /// Request changes; reverts the job to `awarded`.
    Changes,
}

/// Decision carried by an `offer_decision` message (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OfferDecisionKind {
    /// Accept the current negotiation offer.
    Accept,
    /// Reject the current negotiation offer.
    Reject,
}

/// Every inbound client message type (§4.2, §6).
///
/// `v` is carried on each variant rather than factored into a wrapper type:
/// combining `#[serde(flatten)]` with `deny_unknown_fields` is not supported
/// by serde, and the spec requires every frame — including this one — to
/// reject unknown fields.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ClientMessage {
    /// Reply to a `challenge`, completing the auth handshake (§4.1).
    Auth {
        /// Protocol version the client speaks.
        v: u32,
        /// Human-readable agent name.
        agent_name: String,
        /// Base64-encoded SPKI DER public key.
        public_key: String,
        /// Echoed challenge nonce.
        nonce: String,
        /// Base64-encoded Ed25519 detached signature.
        signature: String,
    },
    /// Post a new job (§4.3).
    PostJob {
        /// Protocol version the client speaks.
        v: u32,
        /// Short human-readable title.
        title: String,
        /// Optional longer description.
        #[serde(default)]
        description: Option<String>,
        /// Total budget to escrow.
        budget: u64,
        /// Free-form job kind; defaults to `"simple"`.
        #[serde(default)]
        kind: Option<String>,
        /// Extensible payload bag.
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Place a bid on an open job (§4.3).
    Bid {
        /// Protocol version the client speaks.
        v: u32,
        /// Job being bid on.
        job_id: String,
        /// Requested price.
        price: u64,
        /// Estimated completion time, in seconds.
        eta_seconds: u64,
        /// Optional free-text pitch.
        #[serde(default)]
        pitch: Option<String>,
        /// Optional proposed terms.
        #[serde(default)]
        terms: Option<Terms>,
    },
    /// Directly award an open job to a bidder (§4.3).
    Award {
        /// Protocol version the client speaks.
        v: u32,
        /// Job to award.
        job_id: String,
        /// Bidder to award the job to.
        worker_id: String,
    },
    /// Requester opens or continues a negotiation (§4.3).
    CounterOffer {
        /// Protocol version the client speaks.
        v: u32,
        /// Job under negotiation.
        job_id: String,
        /// Candidate worker this offer targets.
        worker_id: String,
        /// Offered price.
        price: u64,
        /// Offered terms; required on every counter-offer.
        terms: Terms,
    },
    /// Worker counters the requester's offer (§4.3).
    WorkerCounter {
        /// Protocol version the client speaks.
        v: u32,
        /// Job under negotiation.
        job_id: String,
        /// Countered price.
        price: u64,
        /// Countered terms.
        terms: Terms,
    },
    /// Worker accepts or rejects the active offer (§4.3).
    OfferDecision {
        /// Protocol version the client speaks.
        v: u32,
        /// Job under negotiation.
        job_id: String,
        /// The worker's decision.
        decision: OfferDecisionKind,
    },
    /// Assigned worker submits a result (§4.3).
    Submit {
        /// Protocol version the client speaks.
        v: u32,
        /// Job being submitted for.
        job_id: String,
        /// Raw result payload.
        result: String,
    },
    /// Requester reviews an in-review job (§4.3).
    Review {
        /// Protocol version the client speaks.
        v: u32,
        /// Job being reviewed.
        job_id: String,
        /// Review decision.
        decision: ReviewDecision,
        /// Optional free-text notes.
        #[serde(default)]
        notes: Option<String>,
    },
}

impl ClientMessage {
    /// Protocol version this message declares.
    #[must_use]
    pub fn version(&self) -> u32 {
        match self {
            Self::Auth { v, .. }
            | Self::PostJob { v, .. }
            | Self::Bid { v, .. }
            | Self::Award { v, .. }
            | Self::CounterOffer { v, .. }
            | Self::WorkerCounter { v, .. }
            | Self::OfferDecision { v, .. }
            | Self::Submit { v, .. }
            | Self::Review { v, .. } => *v,
        }
    }

    /// The wire `type` tag for this message, for logging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::PostJob { .. } => "post_job",
            Self::Bid { .. } => "bid",
            Self::Award { .. } => "award",
            Self::CounterOffer { .. } => "counter_offer",
            Self::WorkerCounter { .. } => "worker_counter",
            Self::OfferDecision { .. } => "offer_decision",
            Self::Submit { .. } => "submit",
            Self::Review { .. } => "review",
        }
    }
}

/// Every outbound server message type (§4.2, §6, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent immediately on connect; begins the auth handshake (§4.1).
    Challenge {
        /// Protocol version.
        v: u32,
        /// Base64-encoded random nonce, >= 24 bytes.
        nonce: String,
        /// Server time in epoch milliseconds.
        server_time_ms: i64,
    },
    /// Sent once auth succeeds (§4.1).
    Authed {
        /// Protocol version.
        v: u32,
        /// The authenticated agent's stable id.
        agent_id: String,
        /// Current credit balance.
        credits: u64,
    },
    /// A client-surfaced error (§6, §7 tier 1).
    Error {
        /// Protocol version.
        v: u32,
        /// One of the stable error-taxonomy strings.
        message: String,
    },
    /// A new job was posted (§4.3).
    JobPosted {
        /// Protocol version.
        v: u32,
        /// The new job.
        job: Job,
    },
    /// A job's state changed and its full snapshot is being re-broadcast
    /// (used by reopen and `changes` review).
    JobUpdated {
        /// Protocol version.
        v: u32,
        /// The job's current snapshot.
        job: Job,
    },
    /// A new bid was recorded (§4.3).
    BidPosted {
        /// Protocol version.
        v: u32,
        /// The new bid.
        bid: Bid,
    },
    /// A job was awarded (§4.3, §4.4).
    JobAwarded {
        /// Protocol version.
        v: u32,
        /// The awarded job.
        job_id: String,
        /// The assigned worker.
        worker_id: String,
        /// Amount locked from the requester.
        budget_locked: u64,
    },
    /// The requester's opening counter-offer, directed to the worker (§4.3).
    OfferMade {
        /// Protocol version.
        v: u32,
        /// Job under negotiation.
        job_id: String,
        /// Offered price.
        price: u64,
        /// Offered terms.
        terms: Terms,
        /// Round number.
        round: u32,
    },
    /// Any counter in a negotiation, broadcast unconditionally (§4.3).
    CounterMade {
        /// Protocol version.
        v: u32,
        /// Job under negotiation.
        job_id: String,
        /// The side that produced this counter.
        from_role: synapse_core::Role,
        /// Offered price.
        price: u64,
        /// Offered terms.
        terms: Terms,
        /// Round number.
        round: u32,
    },
    /// The worker's accept/reject decision on an offer (§4.3).
    OfferResponse {
        /// Protocol version.
        v: u32,
        /// Job under negotiation.
        job_id: String,
        /// Whether the offer was accepted.
        accepted: bool,
    },
    /// A negotiation closed, either by rejection or round cap (§4.3).
    NegotiationEnded {
        /// Protocol version.
        v: u32,
        /// Job under negotiation.
        job_id: String,
        /// Why the negotiation ended.
        reason: String,
        /// Final round count.
        round: u32,
    },
    /// A worker submitted a result (§4.3).
    JobSubmitted {
        /// Protocol version.
        v: u32,
        /// The submitted job.
        job_id: String,
        /// The submitting worker.
        worker_id: String,
        /// Byte length of the raw result.
        bytes: usize,
        /// First 120 characters of the result.
        preview: String,
    },
    /// The requester reviewed a submission.
    JobReviewed {
        /// Protocol version.
        v: u32,
        /// The reviewed job.
        job_id: String,
        /// The decision that was recorded.
        decision: ReviewDecision,
    },
    /// A job settled successfully (§4.4).
    JobCompleted {
        /// Protocol version.
        v: u32,
        /// The completed job.
        job_id: String,
        /// Total amount paid to the worker.
        paid: u64,
    },
    /// A job settled unsuccessfully (§4.4).
    JobFailed {
        /// Protocol version.
        v: u32,
        /// The failed job.
        job_id: String,
        /// Why settlement failed, e.g. `"timeout"` or a review rejection.
        reason: String,
    },
    /// An agent's ledger account changed; directed to that agent's
    /// sessions (§4.4).
    LedgerUpdate {
        /// Protocol version.
        v: u32,
        /// New credit total.
        credits: u64,
        /// New locked total.
        locked: u64,
    },
}

impl ServerMessage {
    /// The wire `type` tag for this message, used to mirror broadcasts into
    /// tape/event rows without re-serializing to read back the tag.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Challenge { .. } => "challenge",
            Self::Authed { .. } => "authed",
            Self::Error { .. } => "error",
            Self::JobPosted { .. } => "job_posted",
            Self::JobUpdated { .. } => "job_updated",
            Self::BidPosted { .. } => "bid_posted",
            Self::JobAwarded { .. } => "job_awarded",
            Self::OfferMade { .. } => "offer_made",
            Self::CounterMade { .. } => "counter_made",
            Self::OfferResponse { .. } => "offer_response",
            Self::NegotiationEnded { .. } => "negotiation_ended",
            Self::JobSubmitted { .. } => "job_submitted",
            Self::JobReviewed { .. } => "job_reviewed",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::LedgerUpdate { .. } => "ledger_update",
        }
    }
}

/// Observer-stream snapshot payload sent once on `/observer` subscribe (§6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObserverSnapshot {
    /// All known agent ids with their ledger and reputation.
    pub agents: Vec<ObserverAgent>,
    /// All known jobs.
    pub jobs: Vec<Job>,
    /// All known bids.
    pub bids: Vec<Bid>,
    /// The in-memory evidence ring.
    pub evidence: Vec<EvidenceItem>,
}

/// A single agent's public state, as surfaced to observers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObserverAgent {
    /// The agent's stable id.
    pub agent_id: String,
    /// Current credit balance.
    pub credits: u64,
    /// Current locked total.
    pub locked: u64,
    /// Completed-contract counter.
    pub completed: u64,
    /// Failed-contract counter.
    pub failed: u64,
}

/// Envelope wrapping every tape entry sent on the observer stream (§6, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverMessage {
    /// Sent once on subscribe.
    Snapshot {
        /// The current projection of exchange state.
        data: ObserverSnapshot,
    },
    /// Sent for every subsequent tape entry.
    Event {
        /// The tape entry.
        data: synapse_core::TapeEvent,
    },
}
