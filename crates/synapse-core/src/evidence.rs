// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only evidence entries and the tape event stream observed by
//! spectators (§4.7).

use crate::AgentId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of evidence items retained in the in-memory ring per the
/// process as a whole is unbounded by job, but total in-memory retention is
/// capped at this many most-recent items (§3).
pub const EVIDENCE_RING_CAPACITY: usize = 500;

/// A single append-only evidence record attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceItem {
    /// Unique evidence id.
    pub id: String,
    /// Epoch milliseconds when the evidence was recorded.
    pub at_ms: i64,
    /// Job this evidence is attached to.
    pub job_id: String,
    /// Evidence kind, e.g. `"award"`, `"submit"`, `"settlement"`.
    pub kind: String,
    /// Human-readable detail string.
    pub detail: String,
    /// Structured payload accompanying the evidence.
    #[serde(default)]
    pub payload: Value,
}

/// A durable `{kind, payload}` event appended to the event log (§3). Every
/// broadcast to clients is mirrored here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DurableEvent {
    /// Event kind tag.
    pub kind: String,
    /// Event payload.
    pub payload: Value,
}

/// The ordered stream of events observed by spectators (§4.7, §6).
///
/// Tape variants are a typed sum, not a public inheritance surface: every
/// ledger mutation, reputation update, evidence append, agent
/// authentication, and client broadcast produces exactly one tape entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TapeEvent {
    /// An agent completed the auth handshake.
    AgentAuthed {
        /// The newly (or previously) authenticated agent.
        agent_id: AgentId,
    },
    /// An agent's ledger account changed.
    LedgerUpdate {
        /// Agent whose account changed.
        agent_id: AgentId,
        /// New credit total.
        credits: u64,
        /// New locked total.
        locked: u64,
    },
    /// An agent's reputation counters changed.
    RepUpdate {
        /// Agent whose reputation changed.
        agent_id: AgentId,
        /// New completed counter.
        completed: u64,
        /// New failed counter.
        failed: u64,
    },
    /// A new evidence item was appended.
    Evidence {
        /// The evidence item.
        item: EvidenceItem,
    },
    /// A message was broadcast to one or more client sessions.
    ///
    /// Broadcast payloads mirror the client wire types exactly (§6).
    Broadcast {
        /// The wire message type that was broadcast (e.g. `"job_posted"`).
        message_type: String,
        /// The broadcast payload.
        payload: Value,
    },
}
