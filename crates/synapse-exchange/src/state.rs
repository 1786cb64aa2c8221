// SPDX-License-Identifier: MIT OR Apache-2.0
//! The exchange's single serialized entity graph (§3, §5).

use std::collections::{HashMap, HashSet, VecDeque};

use synapse_core::evidence::EVIDENCE_RING_CAPACITY;
use synapse_core::{AgentId, Bid, DurableEvent, EvidenceItem, Job, LedgerAccount, Reputation, TapeEvent};

use crate::effect::Effect;
use crate::session::{SessionId, SessionState};

/// A durable write queued by a handler, issued after the in-memory mutation
/// that produced it (§4.9).
#[derive(Debug, Clone)]
pub enum PersistOp {
    /// Record that an agent exists.
    Agent(AgentId),
    /// Overwrite an agent's ledger row.
    Ledger(AgentId, LedgerAccount),
    /// Overwrite an agent's reputation row.
    Reputation(AgentId, Reputation),
    /// Overwrite a job's canonical row.
    Job(Job),
    /// Insert a bid.
    Bid(Bid),
    /// Insert an evidence item.
    Evidence(EvidenceItem),
    /// Append a durable event row.
    Event(DurableEvent),
    /// Link a job to a GitHub issue.
    GithubIssue {
        /// Repository owner.
        owner: String,
        /// Repository name.
        repo: String,
        /// Issue number.
        issue_number: u64,
        /// Linked job id.
        job_id: String,
    },
    /// Link a job to a GitHub pull request.
    GithubPr {
        /// Repository owner.
        owner: String,
        /// Repository name.
        repo: String,
        /// Pull request number.
        pr_number: u64,
        /// Linked job id.
        job_id: String,
    },
}

impl PersistOp {
    /// The operation name used to build a `db_error_<op>` tape kind on
    /// failure.
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Ledger(..) => "ledger",
            Self::Reputation(..) => "reputation",
            Self::Job(_) => "job",
            Self::Bid(_) => "bid",
            Self::Evidence(_) => "evidence",
            Self::Event(_) => "event",
            Self::GithubIssue { .. } => "github_issue",
            Self::GithubPr { .. } => "github_pr",
        }
    }
}

/// A deadline-timer action a handler wants carried out after its mutation
/// lands (§4.6).
#[derive(Debug, Clone)]
pub enum TimerAction {
    /// Arm a single-shot deadline timer for a job.
    Arm {
        /// The job to arm.
        job_id: String,
        /// The worker this award/revision is for — re-checked against the
        /// job's current `worker_id` when the timer fires, so a stale timer
        /// from a prior award can never settle a later one (§5 ordering
        /// guarantee 5).
        worker_id: AgentId,
        /// Seconds until the timer fires.
        seconds: u64,
    },
    /// Cancel a job's deadline timer, if any.
    Disarm {
        /// The job to disarm.
        job_id: String,
    },
}

/// Everything a handler produces: client-facing effects, tape events for
/// observers, durable writes, and timer actions — all computed while the
/// entity-graph lock was held, applied after it is released.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    /// Messages to deliver to sessions or broadcast.
    pub effects: Vec<Effect>,
    /// Tape events for the observer stream (§4.7).
    pub tape: Vec<TapeEvent>,
    /// Durable writes to issue.
    pub persist: Vec<PersistOp>,
    /// Timer arm/disarm actions.
    pub timers: Vec<TimerAction>,
}

impl HandlerOutcome {
    /// Fold another outcome's effects, tape, persistence, and timer actions
    /// into this one — used when a handler is built out of smaller shared
    /// steps (e.g. offer-accept composing the award step).
    pub fn merge(&mut self, other: HandlerOutcome) {
        self.effects.extend(other.effects);
        self.tape.extend(other.tape);
        self.persist.extend(other.persist);
        self.timers.extend(other.timers);
    }

    /// Record a ledger mutation: queues the directed `ledger_update`
    /// effect, the `LedgerUpdate` tape event, and the persistence write,
    /// together, so call sites can never emit one without the others
    /// (§4.4 "every ledger mutation ... is followed by a directed
    /// ledger_update ... and a tape event").
    pub fn ledger_changed(&mut self, agent_id: &AgentId, account: LedgerAccount) {
        self.effects.push(Effect::to_agent(
            agent_id.clone(),
            synapse_protocol::ServerMessage::LedgerUpdate {
                v: synapse_core::PROTOCOL_VERSION,
                credits: account.credits,
                locked: account.locked,
            },
        ));
        self.tape.push(TapeEvent::LedgerUpdate {
            agent_id: agent_id.clone(),
            credits: account.credits,
            locked: account.locked,
        });
        self.persist.push(PersistOp::Ledger(agent_id.clone(), account));
    }

    /// Record a reputation mutation: tape event plus persistence write.
    pub fn reputation_changed(&mut self, agent_id: &AgentId, reputation: Reputation) {
        self.tape.push(TapeEvent::RepUpdate {
            agent_id: agent_id.clone(),
            completed: reputation.completed,
            failed: reputation.failed,
        });
        self.persist
            .push(PersistOp::Reputation(agent_id.clone(), reputation));
    }

    /// Append an evidence item: ring-buffer insertion happens at the call
    /// site (it needs the state guard); this records the tape event and
    /// persistence write for an item already pushed.
    pub fn evidence_appended(&mut self, item: EvidenceItem) {
        self.tape.push(TapeEvent::Evidence { item: item.clone() });
        self.persist.push(PersistOp::Evidence(item));
    }

    /// Record a broadcast: queues the client-facing effect, mirrors it as
    /// a `Broadcast` tape event, and appends a durable event row (§4.7
    /// "every broadcast is mirrored").
    pub fn broadcast(&mut self, message: synapse_protocol::ServerMessage) {
        let message_type = message.type_name();
        let payload = serde_json::to_value(&message).unwrap_or(serde_json::Value::Null);
        self.tape.push(TapeEvent::Broadcast {
            message_type: message_type.to_string(),
            payload: payload.clone(),
        });
        self.persist.push(PersistOp::Event(DurableEvent {
            kind: message_type.to_string(),
            payload,
        }));
        self.effects.push(Effect::broadcast(message));
    }
}

/// The exchange's full entity graph, behind a single lock (§5).
pub struct ExchangeState {
    /// Per-agent credit and locked-budget accounts.
    pub ledger: HashMap<AgentId, LedgerAccount>,
    /// Per-agent completed/failed counters.
    pub reputation: HashMap<AgentId, Reputation>,
    /// All jobs, keyed by id.
    pub jobs: HashMap<String, Job>,
    /// All bids, keyed by job id, in insertion order.
    pub bids_by_job: HashMap<String, Vec<Bid>>,
    /// Most-recent evidence items, capped at [`EVIDENCE_RING_CAPACITY`].
    pub evidence: VecDeque<EvidenceItem>,
    /// Live connection handshake state.
    pub sessions: HashMap<SessionId, SessionState>,
    /// Reverse index from agent identity to its active sessions, used to
    /// route directed effects (e.g. `ledger_update`).
    pub agent_sessions: HashMap<AgentId, HashSet<SessionId>>,
    /// GitHub issue → job id mapping, process-wide (§4.8).
    pub github_issue_jobs: HashMap<(String, String, u64), String>,
    /// GitHub PR → job id mapping, process-wide (§4.8).
    pub github_pr_jobs: HashMap<(String, String, u64), String>,
}

impl ExchangeState {
    /// Construct an empty entity graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: HashMap::new(),
            reputation: HashMap::new(),
            jobs: HashMap::new(),
            bids_by_job: HashMap::new(),
            evidence: VecDeque::new(),
            sessions: HashMap::new(),
            agent_sessions: HashMap::new(),
            github_issue_jobs: HashMap::new(),
            github_pr_jobs: HashMap::new(),
        }
    }

    /// Ensure an agent has a ledger and reputation row, granting
    /// `starting_credits` only on first creation. Returns `true` if the
    /// agent was newly created.
    pub fn ensure_account(&mut self, agent_id: &AgentId, starting_credits: u64) -> bool {
        let mut created = false;
        self.ledger.entry(agent_id.clone()).or_insert_with(|| {
            created = true;
            LedgerAccount::new(starting_credits)
        });
        self.reputation.entry(agent_id.clone()).or_default();
        created
    }

    /// Agent's current spendable credits (`credits - locked`), or `None` if
    /// the agent has no ledger account.
    #[must_use]
    pub fn spendable(&self, agent_id: &AgentId) -> Option<u64> {
        self.ledger.get(agent_id).map(LedgerAccount::spendable)
    }

    /// Append an evidence item to the capped ring, evicting the oldest
    /// entry when full, and return a clone for the caller to mirror into
    /// the handler outcome.
    pub fn push_evidence(
        &mut self,
        job_id: impl Into<String>,
        kind: impl Into<String>,
        detail: impl Into<String>,
        payload: serde_json::Value,
    ) -> EvidenceItem {
        let item = EvidenceItem {
            id: synapse_core::new_id("evidence"),
            at_ms: synapse_core::now_ms(),
            job_id: job_id.into(),
            kind: kind.into(),
            detail: detail.into(),
            payload,
        };
        self.evidence.push_back(item.clone());
        while self.evidence.len() > EVIDENCE_RING_CAPACITY {
            self.evidence.pop_front();
        }
        item
    }

    /// All sessions currently bound to an agent identity.
    pub fn sessions_for(&self, agent_id: &AgentId) -> impl Iterator<Item = SessionId> + '_ {
        self.agent_sessions
            .get(agent_id)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }
}

impl Default for ExchangeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_account_grants_starting_credits_once() {
        let mut state = ExchangeState::new();
        let agent = AgentId::from_raw("agent_1");
        assert!(state.ensure_account(&agent, 1000));
        assert_eq!(state.ledger[&agent].credits, 1000);
        assert!(!state.ensure_account(&agent, 9999));
        assert_eq!(state.ledger[&agent].credits, 1000);
    }

    #[test]
    fn evidence_ring_is_capped() {
        let mut state = ExchangeState::new();
        for i in 0..(EVIDENCE_RING_CAPACITY + 10) {
            state.push_evidence("job_1", "kind", format!("detail {i}"), serde_json::Value::Null);
        }
        assert_eq!(state.evidence.len(), EVIDENCE_RING_CAPACITY);
    }
}
