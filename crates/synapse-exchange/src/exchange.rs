// SPDX-License-Identifier: MIT OR Apache-2.0
//! The top-level [`Exchange`]: owns the entity-graph lock, the deadline
//! scheduler, the tape bus, and the optional persistence collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use synapse_core::{AgentId, SynapseConfig};
use synapse_persistence::PersistenceStore;
use tokio::sync::{broadcast, Mutex};
use tokio::task::AbortHandle;
use tracing::warn;

use crate::effect::Effect;
use crate::evaluator::{CodeEvaluator, KeywordEvaluator};
use crate::session::{SessionId, SessionState};
use crate::state::{ExchangeState, HandlerOutcome, PersistOp, TimerAction};
use crate::tape::TapeBus;

/// The authoritative, single-process Synapse clearing house (§2, §5).
///
/// Every state-changing operation — whether it arrives over a client
/// session or through the System Control API — goes through the same
/// entity-graph lock, so handlers observe the "executes atomically" rule
/// in §5 regardless of entry point.
pub struct Exchange {
    pub(crate) state: Mutex<ExchangeState>,
    timers: Mutex<HashMap<String, (AbortHandle, AgentId)>>,
    pub(crate) tape: TapeBus,
    effects: broadcast::Sender<Effect>,
    pub(crate) persistence: Option<Arc<dyn PersistenceStore>>,
    pub config: SynapseConfig,
    pub(crate) evaluator: Arc<dyn CodeEvaluator>,
    session_counter: AtomicU64,
}

/// Default channel capacity for the effect bus; generous enough that a
/// burst of settlement/negotiation effects never blocks a handler.
const EFFECT_BUS_CAPACITY: usize = 4096;

impl Exchange {
    /// Build an exchange with in-memory state only, no persistence
    /// collaborator, and the default keyword evaluator.
    #[must_use]
    pub fn new(config: SynapseConfig) -> Arc<Self> {
        Self::with_collaborators(config, None, Arc::new(KeywordEvaluator))
    }

    /// Build an exchange with explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        config: SynapseConfig,
        persistence: Option<Arc<dyn PersistenceStore>>,
        evaluator: Arc<dyn CodeEvaluator>,
    ) -> Arc<Self> {
        let (effects, _) = broadcast::channel(EFFECT_BUS_CAPACITY);
        Arc::new(Self {
            state: Mutex::new(ExchangeState::new()),
            timers: Mutex::new(HashMap::new()),
            tape: TapeBus::new(),
            effects,
            persistence,
            config,
            evaluator,
            session_counter: AtomicU64::new(1),
        })
    }

    /// Open a new, unauthenticated session and return its id and challenge
    /// nonce.
    pub async fn open_session(&self) -> (SessionId, String) {
        let id = SessionId(self.session_counter.fetch_add(1, Ordering::Relaxed));
        let session = SessionState::new();
        let nonce = session.nonce.clone();
        self.state.lock().await.sessions.insert(id, session);
        (id, nonce)
    }

    /// Remove a session on disconnect. Ledger, reputation, jobs, and
    /// timers are untouched — only the connection's own bookkeeping is
    /// dropped (§5 "Cancellation").
    pub async fn close_session(&self, session_id: SessionId) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.remove(&session_id) {
            if let Some(agent_id) = session.agent_id {
                if let Some(set) = state.agent_sessions.get_mut(&agent_id) {
                    set.remove(&session_id);
                }
            }
        }
    }

    /// Subscribe to the tape stream (§4.7).
    #[must_use]
    pub fn subscribe_tape(&self) -> tokio::sync::broadcast::Receiver<synapse_core::TapeEvent> {
        self.tape.subscribe()
    }

    /// Subscribe to the effect bus. The transport layer holds one receiver
    /// per connection and filters by [`crate::effect::Recipient`]; a lagging
    /// subscriber misses effects rather than blocking the exchange.
    #[must_use]
    pub fn subscribe_effects(&self) -> broadcast::Receiver<Effect> {
        self.effects.subscribe()
    }

    /// Publish a single effect outside of a [`HandlerOutcome`] — used for
    /// ad-hoc, session-scoped errors (e.g. a rejected client message).
    pub fn publish_effect(&self, effect: Effect) {
        let _ = self.effects.send(effect);
    }

    /// Snapshot every agent's ledger and reputation, every job, every bid,
    /// and the evidence ring, for the observer `snapshot` message (§6).
    pub async fn observer_snapshot(&self) -> synapse_protocol::ObserverSnapshot {
        let state = self.state.lock().await;
        let agents = state
            .ledger
            .keys()
            .map(|agent_id| {
                let ledger = state.ledger.get(agent_id).copied().unwrap_or(synapse_core::LedgerAccount::new(0));
                let rep = state.reputation.get(agent_id).copied().unwrap_or_default();
                synapse_protocol::ObserverAgent {
                    agent_id: agent_id.as_str().to_string(),
                    credits: ledger.credits,
                    locked: ledger.locked,
                    completed: rep.completed,
                    failed: rep.failed,
                }
            })
            .collect();
        let jobs = state.jobs.values().cloned().collect();
        let bids = state.bids_by_job.values().flatten().cloned().collect();
        let evidence = state.evidence.iter().rev().cloned().collect();
        synapse_protocol::ObserverSnapshot {
            agents,
            jobs,
            bids,
            evidence,
        }
    }

    /// Apply a computed [`HandlerOutcome`]: publish its effects and tape
    /// events, issue durable writes, and act on timer requests. Called
    /// after the state lock that produced the outcome has been released.
    ///
    /// Effects are delivered through the effect bus rather than returned,
    /// so a timer- or System-API-triggered outcome (with no request/reply
    /// connection of its own) reaches live sessions the same way a
    /// client-triggered one does.
    pub(crate) async fn apply_outcome(self: &Arc<Self>, outcome: HandlerOutcome) {
        for effect in outcome.effects {
            self.publish_effect(effect);
        }
        for event in outcome.tape {
            self.tape.publish(event);
        }
        for op in outcome.persist {
            self.issue_persist(op);
        }
        for action in outcome.timers {
            match action {
                TimerAction::Arm { job_id, worker_id, seconds } => self.arm_deadline(job_id, worker_id, seconds).await,
                TimerAction::Disarm { job_id } => self.disarm_deadline(&job_id).await,
            }
        }
    }

    /// Fire a [`PersistOp`] in the background. A failure is logged and
    /// recorded as a `db_error_<op>` evidence/tape entry; in-memory state
    /// is never rolled back for these paths (§7 tier 2).
    fn issue_persist(self: &Arc<Self>, op: PersistOp) {
        let Some(store) = self.persistence.clone() else {
            return;
        };
        let exchange = Arc::clone(self);
        let op_name = op.op_name();
        tokio::spawn(async move {
            let result = match &op {
                PersistOp::Agent(agent_id) => store.upsert_agent(agent_id).await,
                PersistOp::Ledger(agent_id, account) => store.upsert_ledger(agent_id, account).await,
                PersistOp::Reputation(agent_id, rep) => store.upsert_reputation(agent_id, rep).await,
                PersistOp::Job(job) => store.upsert_job(job).await,
                PersistOp::Bid(bid) => store.insert_bid(bid).await,
                PersistOp::Evidence(item) => store.insert_evidence(item).await,
                PersistOp::Event(event) => store.insert_event(event).await,
                PersistOp::GithubIssue {
                    owner,
                    repo,
                    issue_number,
                    job_id,
                } => store.link_github_issue(owner, repo, *issue_number, job_id).await,
                PersistOp::GithubPr {
                    owner,
                    repo,
                    pr_number,
                    job_id,
                } => store.link_github_pr(owner, repo, *pr_number, job_id).await,
            };
            if let Err(err) = result {
                warn!(op = op_name, error = %err, "persistence write failed");
                let job_id = match &op {
                    PersistOp::Job(job) => Some(job.id.clone()),
                    PersistOp::Bid(bid) => Some(bid.job_id.clone()),
                    PersistOp::Evidence(item) => Some(item.job_id.clone()),
                    _ => None,
                };
                exchange.record_db_error(job_id.as_deref(), op_name, err.to_string()).await;
            }
        });
    }

    async fn record_db_error(&self, job_id: Option<&str>, op: &str, detail: String) {
        let kind = synapse_error::ErrorCode::db_error_kind(op);
        let mut state = self.state.lock().await;
        let item = state.push_evidence(
            job_id.unwrap_or_default(),
            kind,
            detail,
            serde_json::Value::Null,
        );
        drop(state);
        self.tape.publish(synapse_core::TapeEvent::Evidence { item });
    }

    /// Arm a single-shot deadline timer for a job (§4.6).
    ///
    /// Replaces any existing timer for the same job id — a re-arm (e.g. on
    /// `changes` review) always supersedes the previous deadline. The armed
    /// worker id travels with the timer so the fire callback can tell a
    /// stale timer from a prior award apart from the current one (§5
    /// ordering guarantee 5), even if the old timer's `abort()` hasn't
    /// taken effect by the time it would otherwise fire.
    pub(crate) async fn arm_deadline(self: &Arc<Self>, job_id: String, worker_id: AgentId, seconds: u64) {
        let exchange = Arc::clone(self);
        let spawned_job_id = job_id.clone();
        let spawned_worker_id = worker_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
            exchange.timer_fire(spawned_job_id, spawned_worker_id).await;
        });
        if let Some((previous, _)) = self.timers.lock().await.insert(job_id, (handle.abort_handle(), worker_id)) {
            previous.abort();
        }
    }

    /// Cancel a job's deadline timer, if any (§4.3, §4.6).
    pub(crate) async fn disarm_deadline(&self, job_id: &str) {
        if let Some((handle, _)) = self.timers.lock().await.remove(job_id) {
            handle.abort();
        }
    }

    /// Number of jobs with a currently armed deadline timer, used by tests
    /// to check §8's "timer correctness" property.
    pub async fn armed_timer_count(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Deadline fire callback: re-check the job is still `awarded` to the
    /// worker this specific timer was armed for before settling it, since a
    /// submission, review, or a fresh award following an earlier reopen may
    /// have raced the timer (§5 ordering guarantee 5).
    async fn timer_fire(self: Arc<Self>, job_id: String, worker_id: AgentId) {
        self.timers.lock().await.remove(&job_id);
        if let Err(err) = crate::jobs::timeout_job(&self, &job_id, &worker_id).await {
            warn!(job_id, error = %err, "timeout handling failed");
        }
    }

    /// Current spendable credits for an agent, or `None` if unknown.
    pub async fn spendable(&self, agent_id: &AgentId) -> Option<u64> {
        self.state.lock().await.spendable(agent_id)
    }
}
