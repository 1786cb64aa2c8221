// SPDX-License-Identifier: MIT OR Apache-2.0
//! The persistence port and its in-memory reference implementation (§4.9).

use crate::error::PersistenceError;
use async_trait::async_trait;
use std::collections::HashMap;
use synapse_core::{AgentId, Bid, DurableEvent, EvidenceItem, Job, LedgerAccount, Reputation};
use tokio::sync::Mutex;

/// An optional, write-through persistence collaborator (§4.9).
///
/// Every state-changing exchange operation calls through to this trait
/// after applying its in-memory mutation. Implementations must treat
/// inserts as idempotent ("do nothing on conflict") and updates as
/// overwrites of the canonical row — the exchange relies on this to
/// reconcile after a transient failure without special-casing retries.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Record that an agent exists (idempotent).
    async fn upsert_agent(&self, agent_id: &AgentId) -> Result<(), PersistenceError>;

    /// Overwrite an agent's ledger row.
    async fn upsert_ledger(
        &self,
        agent_id: &AgentId,
        account: &LedgerAccount,
    ) -> Result<(), PersistenceError>;

    /// Overwrite an agent's reputation row.
    async fn upsert_reputation(
        &self,
        agent_id: &AgentId,
        reputation: &Reputation,
    ) -> Result<(), PersistenceError>;

    /// Overwrite a job's canonical row.
    async fn upsert_job(&self, job: &Job) -> Result<(), PersistenceError>;

    /// Insert a bid (idempotent on `id`).
    async fn insert_bid(&self, bid: &Bid) -> Result<(), PersistenceError>;

    /// Insert an evidence item (idempotent on `id`).
    async fn insert_evidence(&self, item: &EvidenceItem) -> Result<(), PersistenceError>;

    /// Append a durable event row.
    async fn insert_event(&self, event: &DurableEvent) -> Result<(), PersistenceError>;

    /// Link a job to a GitHub issue, keyed by `(owner, repo, issue_number)`.
    async fn link_github_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        job_id: &str,
    ) -> Result<(), PersistenceError>;

    /// Link a job to a GitHub pull request, keyed by `(owner, repo, pr_number)`.
    async fn link_github_pr(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        job_id: &str,
    ) -> Result<(), PersistenceError>;

    /// Look up a job id by its linked GitHub issue.
    async fn job_id_by_github_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> Result<Option<String>, PersistenceError>;

    /// Look up a job id by its linked GitHub pull request.
    async fn job_id_by_github_pr(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<String>, PersistenceError>;

    /// Snapshot every stored job, for cold-start or persistence-backed
    /// queries (§4.9 "snapshot queries read directly from the store when
    /// enabled").
    async fn snapshot_jobs(&self) -> Result<Vec<Job>, PersistenceError>;

    /// Snapshot every stored bid.
    async fn snapshot_bids(&self) -> Result<Vec<Bid>, PersistenceError>;

    /// Snapshot every stored evidence item.
    async fn snapshot_evidence(&self) -> Result<Vec<EvidenceItem>, PersistenceError>;
}

#[derive(Default)]
struct Tables {
    agents: std::collections::HashSet<String>,
    ledger: HashMap<String, LedgerAccount>,
    reputation: HashMap<String, Reputation>,
    jobs: HashMap<String, Job>,
    bids: HashMap<String, Bid>,
    evidence: HashMap<String, EvidenceItem>,
    events: Vec<DurableEvent>,
    github_issues: HashMap<(String, String, u64), String>,
    github_prs: HashMap<(String, String, u64), String>,
}

/// In-memory reference implementation of [`PersistenceStore`].
///
/// This is what the exchange uses when `DATABASE_URL` is unset (§6): the
/// in-memory projection *is* the store, so every call below is infallible
/// in practice, but the trait boundary is still exercised so swapping in a
/// real backing store requires no change to `synapse-exchange`.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn upsert_agent(&self, agent_id: &AgentId) -> Result<(), PersistenceError> {
        self.tables
            .lock()
            .await
            .agents
            .insert(agent_id.as_str().to_string());
        Ok(())
    }

    async fn upsert_ledger(
        &self,
        agent_id: &AgentId,
        account: &LedgerAccount,
    ) -> Result<(), PersistenceError> {
        self.tables
            .lock()
            .await
            .ledger
            .insert(agent_id.as_str().to_string(), account.clone());
        Ok(())
    }

    async fn upsert_reputation(
        &self,
        agent_id: &AgentId,
        reputation: &Reputation,
    ) -> Result<(), PersistenceError> {
        self.tables
            .lock()
            .await
            .reputation
            .insert(agent_id.as_str().to_string(), reputation.clone());
        Ok(())
    }

    async fn upsert_job(&self, job: &Job) -> Result<(), PersistenceError> {
        self.tables
            .lock()
            .await
            .jobs
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn insert_bid(&self, bid: &Bid) -> Result<(), PersistenceError> {
        let mut tables = self.tables.lock().await;
        tables.bids.entry(bid.id.clone()).or_insert_with(|| bid.clone());
        Ok(())
    }

    async fn insert_evidence(&self, item: &EvidenceItem) -> Result<(), PersistenceError> {
        let mut tables = self.tables.lock().await;
        tables
            .evidence
            .entry(item.id.clone())
            .or_insert_with(|| item.clone());
        Ok(())
    }

    async fn insert_event(&self, event: &DurableEvent) -> Result<(), PersistenceError> {
        self.tables.lock().await.events.push(event.clone());
        Ok(())
    }

    async fn link_github_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        job_id: &str,
    ) -> Result<(), PersistenceError> {
        self.tables
            .lock()
            .await
            .github_issues
            .insert((owner.to_string(), repo.to_string(), issue_number), job_id.to_string());
        Ok(())
    }

    async fn link_github_pr(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        job_id: &str,
    ) -> Result<(), PersistenceError> {
        self.tables
            .lock()
            .await
            .github_prs
            .insert((owner.to_string(), repo.to_string(), pr_number), job_id.to_string());
        Ok(())
    }

    async fn job_id_by_github_issue(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
    ) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .tables
            .lock()
            .await
            .github_issues
            .get(&(owner.to_string(), repo.to_string(), issue_number))
            .cloned())
    }

    async fn job_id_by_github_pr(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .tables
            .lock()
            .await
            .github_prs
            .get(&(owner.to_string(), repo.to_string(), pr_number))
            .cloned())
    }

    async fn snapshot_jobs(&self) -> Result<Vec<Job>, PersistenceError> {
        Ok(self.tables.lock().await.jobs.values().cloned().collect())
    }

    async fn snapshot_bids(&self) -> Result<Vec<Bid>, PersistenceError> {
        Ok(self.tables.lock().await.bids.values().cloned().collect())
    }

    async fn snapshot_evidence(&self) -> Result<Vec<EvidenceItem>, PersistenceError> {
        Ok(self.tables.lock().await.evidence.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_core::job::JobPayload;
    use synapse_core::{Job, JobStatus};

    fn sample_job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            title: "title".into(),
            description: None,
            budget: 100,
            requester_id: AgentId::from_raw("agent_req".into()),
            created_at_ms: 0,
            status: JobStatus::Open,
            worker_id: None,
            kind: "simple".into(),
            payload: JobPayload::default(),
            locked_budget: 0,
            locked_stake: 0,
            paid_upfront: 0,
            awarded_at_ms: None,
        }
    }

    #[tokio::test]
    async fn upsert_job_overwrites() {
        let store = InMemoryStore::new();
        let mut job = sample_job("job_1");
        store.upsert_job(&job).await.unwrap();
        job.status = JobStatus::Awarded;
        store.upsert_job(&job).await.unwrap();
        let snap = store.snapshot_jobs().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].status, JobStatus::Awarded);
    }

    #[tokio::test]
    async fn github_links_round_trip() {
        let store = InMemoryStore::new();
        store
            .link_github_issue("acme", "widgets", 42, "job_1")
            .await
            .unwrap();
        let found = store
            .job_id_by_github_issue("acme", "widgets", 42)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("job_1"));
        assert_eq!(
            store
                .job_id_by_github_issue("acme", "widgets", 43)
                .await
                .unwrap(),
            None
        );
    }
}
