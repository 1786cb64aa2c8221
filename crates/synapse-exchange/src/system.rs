// SPDX-License-Identifier: MIT OR Apache-2.0
//! The System Control API (§4.8): trusted, out-of-band operations used by
//! webhook ingress (GitHub issues/PRs) and operator tooling, never reachable
//! from a client session.
//!
//! Every method here locks the same entity graph and shares the same
//! settlement/award/reopen machinery as the client-facing handlers in
//! [`crate::jobs`] — a System call and a client message that reach the same
//! state transition produce byte-identical tape and broadcast output.

use std::sync::Arc;

use synapse_core::{AgentId, Job, JobStatus};
use synapse_error::{ErrorCode, SynapseError};

use crate::exchange::Exchange;
use crate::jobs;
use crate::state::HandlerOutcome;

/// Ensure an agent has a ledger and reputation row (`systemEnsureAccount`).
pub async fn ensure_account(exchange: &Arc<Exchange>, agent_id: &AgentId) -> Result<(), SynapseError> {
    let outcome = {
        let mut state = exchange.state.lock().await;
        let created = state.ensure_account(agent_id, exchange.config.starting_credits);
        let mut outcome = HandlerOutcome::default();
        if created {
            let account = state.ledger[agent_id];
            outcome.ledger_changed(agent_id, account);
            outcome.persist.push(crate::state::PersistOp::Agent(agent_id.clone()));
        }
        outcome
    };
    exchange.apply_outcome(outcome).await;
    Ok(())
}

/// Create a job directly, bypassing the `post_job` client path
/// (`systemCreateJob`) — used by GitHub issue ingress.
pub async fn create_job(
    exchange: &Arc<Exchange>,
    requester_id: AgentId,
    title: String,
    description: Option<String>,
    budget: u64,
    kind: Option<String>,
    payload: Option<serde_json::Value>,
) -> Result<Job, SynapseError> {
    let (job, outcome) = {
        let mut state = exchange.state.lock().await;
        let outcome = jobs::post_job(&mut state, requester_id, title, description, budget, kind, payload)?;
        let job = outcome
            .persist
            .iter()
            .find_map(|op| match op {
                crate::state::PersistOp::Job(job) => Some(job.clone()),
                _ => None,
            })
            .expect("post_job always queues a Job persist op");
        (job, outcome)
    };
    exchange.apply_outcome(outcome).await;
    Ok(job)
}

/// Award a job to a worker directly (`systemAwardJob`), bypassing the
/// client `award` message's requester-identity check.
pub async fn award_job(exchange: &Arc<Exchange>, job_id: &str, worker_id: AgentId) -> Result<(), SynapseError> {
    let outcome = {
        let mut state = exchange.state.lock().await;
        let job = state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
        let plan = jobs::validate_award(&state, &exchange.config, &job, None, &worker_id, None)?;
        jobs::apply_award(&mut state, job, worker_id, plan, None)
    };
    exchange.apply_outcome(outcome).await;
    Ok(())
}

/// Force a job to settle successfully (`systemCompleteJob`) — used by the
/// GitHub checks/merge payout trigger.
pub async fn complete_job(exchange: &Arc<Exchange>, job_id: &str) -> Result<(), SynapseError> {
    let outcome = {
        let mut state = exchange.state.lock().await;
        let job = state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
        if job.status != JobStatus::Awarded && job.status != JobStatus::InReview {
            return Err(SynapseError::new(ErrorCode::JobNotAwarded));
        }
        jobs::apply_settlement_success(&mut state, job)
    };
    exchange.apply_outcome(outcome).await;
    Ok(())
}

/// Force a job to settle unsuccessfully and reopen (`systemFailJob`).
pub async fn fail_job(exchange: &Arc<Exchange>, job_id: &str, reason: String) -> Result<(), SynapseError> {
    let outcome = {
        let mut state = exchange.state.lock().await;
        let job = state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
        if job.status != JobStatus::Awarded && job.status != JobStatus::InReview {
            return Err(SynapseError::new(ErrorCode::JobNotAwarded));
        }
        let job_id = job.id.clone();
        let mut outcome = jobs::apply_settlement_failure(&mut state, &exchange.config, job, reason);
        outcome.merge(jobs::apply_reopen(&mut state, job_id));
        outcome
    };
    exchange.apply_outcome(outcome).await;
    Ok(())
}

/// Reopen a failed job for bidding again (`systemReopenJob`).
///
/// Only valid once the job has already been settled (its escrow and stake
/// locks released) — an `awarded`/`in_review` job still has credits locked
/// against it, and [`jobs::apply_reopen`] does not itself touch the ledger,
/// so reopening one directly would strand those locks with no job left to
/// account for them. Pair with [`fail_job`] or [`complete_job`] first.
pub async fn reopen_job(exchange: &Arc<Exchange>, job_id: &str) -> Result<(), SynapseError> {
    let outcome = {
        let mut state = exchange.state.lock().await;
        let job = state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
        if job.status == JobStatus::Awarded || job.status == JobStatus::InReview {
            return Err(SynapseError::new(ErrorCode::JobNotReopenable));
        }
        jobs::apply_reopen(&mut state, job_id.to_string())
    };
    exchange.apply_outcome(outcome).await;
    Ok(())
}

/// Append an evidence item to a job without any other state change
/// (`systemAddEvidence`).
pub async fn add_evidence(
    exchange: &Arc<Exchange>,
    job_id: &str,
    kind: &str,
    detail: &str,
    payload: serde_json::Value,
) -> Result<(), SynapseError> {
    let outcome = {
        let mut state = exchange.state.lock().await;
        if !state.jobs.contains_key(job_id) {
            return Err(SynapseError::new(ErrorCode::JobNotFound));
        }
        let mut outcome = HandlerOutcome::default();
        let item = state.push_evidence(job_id, kind, detail, payload);
        outcome.evidence_appended(item);
        outcome
    };
    exchange.apply_outcome(outcome).await;
    Ok(())
}

/// Link a job to a GitHub issue (`systemLinkIssue`).
pub async fn link_issue(
    exchange: &Arc<Exchange>,
    job_id: &str,
    owner: String,
    repo: String,
    issue_number: u64,
) -> Result<(), SynapseError> {
    let mut state = exchange.state.lock().await;
    let job = state
        .jobs
        .get_mut(job_id)
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    let link = job.payload.github.get_or_insert_with(|| synapse_core::job::GithubLink {
        owner: owner.clone(),
        repo: repo.clone(),
        issue_number: None,
        pr_number: None,
    });
    link.issue_number = Some(issue_number);
    state
        .github_issue_jobs
        .insert((owner.clone(), repo.clone(), issue_number), job_id.to_string());
    let job = state.jobs[job_id].clone();
    drop(state);
    exchange
        .apply_outcome({
            let mut outcome = HandlerOutcome::default();
            outcome.persist.push(crate::state::PersistOp::Job(job));
            outcome.persist.push(crate::state::PersistOp::GithubIssue {
                owner,
                repo,
                issue_number,
                job_id: job_id.to_string(),
            });
            outcome
        })
        .await;
    Ok(())
}

/// Link a job to a GitHub pull request (`systemLinkPr`).
pub async fn link_pr(
    exchange: &Arc<Exchange>,
    job_id: &str,
    owner: String,
    repo: String,
    pr_number: u64,
) -> Result<(), SynapseError> {
    let mut state = exchange.state.lock().await;
    let job = state
        .jobs
        .get_mut(job_id)
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    let link = job.payload.github.get_or_insert_with(|| synapse_core::job::GithubLink {
        owner: owner.clone(),
        repo: repo.clone(),
        issue_number: None,
        pr_number: None,
    });
    link.pr_number = Some(pr_number);
    state
        .github_pr_jobs
        .insert((owner.clone(), repo.clone(), pr_number), job_id.to_string());
    let job = state.jobs[job_id].clone();
    drop(state);
    exchange
        .apply_outcome({
            let mut outcome = HandlerOutcome::default();
            outcome.persist.push(crate::state::PersistOp::Job(job));
            outcome.persist.push(crate::state::PersistOp::GithubPr {
                owner,
                repo,
                pr_number,
                job_id: job_id.to_string(),
            });
            outcome
        })
        .await;
    Ok(())
}

/// Look up a job id by its linked GitHub issue (`systemGetJobIdByGithubIssue`).
pub async fn job_id_by_github_issue(exchange: &Arc<Exchange>, owner: &str, repo: &str, issue_number: u64) -> Option<String> {
    let state = exchange.state.lock().await;
    state
        .github_issue_jobs
        .get(&(owner.to_string(), repo.to_string(), issue_number))
        .cloned()
}

/// Look up a job id by its linked GitHub pull request (`systemGetJobIdByGithubPr`).
pub async fn job_id_by_github_pr(exchange: &Arc<Exchange>, owner: &str, repo: &str, pr_number: u64) -> Option<String> {
    let state = exchange.state.lock().await;
    state
        .github_pr_jobs
        .get(&(owner.to_string(), repo.to_string(), pr_number))
        .cloned()
}
