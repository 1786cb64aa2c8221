// SPDX-License-Identifier: MIT OR Apache-2.0
//! Testable properties (§8): ledger conservation, escrow/stake soundness,
//! and status closure, exercised across a completed contract and a failed
//! one.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use synapse_core::{JobStatus, SynapseConfig, PROTOCOL_VERSION};
use synapse_exchange::{handle_client_message, Effect, Exchange, Recipient, SessionId};
use synapse_protocol::{ClientMessage, ReviewDecision, ServerMessage};
use tokio::sync::broadcast;

// ─── Helpers ─────────────────────────────────────────────────────────

struct Agent {
    signing_key: SigningKey,
}

impl Agent {
    fn new() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    fn public_key_b64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.signing_key.verifying_key().to_bytes())
    }
}

fn drain(rx: &mut broadcast::Receiver<Effect>) -> Vec<Effect> {
    let mut out = Vec::new();
    while let Ok(effect) = rx.try_recv() {
        out.push(effect);
    }
    out
}

async fn authenticate(
    exchange: &Arc<Exchange>,
    rx: &mut broadcast::Receiver<Effect>,
    agent: &Agent,
    name: &str,
) -> (SessionId, String) {
    let (session_id, nonce) = exchange.open_session().await;
    let public_key = agent.public_key_b64();
    let canonical = synapse_protocol::auth_canonical_string(PROTOCOL_VERSION, &nonce, name, &public_key);
    let signature = agent.signing_key.sign(canonical.as_bytes());
    let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

    handle_client_message(
        exchange,
        session_id,
        ClientMessage::Auth {
            v: PROTOCOL_VERSION,
            agent_name: name.to_string(),
            public_key,
            nonce,
            signature: signature_b64,
        },
    )
    .await;

    for effect in drain(rx) {
        if effect.to == Recipient::Session(session_id) {
            if let ServerMessage::Authed { agent_id, .. } = effect.message {
                return (session_id, agent_id);
            }
        }
    }
    panic!("authentication did not produce an authed reply");
}

fn job_id_from(effects: &[Effect]) -> String {
    for effect in effects {
        if let ServerMessage::JobPosted { job, .. } = &effect.message {
            return job.id.clone();
        }
    }
    panic!("no job_posted broadcast found");
}

/// Every account's locked portion never exceeds its total credits, and the
/// total credits in the system never drifts from what the starting grants
/// put there (no credits are created or destroyed by a transfer).
async fn assert_ledger_invariants(exchange: &Arc<Exchange>, expected_total: u64) {
    let snapshot = exchange.observer_snapshot().await;
    let mut total = 0u64;
    for agent in &snapshot.agents {
        assert!(agent.locked <= agent.credits, "account {} violates locked <= credits", agent.agent_id);
        total += agent.credits;
    }
    assert_eq!(total, expected_total, "total credits drifted from the sum of starting grants");
}

// ─── Properties ──────────────────────────────────────────────────────

#[tokio::test]
async fn ledger_and_escrow_invariants_hold_across_a_completed_and_a_failed_contract() {
    let exchange = Exchange::new(SynapseConfig::default());
    let mut rx = exchange.subscribe_effects();

    let requester = Agent::new();
    let worker = Agent::new();
    let (requester_session, _requester_id) = authenticate(&exchange, &mut rx, &requester, "boss").await;
    let (worker_session, worker_id) = authenticate(&exchange, &mut rx, &worker, "worker").await;
    let starting_total = 2_000;
    assert_ledger_invariants(&exchange, starting_total).await;

    // A contract that completes successfully.
    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::PostJob {
            v: PROTOCOL_VERSION,
            title: "completes".to_string(),
            description: None,
            budget: 60,
            kind: None,
            payload: None,
        },
    )
    .await;
    let completed_job_id = job_id_from(&drain(&mut rx));

    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Bid {
            v: PROTOCOL_VERSION,
            job_id: completed_job_id.clone(),
            price: 60,
            eta_seconds: 60,
            pitch: None,
            terms: None,
        },
    )
    .await;
    drain(&mut rx);
    assert_ledger_invariants(&exchange, starting_total).await;

    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::Award {
            v: PROTOCOL_VERSION,
            job_id: completed_job_id.clone(),
            worker_id: worker_id.clone(),
        },
    )
    .await;
    drain(&mut rx);
    assert_ledger_invariants(&exchange, starting_total).await;

    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Submit {
            v: PROTOCOL_VERSION,
            job_id: completed_job_id.clone(),
            result: "done".to_string(),
        },
    )
    .await;
    drain(&mut rx);

    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::Review {
            v: PROTOCOL_VERSION,
            job_id: completed_job_id.clone(),
            decision: ReviewDecision::Accept,
            notes: None,
        },
    )
    .await;
    drain(&mut rx);
    assert_ledger_invariants(&exchange, starting_total).await;

    let snapshot = exchange.observer_snapshot().await;
    let completed_job = snapshot.jobs.iter().find(|j| j.id == completed_job_id).unwrap();
    assert_eq!(completed_job.status, JobStatus::Completed);
    let paid_at_completion = completed_job.locked_budget;
    let worker_id_at_completion = completed_job.worker_id.clone();

    // A second contract that times out and reopens; this must not disturb
    // the first contract's now-terminal state or the system-wide totals.
    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::PostJob {
            v: PROTOCOL_VERSION,
            title: "times out".to_string(),
            description: None,
            budget: 40,
            kind: None,
            payload: Some(serde_json::json!({"timeoutSeconds": 1})),
        },
    )
    .await;
    let doomed_job_id = job_id_from(&drain(&mut rx));

    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Bid {
            v: PROTOCOL_VERSION,
            job_id: doomed_job_id.clone(),
            price: 40,
            eta_seconds: 60,
            pitch: None,
            terms: None,
        },
    )
    .await;
    drain(&mut rx);

    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::Award {
            v: PROTOCOL_VERSION,
            job_id: doomed_job_id.clone(),
            worker_id: worker_id.clone(),
        },
    )
    .await;
    drain(&mut rx);
    assert_ledger_invariants(&exchange, starting_total).await;

    tokio::time::sleep(Duration::from_millis(1200)).await;
    for _ in 0..20 {
        if exchange.armed_timer_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    drain(&mut rx);
    assert_ledger_invariants(&exchange, starting_total).await;

    let snapshot = exchange.observer_snapshot().await;
    let doomed_job = snapshot.jobs.iter().find(|j| j.id == doomed_job_id).unwrap();
    assert_eq!(doomed_job.status, JobStatus::Open);
    assert!(doomed_job.worker_id.is_none());

    // The first contract's terminal record never moved.
    let completed_job = snapshot.jobs.iter().find(|j| j.id == completed_job_id).unwrap();
    assert_eq!(completed_job.status, JobStatus::Completed);
    assert_eq!(completed_job.locked_budget, paid_at_completion);
    assert_eq!(completed_job.worker_id, worker_id_at_completion);
}
