// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenario 3 (§8): an idle awarded contract auto-fails and the
//! job reopens for bidding.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde_json::json;
use synapse_core::{JobStatus, SynapseConfig, PROTOCOL_VERSION};
use synapse_exchange::{handle_client_message, Effect, Exchange, Recipient, SessionId};
use synapse_protocol::{ClientMessage, ServerMessage};
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

// ─── Scenario ────────────────────────────────────────────────────────

#[tokio::test]
async fn an_idle_awarded_job_times_out_and_reopens() {
    let exchange = Exchange::new(SynapseConfig::default());
    let mut rx = exchange.subscribe_effects();

    let requester = Agent::new();
    let worker = Agent::new();
    let (requester_session, requester_id) = authenticate(&exchange, &mut rx, &requester, "boss").await;
    let (worker_session, worker_id) = authenticate(&exchange, &mut rx, &worker, "worker").await;

    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::PostJob {
            v: PROTOCOL_VERSION,
            title: "times out".to_string(),
            description: None,
            budget: 100,
            kind: None,
            payload: Some(json!({"timeoutSeconds": 1})),
        },
    )
    .await;
    let job_id = job_id_from(&drain(&mut rx));

    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Bid {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            price: 90,
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
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
        },
    )
    .await;
    drain(&mut rx);
    assert_eq!(exchange.armed_timer_count().await, 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // Let the timer's background task run to completion.
    for _ in 0..20 {
        if exchange.armed_timer_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let effects = drain(&mut rx);
    assert!(effects.iter().any(|e| matches!(&e.message, ServerMessage::JobFailed { reason, .. } if reason == "timeout")));
    assert!(effects.iter().any(|e| matches!(&e.message, ServerMessage::JobUpdated { job, .. } if job.status == JobStatus::Open)));

    let requester_agent_id = synapse_core::AgentId::from_raw(requester_id);
    let worker_agent_id = synapse_core::AgentId::from_raw(worker_id);
    let snapshot = exchange.observer_snapshot().await;
    let job = snapshot.jobs.iter().find(|j| j.id == job_id).expect("job present");
    assert_eq!(job.status, JobStatus::Open);
    assert!(job.worker_id.is_none());
    assert_eq!(job.locked_budget, 0);
    assert_eq!(job.locked_stake, 0);

    let requester_view = snapshot.agents.iter().find(|a| a.agent_id == requester_agent_id.as_str()).unwrap();
    let worker_view = snapshot.agents.iter().find(|a| a.agent_id == worker_agent_id.as_str()).unwrap();
    assert_eq!(requester_view.locked, 0);
    assert_eq!(worker_view.locked, 0);
    assert!(worker_view.failed >= 1);

    assert!(snapshot
        .evidence
        .iter()
        .any(|item| item.job_id == job_id && item.kind == "settlement"));
}
