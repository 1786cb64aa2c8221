// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenario 4 (§8): reputation smoothing after one completed and
//! one failed contract.

use std::sync::Arc;

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use synapse_core::{SynapseConfig, PROTOCOL_VERSION};
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

async fn post_bid_award(
    exchange: &Arc<Exchange>,
    rx: &mut broadcast::Receiver<Effect>,
    requester_session: SessionId,
    worker_session: SessionId,
    worker_id: &str,
) -> String {
    handle_client_message(
        exchange,
        requester_session,
        ClientMessage::PostJob {
            v: PROTOCOL_VERSION,
            title: "contract".to_string(),
            description: None,
            budget: 50,
            kind: None,
            payload: None,
        },
    )
    .await;
    let job_id = job_id_from(&drain(rx));

    handle_client_message(
        exchange,
        worker_session,
        ClientMessage::Bid {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            price: 50,
            eta_seconds: 60,
            pitch: None,
            terms: None,
        },
    )
    .await;
    drain(rx);

    handle_client_message(
        exchange,
        requester_session,
        ClientMessage::Award {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            worker_id: worker_id.to_string(),
        },
    )
    .await;
    drain(rx);
    job_id
}

// ─── Scenario ────────────────────────────────────────────────────────

#[tokio::test]
async fn reputation_smooths_across_one_completion_and_one_failure() {
    let exchange = Exchange::new(SynapseConfig::default());
    let mut rx = exchange.subscribe_effects();

    let requester = Agent::new();
    let worker = Agent::new();
    let (requester_session, _requester_id) = authenticate(&exchange, &mut rx, &requester, "boss").await;
    let (worker_session, worker_id) = authenticate(&exchange, &mut rx, &worker, "worker").await;

    let job_one = post_bid_award(&exchange, &mut rx, requester_session, worker_session, &worker_id).await;
    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Submit {
            v: PROTOCOL_VERSION,
            job_id: job_one.clone(),
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
            job_id: job_one,
            decision: ReviewDecision::Accept,
            notes: None,
        },
    )
    .await;
    drain(&mut rx);

    let worker_agent_id = synapse_core::AgentId::from_raw(worker_id.clone());
    let snapshot = exchange.observer_snapshot().await;
    let worker_view = snapshot.agents.iter().find(|a| a.agent_id == worker_agent_id.as_str()).unwrap();
    assert_eq!(worker_view.completed, 1);
    assert_eq!(worker_view.failed, 0);

    let job_two = post_bid_award(&exchange, &mut rx, requester_session, worker_session, &worker_id).await;
    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Submit {
            v: PROTOCOL_VERSION,
            job_id: job_two.clone(),
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
            job_id: job_two,
            decision: ReviewDecision::Reject,
            notes: None,
        },
    )
    .await;
    let effects = drain(&mut rx);
    assert!(effects.iter().any(|e| matches!(&e.message, ServerMessage::JobFailed { .. })));

    let snapshot = exchange.observer_snapshot().await;
    let worker_view = snapshot.agents.iter().find(|a| a.agent_id == worker_agent_id.as_str()).unwrap();
    assert_eq!(worker_view.completed, 1);
    assert_eq!(worker_view.failed, 1);

    let reputation = synapse_core::Reputation {
        completed: worker_view.completed,
        failed: worker_view.failed,
    };
    assert!((reputation.score() - 0.5).abs() < 1e-9);
}
