// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenarios 2 and 5 (§8): negotiated upfront award, and the
//! max-rounds negotiation cap.

use std::sync::Arc;

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use synapse_core::{Role, SynapseConfig, Terms, PROTOCOL_VERSION};
use synapse_exchange::{handle_client_message, Effect, Exchange, Recipient, SessionId};
use synapse_protocol::{ClientMessage, OfferDecisionKind, ReviewDecision, ServerMessage};
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

fn post_job(budget: u64) -> ClientMessage {
    ClientMessage::PostJob {
        v: PROTOCOL_VERSION,
        title: "negotiated work".to_string(),
        description: None,
        budget,
        kind: None,
        payload: None,
    }
}

// ─── Scenario 2: negotiation with an upfront deposit ──────────────────

#[tokio::test]
async fn negotiated_award_pays_upfront_then_settles_at_the_agreed_price() {
    let exchange = Exchange::new(SynapseConfig::default());
    let mut rx = exchange.subscribe_effects();

    let requester = Agent::new();
    let worker = Agent::new();
    let (requester_session, requester_id) = authenticate(&exchange, &mut rx, &requester, "boss").await;
    let (worker_session, worker_id) = authenticate(&exchange, &mut rx, &worker, "worker").await;

    handle_client_message(&exchange, requester_session, post_job(100)).await;
    let job_id = job_id_from(&drain(&mut rx));

    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Bid {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            price: 80,
            eta_seconds: 3600,
            pitch: None,
            terms: Some(Terms {
                upfront_pct: 0.2,
                deadline_seconds: 3600,
                max_revisions: 1,
            }),
        },
    )
    .await;
    drain(&mut rx);

    let offered_terms = Terms {
        upfront_pct: 0.2,
        deadline_seconds: 8,
        max_revisions: 1,
    };
    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::CounterOffer {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
            price: 70,
            terms: offered_terms,
        },
    )
    .await;
    let effects = drain(&mut rx);
    assert!(effects
        .iter()
        .any(|e| matches!(&e.message, ServerMessage::CounterMade { from_role: Role::Boss, round: 1, .. })));

    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::OfferDecision {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            decision: OfferDecisionKind::Accept,
        },
    )
    .await;
    drain(&mut rx);

    let requester_agent_id = synapse_core::AgentId::from_raw(requester_id.clone());
    let worker_agent_id = synapse_core::AgentId::from_raw(worker_id.clone());
    let snapshot = exchange.observer_snapshot().await;
    let requester_view = snapshot.agents.iter().find(|a| a.agent_id == requester_agent_id.as_str()).unwrap();
    let worker_view = snapshot.agents.iter().find(|a| a.agent_id == worker_agent_id.as_str()).unwrap();
    assert_eq!(requester_view.credits, 986);
    assert_eq!(requester_view.locked, 56);
    assert_eq!(worker_view.credits, 1014);

    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Submit {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
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
            job_id: job_id.clone(),
            decision: ReviewDecision::Accept,
            notes: None,
        },
    )
    .await;
    let effects = drain(&mut rx);
    assert!(effects.iter().any(|e| matches!(&e.message, ServerMessage::JobCompleted { paid: 70, .. })));

    let snapshot = exchange.observer_snapshot().await;
    let requester_view = snapshot.agents.iter().find(|a| a.agent_id == requester_agent_id.as_str()).unwrap();
    let worker_view = snapshot.agents.iter().find(|a| a.agent_id == worker_agent_id.as_str()).unwrap();
    assert_eq!(requester_view.credits, 930);
    assert_eq!(requester_view.locked, 0);
    assert_eq!(worker_view.credits, 1070);
    assert_eq!(worker_view.locked, 0);
}

// ─── Scenario 5: negotiation rounds close at the configured cap ──────

#[tokio::test]
async fn negotiation_closes_with_max_rounds_once_the_cap_is_exceeded() {
    let mut config = SynapseConfig::default();
    config.negotiation_max_rounds = 2;
    let exchange = Exchange::new(config);
    let mut rx = exchange.subscribe_effects();

    let requester = Agent::new();
    let worker = Agent::new();
    let (requester_session, _) = authenticate(&exchange, &mut rx, &requester, "boss").await;
    let (worker_session, worker_id) = authenticate(&exchange, &mut rx, &worker, "worker").await;

    handle_client_message(&exchange, requester_session, post_job(100)).await;
    let job_id = job_id_from(&drain(&mut rx));

    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::Bid {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            price: 80,
            eta_seconds: 60,
            pitch: None,
            terms: None,
        },
    )
    .await;
    drain(&mut rx);

    let terms = Terms {
        upfront_pct: 0.0,
        deadline_seconds: 60,
        max_revisions: 1,
    };

    // Round 1: requester opens.
    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::CounterOffer {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
            price: 75,
            terms,
        },
    )
    .await;
    let effects = drain(&mut rx);
    assert!(effects.iter().any(|e| matches!(&e.message, ServerMessage::CounterMade { round: 1, .. })));

    // Round 2: worker counters back.
    handle_client_message(
        &exchange,
        worker_session,
        ClientMessage::WorkerCounter {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            price: 78,
            terms,
        },
    )
    .await;
    let effects = drain(&mut rx);
    assert!(effects.iter().any(|e| matches!(&e.message, ServerMessage::CounterMade { round: 2, .. })));

    // Round 3 would exceed the cap: the negotiation closes instead.
    handle_client_message(
        &exchange,
        requester_session,
        ClientMessage::CounterOffer {
            v: PROTOCOL_VERSION,
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
            price: 76,
            terms,
        },
    )
    .await;
    let effects = drain(&mut rx);
    assert!(effects.iter().any(|e| matches!(
        &e.message,
        ServerMessage::NegotiationEnded { reason, round: 2, .. } if reason == "max_rounds"
    )));

    let snapshot = exchange.observer_snapshot().await;
    let job = snapshot.jobs.iter().find(|j| j.id == job_id).expect("job present");
    assert_eq!(job.status, synapse_core::JobStatus::Open);
}
