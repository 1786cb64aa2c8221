// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end scenario 6 (§8): identity stability across a disconnect and
//! reconnect under the same keypair.

use std::sync::Arc;

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use synapse_core::{SynapseConfig, PROTOCOL_VERSION};
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
) -> (SessionId, String, u64) {
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
            if let ServerMessage::Authed { agent_id, credits, .. } = effect.message {
                return (session_id, agent_id, credits);
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
async fn the_same_keypair_reconnects_to_the_same_stable_identity() {
    let exchange = Exchange::new(SynapseConfig::default());
    let mut rx = exchange.subscribe_effects();

    let requester = Agent::new();
    let (first_session, first_agent_id, first_credits) =
        authenticate(&exchange, &mut rx, &requester, "boss").await;
    assert_eq!(first_credits, 1000);

    handle_client_message(
        &exchange,
        first_session,
        ClientMessage::PostJob {
            v: PROTOCOL_VERSION,
            title: "before disconnect".to_string(),
            description: None,
            budget: 40,
            kind: None,
            payload: None,
        },
    )
    .await;
    let job_id = job_id_from(&drain(&mut rx));

    let agent_id = synapse_core::AgentId::from_raw(first_agent_id.clone());
    let ledger_before_disconnect = exchange.spendable(&agent_id).await;

    exchange.close_session(first_session).await;

    let (second_session, second_agent_id, _) = authenticate(&exchange, &mut rx, &requester, "boss").await;
    assert_eq!(second_agent_id, first_agent_id, "reconnecting under the same key must resolve to the same agent id");
    assert_ne!(second_session, first_session, "a reconnect opens a fresh session");

    let ledger_after_reconnect = exchange.spendable(&agent_id).await;
    assert_eq!(
        ledger_before_disconnect, ledger_after_reconnect,
        "the ledger left by the first session must carry over unchanged"
    );

    let snapshot = exchange.observer_snapshot().await;
    let job = snapshot.jobs.iter().find(|j| j.id == job_id).expect("job posted before the disconnect survives it");
    assert_eq!(job.requester_id.as_str(), first_agent_id);

    handle_client_message(
        &exchange,
        second_session,
        ClientMessage::PostJob {
            v: PROTOCOL_VERSION,
            title: "after reconnect".to_string(),
            description: None,
            budget: 10,
            kind: None,
            payload: None,
        },
    )
    .await;
    let effects = drain(&mut rx);
    assert!(effects.iter().any(|e| matches!(&e.message, ServerMessage::JobPosted { job, .. } if job.requester_id.as_str() == first_agent_id)));
}
