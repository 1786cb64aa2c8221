// SPDX-License-Identifier: MIT OR Apache-2.0
//! The single entry point for inbound client messages (§4.1, §4.2, §5).
//!
//! `handle_client_message` owns the cross-cutting rules that apply
//! uniformly to every message type: protocol-version checking, the
//! not-authenticated gate, and converting a [`SynapseError`] into the
//! `error` effect addressed back to the offending session. The actual
//! state transition for each variant is one call into [`crate::jobs`].

use std::sync::Arc;

use synapse_core::AgentId;
use synapse_error::{ErrorCode, SynapseError};
use synapse_protocol::{check_version, ClientMessage, ServerMessage};
use tracing::warn;

use crate::effect::Effect;
use crate::exchange::Exchange;
use crate::jobs;
use crate::session::SessionId;
use crate::state::HandlerOutcome;

/// Handle one inbound client message end to end.
///
/// Every outcome — success or failure — is delivered through the
/// exchange's effect bus; this function has no return value because the
/// transport layer never waits on it directly (it owns its own receiver
/// loop over [`Exchange::subscribe_effects`]).
pub async fn handle_client_message(exchange: &Arc<Exchange>, session_id: SessionId, message: ClientMessage) {
    if let Err(err) = process(exchange, session_id, message).await {
        warn!(code = %err.code, "client message rejected");
        exchange.publish_effect(Effect::to_session(
            session_id,
            ServerMessage::Error {
                v: synapse_core::PROTOCOL_VERSION,
                message: err.wire_message().to_string(),
            },
        ));
    }
}

async fn process(exchange: &Arc<Exchange>, session_id: SessionId, message: ClientMessage) -> Result<(), SynapseError> {
    check_version(message.version())?;

    if let ClientMessage::Auth {
        agent_name,
        public_key,
        nonce,
        signature,
        ..
    } = &message
    {
        return authenticate(exchange, session_id, agent_name, public_key, nonce, signature).await;
    }

    let agent_id = authed_agent(exchange, session_id).await?;
    let outcome = {
        let mut state = exchange.state.lock().await;
        match message {
            ClientMessage::Auth { .. } => unreachable!("handled above"),
            ClientMessage::PostJob {
                title,
                description,
                budget,
                kind,
                payload,
                ..
            } => jobs::post_job(&mut state, agent_id, title, description, budget, kind, payload)?,
            ClientMessage::Bid {
                job_id,
                price,
                eta_seconds,
                pitch,
                terms,
                ..
            } => jobs::bid(&mut state, agent_id, job_id, price, eta_seconds, pitch, terms)?,
            ClientMessage::Award { job_id, worker_id, .. } => {
                jobs::award(&mut state, &exchange.config, agent_id, &job_id, AgentId::from_raw(worker_id))?
            }
            ClientMessage::CounterOffer {
                job_id,
                worker_id,
                price,
                terms,
                ..
            } => jobs::counter_offer(
                &mut state,
                &exchange.config,
                agent_id,
                &job_id,
                AgentId::from_raw(worker_id),
                price,
                terms,
            )?,
            ClientMessage::WorkerCounter { job_id, price, terms, .. } => {
                jobs::worker_counter(&mut state, &exchange.config, agent_id, &job_id, price, terms)?
            }
            ClientMessage::OfferDecision { job_id, decision, .. } => {
                jobs::offer_decision(&mut state, &exchange.config, agent_id, &job_id, decision)?
            }
            ClientMessage::Submit { job_id, result, .. } => {
                jobs::submit(&mut state, exchange.evaluator.as_ref(), agent_id, &job_id, result)?
            }
            ClientMessage::Review {
                job_id, decision, notes, ..
            } => jobs::review(&mut state, &exchange.config, agent_id, &job_id, decision, notes)?,
        }
    };
    exchange.apply_outcome(outcome).await;
    Ok(())
}

async fn authed_agent(exchange: &Arc<Exchange>, session_id: SessionId) -> Result<AgentId, SynapseError> {
    let state = exchange.state.lock().await;
    state
        .sessions
        .get(&session_id)
        .and_then(|session| session.agent_id.clone())
        .ok_or_else(|| SynapseError::new(ErrorCode::NotAuthenticated))
}

/// Undo the speculative session↔agent binding made in [`authenticate`]
/// before its durable ledger/reputation writes land. Mirrors
/// [`Exchange::close_session`]'s bookkeeping: clears the session's
/// `agent_id` and drops it from `agent_sessions`, leaving an empty
/// `agent_sessions` entry behind rather than removing it, same as a normal
/// disconnect would.
async fn unbind_session(exchange: &Arc<Exchange>, session_id: SessionId, agent_id: &AgentId) {
    let mut state = exchange.state.lock().await;
    if let Some(session) = state.sessions.get_mut(&session_id) {
        session.agent_id = None;
    }
    if let Some(set) = state.agent_sessions.get_mut(agent_id) {
        set.remove(&session_id);
    }
}

/// Complete the auth handshake (§4.1).
///
/// Unlike every other path, the persistence write here is awaited inline
/// rather than fired in the background: a brand-new identity's ledger and
/// reputation rows must exist durably before the client is told it is
/// authenticated, so a crash between the two can never strand an agent
/// with in-memory-only credits (§7 tier 3) — if either write fails after
/// the in-memory binding was speculatively made, [`unbind_session`] tears
/// it back down before the error reaches the caller, so a session that
/// gets `db_error_auth` can never sneak past [`authed_agent`] on the
/// strength of a binding whose backing ledger/reputation rows don't
/// durably exist.
async fn authenticate(
    exchange: &Arc<Exchange>,
    session_id: SessionId,
    agent_name: &str,
    public_key: &str,
    nonce: &str,
    signature: &str,
) -> Result<(), SynapseError> {
    let challenge_nonce = {
        let state = exchange.state.lock().await;
        state
            .sessions
            .get(&session_id)
            .map(|session| session.nonce.clone())
            .ok_or_else(|| SynapseError::new(ErrorCode::NotAuthenticated))?
    };
    crate::session::verify_auth_reply(
        &challenge_nonce,
        synapse_core::PROTOCOL_VERSION,
        agent_name,
        public_key,
        nonce,
        signature,
    )?;

    let agent_id = AgentId::derive(public_key);

    if let Some(store) = exchange.persistence.clone() {
        store
            .upsert_agent(&agent_id)
            .await
            .map_err(|e| SynapseError::new(ErrorCode::DbErrorAuth).with_context("reason", e.to_string()))?;
    }

    let (created, credits) = {
        let mut state = exchange.state.lock().await;
        let created = state.ensure_account(&agent_id, exchange.config.starting_credits);
        state.sessions.entry(session_id).and_modify(|session| {
            session.agent_id = Some(agent_id.clone());
        });
        state
            .agent_sessions
            .entry(agent_id.clone())
            .or_default()
            .insert(session_id);
        (created, state.ledger[&agent_id].credits)
    };

    if let Some(store) = exchange.persistence.clone() {
        if created {
            let ledger = synapse_core::LedgerAccount::new(exchange.config.starting_credits);
            let reputation = synapse_core::Reputation::default();
            if let Err(e) = store.upsert_ledger(&agent_id, &ledger).await {
                unbind_session(exchange, session_id, &agent_id).await;
                return Err(SynapseError::new(ErrorCode::DbErrorAuth).with_context("reason", e.to_string()));
            }
            if let Err(e) = store.upsert_reputation(&agent_id, &reputation).await {
                unbind_session(exchange, session_id, &agent_id).await;
                return Err(SynapseError::new(ErrorCode::DbErrorAuth).with_context("reason", e.to_string()));
            }
        }
    }

    let mut outcome = HandlerOutcome::default();
    outcome.tape.push(synapse_core::TapeEvent::AgentAuthed {
        agent_id: agent_id.clone(),
    });
    if created {
        outcome.tape.push(synapse_core::TapeEvent::LedgerUpdate {
            agent_id: agent_id.clone(),
            credits,
            locked: 0,
        });
        outcome.tape.push(synapse_core::TapeEvent::RepUpdate {
            agent_id: agent_id.clone(),
            completed: 0,
            failed: 0,
        });
    }
    outcome.effects.push(Effect::to_session(
        session_id,
        ServerMessage::Authed {
            v: synapse_core::PROTOCOL_VERSION,
            agent_id: agent_id.as_str().to_string(),
            credits,
        },
    ));
    exchange.apply_outcome(outcome).await;
    Ok(())
}
