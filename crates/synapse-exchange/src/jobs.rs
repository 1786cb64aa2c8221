// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job/bid/negotiation/review state machine (§4.3, §4.4, §4.6).
//!
//! Every function here is a pure transition over `&mut ExchangeState`: it
//! reads and mutates the entity graph and returns the [`HandlerOutcome`]
//! describing what must happen once the lock is released. None of them
//! touch a socket, a timer, or a persistence store directly — that
//! decoupling is what lets the award step be reused identically from the
//! client `award` message, from an accepted negotiation, and from the
//! System Control API.

use std::sync::Arc;

use serde_json::json;
use synapse_core::job::{Negotiation, NegotiationEntry};
use synapse_core::{
    AgentId, Bid, Job, JobStatus, LedgerAccount, NegotiationStatus, Role, SynapseConfig, Terms,
};
use synapse_error::{ErrorCode, SynapseError};
use synapse_protocol::{OfferDecisionKind, ReviewDecision, ServerMessage};

use crate::effect::Effect;
use crate::evaluator::CodeEvaluator;
use crate::exchange::Exchange;
use crate::ledger_math;
use crate::state::{ExchangeState, HandlerOutcome, TimerAction};

fn find_worker_bid<'a>(state: &'a ExchangeState, job_id: &str, worker_id: &AgentId) -> Option<&'a Bid> {
    state
        .bids_by_job
        .get(job_id)?
        .iter()
        .rev()
        .find(|bid| &bid.bidder_id == worker_id)
}

/// Post a new job (§4.3 "post_job").
pub(crate) fn post_job(
    state: &mut ExchangeState,
    requester_id: AgentId,
    title: String,
    description: Option<String>,
    budget: u64,
    kind: Option<String>,
    payload: Option<serde_json::Value>,
) -> Result<HandlerOutcome, SynapseError> {
    Job::validate_new(&title, budget).map_err(|_| SynapseError::new(ErrorCode::InvalidMessage))?;
    let spendable = state
        .spendable(&requester_id)
        .ok_or_else(|| SynapseError::new(ErrorCode::NoLedgerAccount))?;
    if spendable < budget {
        return Err(SynapseError::new(ErrorCode::InsufficientCredits));
    }
    let job_payload = match payload {
        Some(value) => serde_json::from_value(value).map_err(|_| SynapseError::new(ErrorCode::InvalidMessage))?,
        None => Default::default(),
    };

    let job = Job {
        id: synapse_core::new_id("job"),
        title,
        description,
        budget,
        requester_id,
        created_at_ms: synapse_core::now_ms(),
        status: JobStatus::Open,
        worker_id: None,
        kind: kind.unwrap_or_else(|| "simple".to_string()),
        payload: job_payload,
        locked_budget: 0,
        locked_stake: 0,
        paid_upfront: 0,
        awarded_at_ms: None,
    };
    state.jobs.insert(job.id.clone(), job.clone());

    let mut outcome = HandlerOutcome::default();
    outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
    outcome.broadcast(ServerMessage::JobPosted {
        v: synapse_core::PROTOCOL_VERSION,
        job,
    });
    Ok(outcome)
}

/// Place a bid on an open job (§4.3 "bid").
pub(crate) fn bid(
    state: &mut ExchangeState,
    bidder_id: AgentId,
    job_id: String,
    price: u64,
    eta_seconds: u64,
    pitch: Option<String>,
    terms: Option<Terms>,
) -> Result<HandlerOutcome, SynapseError> {
    Bid::validate_new(price, eta_seconds).map_err(|_| SynapseError::new(ErrorCode::InvalidMessage))?;
    if let Some(t) = &terms {
        t.validate().map_err(|_| SynapseError::new(ErrorCode::InvalidMessage))?;
    }
    let job = state
        .jobs
        .get(&job_id)
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    if job.status != JobStatus::Open {
        return Err(SynapseError::new(ErrorCode::JobNotOpen));
    }
    if price > job.budget {
        return Err(SynapseError::new(ErrorCode::BidOverBudget));
    }

    let bidder_reputation = state.reputation.get(&bidder_id).copied().unwrap_or_default();
    let new_bid = Bid {
        id: synapse_core::new_id("bid"),
        job_id: job_id.clone(),
        bidder_id,
        price,
        eta_seconds,
        created_at_ms: synapse_core::now_ms(),
        pitch,
        terms,
        bidder_reputation,
    };
    state.bids_by_job.entry(job_id).or_default().push(new_bid.clone());

    let mut outcome = HandlerOutcome::default();
    outcome.persist.push(crate::state::PersistOp::Bid(new_bid.clone()));
    outcome.broadcast(ServerMessage::BidPosted {
        v: synapse_core::PROTOCOL_VERSION,
        bid: new_bid,
    });
    Ok(outcome)
}

/// Everything [`validate_award`] needs to hand [`apply_award`] without a
/// second pass over the ledger.
pub(crate) struct AwardPlan {
    price: u64,
    stake: u64,
    requester_account: LedgerAccount,
    worker_account: LedgerAccount,
}

/// Read-only award precondition checks (§4.3 "award", §4.4).
///
/// Kept separate from [`apply_award`] so a caller that composes award with
/// another mutation (accepting a negotiation) can validate *before*
/// mutating anything else, satisfying §7 tier 3's "no partial mutation may
/// escape a failed handler" rule.
pub(crate) fn validate_award(
    state: &ExchangeState,
    config: &SynapseConfig,
    job: &Job,
    requester_check: Option<&AgentId>,
    worker_id: &AgentId,
    agreed_price: Option<u64>,
) -> Result<AwardPlan, SynapseError> {
    if let Some(requester) = requester_check {
        if requester != &job.requester_id {
            return Err(SynapseError::new(ErrorCode::NotJobOwner));
        }
    }
    if job.status != JobStatus::Open {
        return Err(SynapseError::new(ErrorCode::JobNotOpen));
    }
    if find_worker_bid(state, &job.id, worker_id).is_none() {
        return Err(SynapseError::new(ErrorCode::WorkerHasNoBid));
    }
    let price = agreed_price.unwrap_or(job.budget);
    if price > job.budget {
        return Err(SynapseError::new(ErrorCode::AgreedPriceOverBudget));
    }
    let requester_account = state
        .ledger
        .get(&job.requester_id)
        .copied()
        .ok_or_else(|| SynapseError::new(ErrorCode::NoLedgerAccount))?;
    if requester_account.spendable() < price {
        return Err(SynapseError::new(ErrorCode::InsufficientCredits));
    }
    let worker_rep_score = state.reputation.get(worker_id).copied().unwrap_or_default().score();
    let stake = ledger_math::compute_stake(job.budget, worker_rep_score, config.worker_stake_pct);
    let worker_account = state
        .ledger
        .get(worker_id)
        .copied()
        .ok_or_else(|| SynapseError::new(ErrorCode::WorkerNoLedgerAccount))?;
    if stake > 0 && worker_account.spendable() < stake {
        return Err(SynapseError::new(ErrorCode::WorkerInsufficientStake));
    }
    Ok(AwardPlan {
        price,
        stake,
        requester_account,
        worker_account,
    })
}

/// Apply a validated award: lock escrow and stake, transition the job, pay
/// any agreed upfront share, and arm the deadline timer (§4.3, §4.4, §4.6).
pub(crate) fn apply_award(
    state: &mut ExchangeState,
    job: Job,
    worker_id: AgentId,
    plan: AwardPlan,
    agreed_terms: Option<Terms>,
) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();

    let mut requester_account = plan.requester_account;
    requester_account.locked += plan.price;
    state.ledger.insert(job.requester_id.clone(), requester_account);
    outcome.ledger_changed(&job.requester_id, requester_account);

    let mut worker_account = plan.worker_account;
    worker_account.locked += plan.stake;
    state.ledger.insert(worker_id.clone(), worker_account);
    outcome.ledger_changed(&worker_id, worker_account);

    let mut job = job;
    job.status = JobStatus::Awarded;
    job.worker_id = Some(worker_id.clone());
    job.locked_budget = plan.price;
    job.locked_stake = plan.stake;
    job.awarded_at_ms = Some(synapse_core::now_ms());
    if let Some(terms) = &agreed_terms {
        job.payload.accepted_terms = Some(terms.clone());
        job.payload.accepted_price = Some(plan.price);
    }
    state.jobs.insert(job.id.clone(), job.clone());

    let ev = state.push_evidence(
        job.id.clone(),
        "award",
        format!("awarded to {worker_id}"),
        json!({"workerId": worker_id.as_str(), "price": plan.price, "stake": plan.stake}),
    );
    outcome.evidence_appended(ev);

    if let Some(terms) = &agreed_terms {
        if terms.upfront_pct > 0.0 {
            let upfront = ledger_math::compute_upfront(plan.price, terms.upfront_pct);
            if upfront > 0 {
                let mut req_acc = state.ledger[&job.requester_id];
                req_acc.locked = req_acc.locked.saturating_sub(upfront);
                req_acc.credits = req_acc.credits.saturating_sub(upfront);
                state.ledger.insert(job.requester_id.clone(), req_acc);
                outcome.ledger_changed(&job.requester_id, req_acc);

                let mut worker_acc = state.ledger[&worker_id];
                worker_acc.credits += upfront;
                state.ledger.insert(worker_id.clone(), worker_acc);
                outcome.ledger_changed(&worker_id, worker_acc);

                job.paid_upfront = upfront;
                state.jobs.insert(job.id.clone(), job.clone());
                let ev = state.push_evidence(job.id.clone(), "upfront", format!("paid {upfront} upfront"), json!({"upfront": upfront}));
                outcome.evidence_appended(ev);
            }
        }
    }

    outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
    outcome.broadcast(ServerMessage::JobAwarded {
        v: synapse_core::PROTOCOL_VERSION,
        job_id: job.id.clone(),
        worker_id: worker_id.as_str().to_string(),
        budget_locked: plan.price,
    });
    outcome.timers.push(TimerAction::Arm {
        job_id: job.id,
        worker_id,
        seconds: job.timeout_seconds(),
    });
    outcome
}

/// Directly award an open job to a bidder (§4.3 "award").
pub(crate) fn award(
    state: &mut ExchangeState,
    config: &SynapseConfig,
    requester_id: AgentId,
    job_id: &str,
    worker_id: AgentId,
) -> Result<HandlerOutcome, SynapseError> {
    let job = state
        .jobs
        .get(job_id)
        .cloned()
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    let plan = validate_award(state, config, &job, Some(&requester_id), &worker_id, None)?;
    Ok(apply_award(state, job, worker_id, plan, None))
}

/// Requester opens or continues a negotiation (§4.3 "counter_offer").
pub(crate) fn counter_offer(
    state: &mut ExchangeState,
    config: &SynapseConfig,
    requester_id: AgentId,
    job_id: &str,
    worker_id: AgentId,
    price: u64,
    terms: Terms,
) -> Result<HandlerOutcome, SynapseError> {
    terms.validate().map_err(|_| SynapseError::new(ErrorCode::InvalidMessage))?;
    let job = state
        .jobs
        .get(job_id)
        .cloned()
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    if job.requester_id != requester_id {
        return Err(SynapseError::new(ErrorCode::BadRequester));
    }
    if job.status != JobStatus::Open {
        return Err(SynapseError::new(ErrorCode::JobNotOpen));
    }
    if price > job.budget {
        return Err(SynapseError::new(ErrorCode::OfferOverBudget));
    }
    let existing_bid = find_worker_bid(state, job_id, &worker_id)
        .cloned()
        .ok_or_else(|| SynapseError::new(ErrorCode::WorkerHasNoBid))?;

    let existing = job.payload.negotiation.clone();
    if let Some(neg) = &existing {
        if neg.status == NegotiationStatus::Pending && neg.worker_id != worker_id {
            return Err(SynapseError::new(ErrorCode::NegotiationInProgress));
        }
    }
    let continuing = matches!(&existing, Some(neg) if neg.status == NegotiationStatus::Pending && neg.worker_id == worker_id);
    let round = if continuing { existing.as_ref().unwrap().round + 1 } else { 1 };

    let mut outcome = HandlerOutcome::default();
    let mut job = job;

    if round > config.negotiation_max_rounds {
        let mut neg = existing.expect("continuing implies an existing negotiation");
        neg.status = NegotiationStatus::MaxRounds;
        let closed_round = neg.round;
        job.payload.negotiation = Some(neg);
        state.jobs.insert(job.id.clone(), job.clone());
        outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
        let ev = state.push_evidence(job.id.clone(), "negotiation_end", "max rounds exceeded", json!({"round": closed_round}));
        outcome.evidence_appended(ev);
        outcome.broadcast(ServerMessage::NegotiationEnded {
            v: synapse_core::PROTOCOL_VERSION,
            job_id: job.id,
            reason: "max_rounds".to_string(),
            round: closed_round,
        });
        return Ok(outcome);
    }

    let history = if continuing {
        existing.as_ref().expect("continuing implies an existing negotiation").history.clone()
    } else {
        Vec::new()
    };
    let mut history = history;
    history.push(NegotiationEntry {
        round,
        from_role: Role::Boss,
        price,
        terms: terms.clone(),
        notes: None,
        at_ms: synapse_core::now_ms(),
    });

    job.payload.negotiation = Some(Negotiation {
        worker_id: worker_id.clone(),
        bid_id: existing_bid.id,
        bid_price: existing_bid.price,
        price,
        terms: terms.clone(),
        status: NegotiationStatus::Pending,
        round,
        history,
    });
    state.jobs.insert(job.id.clone(), job.clone());
    outcome.persist.push(crate::state::PersistOp::Job(job.clone()));

    let ev = state.push_evidence(job.id.clone(), "offer", format!("requester offered {price}"), json!({"price": price, "round": round}));
    outcome.evidence_appended(ev);

    outcome.broadcast(ServerMessage::CounterMade {
        v: synapse_core::PROTOCOL_VERSION,
        job_id: job.id.clone(),
        from_role: Role::Boss,
        price,
        terms: terms.clone(),
        round,
    });
    if round == 1 {
        outcome.effects.push(Effect::to_agent(
            worker_id,
            ServerMessage::OfferMade {
                v: synapse_core::PROTOCOL_VERSION,
                job_id: job.id,
                price,
                terms,
                round,
            },
        ));
    }
    Ok(outcome)
}

/// Worker counters the requester's offer (§4.3 "worker_counter").
pub(crate) fn worker_counter(
    state: &mut ExchangeState,
    config: &SynapseConfig,
    worker_id: AgentId,
    job_id: &str,
    price: u64,
    terms: Terms,
) -> Result<HandlerOutcome, SynapseError> {
    terms.validate().map_err(|_| SynapseError::new(ErrorCode::InvalidMessage))?;
    let mut job = state
        .jobs
        .get(job_id)
        .cloned()
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    if job.status != JobStatus::Open {
        return Err(SynapseError::new(ErrorCode::JobNotOpen));
    }
    if price > job.budget {
        return Err(SynapseError::new(ErrorCode::CounterOverBudget));
    }
    let mut neg = job
        .payload
        .negotiation
        .clone()
        .ok_or_else(|| SynapseError::new(ErrorCode::NoActiveOffer))?;
    if neg.worker_id != worker_id {
        return Err(SynapseError::new(ErrorCode::NotOfferTarget));
    }
    if neg.status != NegotiationStatus::Pending {
        return Err(SynapseError::new(ErrorCode::NegotiationNotPending));
    }

    let round = neg.round + 1;
    let mut outcome = HandlerOutcome::default();

    if round > config.negotiation_max_rounds {
        neg.status = NegotiationStatus::MaxRounds;
        let closed_round = neg.round;
        job.payload.negotiation = Some(neg);
        state.jobs.insert(job.id.clone(), job.clone());
        outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
        let ev = state.push_evidence(job.id.clone(), "negotiation_end", "max rounds exceeded", json!({"round": closed_round}));
        outcome.evidence_appended(ev);
        outcome.broadcast(ServerMessage::NegotiationEnded {
            v: synapse_core::PROTOCOL_VERSION,
            job_id: job.id,
            reason: "max_rounds".to_string(),
            round: closed_round,
        });
        return Ok(outcome);
    }

    neg.round = round;
    neg.price = price;
    neg.terms = terms.clone();
    neg.history.push(NegotiationEntry {
        round,
        from_role: Role::Worker,
        price,
        terms: terms.clone(),
        notes: None,
        at_ms: synapse_core::now_ms(),
    });
    job.payload.negotiation = Some(neg);
    state.jobs.insert(job.id.clone(), job.clone());
    outcome.persist.push(crate::state::PersistOp::Job(job.clone()));

    let ev = state.push_evidence(job.id.clone(), "counter", format!("worker countered {price}"), json!({"price": price, "round": round}));
    outcome.evidence_appended(ev);
    outcome.broadcast(ServerMessage::CounterMade {
        v: synapse_core::PROTOCOL_VERSION,
        job_id: job.id,
        from_role: Role::Worker,
        price,
        terms,
        round,
    });
    Ok(outcome)
}

/// Worker accepts or rejects the active offer (§4.3 "offer_decision").
///
/// Acceptance composes with [`validate_award`]/[`apply_award`] directly:
/// the award preconditions are checked *before* the negotiation status is
/// touched, so an award-time failure (insufficient credits or stake)
/// leaves the negotiation untouched and pending, reported to the accepting
/// worker only.
pub(crate) fn offer_decision(
    state: &mut ExchangeState,
    config: &SynapseConfig,
    worker_id: AgentId,
    job_id: &str,
    decision: OfferDecisionKind,
) -> Result<HandlerOutcome, SynapseError> {
    let job = state
        .jobs
        .get(job_id)
        .cloned()
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    let mut neg = job
        .payload
        .negotiation
        .clone()
        .ok_or_else(|| SynapseError::new(ErrorCode::NoActiveOffer))?;
    if neg.worker_id != worker_id {
        return Err(SynapseError::new(ErrorCode::NotOfferTarget));
    }
    if neg.status != NegotiationStatus::Pending {
        return Err(SynapseError::new(ErrorCode::NegotiationNotPending));
    }

    match decision {
        OfferDecisionKind::Reject => {
            neg.status = NegotiationStatus::Reject;
            let closed_round = neg.round;
            let mut job = job;
            job.payload.negotiation = Some(neg);
            state.jobs.insert(job.id.clone(), job.clone());

            let mut outcome = HandlerOutcome::default();
            outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
            let ev = state.push_evidence(job.id.clone(), "offer_response", "worker rejected offer", json!({"accepted": false}));
            outcome.evidence_appended(ev);
            outcome.broadcast(ServerMessage::OfferResponse {
                v: synapse_core::PROTOCOL_VERSION,
                job_id: job.id.clone(),
                accepted: false,
            });
            let ev = state.push_evidence(job.id.clone(), "negotiation_end", "worker rejected", json!({"round": closed_round}));
            outcome.evidence_appended(ev);
            outcome.broadcast(ServerMessage::NegotiationEnded {
                v: synapse_core::PROTOCOL_VERSION,
                job_id: job.id,
                reason: "rejected".to_string(),
                round: closed_round,
            });
            Ok(outcome)
        }
        OfferDecisionKind::Accept => {
            let plan = validate_award(state, config, &job, None, &worker_id, Some(neg.price))?;

            neg.status = NegotiationStatus::Accept;
            let accepted_terms = neg.terms.clone();
            let mut job = job;
            job.payload.negotiation = Some(neg);
            state.jobs.insert(job.id.clone(), job.clone());

            let mut outcome = HandlerOutcome::default();
            let ev = state.push_evidence(job.id.clone(), "offer_response", "worker accepted offer", json!({"accepted": true}));
            outcome.evidence_appended(ev);
            outcome.broadcast(ServerMessage::OfferResponse {
                v: synapse_core::PROTOCOL_VERSION,
                job_id: job.id.clone(),
                accepted: true,
            });

            let award_outcome = apply_award(state, job, worker_id, plan, Some(accepted_terms));
            outcome.merge(award_outcome);
            Ok(outcome)
        }
    }
}

/// Assigned worker submits a result (§4.3 "submit").
pub(crate) fn submit(
    state: &mut ExchangeState,
    evaluator: &dyn CodeEvaluator,
    worker_id: AgentId,
    job_id: &str,
    result: String,
) -> Result<HandlerOutcome, SynapseError> {
    let mut job = state
        .jobs
        .get(job_id)
        .cloned()
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    if job.status != JobStatus::Awarded {
        return Err(SynapseError::new(ErrorCode::JobNotAwarded));
    }
    match &job.worker_id {
        Some(assigned) if *assigned == worker_id => {}
        Some(_) => return Err(SynapseError::new(ErrorCode::NotAssignedWorker)),
        None => return Err(SynapseError::new(ErrorCode::JobMissingWorker)),
    }

    let mut outcome = HandlerOutcome::default();
    outcome.timers.push(TimerAction::Disarm { job_id: job.id.clone() });

    let bytes = result.len();
    let preview: String = result.chars().take(120).collect();
    job.status = JobStatus::InReview;

    if job.kind == "coding" {
        let verdict = evaluator.evaluate(&job, &result);
        let payload = serde_json::to_value(&verdict).unwrap_or(serde_json::Value::Null);
        let detail = if verdict.ok {
            "evaluator passed".to_string()
        } else {
            verdict.reason.clone().unwrap_or_default()
        };
        job.payload.auto_verify = Some(verdict);
        let ev = state.push_evidence(job.id.clone(), "auto_verify", detail, payload);
        outcome.evidence_appended(ev);
    }

    job.payload.last_submission = Some(synapse_core::job::LastSubmission {
        at_ms: synapse_core::now_ms(),
        by: worker_id.clone(),
        result,
    });

    state.jobs.insert(job.id.clone(), job.clone());
    outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
    let ev = state.push_evidence(job.id.clone(), "submit", "worker submitted result", json!({"bytes": bytes}));
    outcome.evidence_appended(ev);
    outcome.broadcast(ServerMessage::JobSubmitted {
        v: synapse_core::PROTOCOL_VERSION,
        job_id: job.id,
        worker_id: worker_id.as_str().to_string(),
        bytes,
        preview,
    });
    Ok(outcome)
}

/// Requester reviews an in-review job (§4.3 "review").
pub(crate) fn review(
    state: &mut ExchangeState,
    config: &SynapseConfig,
    requester_id: AgentId,
    job_id: &str,
    decision: ReviewDecision,
    notes: Option<String>,
) -> Result<HandlerOutcome, SynapseError> {
    let job = state
        .jobs
        .get(job_id)
        .cloned()
        .ok_or_else(|| SynapseError::new(ErrorCode::JobNotFound))?;
    if job.requester_id != requester_id {
        return Err(SynapseError::new(ErrorCode::NotJobOwner));
    }
    if job.status != JobStatus::InReview {
        return Err(SynapseError::new(ErrorCode::JobNotInReview));
    }
    if job.worker_id.is_none() {
        return Err(SynapseError::new(ErrorCode::JobMissingWorker));
    }

    let mut outcome = HandlerOutcome::default();
    let ev = state.push_evidence(job.id.clone(), "review", format!("{decision:?}"), json!({"decision": decision, "notes": notes}));
    outcome.evidence_appended(ev);
    outcome.broadcast(ServerMessage::JobReviewed {
        v: synapse_core::PROTOCOL_VERSION,
        job_id: job.id.clone(),
        decision,
    });

    match decision {
        ReviewDecision::Accept => {
            outcome.merge(apply_settlement_success(state, job));
        }
        ReviewDecision::Reject => {
            let job_id = job.id.clone();
            outcome.merge(apply_settlement_failure(state, config, job, "rejected".to_string()));
            outcome.merge(apply_reopen(state, job_id));
        }
        ReviewDecision::Changes => {
            let mut job = job;
            job.status = JobStatus::Awarded;
            state.jobs.insert(job.id.clone(), job.clone());
            outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
            let ev = state.push_evidence(job.id.clone(), "changes", "requester asked for changes", serde_json::Value::Null);
            outcome.evidence_appended(ev);
            outcome.timers.push(TimerAction::Arm {
                job_id: job.id.clone(),
                worker_id: job.worker_id.clone().expect("in-review job has an assigned worker"),
                seconds: job.timeout_seconds(),
            });
            outcome.broadcast(ServerMessage::JobUpdated {
                v: synapse_core::PROTOCOL_VERSION,
                job,
            });
        }
    }
    Ok(outcome)
}

/// Settle a job successfully: pay the worker the remainder, release the
/// requester's lock, release the worker's stake, and bump reputation
/// (§4.4 "Settlement-success").
pub(crate) fn apply_settlement_success(state: &mut ExchangeState, job: Job) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let worker_id = job.worker_id.clone().expect("settlement requires an assigned worker");
    let remainder = job.locked_budget.saturating_sub(job.paid_upfront);

    let mut requester_account = state
        .ledger
        .get(&job.requester_id)
        .copied()
        .expect("awarded job implies a requester ledger account");
    requester_account.locked = requester_account.locked.saturating_sub(remainder);
    requester_account.credits = requester_account.credits.saturating_sub(remainder);
    state.ledger.insert(job.requester_id.clone(), requester_account);
    outcome.ledger_changed(&job.requester_id, requester_account);

    let mut worker_account = state
        .ledger
        .get(&worker_id)
        .copied()
        .expect("awarded job implies a worker ledger account");
    worker_account.credits += remainder;
    worker_account.locked = worker_account.locked.saturating_sub(job.locked_stake);
    state.ledger.insert(worker_id.clone(), worker_account);
    outcome.ledger_changed(&worker_id, worker_account);

    let mut rep = state.reputation.get(&worker_id).copied().unwrap_or_default();
    rep.completed += 1;
    state.reputation.insert(worker_id.clone(), rep);
    outcome.reputation_changed(&worker_id, rep);

    let mut job = job;
    job.status = JobStatus::Completed;
    state.jobs.insert(job.id.clone(), job.clone());
    outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
    let ev = state.push_evidence(job.id.clone(), "settlement", "job completed", json!({"paid": job.locked_budget}));
    outcome.evidence_appended(ev);
    outcome.broadcast(ServerMessage::JobCompleted {
        v: synapse_core::PROTOCOL_VERSION,
        job_id: job.id,
        paid: job.locked_budget,
    });
    outcome
}

/// Settle a job unsuccessfully: refund the requester's remaining lock,
/// slash the worker's stake to the requester, and bump the failed counter
/// (§4.4 "Settlement-failure"). Does not transition the job back to
/// `open` — pair with [`apply_reopen`] for that.
pub(crate) fn apply_settlement_failure(
    state: &mut ExchangeState,
    config: &SynapseConfig,
    job: Job,
    reason: String,
) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let worker_id = job.worker_id.clone().expect("settlement requires an assigned worker");
    let refund = job.locked_budget.saturating_sub(job.paid_upfront);

    let mut requester_account = state
        .ledger
        .get(&job.requester_id)
        .copied()
        .expect("awarded job implies a requester ledger account");
    requester_account.locked = requester_account.locked.saturating_sub(refund);
    state.ledger.insert(job.requester_id.clone(), requester_account);
    outcome.ledger_changed(&job.requester_id, requester_account);

    let stake = job.locked_stake;
    let mut worker_account = state
        .ledger
        .get(&worker_id)
        .copied()
        .expect("awarded job implies a worker ledger account");
    worker_account.locked = worker_account.locked.saturating_sub(stake);
    if stake > 0 {
        let slash = ledger_math::compute_slash(stake, config.worker_slash_pct);
        worker_account.credits = worker_account.credits.saturating_sub(slash);
        state.ledger.insert(worker_id.clone(), worker_account);
        outcome.ledger_changed(&worker_id, worker_account);

        let mut requester_account = state.ledger[&job.requester_id];
        requester_account.credits += slash;
        state.ledger.insert(job.requester_id.clone(), requester_account);
        outcome.ledger_changed(&job.requester_id, requester_account);
    } else {
        state.ledger.insert(worker_id.clone(), worker_account);
        outcome.ledger_changed(&worker_id, worker_account);
    }

    let mut rep = state.reputation.get(&worker_id).copied().unwrap_or_default();
    rep.failed += 1;
    state.reputation.insert(worker_id.clone(), rep);
    outcome.reputation_changed(&worker_id, rep);

    let mut job = job;
    job.status = JobStatus::Failed;
    state.jobs.insert(job.id.clone(), job.clone());
    outcome.persist.push(crate::state::PersistOp::Job(job.clone()));
    let ev = state.push_evidence(job.id.clone(), "settlement", format!("job failed: {reason}"), json!({"reason": reason}));
    outcome.evidence_appended(ev);
    outcome.broadcast(ServerMessage::JobFailed {
        v: synapse_core::PROTOCOL_VERSION,
        job_id: job.id,
        reason,
    });
    outcome
}

/// Reopen a failed job for bidding again (§4.3, §4.6 "systemReopenJob").
///
/// Only clears the job's own award fields and flips it back to `open`. Any
/// outstanding requester lock must already have been released by a
/// preceding [`apply_settlement_failure`] call (`refund == lockedBudget -
/// paidUpfront` always drains that job's contribution to zero) —
/// re-releasing here would double-count against the requester's other
/// in-flight locks, since the job's own `locked_budget`/`locked_stake`
/// fields aren't zeroed until after this read. Callers (`system::reopen_job`,
/// the `fail_job`/`timeout_job` chain) are responsible for only invoking
/// this once settlement has happened; `system::reopen_job` enforces that
/// with a status guard.
pub(crate) fn apply_reopen(state: &mut ExchangeState, job_id: String) -> HandlerOutcome {
    let mut outcome = HandlerOutcome::default();
    let mut job = state.jobs.get(&job_id).cloned().expect("reopen requires an existing job");
    job.worker_id = None;
    job.locked_budget = 0;
    job.locked_stake = 0;
    job.awarded_at_ms = None;
    job.status = JobStatus::Open;
    state.jobs.insert(job.id.clone(), job.clone());
    outcome.persist.push(crate::state::PersistOp::Job(job.clone()));

    let payload = serde_json::to_value(&job).unwrap_or(serde_json::Value::Null);
    outcome.tape.push(synapse_core::TapeEvent::Broadcast {
        message_type: "job_reopened".to_string(),
        payload: payload.clone(),
    });
    outcome.persist.push(crate::state::PersistOp::Event(synapse_core::DurableEvent {
        kind: "job_reopened".to_string(),
        payload,
    }));
    outcome.effects.push(Effect::broadcast(ServerMessage::JobUpdated {
        v: synapse_core::PROTOCOL_VERSION,
        job,
    }));
    outcome.timers.push(TimerAction::Disarm { job_id });
    outcome
}

/// Deadline fire handler (§4.6): re-checks the job is still `awarded` to
/// the same worker the timer was armed for — a submission, review, or a
/// fresh award to a different worker following an earlier reopen may have
/// raced the timer (§5 ordering guarantee 5) — then runs settlement-failure
/// with reason `"timeout"` followed by reopen.
pub(crate) async fn timeout_job(exchange: &Arc<Exchange>, job_id: &str, intended_worker: &AgentId) -> Result<(), SynapseError> {
    let outcome = {
        let mut state = exchange.state.lock().await;
        let job = match state.jobs.get(job_id) {
            Some(job) => job.clone(),
            None => return Ok(()),
        };
        if job.status != JobStatus::Awarded || job.worker_id.as_ref() != Some(intended_worker) {
            return Ok(());
        }
        let job_id = job.id.clone();
        let mut outcome = apply_settlement_failure(&mut state, &exchange.config, job, "timeout".to_string());
        outcome.merge(apply_reopen(&mut state, job_id));
        outcome
    };
    exchange.apply_outcome(outcome).await;
    Ok(())
}
