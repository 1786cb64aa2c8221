// SPDX-License-Identifier: MIT OR Apache-2.0
//! Session auth, the job/bid/negotiation/review state machine, ledger and
//! reputation bookkeeping, and the deadline scheduler for the Synapse
//! exchange.
//!
//! [`Exchange`] is the single authoritative aggregate; everything else in
//! this crate is either a pure transition over its state ([`jobs`],
//! [`system`]) or the plumbing that carries a transition's outcome to the
//! outside world ([`effect`], [`tape`], [`state::PersistOp`]).

mod dispatch;
mod effect;
mod evaluator;
mod exchange;
pub mod jobs;
mod ledger_math;
pub mod session;
pub mod state;
pub mod system;
mod tape;

pub use dispatch::handle_client_message;
pub use effect::{Effect, Recipient};
pub use evaluator::{CodeEvaluator, KeywordEvaluator};
pub use exchange::Exchange;
pub use session::{SessionId, SessionState};
pub use state::{ExchangeState, HandlerOutcome, PersistOp, TimerAction};
pub use tape::TapeBus;
