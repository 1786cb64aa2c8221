// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire envelope types and closed-schema validation for the Synapse
//! protocol (§4.1, §4.2, §6).
//!
//! This crate owns the shape of every message that crosses the network
//! boundary. It depends on `synapse-core` for the domain types embedded in
//! those messages and on `synapse-error` for the stable error taxonomy, but
//! knows nothing about how messages are dispatched or what they do to
//! exchange state — that lives in `synapse-exchange`.

#![warn(missing_docs)]

mod envelope;
mod validate;
mod version;

pub use envelope::{
    ClientMessage, ObserverAgent, ObserverMessage, ObserverSnapshot, OfferDecisionKind,
    ReviewDecision, ServerMessage,
};
pub use validate::{auth_canonical_string, validate_agent_name, validate_nonce, AUTH_CANONICAL_PREFIX};
pub use version::check_version;
