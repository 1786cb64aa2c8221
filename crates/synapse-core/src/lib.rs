// SPDX-License-Identifier: MIT OR Apache-2.0
//! synapse-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable data model for the Synapse exchange.
//!
//! If you only take one dependency, take this one: every other crate in the
//! workspace builds its types on top of the entities defined here.

/// Configuration record built once at process startup.
pub mod config;
/// Append-only evidence and tape event types.
pub mod evidence;
/// Job, bid, terms, and negotiation entities.
pub mod job;
/// Per-agent credit and locked-budget accounting.
pub mod ledger;
/// Laplace-smoothed reputation counters.
pub mod reputation;

pub use config::SynapseConfig;
pub use evidence::{DurableEvent, EvidenceItem, TapeEvent};
pub use job::{Bid, Job, JobStatus, Negotiation, NegotiationEntry, NegotiationStatus, Role, Terms};
pub use ledger::LedgerAccount;
pub use reputation::Reputation;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Wire protocol version understood by this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default starting credit balance granted to a newly authenticated agent.
pub const DEFAULT_STARTING_CREDITS: u64 = 1000;

/// Default deadline, in seconds, applied when a job omits `timeoutSeconds`.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 900;

/// A stable, opaque agent identifier derived from the agent's public key.
///
/// # Examples
///
/// ```
/// use synapse_core::AgentId;
///
/// let id = AgentId::derive("ZmFrZS1wdWJsaWMta2V5");
/// assert!(id.as_str().starts_with("agent_"));
/// // Derivation is deterministic for a fixed public key.
/// assert_eq!(id, AgentId::derive("ZmFrZS1wdWJsaWMta2V5"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Derive the stable agent id for a base64-encoded SPKI DER public key.
    #[must_use]
    pub fn derive(public_key_der_b64: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(public_key_der_b64.as_bytes());
        let digest = hasher.finalize();
        Self(format!("agent_{}", hex_encode(&digest)))
    }

    /// Wrap an already-derived id string (used when reconstructing from storage).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The underlying string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// A unique, opaque entity identifier minted from a UUIDv4, prefixed by kind.
///
/// # Examples
///
/// ```
/// use synapse_core::new_id;
///
/// let id = new_id("job");
/// assert!(id.starts_with("job_"));
/// ```
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4())
}

/// Current wall-clock time in epoch milliseconds.
///
/// Centralized so callers never mix `SystemTime` and `chrono` conversions.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
