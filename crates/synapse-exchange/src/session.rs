// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection-scoped session state and the Ed25519 auth handshake (§4.1).

use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use rand::RngCore;
use synapse_core::AgentId;
use synapse_error::{ErrorCode, SynapseError};
use synapse_protocol::auth_canonical_string;

/// Opaque per-connection handle. The exchange never interprets this beyond
/// identity and ordering; the transport layer mints and owns the mapping to
/// an actual socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// Per-connection handshake state (§3 "Session").
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Challenge nonce issued to this connection.
    pub nonce: String,
    /// Bound agent identity, set once auth succeeds.
    pub agent_id: Option<AgentId>,
}

impl SessionState {
    /// Start a fresh, unauthenticated session with a new challenge nonce.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nonce: generate_nonce(),
            agent_id: None,
        }
    }

    /// Whether this session has completed the auth handshake.
    #[must_use]
    pub fn is_authed(&self) -> bool {
        self.agent_id.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a cryptographically strong, base64-encoded nonce of at least 24
/// bytes (§4.1).
#[must_use]
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Verify an `auth` reply against a session's issued challenge (§4.1).
///
/// Checks, in order: the echoed nonce matches the challenge, the public key
/// decodes, and the detached Ed25519 signature verifies over the canonical
/// signing string built from `(proto_version, nonce, agent_name, public_key)`.
///
/// # Errors
///
/// Returns [`ErrorCode::BadNonce`], [`ErrorCode::BadAgentName`], or
/// [`ErrorCode::SignatureVerificationFailed`].
pub fn verify_auth_reply(
    challenge_nonce: &str,
    proto_version: u32,
    agent_name: &str,
    public_key_b64: &str,
    echoed_nonce: &str,
    signature_b64: &str,
) -> Result<(), SynapseError> {
    if agent_name.trim().is_empty() {
        return Err(SynapseError::new(ErrorCode::BadAgentName));
    }
    if echoed_nonce != challenge_nonce {
        return Err(SynapseError::new(ErrorCode::BadNonce));
    }

    let public_key_bytes = base64::engine::general_purpose::STANDARD
        .decode(public_key_b64)
        .map_err(|e| {
            SynapseError::new(ErrorCode::SignatureVerificationFailed)
                .with_context("reason", e.to_string())
        })?;
    let verifying_key = extract_ed25519_key(&public_key_bytes)?;

    let signature_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|e| {
            SynapseError::new(ErrorCode::SignatureVerificationFailed)
                .with_context("reason", e.to_string())
        })?;
    let signature_array: [u8; 64] = signature_bytes.as_slice().try_into().map_err(|_| {
        SynapseError::new(ErrorCode::SignatureVerificationFailed)
            .with_context("reason", "signature must be 64 bytes")
    })?;
    let signature = Signature::from_bytes(&signature_array);

    let canonical = auth_canonical_string(proto_version, challenge_nonce, agent_name, public_key_b64);
    verifying_key
        .verify_strict(canonical.as_bytes(), &signature)
        .map_err(|_| SynapseError::new(ErrorCode::SignatureVerificationFailed))
}

/// Extract a raw Ed25519 verifying key from either a bare 32-byte key or an
/// SPKI DER envelope (the last 32 bytes of the DER encoding are always the
/// raw key for Ed25519, per RFC 8410).
fn extract_ed25519_key(bytes: &[u8]) -> Result<VerifyingKey, SynapseError> {
    if bytes.len() < 32 {
        return Err(SynapseError::new(ErrorCode::SignatureVerificationFailed)
            .with_context("reason", "public key too short"));
    }
    let raw = &bytes[bytes.len() - 32..];
    let array: [u8; 32] = raw.try_into().expect("slice is exactly 32 bytes");
    VerifyingKey::from_bytes(&array).map_err(|_| {
        SynapseError::new(ErrorCode::SignatureVerificationFailed)
            .with_context("reason", "not a valid Ed25519 point")
    })
}
