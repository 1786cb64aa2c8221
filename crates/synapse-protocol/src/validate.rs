// SPDX-License-Identifier: MIT OR Apache-2.0
//! Field-level validation helpers that sit between the closed-schema
//! envelope types and the business logic in `synapse-exchange` (§4.1,
//! §4.2).

use synapse_error::{ErrorCode, SynapseError};

/// The fixed prefix of the Ed25519 canonical signing string (§4.1).
pub const AUTH_CANONICAL_PREFIX: &str = "SYNAPSE_AUTH_V1";

/// Build the canonical string an agent signs to complete the auth
/// handshake: `SYNAPSE_AUTH_V1|v=<proto>|nonce=<nonce>|agent=<name>|pub=<pub>`.
///
/// This is reconstructed independently by the server from the session's
/// own challenge state and the client's claimed identity, then verified
/// against the client-supplied signature — the client cannot substitute a
/// signature produced for a different nonce or name.
#[must_use]
pub fn auth_canonical_string(proto_version: u32, nonce: &str, agent_name: &str, public_key_b64: &str) -> String {
    format!("{AUTH_CANONICAL_PREFIX}|v={proto_version}|nonce={nonce}|agent={agent_name}|pub={public_key_b64}")
}

/// Validate a non-empty, trimmed agent name (§4.1).
///
/// # Errors
///
/// Returns [`ErrorCode::BadAgentName`] if `name` is empty or all
/// whitespace.
pub fn validate_agent_name(name: &str) -> Result<(), SynapseError> {
    if name.trim().is_empty() {
        Err(SynapseError::new(ErrorCode::BadAgentName))
    } else {
        Ok(())
    }
}

/// Validate that a echoed nonce matches the session's issued challenge
/// nonce (§4.1).
///
/// # Errors
///
/// Returns [`ErrorCode::BadNonce`] if the two strings differ.
pub fn validate_nonce(expected: &str, got: &str) -> Result<(), SynapseError> {
    if expected == got {
        Ok(())
    } else {
        Err(SynapseError::new(ErrorCode::BadNonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_has_expected_shape() {
        let s = auth_canonical_string(1, "abc", "alice", "pubkey==");
        assert_eq!(s, "SYNAPSE_AUTH_V1|v=1|nonce=abc|agent=alice|pub=pubkey==");
    }

    #[test]
    fn blank_agent_name_rejected() {
        assert!(validate_agent_name("   ").is_err());
        assert!(validate_agent_name("alice").is_ok());
    }

    #[test]
    fn nonce_mismatch_rejected() {
        assert!(validate_nonce("a", "b").is_err());
        assert!(validate_nonce("a", "a").is_ok());
    }
}
