// SPDX-License-Identifier: MIT OR Apache-2.0
//! Protocol version negotiation (§4.1, §4.2).

use synapse_core::PROTOCOL_VERSION;
use synapse_error::{ErrorCode, SynapseError};

/// Check that a client-declared protocol version is one this server speaks.
///
/// The protocol has no version negotiation beyond exact match: there is
/// exactly one supported version, and a mismatch is a closed-schema
/// rejection, not a downgrade.
///
/// # Errors
///
/// Returns [`ErrorCode::InvalidMessage`] if `v` does not equal
/// [`PROTOCOL_VERSION`].
pub fn check_version(v: u32) -> Result<(), SynapseError> {
    if v == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(SynapseError::new(ErrorCode::InvalidMessage)
            .with_context("expected_version", PROTOCOL_VERSION)
            .with_context("got_version", v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_current_version() {
        assert!(check_version(PROTOCOL_VERSION).is_ok());
    }

    #[test]
    fn rejects_mismatched_version() {
        let err = check_version(PROTOCOL_VERSION + 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidMessage);
    }
}
