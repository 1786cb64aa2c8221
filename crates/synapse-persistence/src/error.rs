// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistence-layer error type (§4.9, §7 tier 2/3).

use thiserror::Error;

/// A failure from a [`crate::PersistenceStore`] operation.
///
/// Callers never forward this to the wire directly: on the auth path it
/// becomes `db_error_auth` and rolls back the handshake; on every other
/// path it is logged as a `db_error_<op>` tape event and in-memory state
/// remains authoritative (§7).
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The named operation failed against the backing store.
    #[error("persistence operation {op} failed: {detail}")]
    OperationFailed {
        /// Operation name, used to build the `db_error_<op>` tape kind.
        op: &'static str,
        /// Human-readable cause.
        detail: String,
    },
}

impl PersistenceError {
    /// Construct an error for the named operation.
    #[must_use]
    pub fn failed(op: &'static str, detail: impl Into<String>) -> Self {
        Self::OperationFailed {
            op,
            detail: detail.into(),
        }
    }

    /// The operation name this error occurred under, for building the
    /// `db_error_<op>` tape event kind.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::OperationFailed { op, .. } => op,
        }
    }
}
