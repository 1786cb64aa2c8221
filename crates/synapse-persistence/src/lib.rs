// SPDX-License-Identifier: MIT OR Apache-2.0
//! synapse-persistence
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The write-through persistence port for the Synapse exchange (§4.9).
//!
//! The exchange treats persistence as an optional collaborator behind
//! [`PersistenceStore`]: when absent, the in-memory projection is the
//! entire system of record; when present, every state-changing operation
//! writes through after its in-memory effect lands. [`InMemoryStore`] is
//! the reference implementation used when `DATABASE_URL` is unset.

mod error;
mod store;

pub use error::PersistenceError;
pub use store::{InMemoryStore, PersistenceStore};
