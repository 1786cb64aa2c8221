// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library surface for the Synapse operator CLI: command implementations,
//! key management, the wire-protocol client, and output formatting, split
//! out of `main.rs` so they can be tested without spawning the binary.

pub mod client;
pub mod commands;
pub mod format;
pub mod keys;
