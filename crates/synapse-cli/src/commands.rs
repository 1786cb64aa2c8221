// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared command implementations for the Synapse CLI.
//!
//! These functions are library-level so they can be tested without
//! spawning the binary.

use anyhow::{Context, Result};
use schemars::schema_for;
use std::path::Path;
use synapse_core::{Job, SynapseConfig};
use synapse_protocol::{ClientMessage, ObserverMessage, ServerMessage};

/// Schema types that can be printed by the `schema` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// JSON schema for inbound [`ClientMessage`] frames.
    ClientMessage,
    /// JSON schema for outbound [`ServerMessage`] frames.
    ServerMessage,
    /// JSON schema for [`ObserverMessage`] spectator frames.
    ObserverMessage,
    /// JSON schema for [`Job`].
    Job,
}

/// Return the JSON schema string for the given kind.
pub fn schema_json(kind: SchemaKind) -> Result<String> {
    let value = match kind {
        SchemaKind::ClientMessage => serde_json::to_value(schema_for!(ClientMessage))?,
        SchemaKind::ServerMessage => serde_json::to_value(schema_for!(ServerMessage))?,
        SchemaKind::ObserverMessage => serde_json::to_value(schema_for!(ObserverMessage))?,
        SchemaKind::Job => serde_json::to_value(schema_for!(Job))?,
    };
    serde_json::to_string_pretty(&value).context("serialize schema")
}

/// The detected type of a validated wire message file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatedType {
    /// The file is a valid [`ClientMessage`].
    ClientMessage,
    /// The file is a valid [`ServerMessage`].
    ServerMessage,
}

/// Validate a JSON file, auto-detecting whether it is a [`ClientMessage`] or
/// [`ServerMessage`].
///
/// Returns the detected type on success.
pub fn validate_file(path: &Path) -> Result<ValidatedType> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read file '{}'", path.display()))?;

    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("parse JSON from '{}'", path.display()))?;

    // Try ClientMessage first, then ServerMessage.
    if serde_json::from_value::<ClientMessage>(value.clone()).is_ok() {
        return Ok(ValidatedType::ClientMessage);
    }
    if serde_json::from_value::<ServerMessage>(value.clone()).is_ok() {
        return Ok(ValidatedType::ServerMessage);
    }

    anyhow::bail!(
        "file '{}' is not a valid client or server message (unknown type, or unknown fields present)",
        path.display()
    )
}

/// Validate a JSON file against the [`ClientMessage`] schema.
///
/// Returns `Ok(())` if the file is valid, or an error describing the
/// validation failure.
pub fn validate_client_message_file(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read message file '{}'", path.display()))?;

    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("parse JSON from '{}'", path.display()))?;

    serde_json::from_value::<ClientMessage>(value)
        .with_context(|| format!("validate client message from '{}'", path.display()))?;

    Ok(())
}

/// Render the resolved process configuration as loaded from the
/// environment, for operator diagnostics.
pub fn config_show() -> Result<String> {
    let config = SynapseConfig::from_env().context("load SynapseConfig from environment")?;
    Ok(format!("{config:#?}"))
}
