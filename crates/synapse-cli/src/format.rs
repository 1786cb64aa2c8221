// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output formatting utilities for the Synapse CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use synapse_core::TapeEvent;
use synapse_protocol::{ObserverMessage, ServerMessage};

/// Supported output formats for CLI display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Compact JSON (single line).
    Json,
    /// Pretty-printed JSON.
    JsonPretty,
    /// Human-readable multi-line text.
    Text,
    /// Single-line summary.
    Compact,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::JsonPretty => "json-pretty",
            Self::Text => "text",
            Self::Compact => "compact",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "json-pretty" | "json_pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "text" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Formats Synapse wire types for CLI output.
#[derive(Debug, Clone)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    /// Create a new formatter with the given output format.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Format a [`ServerMessage`] received over the client wire protocol.
    #[must_use]
    pub fn format_server_message(&self, msg: &ServerMessage) -> String {
        match &self.format {
            OutputFormat::Json => serde_json::to_string(msg).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(msg).unwrap_or_default(),
            OutputFormat::Text => format_server_message_text(msg),
            OutputFormat::Compact => format_server_message_compact(msg),
        }
    }

    /// Format an [`ObserverMessage`] received on the spectator stream.
    #[must_use]
    pub fn format_observer_message(&self, msg: &ObserverMessage) -> String {
        match &self.format {
            OutputFormat::Json => serde_json::to_string(msg).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(msg).unwrap_or_default(),
            OutputFormat::Text => format_observer_message_text(msg),
            OutputFormat::Compact => format_observer_message_compact(msg),
        }
    }

    /// Format an error message according to the configured output format.
    #[must_use]
    pub fn format_error(&self, err: &str) -> String {
        match &self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => {
                serde_json::json!({"error": err}).to_string()
            }
            OutputFormat::Text => format!("Error: {err}"),
            OutputFormat::Compact => format!("[error] {err}"),
        }
    }
}

fn tape_event_tag(ev: &TapeEvent) -> &'static str {
    match ev {
        TapeEvent::AgentAuthed { .. } => "agent_authed",
        TapeEvent::LedgerUpdate { .. } => "ledger_update",
        TapeEvent::RepUpdate { .. } => "rep_update",
        TapeEvent::Evidence { .. } => "evidence",
        TapeEvent::Broadcast { .. } => "broadcast",
    }
}

fn tape_event_brief(ev: &TapeEvent) -> String {
    match ev {
        TapeEvent::AgentAuthed { agent_id } => agent_id.to_string(),
        TapeEvent::LedgerUpdate {
            agent_id,
            credits,
            locked,
        } => format!("{agent_id} credits={credits} locked={locked}"),
        TapeEvent::RepUpdate {
            agent_id,
            completed,
            failed,
        } => format!("{agent_id} completed={completed} failed={failed}"),
        TapeEvent::Evidence { .. } => "evidence item appended".to_string(),
        TapeEvent::Broadcast { message_type, .. } => message_type.clone(),
    }
}

fn format_server_message_text(msg: &ServerMessage) -> String {
    format!("{}: {}", msg.type_name(), server_message_brief(msg))
}

fn format_server_message_compact(msg: &ServerMessage) -> String {
    format!("[{}] {}", msg.type_name(), server_message_brief(msg))
}

fn server_message_brief(msg: &ServerMessage) -> String {
    match msg {
        ServerMessage::Error { message, .. } => message.clone(),
        ServerMessage::Authed { agent_id, credits, .. } => {
            format!("{agent_id} credits={credits}")
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn format_observer_message_text(msg: &ObserverMessage) -> String {
    match msg {
        ObserverMessage::Snapshot { data } => format!(
            "snapshot: {} agents, {} jobs, {} bids, {} evidence",
            data.agents.len(),
            data.jobs.len(),
            data.bids.len(),
            data.evidence.len(),
        ),
        ObserverMessage::Event { data } => {
            format!("{}: {}", tape_event_tag(data), tape_event_brief(data))
        }
    }
}

fn format_observer_message_compact(msg: &ObserverMessage) -> String {
    match msg {
        ObserverMessage::Snapshot { data } => format!(
            "[snapshot] agents={} jobs={} bids={}",
            data.agents.len(),
            data.jobs.len(),
            data.bids.len(),
        ),
        ObserverMessage::Event { data } => format!("[{}] {}", tape_event_tag(data), tape_event_brief(data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_display_roundtrips() {
        for fmt in &[
            OutputFormat::Json,
            OutputFormat::JsonPretty,
            OutputFormat::Text,
            OutputFormat::Compact,
        ] {
            let s = fmt.to_string();
            let parsed: OutputFormat = s.parse().unwrap();
            assert_eq!(&parsed, fmt);
        }
    }

    #[test]
    fn output_format_from_str_rejects_unknown() {
        assert!("nope".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn format_server_error_text() {
        let f = Formatter::new(OutputFormat::Text);
        let msg = ServerMessage::Error {
            v: 1,
            message: "job_not_found".into(),
        };
        let out = f.format_server_message(&msg);
        assert!(out.contains("job_not_found"));
    }

    #[test]
    fn format_server_error_json_round_trips() {
        let f = Formatter::new(OutputFormat::Json);
        let msg = ServerMessage::Error {
            v: 1,
            message: "job_not_found".into(),
        };
        let out = f.format_server_message(&msg);
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["type"], "error");
    }
}
