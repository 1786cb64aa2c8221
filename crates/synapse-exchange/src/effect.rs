// SPDX-License-Identifier: MIT OR Apache-2.0
//! Outbound effects produced by a handler (§4.2, §6).
//!
//! The exchange never touches a socket directly — transport ownership
//! belongs to `synapse-daemon`. A handler instead returns the list of
//! messages that must be delivered, addressed by [`Recipient`], and the
//! transport layer resolves recipients to live connections.

use synapse_core::AgentId;
use synapse_protocol::ServerMessage;

use crate::session::SessionId;

/// Who an [`Effect`]'s message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// A single connection, identified by its session handle.
    Session(SessionId),
    /// Every session currently bound to this agent identity.
    Agent(AgentId),
    /// Every connected, authenticated session.
    Broadcast,
}

/// A single outbound message produced by a handler, paired with its
/// intended recipient(s).
#[derive(Debug, Clone)]
pub struct Effect {
    /// Who should receive this message.
    pub to: Recipient,
    /// The message itself.
    pub message: ServerMessage,
}

impl Effect {
    /// Address a message to one session.
    #[must_use]
    pub fn to_session(session_id: SessionId, message: ServerMessage) -> Self {
        Self {
            to: Recipient::Session(session_id),
            message,
        }
    }

    /// Address a message to every session of one agent.
    #[must_use]
    pub fn to_agent(agent_id: AgentId, message: ServerMessage) -> Self {
        Self {
            to: Recipient::Agent(agent_id),
            message,
        }
    }

    /// Address a message to every connected session.
    #[must_use]
    pub fn broadcast(message: ServerMessage) -> Self {
        Self {
            to: Recipient::Broadcast,
            message,
        }
    }
}
