// SPDX-License-Identifier: MIT OR Apache-2.0
//! A thin WebSocket client for the Synapse wire protocol (§4.1, §4.2, §6).
//!
//! This drives the same auth handshake the daemon expects from a real
//! agent: wait for `challenge`, reply with a signed `auth`, wait for
//! `authed`. Everything after that is a plain send/receive pump over
//! [`ClientMessage`]/[`ServerMessage`] frames.

use anyhow::{bail, Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use synapse_core::PROTOCOL_VERSION;
use synapse_protocol::{ClientMessage, ObserverMessage, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::keys::AgentKeypair;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The sending half of a split, already-authenticated connection.
pub struct ClientSink(SplitSink<WsStream, Message>);

impl ClientSink {
    /// Send a client message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message).context("serialize client message")?;
        self.0
            .send(Message::Text(text.into()))
            .await
            .context("send client message")
    }
}

/// The receiving half of a split, already-authenticated connection.
pub struct ClientStream(SplitStream<WsStream>);

impl ClientStream {
    /// Receive the next server message, or `None` if the connection closed.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg = serde_json::from_str::<ServerMessage>(&text)
                        .with_context(|| format!("parse server message: {text}"))?;
                    return Ok(Some(msg));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err).context("websocket error"),
            }
        }
    }
}

/// An authenticated connection to a Synapse daemon's client wire protocol.
pub struct AuthedConnection {
    /// The stable agent id the daemon bound this connection to.
    pub agent_id: String,
    /// The agent's credit balance as of the `authed` reply.
    pub credits: u64,
    stream: WsStream,
}

impl AuthedConnection {
    /// Connect to `url` and complete the Ed25519 auth handshake using
    /// `keypair`, registering as `agent_name`.
    pub async fn connect(url: &str, keypair: &AgentKeypair, agent_name: &str) -> Result<Self> {
        let (mut stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("connect to '{url}'"))?;

        let challenge = recv_server_message(&mut stream)
            .await?
            .context("connection closed before a challenge arrived")?;
        let nonce = match challenge {
            ServerMessage::Challenge { nonce, .. } => nonce,
            other => bail!("expected challenge, got {}", other.type_name()),
        };

        let signature = keypair.sign_auth(PROTOCOL_VERSION, &nonce, agent_name);
        let auth = ClientMessage::Auth {
            v: PROTOCOL_VERSION,
            agent_name: agent_name.to_string(),
            public_key: keypair.public_key_b64(),
            nonce,
            signature,
        };
        send_client_message(&mut stream, &auth).await?;

        let reply = recv_server_message(&mut stream)
            .await?
            .context("connection closed before an authed reply arrived")?;
        match reply {
            ServerMessage::Authed { agent_id, credits, .. } => Ok(Self {
                agent_id,
                credits,
                stream,
            }),
            ServerMessage::Error { message, .. } => bail!("auth rejected: {message}"),
            other => bail!("expected authed or error, got {}", other.type_name()),
        }
    }

    /// Send a client message over the established connection.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        send_client_message(&mut self.stream, message).await
    }

    /// Receive the next server message, or `None` if the connection closed.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        recv_server_message(&mut self.stream).await
    }

    /// Split into independent send/receive halves for an interactive pump
    /// where inbound frames and outbound frames are driven by separate
    /// tasks.
    #[must_use]
    pub fn into_split(self) -> (ClientSink, ClientStream) {
        let (sink, stream) = self.stream.split();
        (ClientSink(sink), ClientStream(stream))
    }
}

async fn send_client_message(stream: &mut WsStream, message: &ClientMessage) -> Result<()> {
    let text = serde_json::to_string(message).context("serialize client message")?;
    stream
        .send(Message::Text(text.into()))
        .await
        .context("send client message")
}

async fn recv_server_message(stream: &mut WsStream) -> Result<Option<ServerMessage>> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let msg = serde_json::from_str::<ServerMessage>(&text)
                    .with_context(|| format!("parse server message: {text}"))?;
                return Ok(Some(msg));
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err).context("websocket error"),
        }
    }
}

/// A connection to the `/observer` spectator stream. Unauthenticated: the
/// snapshot and every subsequent tape event arrive unprompted.
pub struct ObserverConnection {
    stream: WsStream,
}

impl ObserverConnection {
    /// Connect to the spectator stream at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("connect to '{url}'"))?;
        Ok(Self { stream })
    }

    /// Receive the next observer message, or `None` if the connection closed.
    pub async fn recv(&mut self) -> Result<Option<ObserverMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg = serde_json::from_str::<ObserverMessage>(&text)
                        .with_context(|| format!("parse observer message: {text}"))?;
                    return Ok(Some(msg));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err).context("websocket error"),
            }
        }
    }
}
