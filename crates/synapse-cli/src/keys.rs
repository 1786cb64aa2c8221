// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ed25519 agent identity keys: generation, file storage, and auth signing.

use anyhow::{Context, Result};
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use std::path::Path;
use synapse_core::AgentId;
use synapse_protocol::auth_canonical_string;

/// An agent's Ed25519 identity keypair.
pub struct AgentKeypair {
    signing_key: SigningKey,
}

impl AgentKeypair {
    /// Generate a fresh keypair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Load a keypair previously written by [`Self::save`].
    ///
    /// The file holds the base64-encoded 32-byte signing key on its own line.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read key file '{}'", path.display()))?;
        let encoded = content.trim();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .with_context(|| format!("decode key file '{}'", path.display()))?;
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("key file '{}' is not 32 bytes", path.display()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&array),
        })
    }

    /// Write this keypair's signing key to `path`, base64-encoded.
    ///
    /// On unix, the file is created with `0600` permissions since it holds
    /// the private key.
    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(self.signing_key.to_bytes());
        std::fs::write(path, encoded)
            .with_context(|| format!("write key file '{}'", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)
                .with_context(|| format!("set permissions on '{}'", path.display()))?;
        }
        Ok(())
    }

    /// The base64-encoded public key, as sent in the `auth` message.
    #[must_use]
    pub fn public_key_b64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// The stable agent id this key will be bound to on first successful auth.
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        AgentId::derive(&self.public_key_b64())
    }

    /// Sign the canonical auth string for the given challenge, returning the
    /// base64-encoded detached signature to put in the `auth` reply's
    /// `signature` field.
    #[must_use]
    pub fn sign_auth(&self, proto_version: u32, nonce: &str, agent_name: &str) -> String {
        let canonical = auth_canonical_string(proto_version, nonce, agent_name, &self.public_key_b64());
        let signature = self.signing_key.sign(canonical.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    }
}
