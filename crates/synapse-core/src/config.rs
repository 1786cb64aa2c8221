// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide configuration, constructed once at startup from the
//! environment (§6, §9 "Global mutable state").
//!
//! Nothing downstream of [`SynapseConfig::from_env`] reads the environment
//! again: the config record is threaded through the exchange explicitly.

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while loading [`SynapseConfig`] from the
/// environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was present but could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// Name of the offending environment variable.
        var: &'static str,
        /// Human-readable parse failure detail.
        reason: String,
    },
}

/// When GitHub-ingressed jobs release payment to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GithubPayoutTrigger {
    /// Pay out once CI checks report success.
    ChecksSuccess,
    /// Pay out once the linked pull request merges.
    Merge,
}

impl FromStr for GithubPayoutTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checks_success" => Ok(Self::ChecksSuccess),
            "merge" => Ok(Self::Merge),
            other => Err(format!(
                "expected \"checks_success\" or \"merge\", got \"{other}\""
            )),
        }
    }
}

/// Top-level runtime configuration for the Synapse exchange.
///
/// Built once in `main` via [`SynapseConfig::from_env`] and passed by
/// reference into every component that needs it; no component reads
/// environment variables past initialization.
#[derive(Debug, Clone)]
pub struct SynapseConfig {
    /// Port the client-facing exchange protocol listens on.
    pub port: u16,
    /// Port the observer/spectator stream listens on.
    pub spectator_port: u16,
    /// Starting credit grant for newly authenticated agents.
    pub starting_credits: u64,
    /// Fraction of a job's budget locked as worker stake at award.
    pub worker_stake_pct: f64,
    /// Fraction of stake slashed to the requester on settlement-failure.
    pub worker_slash_pct: f64,
    /// Maximum negotiation rounds before a negotiation auto-closes.
    pub negotiation_max_rounds: u32,
    /// Durable store connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Shared secret used to verify inbound GitHub webhook signatures.
    pub github_webhook_secret: Option<String>,
    /// When GitHub-ingressed jobs release payment.
    pub github_payout_trigger: GithubPayoutTrigger,
}

impl Default for SynapseConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            spectator_port: 8790,
            starting_credits: crate::DEFAULT_STARTING_CREDITS,
            worker_stake_pct: 0.05,
            worker_slash_pct: 0.5,
            negotiation_max_rounds: 3,
            database_url: None,
            github_webhook_secret: None,
            github_payout_trigger: GithubPayoutTrigger::ChecksSuccess,
        }
    }
}

impl SynapseConfig {
    /// Load configuration from the process environment, falling back to
    /// the defaults in spec §6 for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is present but fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = env_var("SYNAPSE_PORT") {
            cfg.port = parse_env("SYNAPSE_PORT", &v)?;
        }
        if let Some(v) = env_var("SYNAPSE_SPECTATOR_PORT") {
            cfg.spectator_port = parse_env("SYNAPSE_SPECTATOR_PORT", &v)?;
        }
        if let Some(v) = env_var("SYNAPSE_WORKER_STAKE_PCT") {
            cfg.worker_stake_pct = parse_env("SYNAPSE_WORKER_STAKE_PCT", &v)?;
        }
        if let Some(v) = env_var("SYNAPSE_WORKER_SLASH_PCT") {
            cfg.worker_slash_pct = parse_env("SYNAPSE_WORKER_SLASH_PCT", &v)?;
        }
        if let Some(v) = env_var("SYNAPSE_NEGOTIATION_MAX_ROUNDS") {
            cfg.negotiation_max_rounds = parse_env("SYNAPSE_NEGOTIATION_MAX_ROUNDS", &v)?;
        }
        cfg.database_url = env_var("DATABASE_URL");
        cfg.github_webhook_secret = env_var("GITHUB_WEBHOOK_SECRET");
        if let Some(v) = env_var("SYNAPSE_GH_PAY_ON") {
            cfg.github_payout_trigger =
                v.parse()
                    .map_err(|reason| ConfigError::InvalidValue {
                        var: "SYNAPSE_GH_PAY_ON",
                        reason,
                    })?;
        }

        Ok(cfg)
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var: name,
        reason: e.to_string(),
    })
}
