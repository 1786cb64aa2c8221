// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use synapse_cli::client::{AuthedConnection, ObserverConnection};
use synapse_cli::commands::{self, SchemaKind};
use synapse_cli::format::{Formatter, OutputFormat};
use synapse_cli::keys::AgentKeypair;
use synapse_protocol::ClientMessage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "synapse", version, about = "Synapse exchange operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new agent identity keypair.
    Keygen {
        /// Where to write the base64-encoded signing key.
        #[arg(long, default_value = "agent.key")]
        out: PathBuf,
    },

    /// Print a JSON schema to stdout.
    Schema {
        /// Which schema to print.
        #[arg(value_enum)]
        kind: SchemaArg,
    },

    /// Validate a wire-protocol message JSON file.
    Validate {
        /// Path to the message JSON file.
        #[arg()]
        file: PathBuf,
    },

    /// Print the process configuration resolved from the environment.
    Config,

    /// Connect as an agent, authenticate, and pump JSON frames between
    /// stdin and the connection.
    ///
    /// Each line read from stdin must be a complete client message JSON
    /// object (the same shape `validate`/`schema client-message` expect);
    /// every server message received is printed to stdout.
    Connect {
        /// Daemon client WebSocket URL.
        #[arg(long, default_value = "ws://127.0.0.1:8787/ws")]
        url: String,

        /// Path to the agent's signing key (created with `keygen` if absent).
        #[arg(long, default_value = "agent.key")]
        key: PathBuf,

        /// Human-readable agent name to register with.
        #[arg(long)]
        agent_name: String,

        /// Output format for received server messages.
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },

    /// Authenticate, post a single job, print the result, and exit.
    PostJob {
        /// Daemon client WebSocket URL.
        #[arg(long, default_value = "ws://127.0.0.1:8787/ws")]
        url: String,

        /// Path to the agent's signing key (created with `keygen` if absent).
        #[arg(long, default_value = "agent.key")]
        key: PathBuf,

        /// Human-readable agent name to register with.
        #[arg(long)]
        agent_name: String,

        /// Short job title.
        #[arg(long)]
        title: String,

        /// Optional longer description.
        #[arg(long)]
        description: Option<String>,

        /// Total budget to escrow.
        #[arg(long)]
        budget: u64,

        /// Free-form job kind.
        #[arg(long)]
        kind: Option<String>,

        /// Raw JSON payload (e.g. `'{"timeoutSeconds":60}'`).
        #[arg(long)]
        payload: Option<String>,

        /// Output format for the result.
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },

    /// Stream the `/observer` spectator feed.
    Observe {
        /// Daemon spectator WebSocket URL.
        #[arg(long, default_value = "ws://127.0.0.1:8790/observer")]
        url: String,

        /// Output format for received messages.
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchemaArg {
    ClientMessage,
    ServerMessage,
    ObserverMessage,
    Job,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    JsonPretty,
    Text,
    Compact,
}

impl From<FormatArg> for OutputFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::JsonPretty => OutputFormat::JsonPretty,
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Compact => OutputFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("synapse=debug,synapse_cli=debug")
    } else {
        EnvFilter::new("synapse=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Keygen { out } => cmd_keygen(&out),
        Commands::Schema { kind } => cmd_schema(kind),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Config => cmd_config(),
        Commands::Connect {
            url,
            key,
            agent_name,
            format,
        } => cmd_connect(&url, &key, &agent_name, format.into()).await,
        Commands::PostJob {
            url,
            key,
            agent_name,
            title,
            description,
            budget,
            kind,
            payload,
            format,
        } => {
            cmd_post_job(
                &url,
                &key,
                &agent_name,
                title,
                description,
                budget,
                kind,
                payload,
                format.into(),
            )
            .await
        }
        Commands::Observe { url, format } => cmd_observe(&url, format.into()).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

fn cmd_keygen(out: &std::path::Path) -> Result<()> {
    let keypair = AgentKeypair::generate();
    keypair.save(out)?;
    println!("key:      {}", out.display());
    println!("pubkey:   {}", keypair.public_key_b64());
    println!("agent_id: {}", keypair.agent_id());
    Ok(())
}

fn cmd_schema(kind: SchemaArg) -> Result<()> {
    let sk = match kind {
        SchemaArg::ClientMessage => SchemaKind::ClientMessage,
        SchemaArg::ServerMessage => SchemaKind::ServerMessage,
        SchemaArg::ObserverMessage => SchemaKind::ObserverMessage,
        SchemaArg::Job => SchemaKind::Job,
    };
    let json = commands::schema_json(sk)?;
    println!("{json}");
    Ok(())
}

fn cmd_validate(file: &std::path::Path) -> Result<()> {
    let kind = commands::validate_file(file)?;
    match kind {
        commands::ValidatedType::ClientMessage => println!("valid: client message"),
        commands::ValidatedType::ServerMessage => println!("valid: server message"),
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    println!("{}", commands::config_show()?);
    Ok(())
}

fn load_or_generate_key(path: &std::path::Path) -> Result<AgentKeypair> {
    if path.exists() {
        AgentKeypair::load(path)
    } else {
        let keypair = AgentKeypair::generate();
        keypair.save(path)?;
        eprintln!("generated a new key at {}", path.display());
        Ok(keypair)
    }
}

async fn cmd_connect(url: &str, key: &std::path::Path, agent_name: &str, format: OutputFormat) -> Result<()> {
    let keypair = load_or_generate_key(key)?;
    let conn = AuthedConnection::connect(url, &keypair, agent_name).await?;
    eprintln!("authed: agent_id={} credits={}", conn.agent_id, conn.credits);

    let formatter = Formatter::new(format);
    let (mut sink, mut stream) = conn.into_split();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("read stdin")? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        match serde_json::from_str::<ClientMessage>(&line) {
                            Ok(msg) => sink.send(&msg).await?,
                            Err(err) => eprintln!("{}", formatter.format_error(&err.to_string())),
                        }
                    }
                    None => break,
                }
            }
            received = stream.recv() => {
                match received? {
                    Some(msg) => println!("{}", formatter.format_server_message(&msg)),
                    None => break,
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_post_job(
    url: &str,
    key: &std::path::Path,
    agent_name: &str,
    title: String,
    description: Option<String>,
    budget: u64,
    kind: Option<String>,
    payload: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let keypair = load_or_generate_key(key)?;
    let mut conn = AuthedConnection::connect(url, &keypair, agent_name).await?;

    let payload = payload
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("parse --payload as JSON")?;

    conn.send(&ClientMessage::PostJob {
        v: synapse_core::PROTOCOL_VERSION,
        title,
        description,
        budget,
        kind,
        payload,
    })
    .await?;

    let formatter = Formatter::new(format);
    match conn.recv().await? {
        Some(msg) => println!("{}", formatter.format_server_message(&msg)),
        None => anyhow::bail!("connection closed before a reply arrived"),
    }
    Ok(())
}

async fn cmd_observe(url: &str, format: OutputFormat) -> Result<()> {
    let mut conn = ObserverConnection::connect(url).await?;
    let formatter = Formatter::new(format);
    while let Some(msg) = conn.recv().await? {
        println!("{}", formatter.format_observer_message(&msg));
    }
    Ok(())
}
