//! relaylink CLI
//!
//! Operator tools for relay-mediated bytestreams: compute session digests,
//! probe a relay with the SOCKS5 handshake, and race a candidate list the way
//! a responder does.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use relaylink_core::{
    CandidateHost, CandidateRacer, FailureHistory, NegotiationError, compute_digest, socks5,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{AttemptProgress, format_millis};

/// relaylink - relay-mediated bytestream negotiation tools
#[derive(Parser)]
#[command(name = "relaylink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Identities a session digest is derived from
#[derive(clap::Args)]
struct SessionArgs {
    /// Session id
    #[arg(long, default_value = "js5_probe")]
    session: String,

    /// Identity of the initiator
    #[arg(long, default_value = "initiator@localhost/relaylink")]
    requester: String,

    /// Identity of the responder
    #[arg(long, default_value = "target@localhost/relaylink")]
    target: String,
}

impl SessionArgs {
    fn digest(&self) -> String {
        compute_digest(&self.session, &self.requester, &self.target)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the digest of a session
    Digest {
        /// Session id
        session: String,
        /// Identity of the initiator
        requester: String,
        /// Identity of the responder
        target: String,
    },

    /// Connect to one relay and run the handshake
    Probe {
        /// Relay as [owner=]host:port
        #[arg(required = true)]
        relay: String,

        #[command(flatten)]
        session: SessionArgs,

        /// Budget for connect plus handshake in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Race candidates in order like a responder accepting an offer
    Race {
        /// Candidates as [owner=]host:port, in order of preference
        #[arg(required = true)]
        candidates: Vec<String>,

        #[command(flatten)]
        session: SessionArgs,

        /// Race repeatedly with one failure history
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::resolve(cli.config.as_deref())?;
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    match cli.command {
        Commands::Digest {
            session,
            requester,
            target,
        } => {
            println!("{}", compute_digest(&session, &requester, &target));
        }
        Commands::Probe {
            relay,
            session,
            timeout_ms,
        } => {
            let budget = timeout_ms.map_or_else(
                || config.negotiation.effective_proxy_connection_timeout(),
                Duration::from_millis,
            );
            probe(&parse_candidate(&relay)?, &session, budget).await?;
        }
        Commands::Race {
            candidates,
            session,
            rounds,
        } => {
            let candidates = candidates
                .iter()
                .map(|spec| parse_candidate(spec))
                .collect::<anyhow::Result<Vec<_>>>()?;
            race(&candidates, &session, rounds, &config).await?;
        }
        Commands::Config { init } => {
            show_config(&config, init, cli.config)?;
        }
    }

    Ok(())
}

/// Parse `[owner=]host:port`; the owner defaults to the host
fn parse_candidate(spec: &str) -> anyhow::Result<CandidateHost> {
    let (owner, endpoint) = match spec.split_once('=') {
        Some((owner, endpoint)) => (Some(owner), endpoint),
        None => (None, spec),
    };

    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("Candidate '{}' missing port (expected host:port)", spec))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        anyhow::bail!("Candidate '{}' has empty hostname", spec);
    }

    let port: u16 = port
        .parse()
        .map_err(|_| anyhow::anyhow!("Candidate '{}' has invalid port: {}", spec, port))?;
    if port == 0 {
        anyhow::bail!("Candidate '{}' has invalid port: 0", spec);
    }

    Ok(CandidateHost::new(owner.unwrap_or(host), host, port))
}

/// Connect and handshake with a single relay
async fn probe(relay: &CandidateHost, session: &SessionArgs, budget: Duration) -> anyhow::Result<()> {
    let digest = session.digest();
    tracing::info!("Probing {} with digest {}", relay, digest);

    let progress = AttemptProgress::start(format!(
        "Connecting to {} (budget {})",
        relay,
        format_millis(budget)
    ));
    let started = Instant::now();

    match socks5::connect(relay, &digest, budget).await {
        Ok(_stream) => {
            progress.finish_with_message(format!(
                "{} accepted the session in {}",
                relay,
                format_millis(started.elapsed())
            ));
            Ok(())
        }
        Err(e) => {
            progress.abandon_with_message(format!("{relay} failed: {e}"));
            Err(e.into())
        }
    }
}

/// Race `candidates` `rounds` times sharing one failure history
async fn race(
    candidates: &[CandidateHost],
    session: &SessionArgs,
    rounds: u32,
    config: &Config,
) -> anyhow::Result<()> {
    let digest = session.digest();
    let history = Arc::new(FailureHistory::from_config(&config.negotiation));
    let racer = CandidateRacer::new(Arc::clone(&history), config.negotiation.clone());

    println!("Candidates: {}", candidates.len());
    println!(
        "Per-host budget: {}",
        format_millis(racer.per_host_timeout(candidates.len()))
    );
    println!("Failure threshold: {}", config.negotiation.failure_threshold);
    println!();

    let mut last_error: Option<NegotiationError> = None;
    for round in 1..=rounds.max(1) {
        let progress = AttemptProgress::start(format!("Round {round}: racing"));
        let started = Instant::now();

        match racer.race(candidates, &digest).await {
            Ok(outcome) => {
                progress.finish_with_message(format!(
                    "Round {}: selected {} in {} ({} attempted, {} blacklisted)",
                    round,
                    outcome.selected,
                    format_millis(started.elapsed()),
                    outcome.attempted,
                    outcome.skipped
                ));
                last_error = None;
            }
            Err(e) => {
                progress.abandon_with_message(format!("Round {round}: {e}"));
                last_error = Some(e);
            }
        }
    }

    println!();
    println!("Failure history:");
    for candidate in candidates {
        let key = candidate.endpoint_key();
        println!("  {}: {} failures", key, history.failure_count(&key));
    }

    match last_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Print the effective configuration, optionally writing the defaults first
fn show_config(config: &Config, init: bool, path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(Config::default_path);

    if init {
        if path.exists() {
            anyhow::bail!("Configuration already exists: {}", path.display());
        }
        Config::default().save(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
