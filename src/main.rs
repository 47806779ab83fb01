use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use supertoken::scenario::Scenario;
use supertoken::{SuperTokenError, Timestamp, TokenConfig};

#[derive(Parser)]
#[command(name = "supertoken", version, about = "Replay SuperToken operation scripts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a script and print balances, flows, events and the state root.
    Run {
        scenario: PathBuf,
        /// Token config overriding the one embedded in the script.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Evaluate balances at this time instead of the last operation's.
        #[arg(long)]
        at: Option<Timestamp>,
        #[arg(long)]
        pretty: bool,
    },
    /// Replay a script and fail unless every operation applied and the
    /// books balance.
    Check {
        scenario: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        at: Option<Timestamp>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario {path}: {source}")]
    Scenario {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] supertoken::config::ConfigError),
    #[error(transparent)]
    Token(#[from] SuperTokenError),
    #[error("cannot encode report: {0}")]
    Report(#[source] serde_json::Error),
    #[error("operation #{index} rejected: {error}")]
    Rejected { index: usize, error: String },
}

fn load_scenario(path: &PathBuf, config: Option<&PathBuf>) -> Result<Scenario, CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut scenario = Scenario::from_json(&raw).map_err(|source| CliError::Scenario {
        path: path.display().to_string(),
        source,
    })?;
    match config {
        Some(config) => scenario.config = TokenConfig::load(config)?,
        None => scenario.config.validate()?,
    }
    Ok(scenario)
}

fn run_cmd(
    scenario: &PathBuf,
    config: Option<&PathBuf>,
    at: Option<Timestamp>,
    pretty: bool,
) -> Result<(), CliError> {
    let scenario = load_scenario(scenario, config)?;
    let replay = scenario.replay()?;
    let report = replay.report(at)?;
    let encoded = if pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .map_err(CliError::Report)?;
    println!("{encoded}");
    Ok(())
}

fn check_cmd(
    scenario: &PathBuf,
    config: Option<&PathBuf>,
    at: Option<Timestamp>,
) -> Result<(), CliError> {
    let scenario = load_scenario(scenario, config)?;
    let replay = scenario.replay()?;
    if let Some(failure) = &replay.failure {
        return Err(CliError::Rejected {
            index: failure.index,
            error: failure.error.clone(),
        });
    }
    let at = at.unwrap_or(replay.last_at);
    replay.validate(at)?;
    let snapshot = replay.token.snapshot()?;
    info!(
        operations = replay.applied,
        at,
        root = %hex::encode(snapshot.state_root),
        "books balance"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Run {
            scenario,
            config,
            at,
            pretty,
        } => run_cmd(scenario, config.as_ref(), *at, *pretty),
        Command::Check {
            scenario,
            config,
            at,
        } => check_cmd(scenario, config.as_ref(), *at),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
