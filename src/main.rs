use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use stagehand::errors::OrchestratorError;
use stagehand::logging::{LogFormat, init_tracing};

mod cmd;

/// Exit code for a run that stopped with a BLOCKED phase.
const EXIT_BLOCKED: u8 = 2;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version, about = "Drive production through gated phases with bounded rework")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Format of operational log output on stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new stagehand project
    Init,
    /// Execute phases until the run completes or a phase blocks
    Run {
        /// Override the configured retry bound
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Execute only the current phase (or the parallel pair)
    Advance {
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Validate the current phase's latest deliverables without dispatching
    Checkpoint,
    /// Show per-phase status and retry counts
    Status,
    /// Put a BLOCKED phase back in progress with its retries reset
    Resume { phase: String },
    /// Show the phase plan
    List,
    /// Start a new run
    Reset {
        #[arg(long)]
        force: bool,
    },
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Print the handoff package of a completed run
    Handoff {
        /// Print the raw JSON package
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Entries for a single phase
    Show { phase: String },
    /// Ordered JSON export of the full log
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration against the phase plan
    Validate,
}

async fn dispatch(cli: &Cli) -> Result<()> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run { max_retries } => cmd::cmd_run(cli, project_dir, *max_retries).await?,
        Commands::Advance { max_retries } => {
            cmd::cmd_advance(cli, project_dir, *max_retries).await?
        }
        Commands::Checkpoint => cmd::cmd_checkpoint(&project_dir)?,
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Resume { phase } => cmd::cmd_resume(&project_dir, cli, phase)?,
        Commands::List => cmd::cmd_list(&project_dir)?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, cli, *force)?,
        Commands::Audit { command } => cmd::cmd_audit(&project_dir, command)?,
        Commands::Handoff { json } => cmd::cmd_handoff(&project_dir, *json)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<OrchestratorError>() {
        Some(OrchestratorError::RetryLimitExceeded { .. }) => ExitCode::from(EXIT_BLOCKED),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = cli
        .project_dir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .map(|dir| dir.join(".stagehand").join("logs"));
    let _guard = init_tracing(cli.verbose, cli.log_format, log_dir.as_deref());

    match dispatch(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for(&err)
        }
    }
}
