//! CLI surface for an ArcadiaForge project: the `arcadia` binary's command
//! tree, kept in a library target so the subcommand dispatch functions are
//! directly testable without spawning a subprocess.

mod assistant_http;
mod checkpoint_cmd;
mod feature_cmd;
mod respond_cmd;
mod run_cmd;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use assistant_http::HttpAssistantClient;
pub use checkpoint_cmd::Action as CheckpointAction;
pub use feature_cmd::Action as FeatureAction;
pub use respond_cmd::RespondArgs;

#[derive(Parser)]
#[command(name = "arcadia", about = "Run and inspect an autonomous coding agent project")]
pub struct Cli {
    /// Project directory. Defaults to the current directory.
    #[arg(long, global = true, default_value = ".")]
    pub project_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestrator's outer loop against the project directory.
    Run {
        /// Stop after this many sessions instead of running until no work remains.
        #[arg(long)]
        max_sessions: Option<u32>,
    },
    /// Inspect and manage checkpoints.
    Checkpoint {
        #[command(subcommand)]
        action: checkpoint_cmd::Action,
    },
    /// Inspect and manage tracked features.
    Feature {
        #[command(subcommand)]
        action: feature_cmd::Action,
    },
    /// Answer or inspect pending human injection points.
    Respond(respond_cmd::RespondArgs),
}

/// Distinguishes a not-found/user-error result (exit 1) from everything else
/// (exit 2, typically persistence or I/O failure reaching all the way up).
pub enum CliError {
    NotFoundOrUser(String),
    Other(anyhow::Error),
}

impl From<forge_core::ForgeError> for CliError {
    fn from(err: forge_core::ForgeError) -> Self {
        use forge_core::ForgeError::*;
        match &err {
            FeatureNotFound { .. }
            | CheckpointNotFound { .. }
            | HypothesisNotFound { .. }
            | DecisionNotFound { .. }
            | InjectionPointNotFound { .. }
            | DependencyCycle { .. }
            | Validation { .. }
            | Config { .. } => CliError::NotFoundOrUser(err.to_string()),
            _ => CliError::Other(err.into()),
        }
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Other(err)
    }
}

impl From<forge_core::persistence::StoreError> for CliError {
    fn from(err: forge_core::persistence::StoreError) -> Self {
        CliError::Other(err.into())
    }
}

pub type CliResult<T = ()> = Result<T, CliError>;

/// Run one parsed invocation to completion. Split out of `main` so tests can
/// drive the whole dispatch tree against a temporary project directory.
pub async fn dispatch(cli: Cli) -> CliResult {
    match cli.command {
        Commands::Run { max_sessions } => run_cmd::run(&cli.project_dir, max_sessions).await,
        Commands::Checkpoint { action } => checkpoint_cmd::dispatch(&cli.project_dir, action).await,
        Commands::Feature { action } => feature_cmd::dispatch(&cli.project_dir, action).await,
        Commands::Respond(args) => respond_cmd::dispatch(&cli.project_dir, args).await,
    }
}
