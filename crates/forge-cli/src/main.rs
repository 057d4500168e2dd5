use clap::Parser;
use forge_cli::{Cli, CliError};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    match forge_cli::dispatch(Cli::parse()).await {
        Ok(()) => ExitCode::from(0),
        Err(CliError::NotFoundOrUser(msg)) => {
            error!("{msg}");
            ExitCode::from(1)
        }
        Err(CliError::Other(err)) => {
            error!("{err}");
            ExitCode::from(2)
        }
    }
}
