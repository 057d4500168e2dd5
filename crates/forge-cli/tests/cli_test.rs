//! End-to-end exercise of the CLI dispatch tree against a scratch project
//! directory, bypassing argv parsing by constructing `Cli` values directly.

use forge_cli::{Cli, CheckpointAction, Commands, FeatureAction, RespondArgs};
use std::process::Command;

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for args in [
        vec!["init"],
        vec!["config", "user.email", "test@test.com"],
        vec!["config", "user.name", "Test"],
    ] {
        Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
    }
    std::fs::write(dir.path().join("README.md"), "hi").unwrap();
    Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
    Command::new("git").args(["commit", "-m", "init"]).current_dir(dir.path()).output().unwrap();
    dir
}

fn cli(project_dir: &std::path::Path, command: Commands) -> Cli {
    Cli { project_dir: project_dir.to_path_buf(), command }
}

#[tokio::test]
async fn feature_stats_on_empty_project_succeeds() {
    let dir = project();
    let result = forge_cli::dispatch(cli(dir.path(), Commands::Feature { action: FeatureAction::Stats })).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn feature_show_unknown_index_is_user_error() {
    let dir = project();
    let result = forge_cli::dispatch(cli(
        dir.path(),
        Commands::Feature { action: FeatureAction::Show { index: 99 } },
    ))
    .await;
    assert!(matches!(result, Err(forge_cli::CliError::NotFoundOrUser(_))));
}

#[tokio::test]
async fn checkpoint_create_then_list_round_trips() {
    let dir = project();
    let create = forge_cli::dispatch(cli(
        dir.path(),
        Commands::Checkpoint { action: CheckpointAction::Create { note: Some("manual snapshot".into()) } },
    ))
    .await;
    assert!(create.is_ok());

    let list = forge_cli::dispatch(cli(
        dir.path(),
        Commands::Checkpoint { action: CheckpointAction::List { limit: 10 } },
    ))
    .await;
    assert!(list.is_ok());
}

#[tokio::test]
async fn checkpoint_show_unknown_id_is_user_error() {
    let dir = project();
    let result = forge_cli::dispatch(cli(
        dir.path(),
        Commands::Checkpoint { action: CheckpointAction::Show { checkpoint_id: "CP-999".into() } },
    ))
    .await;
    assert!(matches!(result, Err(forge_cli::CliError::NotFoundOrUser(_))));
}

#[tokio::test]
async fn respond_without_point_id_is_user_error() {
    let dir = project();
    let result = forge_cli::dispatch(cli(
        dir.path(),
        Commands::Respond(RespondArgs { response: Some("yes".into()), ..Default::default() }),
    ))
    .await;
    assert!(matches!(result, Err(forge_cli::CliError::NotFoundOrUser(_))));
}

#[tokio::test]
async fn respond_list_on_fresh_project_succeeds() {
    let dir = project();
    let result = forge_cli::dispatch(cli(dir.path(), Commands::Respond(RespondArgs { list: true, ..Default::default() })))
        .await;
    assert!(result.is_ok());
}
