//! `arcadia checkpoint` — inspect, create, and roll back to checkpoints.

use crate::CliResult;
use clap::Subcommand;
use forge_core::checkpoint::{CheckpointManager, CheckpointTrigger};
use forge_core::feature_store::FeatureStore;
use forge_core::Context;
use std::path::Path;

#[derive(Subcommand)]
pub enum Action {
    /// List recent checkpoints, most recent first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show one checkpoint's full record.
    Show { checkpoint_id: String },
    /// Show the git diff between two checkpoints' commits.
    Diff { from: String, to: String },
    /// Hard-reset the working tree to a checkpoint's commit.
    Rollback { checkpoint_id: String },
    /// Capture a checkpoint right now, outside of a running session.
    Create {
        #[arg(long)]
        note: Option<String>,
    },
    /// Drop all but the `keep` most recent checkpoint rows.
    Clean {
        #[arg(long, default_value_t = 20)]
        keep: u32,
    },
    /// Summary counts: total checkpoints and current feature pass rate.
    Stats,
}

fn manager(ctx: &Context, project_dir: &Path) -> CheckpointManager {
    CheckpointManager::new(ctx.store.clone(), FeatureStore::new(ctx.store.clone()), project_dir)
}

pub async fn dispatch(project_dir: &Path, action: Action) -> CliResult {
    let ctx = Context::open(project_dir).await?;
    let manager = manager(&ctx, project_dir);

    match action {
        Action::List { limit } => {
            for cp in manager.list_recent(limit).await? {
                println!(
                    "{}\t{}\t{}\t{}/{} passing\t{}",
                    cp.checkpoint_id, cp.timestamp, cp.trigger, cp.features_passing, cp.features_total, cp.git_commit
                );
            }
        }
        Action::Show { checkpoint_id } => {
            let cp = manager.get(&checkpoint_id).await?;
            println!("{}", serde_json::to_string_pretty(&cp).unwrap());
        }
        Action::Diff { from, to } => {
            let a = manager.get(&from).await?;
            let b = manager.get(&to).await?;
            let output = std::process::Command::new("git")
                .args(["diff", &a.git_commit, &b.git_commit])
                .current_dir(project_dir)
                .output()
                .map_err(|e| anyhow::anyhow!("failed to run git diff: {e}"))?;
            print!("{}", String::from_utf8_lossy(&output.stdout));
        }
        Action::Rollback { checkpoint_id } => {
            let result = manager.rollback_to("cli", &checkpoint_id).await?;
            println!("{}", result.message);
            println!(
                "features restored: {}, files affected: {}",
                result.features_restored, result.files_affected
            );
        }
        Action::Create { note } => {
            let cp = manager.capture("cli", CheckpointTrigger::Manual, note).await?;
            println!("created {} ({})", cp.checkpoint_id, cp.git_commit);
        }
        Action::Clean { keep } => {
            let kept = manager.list_recent(keep).await?;
            let kept_ids: Vec<String> = kept.iter().map(|c| c.checkpoint_id.clone()).collect();
            let removed = ctx
                .store
                .write(move |conn| {
                    let placeholders = kept_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                    let sql = format!("DELETE FROM checkpoints WHERE checkpoint_id NOT IN ({placeholders})");
                    let params: Vec<&dyn rusqlite::ToSql> =
                        kept_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
                    let n = conn
                        .execute(&sql, params.as_slice())
                        .map_err(forge_core::persistence::StoreError::from)?;
                    Ok(n)
                })
                .await?;
            println!("removed {removed} checkpoint(s), kept {}", kept.len());
        }
        Action::Stats => {
            let all = manager.list_recent(u32::MAX).await?;
            let features = FeatureStore::new(ctx.store.clone()).stats().await?;
            println!("checkpoints: {}", all.len());
            println!(
                "features: {}/{} passing, {} ready, {} blocked",
                features.passing, features.total, features.ready, features.blocked
            );
        }
    }
    Ok(())
}
