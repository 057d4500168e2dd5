//! `arcadia feature` — inspect and manage the tracked feature list.

use crate::CliResult;
use clap::Subcommand;
use forge_core::feature_store::FeatureStore;
use forge_core::Context;
use std::path::Path;

#[derive(Subcommand)]
pub enum Action {
    /// Overall pass/ready/blocked counts.
    Stats,
    /// List every tracked feature.
    List,
    /// Show the next feature the orchestrator would pick up.
    Next,
    /// Show one feature's full record.
    Show { index: u32 },
    /// Search descriptions and categories for a keyword.
    Search { keyword: String },
    /// Check the dependency graph for cycles and dangling references.
    Validate,
    /// Flip a feature's pass/fail status (used for manual correction).
    Mark {
        index: u32,
        #[arg(long)]
        passes: bool,
        #[arg(long)]
        audit_status: Option<String>,
    },
}

fn print_feature(f: &forge_core::feature_store::Feature) {
    println!(
        "[{}] {} ({:?}) — {}{}",
        f.index,
        if f.passes { "PASS" } else { "    " },
        f.priority,
        f.description,
        if f.blocked_by.is_empty() {
            String::new()
        } else {
            format!(" (blocked by {:?})", f.blocked_by)
        }
    );
}

pub async fn dispatch(project_dir: &Path, action: Action) -> CliResult {
    let ctx = Context::open(project_dir).await?;
    let features = FeatureStore::new(ctx.store.clone());

    match action {
        Action::Stats => {
            let stats = features.stats().await?;
            println!(
                "total: {}  passing: {}  ready: {}  blocked: {}",
                stats.total, stats.passing, stats.ready, stats.blocked
            );
        }
        Action::List => {
            for f in features.all().await? {
                print_feature(&f);
            }
        }
        Action::Next => match features.next_ready().await? {
            Some(f) => print_feature(&f),
            None => println!("no ready features"),
        },
        Action::Show { index } => {
            let f = features.load(index).await?;
            println!("{}", serde_json::to_string_pretty(&f).unwrap());
        }
        Action::Search { keyword } => {
            for f in features.search(&keyword).await? {
                print_feature(&f);
            }
        }
        Action::Validate => {
            features.validate().await?;
            println!("feature graph is valid");
        }
        Action::Mark { index, passes, audit_status } => {
            features.mark(index, passes, audit_status).await?;
            println!("feature {index} marked {}", if passes { "passing" } else { "failing" });
        }
    }
    Ok(())
}
