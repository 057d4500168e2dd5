//! `arcadia respond` — the reference transport for answering a pending
//! Human Injection point from outside the orchestrator's process.

use crate::{CliError, CliResult};
use clap::Args;
use forge_core::human_injection::{HumanInjection, InjectionStatus};
use forge_core::Context;
use std::path::Path;

#[derive(Args, Default)]
pub struct RespondArgs {
    /// List every pending injection point.
    #[arg(long)]
    pub list: bool,
    /// Show one injection point's full record.
    #[arg(long)]
    pub show: Option<String>,
    /// Every injection point regardless of status, most recent first.
    #[arg(long)]
    pub history: bool,
    /// Counts by status across every injection point ever raised.
    #[arg(long)]
    pub stats: bool,
    /// The point to answer, paired with --response, --accept, or --cancel.
    #[arg(long)]
    pub point_id: Option<String>,
    #[arg(long)]
    pub response: Option<String>,
    /// Respond with the point's recommendation, if it has one.
    #[arg(long)]
    pub accept: bool,
    /// Respond with the point's default-on-timeout answer, or "deny".
    #[arg(long)]
    pub cancel: bool,
}

pub async fn dispatch(project_dir: &Path, args: RespondArgs) -> CliResult {
    let ctx = Context::open(project_dir).await?;
    let injection = HumanInjection::new(ctx.store.clone());

    if args.list {
        for point in injection.list_pending().await? {
            println!("{}\t{}\t{}", point.point_id, point.created_at, point.message);
        }
        return Ok(());
    }

    if let Some(id) = &args.show {
        let point = injection.get(id).await?;
        println!("{}", serde_json::to_string_pretty(&point).unwrap());
        return Ok(());
    }

    if args.history {
        for point in injection.list_all().await? {
            println!("{}\t{:?}\t{}\t{}", point.point_id, point.status, point.created_at, point.message);
        }
        return Ok(());
    }

    if args.stats {
        let all = injection.list_all().await?;
        let pending = all.iter().filter(|p| p.status == InjectionStatus::Pending).count();
        let responded = all.iter().filter(|p| p.status == InjectionStatus::Responded).count();
        let timed_out = all.iter().filter(|p| p.status == InjectionStatus::TimedOut).count();
        println!("total: {}  pending: {pending}  responded: {responded}  timed_out: {timed_out}", all.len());
        return Ok(());
    }

    let point_id = args.point_id.ok_or_else(|| {
        CliError::NotFoundOrUser("--point-id is required with --response, --accept, or --cancel".into())
    })?;

    let response = if let Some(r) = args.response {
        r
    } else if args.accept {
        let point = injection.get(&point_id).await?;
        point.recommendation.unwrap_or_else(|| "approve".into())
    } else if args.cancel {
        let point = injection.get(&point_id).await?;
        point.default_on_timeout.unwrap_or_else(|| "deny".into())
    } else {
        return Err(CliError::NotFoundOrUser(
            "one of --response, --accept, or --cancel is required".into(),
        ));
    };

    injection.respond(&point_id, &response).await?;
    println!("{point_id} -> {response}");
    Ok(())
}
