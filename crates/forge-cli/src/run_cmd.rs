//! `arcadia run` — start the orchestrator's outer loop against a project.

use crate::assistant_http::HttpAssistantClient;
use crate::CliResult;
use forge_core::{Context, Orchestrator, SessionOutcome};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(project_dir: &Path, max_sessions: Option<u32>) -> CliResult {
    let ctx = Context::open(project_dir).await?;
    let token = ctx.config.assistant_token()?;
    let assistant: Arc<dyn forge_core::assistant::AssistantClient> = Arc::new(HttpAssistantClient::new(
        ctx.config.assistant_base_url.clone(),
        token,
        ctx.config.model.clone(),
    ));

    let mut orchestrator = Orchestrator::new(ctx.clone(), assistant).await?;

    let mut sessions_run = 0u32;
    loop {
        if let Some(max) = max_sessions {
            if sessions_run >= max {
                info!(sessions_run, "reached --max-sessions, stopping");
                break;
            }
        }

        let session_id = format!("S-{}", sessions_run + 1);

        let outcome = tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, stopping run loop before starting a new session");
                break;
            }
            outcome = next_outcome(&mut orchestrator, &session_id) => outcome?,
        };
        sessions_run += 1;

        match outcome {
            SessionOutcome::FeatureCompleted { index } => {
                info!(%session_id, index, "feature completed");
            }
            SessionOutcome::FeatureFailed { index, reason } => {
                warn!(%session_id, index, %reason, "feature attempt failed");
            }
            SessionOutcome::AwaitingHuman { point_id } => {
                info!(%session_id, %point_id, "awaiting human response, stopping run loop");
                break;
            }
            SessionOutcome::HumanDenied { point_id, reason } => {
                warn!(%session_id, %point_id, %reason, "human denied the gated action");
            }
            SessionOutcome::NoWorkRemaining => {
                info!("no ready features remain, stopping run loop");
                break;
            }
            SessionOutcome::InitializerCompleted => {
                info!(%session_id, "initializer session completed");
            }
            SessionOutcome::AuditCompleted { reviewed } => {
                info!(%session_id, reviewed, "audit session completed");
            }
            SessionOutcome::Cyclic { detail } => {
                warn!(%session_id, %detail, "in-session cycle detected, stopping run loop");
                break;
            }
            SessionOutcome::NoProgress { detail } => {
                warn!(%session_id, %detail, "cross-session stall detected, stopping run loop");
                break;
            }
            SessionOutcome::AuthError { message } => {
                warn!(%session_id, %message, "assistant credential rejected, stopping run loop");
                break;
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(ctx.config.inter_session_delay_secs)).await;
    }

    println!("ran {sessions_run} session(s)");
    Ok(())
}

/// Resume a previously-raised injection point if one is still outstanding,
/// otherwise run an ordinary session. Keeps the `ctrl_c` branch above free of
/// this decision so cancellation always wins the race.
async fn next_outcome(orchestrator: &mut Orchestrator, session_id: &str) -> CliResult<SessionOutcome> {
    if let Some(point_id) = orchestrator.pending_injection_point().await? {
        Ok(orchestrator.resume_after_injection(session_id, &point_id).await?)
    } else {
        Ok(orchestrator.run_one_session(session_id).await?)
    }
}
