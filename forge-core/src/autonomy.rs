//! Autonomy Manager: a graduated set of permission levels, the effective
//! level an action is clamped to once confidence and recent errors are
//! accounted for, and outcome-driven promotion/demotion between sessions.

use crate::risk::RiskLevel;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Every action requires human sign-off first.
    Observe = 0,
    /// The assistant may plan and propose, but not execute.
    Plan = 1,
    /// `Safe`/`Low` risk actions run without escalation.
    ExecuteSafe = 2,
    /// Higher-risk actions run unattended but stay under closer review.
    ExecuteReview = 3,
    /// Everything the action-category table allows runs unattended.
    FullAuto = 4,
}

impl AutonomyLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observe" => Some(Self::Observe),
            "plan" => Some(Self::Plan),
            "execute_safe" => Some(Self::ExecuteSafe),
            "execute_review" => Some(Self::ExecuteReview),
            "full_auto" => Some(Self::FullAuto),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Plan => "plan",
            Self::ExecuteSafe => "execute_safe",
            Self::ExecuteReview => "execute_review",
            Self::FullAuto => "full_auto",
        }
    }

    fn step_up(self) -> Self {
        match self {
            Self::Observe => Self::Plan,
            Self::Plan => Self::ExecuteSafe,
            Self::ExecuteSafe => Self::ExecuteReview,
            Self::ExecuteReview => Self::FullAuto,
            Self::FullAuto => Self::FullAuto,
        }
    }

    fn step_down(self) -> Self {
        match self {
            Self::Observe => Self::Observe,
            Self::Plan => Self::Observe,
            Self::ExecuteSafe => Self::Plan,
            Self::ExecuteReview => Self::ExecuteSafe,
            Self::FullAuto => Self::ExecuteReview,
        }
    }
}

/// What kind of action a tool call represents, independent of the specific
/// tool name. Each category has a minimum autonomy level below which the
/// action must be gated through a human, regardless of how the individual
/// risk pattern table scored it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCategory {
    Read,
    Write,
    Execute,
    FeatureModify,
    External,
    Destructive,
}

impl ActionCategory {
    pub fn minimum_level(self) -> AutonomyLevel {
        match self {
            Self::Read => AutonomyLevel::Observe,
            Self::Write => AutonomyLevel::Plan,
            Self::Execute => AutonomyLevel::ExecuteSafe,
            Self::FeatureModify => AutonomyLevel::ExecuteSafe,
            Self::External => AutonomyLevel::ExecuteReview,
            Self::Destructive => AutonomyLevel::FullAuto,
        }
    }
}

/// Classify a proposed tool call into the category its risk assessment most
/// resembles. Destructive/irreversible actions always win regardless of
/// which tool proposed them.
fn classify(tool: &str, assessment: &crate::risk::RiskAssessment) -> ActionCategory {
    if assessment.level == RiskLevel::Critical || !assessment.reversible {
        ActionCategory::Destructive
    } else if assessment.level == RiskLevel::High || assessment.has_external_side_effects {
        ActionCategory::External
    } else if assessment.level == RiskLevel::Moderate || matches!(tool, "write_file" | "edit_file" | "delete_file") {
        ActionCategory::FeatureModify
    } else if matches!(tool, "read_file" | "search" | "list_files") {
        ActionCategory::Read
    } else {
        ActionCategory::Execute
    }
}

/// The result of gating one proposed tool call through the current autonomy
/// level. Downstream components (Escalation, Human Injection) consult this
/// instead of re-deriving it from a bare risk level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub required_level: AutonomyLevel,
    pub current_level: AutonomyLevel,
    pub effective_level: AutonomyLevel,
    pub reason: String,
    pub alternatives: Vec<String>,
    pub requires_approval: bool,
    pub requires_checkpoint: bool,
}

/// Whether an action at `risk` may run unattended under `level`, ignoring
/// category and confidence. Used by callers that only have a bare risk
/// level on hand (e.g. reporting) rather than a full tool call to classify.
pub fn permits(level: AutonomyLevel, risk: RiskLevel) -> bool {
    match risk {
        RiskLevel::Safe | RiskLevel::Low => level >= AutonomyLevel::ExecuteSafe,
        RiskLevel::Moderate => level >= AutonomyLevel::ExecuteSafe,
        RiskLevel::High => level >= AutonomyLevel::ExecuteReview,
        RiskLevel::Critical => level >= AutonomyLevel::FullAuto,
    }
}

const SUCCESS_PROMOTION_COUNT: u32 = 10;
const ERROR_DEMOTION_COUNT: u32 = 3;
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
const OUTCOME_HISTORY_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct LevelChange {
    pub from: AutonomyLevel,
    pub to: AutonomyLevel,
    pub reason: String,
}

/// Tracks consecutive successes/failures and decides whether the configured
/// level should change. Held by the Orchestrator; persistence of the
/// resulting level is the caller's responsibility (it lives on `sessions`
/// metadata, not its own table).
#[derive(Debug, Clone)]
pub struct AutonomyManager {
    level: AutonomyLevel,
    min_level: AutonomyLevel,
    max_level: AutonomyLevel,
    confidence_threshold: f64,
    auto_adjust: bool,
    consecutive_successes: u32,
    consecutive_failures: u32,
    total_actions: u32,
    total_errors: u32,
    outcome_history: VecDeque<bool>,
    change_log: Vec<LevelChange>,
}

impl AutonomyManager {
    pub fn new(initial: AutonomyLevel) -> Self {
        Self {
            level: initial,
            min_level: AutonomyLevel::Observe,
            max_level: AutonomyLevel::FullAuto,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            auto_adjust: true,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_actions: 0,
            total_errors: 0,
            outcome_history: VecDeque::with_capacity(OUTCOME_HISTORY_CAP),
            change_log: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, min_level: AutonomyLevel, max_level: AutonomyLevel) -> Self {
        self.min_level = min_level;
        self.max_level = max_level;
        self.level = self.level.max(min_level).min(max_level);
        self
    }

    pub fn level(&self) -> AutonomyLevel {
        self.level
    }

    pub fn change_log(&self) -> &[LevelChange] {
        &self.change_log
    }

    pub fn permits(&self, risk: RiskLevel) -> bool {
        permits(self.level, risk)
    }

    /// The level actually in effect for this decision: the configured level
    /// demoted for low confidence and, if auto-adjust is on, for a current
    /// run of consecutive errors. Always within `[min_level, current_level]`.
    pub fn effective_level(&self, confidence: Option<f64>) -> AutonomyLevel {
        let mut steps_down = 0u8;
        if let Some(c) = confidence {
            if c < 0.3 {
                steps_down += 2;
            } else if c < self.confidence_threshold {
                steps_down += 1;
            }
        }
        if self.auto_adjust && self.consecutive_failures >= ERROR_DEMOTION_COUNT {
            steps_down += 1;
        }

        let mut level = self.level;
        for _ in 0..steps_down {
            level = level.step_down();
        }
        level.max(self.min_level).min(self.level)
    }

    /// Gate one proposed tool call: classify it, compute the effective
    /// level, and decide whether it may run unattended.
    pub fn check(&self, tool: &str, input: &str, confidence: Option<f64>) -> Decision {
        let assessment = crate::risk::assess(tool, input);
        let category = classify(tool, &assessment);
        let required_level = category.minimum_level();
        let effective_level = self.effective_level(confidence);
        let allowed = effective_level >= required_level;

        let mut alternatives = Vec::new();
        if !allowed {
            alternatives.push("request human approval via Human Injection".to_string());
            if confidence.is_some_and(|c| c < self.confidence_threshold) {
                alternatives.push("re-attempt once confidence in the approach is higher".to_string());
            }
        }

        Decision {
            allowed,
            required_level,
            current_level: self.level,
            effective_level,
            reason: format!(
                "{tool} classified as {category:?} (requires {required_level:?}); effective autonomy is {effective_level:?}"
            ),
            alternatives,
            requires_approval: !allowed || assessment.requires_approval,
            requires_checkpoint: assessment.requires_checkpoint,
        }
    }

    /// Record the outcome of an unattended action and, if auto-adjust is
    /// on, apply promotion or demotion once a streak threshold is crossed.
    /// Every resulting level change is logged with its reason.
    pub fn record_outcome(&mut self, success: bool) {
        self.total_actions += 1;
        if self.outcome_history.len() == OUTCOME_HISTORY_CAP {
            self.outcome_history.pop_front();
        }
        self.outcome_history.push_back(success);

        if success {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            self.total_errors += 1;
        }

        if !self.auto_adjust {
            return;
        }

        if success && self.consecutive_successes >= SUCCESS_PROMOTION_COUNT && self.level < self.max_level {
            let from = self.level;
            self.level = self.level.step_up().min(self.max_level);
            self.consecutive_successes = 0;
            self.log_change(from, self.level, "success streak reached the promotion threshold");
        } else if !success && self.consecutive_failures >= ERROR_DEMOTION_COUNT && self.level > self.min_level {
            let from = self.level;
            self.level = self.level.step_down().max(self.min_level);
            self.consecutive_failures = 0;
            self.log_change(from, self.level, "consecutive errors reached the demotion threshold");
        }
    }

    fn log_change(&mut self, from: AutonomyLevel, to: AutonomyLevel, reason: &str) {
        tracing::info!(from = from.as_str(), to = to.as_str(), reason, "autonomy level changed");
        self.change_log.push(LevelChange { from, to, reason: reason.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_risk_requires_full_auto() {
        assert!(!permits(AutonomyLevel::ExecuteReview, RiskLevel::Critical));
        assert!(permits(AutonomyLevel::FullAuto, RiskLevel::Critical));
    }

    #[test]
    fn execute_safe_blocks_high_but_allows_low() {
        assert!(!permits(AutonomyLevel::ExecuteSafe, RiskLevel::High));
        assert!(permits(AutonomyLevel::ExecuteSafe, RiskLevel::Low));
    }

    #[test]
    fn promotion_after_success_streak() {
        let mut mgr = AutonomyManager::new(AutonomyLevel::ExecuteSafe);
        for _ in 0..SUCCESS_PROMOTION_COUNT {
            mgr.record_outcome(true);
        }
        assert_eq!(mgr.level(), AutonomyLevel::ExecuteReview);
        assert_eq!(mgr.change_log().len(), 1);
    }

    #[test]
    fn demotion_after_error_streak() {
        let mut mgr = AutonomyManager::new(AutonomyLevel::ExecuteReview);
        for _ in 0..ERROR_DEMOTION_COUNT {
            mgr.record_outcome(false);
        }
        assert_eq!(mgr.level(), AutonomyLevel::ExecuteSafe);
    }

    #[test]
    fn success_resets_failure_streak() {
        let mut mgr = AutonomyManager::new(AutonomyLevel::ExecuteReview);
        mgr.record_outcome(false);
        mgr.record_outcome(true);
        mgr.record_outcome(false);
        assert_eq!(mgr.level(), AutonomyLevel::ExecuteReview, "streak should have reset");
    }

    #[test]
    fn effective_level_never_exceeds_current_level() {
        let mgr = AutonomyManager::new(AutonomyLevel::FullAuto);
        assert!(mgr.effective_level(Some(0.1)) <= mgr.level());
        assert!(mgr.effective_level(Some(0.9)) <= mgr.level());
        assert!(mgr.effective_level(None) <= mgr.level());
    }

    #[test]
    fn low_confidence_demotes_two_levels() {
        let mgr = AutonomyManager::new(AutonomyLevel::FullAuto);
        assert_eq!(mgr.effective_level(Some(0.1)), AutonomyLevel::ExecuteReview);
    }

    #[test]
    fn destructive_action_requires_full_auto() {
        let mgr = AutonomyManager::new(AutonomyLevel::ExecuteReview);
        let decision = mgr.check("bash", "git push --force origin main", None);
        assert!(!decision.allowed);
        assert_eq!(decision.required_level, AutonomyLevel::FullAuto);
        assert!(decision.requires_approval);
    }

    #[test]
    fn read_only_action_always_allowed() {
        let mgr = AutonomyManager::new(AutonomyLevel::Observe);
        let decision = mgr.check("read_file", "src/lib.rs", None);
        assert!(decision.allowed);
    }
}
