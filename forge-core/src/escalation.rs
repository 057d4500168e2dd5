//! Escalation Engine: a deterministic rule set that decides, from a snapshot
//! of recent session history, whether the orchestrator should keep going
//! unattended or raise a [`crate::human_injection`] request, and what kind
//! of request that should be.

use crate::risk::RiskLevel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    CriticalRisk,
    RepeatedFailure,
    NoProgress,
    BudgetWarning,
    StallDetected,
    FeatureRegression,
    IrreversibleAction,
    SourceOfTruthModification,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CriticalRisk => "critical-risk action proposed",
            Self::RepeatedFailure => "same feature failed repeatedly",
            Self::NoProgress => "no feature has advanced in too many iterations",
            Self::BudgetWarning => "budget warning threshold crossed",
            Self::StallDetected => "stall detector flagged a cycle",
            Self::FeatureRegression => "a previously passing feature is now failing",
            Self::IrreversibleAction => "proposed action cannot be undone",
            Self::SourceOfTruthModification => "proposed action touches the source of truth",
        };
        write!(f, "{s}")
    }
}

/// What kind of response the raised injection point is asking for. Threaded
/// through to [`crate::human_injection::HumanInjection::raise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionType {
    Decision,
    Approval,
    Guidance,
    Review,
    Redirect,
}

impl InjectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Approval => "approval",
            Self::Guidance => "guidance",
            Self::Review => "review",
            Self::Redirect => "redirect",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub reasons: Vec<EscalationReason>,
    /// The severity-highest rule that fired, used to pick the injection
    /// type, message, and timeout for the point that gets raised.
    pub leading_rule: Option<RuleSummary>,
}

/// A [`Rule`] stripped of its condition closure, safe to serialize and hand
/// to [`crate::human_injection::HumanInjection`].
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: u8,
    pub injection_type: InjectionType,
    pub message: String,
    pub suggested_actions: Vec<String>,
    pub auto_pause: bool,
    pub timeout_seconds: u32,
    pub default_action: Option<&'static str>,
}

/// Input snapshot the engine reasons over. Assembled by the Orchestrator
/// each iteration from the components that actually own this state
/// (Autonomy Manager, Feature Store, Stall Detector, Observability).
#[derive(Debug, Clone)]
pub struct EscalationContext {
    pub proposed_risk: Option<RiskLevel>,
    pub autonomy_permits_risk: bool,
    pub proposed_action_irreversible: bool,
    pub proposed_action_affects_source_of_truth: bool,
    pub current_feature_failure_count: u32,
    pub failure_threshold: u32,
    pub iterations_since_progress: u32,
    pub no_progress_threshold: u32,
    pub budget_fraction_used: f64,
    pub budget_warning_threshold: f64,
    pub stall_flagged: bool,
    pub feature_regressed: bool,
}

/// What a [`Rule`]'s condition actually inspects. Kept alongside the
/// evaluating closure purely as machine-readable metadata (for the CLI's
/// `escalation rules` listing); the closure is what the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    ThresholdBelow,
    ThresholdAbove,
    Equals,
    NotEquals,
    Contains,
    Regression,
    Custom,
}

type Condition = fn(&EscalationContext) -> bool;

pub struct Rule {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub condition_kind: ConditionKind,
    pub field: &'static str,
    pub severity: u8,
    pub injection_type: InjectionType,
    pub message_template: &'static str,
    pub suggested_actions: &'static [&'static str],
    pub auto_pause: bool,
    pub timeout_seconds: u32,
    pub default_action: Option<&'static str>,
    reason: EscalationReason,
    condition: Condition,
}

const RULES: &[Rule] = &[
    Rule {
        id: "critical-risk",
        name: "Critical risk proposed",
        description: "An action assessed as critical risk, or one autonomy refuses to permit, is on the table.",
        condition_kind: ConditionKind::Custom,
        field: "proposed_risk",
        severity: 5,
        injection_type: InjectionType::Approval,
        message_template: "A critical-risk action needs explicit approval before it runs.",
        suggested_actions: &["approve", "deny", "suggest an alternative"],
        auto_pause: true,
        timeout_seconds: 600,
        default_action: Some("deny"),
        reason: EscalationReason::CriticalRisk,
        condition: |c| matches!(c.proposed_risk, Some(RiskLevel::Critical)) || !c.autonomy_permits_risk,
    },
    Rule {
        id: "irreversible-action",
        name: "Irreversible action proposed",
        description: "The action cannot be undone by a checkpoint rollback.",
        condition_kind: ConditionKind::Equals,
        field: "proposed_action_irreversible",
        severity: 5,
        injection_type: InjectionType::Approval,
        message_template: "This action can't be rolled back. Confirm before proceeding.",
        suggested_actions: &["approve", "deny"],
        auto_pause: true,
        timeout_seconds: 600,
        default_action: Some("deny"),
        reason: EscalationReason::IrreversibleAction,
        condition: |c| c.proposed_action_irreversible,
    },
    Rule {
        id: "source-of-truth",
        name: "Source of truth modification",
        description: "The action touches version control history, the database, or another system of record.",
        condition_kind: ConditionKind::Equals,
        field: "proposed_action_affects_source_of_truth",
        severity: 4,
        injection_type: InjectionType::Approval,
        message_template: "This action modifies a source of truth (git history, database, etc.).",
        suggested_actions: &["approve", "deny"],
        auto_pause: true,
        timeout_seconds: 600,
        default_action: Some("deny"),
        reason: EscalationReason::SourceOfTruthModification,
        condition: |c| c.proposed_action_affects_source_of_truth,
    },
    Rule {
        id: "stall-detected",
        name: "Stall detected",
        description: "The in-session or cross-session cycle tracker flagged a repeating pattern.",
        condition_kind: ConditionKind::Equals,
        field: "stall_flagged",
        severity: 3,
        injection_type: InjectionType::Guidance,
        message_template: "The session appears stuck in a cycle. Provide direction to break out of it.",
        suggested_actions: &["redirect", "pause and investigate", "roll back to last checkpoint"],
        auto_pause: true,
        timeout_seconds: 300,
        default_action: None,
        reason: EscalationReason::StallDetected,
        condition: |c| c.stall_flagged,
    },
    Rule {
        id: "feature-regression",
        name: "Feature regression",
        description: "A feature that was previously passing is failing again.",
        condition_kind: ConditionKind::Regression,
        field: "feature_regressed",
        severity: 4,
        injection_type: InjectionType::Review,
        message_template: "A previously passing feature has regressed. Review before continuing.",
        suggested_actions: &["roll back to last checkpoint", "continue and fix forward"],
        auto_pause: true,
        timeout_seconds: 300,
        default_action: Some("roll back to last checkpoint"),
        reason: EscalationReason::FeatureRegression,
        condition: |c| c.feature_regressed,
    },
    Rule {
        id: "repeated-failure",
        name: "Repeated failure",
        description: "The current feature has failed at least `failure_threshold` times in a row.",
        condition_kind: ConditionKind::ThresholdAbove,
        field: "current_feature_failure_count",
        severity: 3,
        injection_type: InjectionType::Guidance,
        message_template: "This feature keeps failing. Provide guidance or skip it.",
        suggested_actions: &["provide guidance", "skip this feature", "roll back to last checkpoint"],
        auto_pause: false,
        timeout_seconds: 300,
        default_action: None,
        reason: EscalationReason::RepeatedFailure,
        condition: |c| c.current_feature_failure_count >= c.failure_threshold,
    },
    Rule {
        id: "no-progress",
        name: "No progress",
        description: "No feature has advanced in `no_progress_threshold` iterations.",
        condition_kind: ConditionKind::ThresholdAbove,
        field: "iterations_since_progress",
        severity: 2,
        injection_type: InjectionType::Guidance,
        message_template: "No progress in a while. Provide direction or let the session end.",
        suggested_actions: &["provide guidance", "end session"],
        auto_pause: false,
        timeout_seconds: 300,
        default_action: None,
        reason: EscalationReason::NoProgress,
        condition: |c| c.iterations_since_progress >= c.no_progress_threshold,
    },
    Rule {
        id: "budget-warning",
        name: "Budget warning",
        description: "Spend has crossed the configured warning fraction of the session budget.",
        condition_kind: ConditionKind::ThresholdAbove,
        field: "budget_fraction_used",
        severity: 2,
        injection_type: InjectionType::Decision,
        message_template: "Budget warning threshold crossed. Continue, or stop here?",
        suggested_actions: &["continue", "stop session"],
        auto_pause: false,
        timeout_seconds: 300,
        default_action: Some("continue"),
        reason: EscalationReason::BudgetWarning,
        condition: |c| c.budget_fraction_used >= c.budget_warning_threshold,
    },
];

pub struct EscalationEngine;

impl EscalationEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn rules(&self) -> &'static [Rule] {
        RULES
    }

    /// Evaluate every rule against `ctx` and collect every reason that
    /// fired, rather than short-circuiting on the first match, so a human
    /// injection request can report all of them at once. `leading_rule` is
    /// the highest-severity match, used to shape the actual injection point.
    pub fn decide(&self, ctx: &EscalationContext) -> EscalationDecision {
        let fired: Vec<&Rule> = RULES.iter().filter(|r| (r.condition)(ctx)).collect();
        let reasons = fired.iter().map(|r| r.reason).collect();
        let leading_rule = fired
            .iter()
            .max_by_key(|r| r.severity)
            .map(|r| RuleSummary {
                id: r.id,
                name: r.name,
                severity: r.severity,
                injection_type: r.injection_type,
                message: r.message_template.to_string(),
                suggested_actions: r.suggested_actions.iter().map(|s| s.to_string()).collect(),
                auto_pause: r.auto_pause,
                timeout_seconds: r.timeout_seconds,
                default_action: r.default_action,
            });
        EscalationDecision {
            should_escalate: !fired.is_empty(),
            reasons,
            leading_rule,
        }
    }
}

impl Default for EscalationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ctx() -> EscalationContext {
        EscalationContext {
            proposed_risk: Some(RiskLevel::Safe),
            autonomy_permits_risk: true,
            proposed_action_irreversible: false,
            proposed_action_affects_source_of_truth: false,
            current_feature_failure_count: 0,
            failure_threshold: 3,
            iterations_since_progress: 0,
            no_progress_threshold: 5,
            budget_fraction_used: 0.1,
            budget_warning_threshold: 0.8,
            stall_flagged: false,
            feature_regressed: false,
        }
    }

    #[test]
    fn clean_context_does_not_escalate() {
        let decision = EscalationEngine::new().decide(&base_ctx());
        assert!(!decision.should_escalate);
        assert!(decision.leading_rule.is_none());
    }

    #[test]
    fn critical_risk_always_escalates() {
        let mut ctx = base_ctx();
        ctx.proposed_risk = Some(RiskLevel::Critical);
        let decision = EscalationEngine::new().decide(&ctx);
        assert!(decision.should_escalate);
        assert!(decision.reasons.contains(&EscalationReason::CriticalRisk));
        assert_eq!(decision.leading_rule.unwrap().injection_type, InjectionType::Approval);
    }

    #[test]
    fn multiple_reasons_all_reported() {
        let mut ctx = base_ctx();
        ctx.stall_flagged = true;
        ctx.budget_fraction_used = 0.95;
        let decision = EscalationEngine::new().decide(&ctx);
        assert_eq!(decision.reasons.len(), 2);
    }

    #[test]
    fn autonomy_denial_escalates_even_at_moderate_risk() {
        let mut ctx = base_ctx();
        ctx.proposed_risk = Some(RiskLevel::Moderate);
        ctx.autonomy_permits_risk = false;
        let decision = EscalationEngine::new().decide(&ctx);
        assert!(decision.should_escalate);
    }

    #[test]
    fn feature_regression_raises_a_review_request() {
        let mut ctx = base_ctx();
        ctx.feature_regressed = true;
        let decision = EscalationEngine::new().decide(&ctx);
        assert!(decision.reasons.contains(&EscalationReason::FeatureRegression));
        assert_eq!(decision.leading_rule.unwrap().injection_type, InjectionType::Review);
    }

    #[test]
    fn irreversible_action_outranks_repeated_failure() {
        let mut ctx = base_ctx();
        ctx.proposed_action_irreversible = true;
        ctx.current_feature_failure_count = 5;
        let decision = EscalationEngine::new().decide(&ctx);
        assert_eq!(decision.leading_rule.unwrap().id, "irreversible-action");
    }

    #[test]
    fn rules_exposes_the_full_table() {
        assert!(EscalationEngine::new().rules().iter().any(|r| r.id == "feature-regression"));
    }
}
