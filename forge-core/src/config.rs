//! Run configuration, assembled once at startup from defaults, an optional
//! `arcadia.toml`, and environment variables, then handed around as an
//! immutable value (see [`crate::context::Context`]) instead of a global.

use crate::error::{ForgeError, ForgeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_model() -> String {
    "claude-sonnet".to_string()
}
fn default_max_iterations() -> u32 {
    50
}
fn default_budget_ceiling_usd() -> f64 {
    25.0
}
fn default_budget_warning_threshold() -> f64 {
    0.8
}
fn default_max_no_progress() -> u32 {
    5
}
fn default_audit_cadence() -> u32 {
    10
}
fn default_autonomy_level() -> String {
    "execute_safe".to_string()
}
fn default_inter_session_delay_secs() -> u64 {
    3
}
fn default_assistant_base_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}
fn default_assistant_token_env() -> String {
    "ARCADIA_API_KEY".to_string()
}

/// File-overlay shape for `arcadia.toml`. Every field optional; absent
/// fields fall back to the built-in default, then to an environment
/// variable override (see [`Config::load`]).
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    model: Option<String>,
    max_iterations: Option<u32>,
    budget_ceiling_usd: Option<f64>,
    budget_warning_threshold: Option<f64>,
    max_no_progress: Option<u32>,
    audit_cadence: Option<u32>,
    autonomy_level: Option<String>,
    inter_session_delay_secs: Option<u64>,
    assistant_base_url: Option<String>,
    assistant_token_env: Option<String>,
}

/// Validated run configuration, threaded explicitly through the
/// Orchestrator rather than read from globals at each call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_budget_ceiling_usd")]
    pub budget_ceiling_usd: f64,
    #[serde(default = "default_budget_warning_threshold")]
    pub budget_warning_threshold: f64,
    #[serde(default = "default_max_no_progress")]
    pub max_no_progress: u32,
    #[serde(default = "default_audit_cadence")]
    pub audit_cadence: u32,
    #[serde(default = "default_autonomy_level")]
    pub autonomy_level: String,
    #[serde(default = "default_inter_session_delay_secs")]
    pub inter_session_delay_secs: u64,
    #[serde(default = "default_assistant_base_url")]
    pub assistant_base_url: String,
    #[serde(default = "default_assistant_token_env")]
    pub assistant_token_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_iterations: default_max_iterations(),
            budget_ceiling_usd: default_budget_ceiling_usd(),
            budget_warning_threshold: default_budget_warning_threshold(),
            max_no_progress: default_max_no_progress(),
            audit_cadence: default_audit_cadence(),
            autonomy_level: default_autonomy_level(),
            inter_session_delay_secs: default_inter_session_delay_secs(),
            assistant_base_url: default_assistant_base_url(),
            assistant_token_env: default_assistant_token_env(),
        }
    }
}

impl Config {
    /// Load defaults, overlay `<project>/arcadia.toml` if present, then
    /// overlay environment variables, and validate the result.
    pub fn load(project_dir: &Path) -> ForgeResult<Self> {
        let mut cfg = Config::default();

        let toml_path = project_dir.join("arcadia.toml");
        if toml_path.exists() {
            let text = std::fs::read_to_string(&toml_path)?;
            let file: ConfigFile = toml::from_str(&text)
                .map_err(|e| ForgeError::config(format!("arcadia.toml: {e}")))?;
            cfg.apply_file(file);
        }

        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.model {
            self.model = v;
        }
        if let Some(v) = file.max_iterations {
            self.max_iterations = v;
        }
        if let Some(v) = file.budget_ceiling_usd {
            self.budget_ceiling_usd = v;
        }
        if let Some(v) = file.budget_warning_threshold {
            self.budget_warning_threshold = v;
        }
        if let Some(v) = file.max_no_progress {
            self.max_no_progress = v;
        }
        if let Some(v) = file.audit_cadence {
            self.audit_cadence = v;
        }
        if let Some(v) = file.autonomy_level {
            self.autonomy_level = v;
        }
        if let Some(v) = file.inter_session_delay_secs {
            self.inter_session_delay_secs = v;
        }
        if let Some(v) = file.assistant_base_url {
            self.assistant_base_url = v;
        }
        if let Some(v) = file.assistant_token_env {
            self.assistant_token_env = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ARCADIA_MODEL") {
            self.model = v;
        }
        if let Some(v) = env_parsed("ARCADIA_MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Some(v) = env_parsed("ARCADIA_BUDGET_CEILING_USD") {
            self.budget_ceiling_usd = v;
        }
        if let Some(v) = env_parsed("ARCADIA_BUDGET_WARNING_THRESHOLD") {
            self.budget_warning_threshold = v;
        }
        if let Some(v) = env_parsed("ARCADIA_MAX_NO_PROGRESS") {
            self.max_no_progress = v;
        }
        if let Some(v) = env_parsed("ARCADIA_AUDIT_CADENCE") {
            self.audit_cadence = v;
        }
        if let Ok(v) = std::env::var("ARCADIA_AUTONOMY_LEVEL") {
            self.autonomy_level = v;
        }
        if let Some(v) = env_parsed("ARCADIA_INTER_SESSION_DELAY_SECS") {
            self.inter_session_delay_secs = v;
        }
        if let Ok(v) = std::env::var("ARCADIA_ASSISTANT_BASE_URL") {
            self.assistant_base_url = v;
        }
        if let Ok(v) = std::env::var("ARCADIA_ASSISTANT_TOKEN_ENV") {
            self.assistant_token_env = v;
        }
    }

    fn validate(&self) -> ForgeResult<()> {
        if self.max_iterations == 0 {
            return Err(ForgeError::config("max_iterations must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.budget_warning_threshold) {
            return Err(ForgeError::config(
                "budget_warning_threshold must be in [0, 1]",
            ));
        }
        if self.budget_ceiling_usd <= 0.0 {
            return Err(ForgeError::config("budget_ceiling_usd must be positive"));
        }
        crate::autonomy::AutonomyLevel::parse(&self.autonomy_level).ok_or_else(|| {
            ForgeError::config(format!("unknown autonomy level '{}'", self.autonomy_level))
        })?;
        Ok(())
    }

    /// Credential for the assistant client. Missing/empty is a structured
    /// configuration error, not a panic, surfaced before any session runs.
    pub fn assistant_token(&self) -> ForgeResult<String> {
        std::env::var(&self.assistant_token_env)
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ForgeError::config(format!(
                    "missing or empty credential in environment variable '{}'",
                    self.assistant_token_env
                ))
            })
    }

    pub fn db_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".arcadia").join("project.db")
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn file_overlay_wins_over_default_but_not_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("arcadia.toml"), "max_iterations = 77\n").unwrap();
        std::env::remove_var("ARCADIA_MAX_ITERATIONS");
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.max_iterations, 77);
    }

    #[test]
    fn invalid_budget_threshold_rejected() {
        let mut cfg = Config::default();
        cfg.budget_warning_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_autonomy_level_rejected() {
        let mut cfg = Config::default();
        cfg.autonomy_level = "godmode".to_string();
        assert!(cfg.validate().is_err());
    }
}
