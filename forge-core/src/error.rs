//! Crate-wide error taxonomy.
//!
//! Every fallible public operation returns one of these instead of panicking.
//! Component-specific detail lives in the variant; the Orchestrator matches on
//! variants rather than propagating blindly across the outer loop boundary.

use thiserror::Error;

pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("feature {index} not found")]
    FeatureNotFound { index: u32 },

    #[error("dependency cycle: adding {from} -> {to} would create a cycle through {path:?}")]
    DependencyCycle {
        from: u32,
        to: u32,
        path: Vec<u32>,
    },

    #[error("checkpoint {id} not found")]
    CheckpointNotFound { id: String },

    #[error("hypothesis {id} not found")]
    HypothesisNotFound { id: String },

    #[error("hypothesis {id} is already resolved")]
    HypothesisAlreadyResolved { id: String },

    #[error("decision {id} not found")]
    DecisionNotFound { id: String },

    #[error("decision {id} outcome already recorded")]
    OutcomeAlreadyRecorded { id: String },

    #[error("injection point {id} not found")]
    InjectionPointNotFound { id: String },

    #[error("git operation '{operation}' failed: {message}")]
    Git { operation: String, message: String },

    #[error("working directory mismatch: expected {expected}, got {actual}")]
    WorkingDirectoryMismatch { expected: String, actual: String },

    #[error("working directory has uncommitted changes")]
    UncommittedChanges,

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("assistant credential rejected or missing: {message}")]
    AssistantAuth { message: String },

    #[error("maximum iterations ({max}) reached")]
    MaxIterationsReached { max: u32 },

    #[error("first run rejected: new_requirements.txt present but no features exist yet")]
    FirstRunWithRequirements,

    #[error("persistence error: {0}")]
    Store(#[from] crate::persistence::StoreError),

    #[error("artifact source file not found: {path}")]
    ArtifactSourceMissing { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ForgeError {
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether the loop should treat this as a transient, retryable condition
    /// rather than a terminal one. Used by the Orchestrator's consecutive
    /// error-session counter.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Io(_))
    }
}
