use thiserror::Error;
use uuid::Uuid;

pub type NurtureResult<T> = Result<T, NurtureError>;

#[derive(Error, Debug)]
pub enum NurtureError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Execution log {0} already claimed by another sweep")]
    ClaimConflict(Uuid),

    #[error("Condition evaluation error: {0}")]
    ConditionEvaluation(String),

    #[error("Action execution error: {0}")]
    ActionExecution(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl NurtureError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} {}", what, id))
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ClaimConflict(_) => "claim_conflict",
            Self::ConditionEvaluation(_) => "condition_evaluation_error",
            Self::ActionExecution(_) => "action_execution_error",
            Self::Timeout(_) => "timeout",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<config::ConfigError> for NurtureError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
