use crate::model::{ActionId, RuleId};
use hook_core::CoreError;
use hook_script::ScriptError;
use thiserror::Error;

/// Errors raised while managing or firing rules.
///
/// Inline-script failures are carried transparently; the bus handler
/// unwraps them again so callers of a record save see the [`ScriptError`]
/// itself.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("guard of rule {rule_id} failed to evaluate: {source}")]
    GuardEvaluation {
        rule_id: RuleId,
        #[source]
        source: ScriptError,
    },

    #[error("{reference}: reference not found")]
    ActionLookup { reference: String },

    #[error("{reference} raised: {source}")]
    ActionExecution {
        reference: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{mode} task {reference} failed: {source}")]
    TaskSubmission {
        reference: String,
        mode: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Action definition not found: {0}")]
    ActionNotFound(ActionId),

    #[error("Rule definition not found: {0}")]
    RuleNotFound(RuleId),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl<T> From<std::sync::PoisonError<T>> for RuleError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RuleError::Core(CoreError::Poisoned(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
