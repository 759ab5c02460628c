//! Error taxonomy for the pipeline.
//!
//! Retryability is a property of the variant, never inferred from message
//! strings: each stage's error type says which of its failures are worth
//! retrying at that stage.

use crate::budget::Stage;
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by a completion provider.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// Network failures, rate limits, timeouts. Retryable.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// The provider rejected the request outright. Not retryable.
    #[error("provider rejected the request: {0}")]
    Permanent(String),
    /// The provider refused on content-policy grounds. Not retryable.
    #[error("content policy violation: {0}")]
    PolicyViolation(String),
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompletionError::Transient(_))
    }
}

/// A budget refusal. First-class and non-retryable for the current run.
#[derive(Debug, Clone, Error)]
#[error("budget denied at {stage} stage: {reason}")]
pub struct BudgetDenial {
    pub stage: Stage,
    pub reason: String,
}

/// Failures of the planning stage.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The topic itself is unusable. Rejected synchronously, never retried.
    #[error("invalid topic: {0}")]
    InvalidInput(String),
    /// The provider answered, but not with a well-formed plan. The
    /// coordinator decides whether to retry planning.
    #[error("plan response could not be parsed: {0}")]
    PlanParse(String),
    #[error(transparent)]
    BudgetDenied(#[from] BudgetDenial),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Failures of a single component-generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider hiccup or timeout; counts against the spec's retry budget.
    #[error("transient generation failure: {0}")]
    Transient(String),
    /// The provider refused the content. The spec is marked failed.
    #[error("content policy violation: {0}")]
    ContentPolicy(String),
    /// The provider rejected the request for a non-policy reason.
    #[error("provider rejected the request: {0}")]
    Provider(String),
    #[error(transparent)]
    BudgetDenied(#[from] BudgetDenial),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::Transient(_))
    }
}

impl From<CompletionError> for GenerationError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Transient(msg) => GenerationError::Transient(msg),
            CompletionError::PolicyViolation(msg) => GenerationError::ContentPolicy(msg),
            CompletionError::Permanent(msg) => GenerationError::Provider(msg),
        }
    }
}

/// Failures of the persistence gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("objective {0} not found")]
    ObjectiveNotFound(Uuid),
    #[error("component {0} not found")]
    ComponentNotFound(Uuid),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(CompletionError::Transient("timeout".into()).is_retryable());
        assert!(!CompletionError::Permanent("bad request".into()).is_retryable());
        assert!(GenerationError::Transient("rate limit".into()).is_retryable());
        assert!(!GenerationError::ContentPolicy("refused".into()).is_retryable());
        assert!(
            !GenerationError::BudgetDenied(BudgetDenial {
                stage: Stage::Generation,
                reason: "daily limit reached".into(),
            })
            .is_retryable()
        );
    }

    #[test]
    fn completion_errors_classify_into_generation_errors() {
        let err: GenerationError = CompletionError::PolicyViolation("refused".into()).into();
        assert!(matches!(err, GenerationError::ContentPolicy(_)));
        let err: GenerationError = CompletionError::Transient("reset".into()).into();
        assert!(matches!(err, GenerationError::Transient(_)));
        let err: GenerationError = CompletionError::Permanent("bad model".into()).into();
        assert!(matches!(err, GenerationError::Provider(_)));
    }

    #[test]
    fn denial_message_names_the_stage() {
        let denial = BudgetDenial {
            stage: Stage::Validation,
            reason: "monthly limit reached".into(),
        };
        assert!(denial.to_string().contains("validation"));
    }
}
