//! Quality validation.
//!
//! Checks run cheap-to-expensive and short-circuit on the first hard
//! failure: structural shape, then length bounds, then a second completion
//! call that fact-checks the content against the topic. A rejected verdict
//! feeds the coordinator's retry loop; a critic call that cannot be made
//! flags the content for human review instead of silently passing it.

use crate::budget::{BudgetGuard, Stage};
use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::CompletionError;
use crate::types::{ComponentKind, ComponentSpec, ComprehensionCheck};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CRITIC_MAX_TOKENS: u32 = 200;
const CRITIC_TEMPERATURE: f32 = 0.3;

const CRITIC_SYSTEM_PROMPT: &str =
    "You are a harsh fact-checker focused on educational content accuracy.";

/// Outcome of the validation pipeline for one draft.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Approved,
    /// Content defect: regenerate, up to the retry limit.
    Rejected { reasons: Vec<String> },
    /// Needs human review, but does not block sibling components.
    Flagged { reasons: Vec<String> },
}

/// Runs the structural, length, and semantic checks for one component.
pub struct QualityValidator {
    client: Arc<dyn CompletionClient>,
    budget: Arc<BudgetGuard>,
    call_timeout: Duration,
}

impl QualityValidator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        budget: Arc<BudgetGuard>,
        call_timeout: Duration,
    ) -> Self {
        Self { client, budget, call_timeout }
    }

    pub async fn validate(&self, content: &str, spec: &ComponentSpec, topic: &str) -> Verdict {
        if let Some(reason) = schema_check(content, spec) {
            info!(kind = %spec.kind, ordinal = spec.ordinal, %reason, "schema check rejected draft");
            return Verdict::Rejected { reasons: vec![reason] };
        }
        if let Some(reason) = length_check(content, spec) {
            info!(kind = %spec.kind, ordinal = spec.ordinal, %reason, "length check rejected draft");
            return Verdict::Rejected { reasons: vec![reason] };
        }
        self.fact_check(content, spec, topic).await
    }

    /// Ask the provider to assess the content. This call is itself metered
    /// and may fail; any failure downgrades to `Flagged` rather than
    /// blocking the pipeline or silently approving.
    async fn fact_check(&self, content: &str, spec: &ComponentSpec, topic: &str) -> Verdict {
        let user = critic_prompt(content, topic);
        let estimated = BudgetGuard::estimate_tokens(&user, CRITIC_MAX_TOKENS);

        let grant = match self.budget.authorize(Stage::Validation, estimated).await {
            Ok(grant) => grant,
            Err(denial) => {
                warn!(kind = %spec.kind, ordinal = spec.ordinal, %denial, "fact check skipped");
                return Verdict::Flagged { reasons: vec![format!("fact check skipped: {denial}")] };
            }
        };

        let request = CompletionRequest {
            system: CRITIC_SYSTEM_PROMPT.to_string(),
            user,
            max_tokens: CRITIC_MAX_TOKENS,
            temperature: CRITIC_TEMPERATURE,
        };
        match tokio::time::timeout(self.call_timeout, self.client.complete(request)).await {
            Ok(Ok(completion)) => {
                self.budget.settle(grant, completion.tokens_in, completion.tokens_out).await;
                let verdict = completion.text.trim();
                if verdict.starts_with("APPROVED") {
                    Verdict::Approved
                } else {
                    let reason = verdict.strip_prefix("FLAGGED:").unwrap_or(verdict).trim();
                    Verdict::Rejected { reasons: vec![format!("fact check failed: {reason}")] }
                }
            }
            Ok(Err(err)) => {
                self.budget.cancel(grant).await;
                warn!(kind = %spec.kind, ordinal = spec.ordinal, error = %err, "fact check unavailable");
                Verdict::Flagged { reasons: vec![format!("fact check unavailable: {err}")] }
            }
            Err(_) => {
                self.budget.cancel(grant).await;
                let err = CompletionError::Transient("fact check call timed out".to_string());
                warn!(kind = %spec.kind, ordinal = spec.ordinal, error = %err, "fact check unavailable");
                Verdict::Flagged { reasons: vec![format!("fact check unavailable: {err}")] }
            }
        }
    }
}

fn schema_check(content: &str, spec: &ComponentSpec) -> Option<String> {
    if content.trim().is_empty() {
        return Some("content is empty".to_string());
    }
    if spec.kind == ComponentKind::ComprehensionCheck {
        return match serde_json::from_str::<ComprehensionCheck>(content) {
            Ok(check) => check.schema_issue(),
            Err(err) => Some(format!("comprehension check is not valid JSON: {err}")),
        };
    }
    None
}

fn length_check(content: &str, spec: &ComponentSpec) -> Option<String> {
    let profile = spec.kind.profile();
    // For a comprehension check the bounds apply to the question text; the
    // surrounding JSON envelope has no meaningful length of its own.
    let measured: usize = if spec.kind == ComponentKind::ComprehensionCheck {
        match serde_json::from_str::<ComprehensionCheck>(content) {
            Ok(check) => check.question.chars().count(),
            Err(_) => return Some("comprehension check is not valid JSON".to_string()),
        }
    } else {
        content.chars().count()
    };
    if measured < profile.min_chars || measured > profile.max_chars {
        return Some(format!(
            "length out of bounds: {measured} chars not in {}..={} for {}",
            profile.min_chars, profile.max_chars, spec.kind
        ));
    }
    None
}

fn critic_prompt(content: &str, topic: &str) -> String {
    format!(
        "Your only goal is to find errors. Analyze the following TEXT for any factual \
         inaccuracies, logical fallacies, or misleading statements. If the text is 100% \
         accurate, respond with \"APPROVED\". If you find any issue, respond with \
         \"FLAGGED: [concise reason for flagging]\".\n\nTEXT: {content}\nTOPIC: {topic}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetConfig;
    use crate::completion::{Completion, MockCompletionClient};

    fn fact_spec() -> ComponentSpec {
        ComponentSpec {
            kind: ComponentKind::Fact,
            guidance: "State a key fact".to_string(),
            ordinal: 1,
        }
    }

    fn check_spec() -> ComponentSpec {
        ComponentSpec {
            kind: ComponentKind::ComprehensionCheck,
            guidance: "Test understanding".to_string(),
            ordinal: 5,
        }
    }

    fn validator(client: MockCompletionClient) -> (QualityValidator, Arc<BudgetGuard>) {
        let budget = Arc::new(BudgetGuard::new(BudgetConfig::default()));
        (
            QualityValidator::new(Arc::new(client), Arc::clone(&budget), Duration::from_secs(5)),
            budget,
        )
    }

    fn approving_client() -> MockCompletionClient {
        let mut client = MockCompletionClient::new();
        client.expect_complete().returning(|_| {
            Ok(Completion { text: "APPROVED".to_string(), tokens_in: 50, tokens_out: 2 })
        });
        client
    }

    const VALID_FACT: &str = "Around 97% of Earth's water sits in the oceans as salt water.";

    #[tokio::test]
    async fn empty_content_is_rejected_before_any_call() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let (validator, budget) = validator(client);
        let verdict = validator.validate("   ", &fact_spec(), "The Water Cycle").await;
        assert!(matches!(verdict, Verdict::Rejected { .. }));
        assert!(budget.records().await.is_empty());
    }

    #[tokio::test]
    async fn oversized_content_is_rejected_with_length_reason() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let (validator, _) = validator(client);
        let long = "x".repeat(500);
        let verdict = validator.validate(&long, &fact_spec(), "The Water Cycle").await;
        match verdict {
            Verdict::Rejected { reasons } => {
                assert!(reasons[0].contains("length out of bounds"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_check_json_is_rejected_at_schema() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let (validator, _) = validator(client);
        let verdict = validator
            .validate("Here is your question!", &check_spec(), "The Water Cycle")
            .await;
        match verdict {
            Verdict::Rejected { reasons } => assert!(reasons[0].contains("not valid JSON")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_with_bad_index_is_rejected_at_schema() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let (validator, _) = validator(client);
        let content = r#"{"question": "What drives evaporation in the water cycle?",
            "options": ["The sun", "The moon"], "correct_index": 5,
            "explanation": "Solar energy heats surface water."}"#;
        let verdict = validator.validate(content, &check_spec(), "The Water Cycle").await;
        match verdict {
            Verdict::Rejected { reasons } => assert!(reasons[0].contains("out of range")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn well_formed_check_passes_through_the_critic() {
        let (validator, budget) = validator(approving_client());
        let content = r#"{"question": "What drives evaporation in the water cycle?",
            "options": ["The sun", "The moon", "Tides", "Wind"], "correct_index": 0,
            "explanation": "Solar energy heats surface water."}"#;
        let verdict = validator.validate(content, &check_spec(), "The Water Cycle").await;
        assert_eq!(verdict, Verdict::Approved);
        assert_eq!(budget.records().await.len(), 1);
        assert_eq!(budget.records().await[0].stage, Stage::Validation);
    }

    #[tokio::test]
    async fn critic_approval_approves() {
        let (validator, _) = validator(approving_client());
        let verdict = validator.validate(VALID_FACT, &fact_spec(), "The Water Cycle").await;
        assert_eq!(verdict, Verdict::Approved);
    }

    #[tokio::test]
    async fn critic_objection_rejects_for_regeneration() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().returning(|_| {
            Ok(Completion {
                text: "FLAGGED: the percentage is overstated".to_string(),
                tokens_in: 50,
                tokens_out: 8,
            })
        });
        let (validator, _) = validator(client);
        let verdict = validator.validate(VALID_FACT, &fact_spec(), "The Water Cycle").await;
        match verdict {
            Verdict::Rejected { reasons } => {
                assert!(reasons[0].contains("the percentage is overstated"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn critic_outage_flags_instead_of_passing() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .returning(|_| Err(CompletionError::Transient("connection reset".to_string())));
        let (validator, budget) = validator(client);
        let verdict = validator.validate(VALID_FACT, &fact_spec(), "The Water Cycle").await;
        match verdict {
            Verdict::Flagged { reasons } => assert!(reasons[0].contains("unavailable")),
            other => panic!("expected flag, got {other:?}"),
        }
        // The failed call released its reservation and recorded nothing.
        assert!(budget.records().await.is_empty());
    }

    #[tokio::test]
    async fn budget_denial_flags_instead_of_blocking() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let budget = Arc::new(BudgetGuard::new(BudgetConfig {
            daily_limit_usd: 0.0,
            ..BudgetConfig::default()
        }));
        let validator =
            QualityValidator::new(Arc::new(client), Arc::clone(&budget), Duration::from_secs(5));
        let verdict = validator.validate(VALID_FACT, &fact_spec(), "The Water Cycle").await;
        match verdict {
            Verdict::Flagged { reasons } => assert!(reasons[0].contains("skipped")),
            other => panic!("expected flag, got {other:?}"),
        }
    }
}
