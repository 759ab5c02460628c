//! Component generation.
//!
//! One call per component spec: build the type-specific prompt, clear it with
//! the budget guard, issue it under a hard timeout, and hand back the raw
//! draft. Quality judgement belongs to the validator; this module only
//! classifies provider failures so the coordinator knows what is retryable.

use crate::budget::{BudgetGuard, Stage};
use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::GenerationError;
use crate::types::{ComponentKind, ComponentSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const GENERATION_TEMPERATURE: f32 = 0.7;

/// Generation settings for one component kind: prompts plus the length
/// bounds the validator will later hold the content to.
#[derive(Debug, Clone, Copy)]
pub struct GenerationProfile {
    pub system_prompt: &'static str,
    pub instruction: &'static str,
    pub min_chars: usize,
    pub max_chars: usize,
    pub max_tokens: u32,
}

impl ComponentKind {
    /// The closed profile table. Selection is by enum variant, never by
    /// runtime string lookup.
    pub fn profile(&self) -> &'static GenerationProfile {
        match self {
            ComponentKind::CoreConcept => &GenerationProfile {
                system_prompt: "You are an expert educator who excels at explaining complex concepts in simple, clear terms.",
                instruction: "Define the core concept clearly and concisely, focusing on the essential understanding needed.",
                min_chars: 50,
                max_chars: 500,
                max_tokens: 1000,
            },
            ComponentKind::Fact => &GenerationProfile {
                system_prompt: "You are a fact-checker and educational content creator who presents accurate, verifiable information.",
                instruction: "State an important, accurate fact about the topic that students should know.",
                min_chars: 20,
                max_chars: 200,
                max_tokens: 1000,
            },
            ComponentKind::Example => &GenerationProfile {
                system_prompt: "You are an expert educator who creates clear, concrete examples that illustrate abstract concepts.",
                instruction: "Create a specific, concrete example that demonstrates the concept with real numbers or details.",
                min_chars: 50,
                max_chars: 800,
                max_tokens: 1000,
            },
            ComponentKind::Principle => &GenerationProfile {
                system_prompt: "You are an educational philosopher who identifies and explains fundamental principles.",
                instruction: "Explain a key principle or rule that governs this topic.",
                min_chars: 30,
                max_chars: 400,
                max_tokens: 1000,
            },
            ComponentKind::Analogy => &GenerationProfile {
                system_prompt: "You are a creative educator who makes complex topics accessible through analogies.",
                instruction: "Create a helpful analogy that relates this concept to something familiar.",
                min_chars: 40,
                max_chars: 600,
                max_tokens: 1000,
            },
            ComponentKind::Warning => &GenerationProfile {
                system_prompt: "You are an experienced educator who helps students avoid common mistakes.",
                instruction: "Highlight a common mistake or misconception students should avoid.",
                min_chars: 30,
                max_chars: 300,
                max_tokens: 1000,
            },
            ComponentKind::ComprehensionCheck => &GenerationProfile {
                system_prompt: "You are an expert assessment designer who creates fair, educational quiz questions.",
                instruction: "Create one multiple-choice question with 2-6 plausible options. Respond with a single JSON object with keys `question`, `options` (array of strings), `correct_index` (integer), and `explanation`. No commentary.",
                min_chars: 20,
                max_chars: 200,
                max_tokens: 1000,
            },
        }
    }
}

/// Unvalidated output of one generation call.
#[derive(Debug, Clone)]
pub struct Draft {
    pub content: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Generates one draft component per spec through the completion provider.
pub struct ComponentGenerator {
    client: Arc<dyn CompletionClient>,
    budget: Arc<BudgetGuard>,
    call_timeout: Duration,
}

impl ComponentGenerator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        budget: Arc<BudgetGuard>,
        call_timeout: Duration,
    ) -> Self {
        Self { client, budget, call_timeout }
    }

    /// Produce a draft for one spec. A timeout classifies as transient; a
    /// budget refusal is permanent for this run.
    pub async fn generate(
        &self,
        spec: &ComponentSpec,
        topic: &str,
    ) -> Result<Draft, GenerationError> {
        let profile = spec.kind.profile();
        let user = component_prompt(spec, topic, profile);

        let estimated = BudgetGuard::estimate_tokens(&user, profile.max_tokens);
        let grant = self.budget.authorize(Stage::Generation, estimated).await?;

        info!(kind = %spec.kind, ordinal = spec.ordinal, "generating component");
        let request = CompletionRequest {
            system: profile.system_prompt.to_string(),
            user,
            max_tokens: profile.max_tokens,
            temperature: GENERATION_TEMPERATURE,
        };
        match tokio::time::timeout(self.call_timeout, self.client.complete(request)).await {
            Ok(Ok(completion)) => {
                self.budget.settle(grant, completion.tokens_in, completion.tokens_out).await;
                Ok(Draft {
                    content: completion.text.trim().to_string(),
                    tokens_in: completion.tokens_in,
                    tokens_out: completion.tokens_out,
                })
            }
            Ok(Err(err)) => {
                self.budget.cancel(grant).await;
                Err(err.into())
            }
            Err(_) => {
                self.budget.cancel(grant).await;
                Err(GenerationError::Transient(
                    "component completion call timed out".to_string(),
                ))
            }
        }
    }
}

fn component_prompt(spec: &ComponentSpec, topic: &str, profile: &GenerationProfile) -> String {
    format!(
        "Create exactly one {kind} for the following topic.\n\n\
         TOPIC: {topic}\n\
         COMPONENT_TYPE: {kind}\n\
         GUIDANCE: {guidance}\n\n\
         {instruction}\n\n\
         YOUR OUTPUT (ONLY THE {kind} ITSELF):",
        kind = spec.kind,
        guidance = spec.guidance,
        instruction = profile.instruction,
    )
}
