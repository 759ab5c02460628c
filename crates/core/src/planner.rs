//! Plan generation.
//!
//! Turns a topic string into an ordered list of component specifications by
//! asking the provider for a strict-JSON learning plan and decoding it
//! immediately into typed structs. A malformed response is a
//! [`PlanningError::PlanParse`]; whether to retry planning is the
//! coordinator's decision, not this module's.

use crate::budget::{BudgetGuard, Stage};
use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::{CompletionError, PlanningError};
use crate::types::{ComponentKind, ComponentSpec, Plan};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const TOPIC_MIN_CHARS: usize = 3;
pub const TOPIC_MAX_CHARS: usize = 200;

const PLAN_MAX_TOKENS: u32 = 2000;
const PLAN_TEMPERATURE: f32 = 0.7;

const PLAN_SYSTEM_PROMPT: &str =
    "You are an expert educational architect who creates comprehensive learning plans.";

/// A parsed plan response: the objective's framing plus its component specs,
/// with the comprehension check appended as the final spec.
#[derive(Debug, Clone)]
pub struct PlanOutline {
    pub title: String,
    pub core_question: String,
    pub summary: String,
    pub plan: Plan,
}

#[derive(Deserialize)]
struct RawPlan {
    learning_objective: RawObjective,
    components: Vec<RawSpec>,
    comprehension_check: RawCheckPlan,
}

#[derive(Deserialize)]
struct RawObjective {
    title: String,
    core_question: String,
    summary: String,
}

#[derive(Deserialize)]
struct RawSpec {
    #[serde(rename = "type")]
    kind: String,
    guidance: String,
    ordinal: u32,
}

#[derive(Deserialize)]
struct RawCheckPlan {
    guidance: String,
}

/// Reject topics that are empty, trivially short, or absurdly long before
/// any provider call is issued or usage recorded.
pub fn validate_topic(topic: &str) -> Result<&str, PlanningError> {
    let trimmed = topic.trim();
    let chars = trimmed.chars().count();
    if chars < TOPIC_MIN_CHARS {
        return Err(PlanningError::InvalidInput(format!(
            "topic must be at least {TOPIC_MIN_CHARS} characters"
        )));
    }
    if chars > TOPIC_MAX_CHARS {
        return Err(PlanningError::InvalidInput(format!(
            "topic must be at most {TOPIC_MAX_CHARS} characters"
        )));
    }
    Ok(trimmed)
}

/// Produces a [`PlanOutline`] for a topic with a single metered completion.
pub struct PlanGenerator {
    client: Arc<dyn CompletionClient>,
    budget: Arc<BudgetGuard>,
    call_timeout: Duration,
}

impl PlanGenerator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        budget: Arc<BudgetGuard>,
        call_timeout: Duration,
    ) -> Self {
        Self { client, budget, call_timeout }
    }

    /// Generate and decode a plan for `topic`.
    ///
    /// Side effect: exactly one usage record on success; a cancelled
    /// reservation when the call fails.
    pub async fn generate(&self, topic: &str) -> Result<PlanOutline, PlanningError> {
        let topic = validate_topic(topic)?;
        let user = plan_prompt(topic);

        let estimated = BudgetGuard::estimate_tokens(&user, PLAN_MAX_TOKENS);
        let grant = self.budget.authorize(Stage::Planning, estimated).await?;

        info!(topic, "generating learning plan");
        let request = CompletionRequest {
            system: PLAN_SYSTEM_PROMPT.to_string(),
            user,
            max_tokens: PLAN_MAX_TOKENS,
            temperature: PLAN_TEMPERATURE,
        };
        let completion =
            match tokio::time::timeout(self.call_timeout, self.client.complete(request)).await {
                Ok(Ok(completion)) => completion,
                Ok(Err(err)) => {
                    self.budget.cancel(grant).await;
                    return Err(PlanningError::Completion(err));
                }
                Err(_) => {
                    self.budget.cancel(grant).await;
                    return Err(PlanningError::Completion(CompletionError::Transient(
                        "plan completion call timed out".to_string(),
                    )));
                }
            };
        self.budget.settle(grant, completion.tokens_in, completion.tokens_out).await;

        let outline = parse_plan(&completion.text)?;
        info!(topic, specs = outline.plan.specs.len(), "learning plan accepted");
        Ok(outline)
    }
}

fn plan_prompt(topic: &str) -> String {
    format!(
        r#"Decompose the learning objective "{topic}" into a complete set of atomic knowledge components.

Respond with a single JSON object, no commentary, in exactly this shape:
{{
  "learning_objective": {{
    "title": "The topic title",
    "core_question": "The central question this addresses",
    "summary": "Brief summary of the learning objective"
  }},
  "components": [
    {{ "type": "CORE_CONCEPT", "guidance": "Define the main concept", "ordinal": 1 }},
    {{ "type": "FACT", "guidance": "State important facts", "ordinal": 2 }},
    {{ "type": "EXAMPLE", "guidance": "Provide concrete examples", "ordinal": 3 }},
    {{ "type": "PRINCIPLE", "guidance": "Explain key principles", "ordinal": 4 }},
    {{ "type": "ANALOGY", "guidance": "Create helpful analogies", "ordinal": 5 }},
    {{ "type": "WARNING", "guidance": "Highlight common mistakes", "ordinal": 6 }}
  ],
  "comprehension_check": {{ "guidance": "Test understanding of the core concept" }}
}}

Component types must be drawn from: CORE_CONCEPT, FACT, EXAMPLE, PRINCIPLE, ANALOGY, WARNING.
Ensure the plan covers the topic comprehensively."#
    )
}

/// Strict decode of the provider's plan response. Anything structurally off
/// is a parse error; nothing loosely typed flows past this point.
fn parse_plan(text: &str) -> Result<PlanOutline, PlanningError> {
    let raw: RawPlan = serde_json::from_str(strip_fences(text))
        .map_err(|e| PlanningError::PlanParse(e.to_string()))?;

    if raw.components.is_empty() {
        return Err(PlanningError::PlanParse("plan contains no components".to_string()));
    }

    let mut specs = Vec::with_capacity(raw.components.len() + 1);
    for raw_spec in &raw.components {
        let kind: ComponentKind =
            raw_spec.kind.parse().map_err(PlanningError::PlanParse)?;
        if kind == ComponentKind::ComprehensionCheck {
            return Err(PlanningError::PlanParse(
                "comprehension check must not appear in the component list".to_string(),
            ));
        }
        specs.push(ComponentSpec {
            kind,
            guidance: raw_spec.guidance.clone(),
            ordinal: raw_spec.ordinal,
        });
    }
    specs.sort_by_key(|spec| spec.ordinal);

    let check_ordinal = specs.last().map(|spec| spec.ordinal + 1).unwrap_or(1);
    specs.push(ComponentSpec {
        kind: ComponentKind::ComprehensionCheck,
        guidance: raw.comprehension_check.guidance.clone(),
        ordinal: check_ordinal,
    });

    Ok(PlanOutline {
        title: raw.learning_objective.title,
        core_question: raw.learning_objective.core_question,
        summary: raw.learning_objective.summary,
        plan: Plan { specs },
    })
}

/// Providers sometimes wrap JSON in markdown fences despite instructions.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
