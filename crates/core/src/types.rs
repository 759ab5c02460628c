//! Domain model for the generation pipeline.
//!
//! A topic is decomposed into a [`Plan`] of [`ComponentSpec`]s, each of which
//! produces one [`Component`]. The owning [`LearningObjective`] tracks the
//! overall lifecycle, and an approved `ComprehensionCheck` component decodes
//! into a typed [`ComprehensionCheck`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The closed set of content-unit types the pipeline can produce.
///
/// The comprehension check is a distinguished spec kind: it flows through the
/// same generate/validate lifecycle as the others, but its content is a JSON
/// question payload rather than prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentKind {
    CoreConcept,
    Fact,
    Example,
    Principle,
    Analogy,
    Warning,
    ComprehensionCheck,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::CoreConcept => "CORE_CONCEPT",
            ComponentKind::Fact => "FACT",
            ComponentKind::Example => "EXAMPLE",
            ComponentKind::Principle => "PRINCIPLE",
            ComponentKind::Analogy => "ANALOGY",
            ComponentKind::Warning => "WARNING",
            ComponentKind::ComprehensionCheck => "COMPREHENSION_CHECK",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CORE_CONCEPT" => Ok(ComponentKind::CoreConcept),
            "FACT" => Ok(ComponentKind::Fact),
            "EXAMPLE" => Ok(ComponentKind::Example),
            "PRINCIPLE" => Ok(ComponentKind::Principle),
            "ANALOGY" => Ok(ComponentKind::Analogy),
            "WARNING" => Ok(ComponentKind::Warning),
            "COMPREHENSION_CHECK" => Ok(ComponentKind::ComprehensionCheck),
            other => Err(format!("unknown component kind: '{other}'")),
        }
    }
}

/// One planned content unit: what kind of component to produce, with the
/// planner's guidance on what it should cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub kind: ComponentKind,
    pub guidance: String,
    pub ordinal: u32,
}

/// The ordered component specifications for one learning objective.
/// Produced once by the planner and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub specs: Vec<ComponentSpec>,
}

/// Lifecycle of a learning objective.
///
/// Monotonic except for the explicit retry-driven regression between
/// `Generating` and `Validating` while individual components loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectiveStatus {
    Draft,
    Planning,
    Generating,
    Validating,
    Ready,
    Failed,
}

impl ObjectiveStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ObjectiveStatus::Ready | ObjectiveStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveStatus::Draft => "DRAFT",
            ObjectiveStatus::Planning => "PLANNING",
            ObjectiveStatus::Generating => "GENERATING",
            ObjectiveStatus::Validating => "VALIDATING",
            ObjectiveStatus::Ready => "READY",
            ObjectiveStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ObjectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectiveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(ObjectiveStatus::Draft),
            "PLANNING" => Ok(ObjectiveStatus::Planning),
            "GENERATING" => Ok(ObjectiveStatus::Generating),
            "VALIDATING" => Ok(ObjectiveStatus::Validating),
            "READY" => Ok(ObjectiveStatus::Ready),
            "FAILED" => Ok(ObjectiveStatus::Failed),
            other => Err(format!("unknown objective status: '{other}'")),
        }
    }
}

/// Per-component validation state.
///
/// `Rejected` is the transient mid-retry state; `Approved`, `Flagged`, and
/// `Failed` are terminal for the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Flagged,
    Rejected,
    Failed,
}

impl ValidationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ValidationStatus::Approved | ValidationStatus::Flagged | ValidationStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "PENDING",
            ValidationStatus::Approved => "APPROVED",
            ValidationStatus::Flagged => "FLAGGED",
            ValidationStatus::Rejected => "REJECTED",
            ValidationStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ValidationStatus::Pending),
            "APPROVED" => Ok(ValidationStatus::Approved),
            "FLAGGED" => Ok(ValidationStatus::Flagged),
            "REJECTED" => Ok(ValidationStatus::Rejected),
            "FAILED" => Ok(ValidationStatus::Failed),
            other => Err(format!("unknown validation status: '{other}'")),
        }
    }
}

/// Why a learning objective ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    PlanningFailed,
    BudgetExhausted,
    ComponentsFailed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::PlanningFailed => "PLANNING_FAILED",
            FailureKind::BudgetExhausted => "BUDGET_EXHAUSTED",
            FailureKind::ComponentsFailed => "COMPONENTS_FAILED",
        };
        f.write_str(s)
    }
}

/// Terminal failure details surfaced to callers: a reason code plus the
/// ordinals of the specs that did not reach an acceptable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
    pub failed_ordinals: Vec<u32>,
}

/// Which component states count as "done" when computing readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessPolicy {
    /// Approved or flagged-for-review components both satisfy a spec.
    #[default]
    Lenient,
    /// Every spec must be strictly approved.
    Strict,
}

impl ReadinessPolicy {
    pub fn admits(&self, status: ValidationStatus) -> bool {
        match self {
            ReadinessPolicy::Lenient => {
                matches!(status, ValidationStatus::Approved | ValidationStatus::Flagged)
            }
            ReadinessPolicy::Strict => matches!(status, ValidationStatus::Approved),
        }
    }
}

/// The main entity: one topic's worth of planned, generated, and validated
/// content. Owns its plan; components are stored alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningObjective {
    pub id: Uuid,
    pub topic: String,
    pub title: String,
    pub core_question: String,
    pub summary: String,
    pub status: ObjectiveStatus,
    pub failure: Option<Failure>,
    pub plan: Option<Plan>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LearningObjective {
    /// A fresh objective in `Draft`, before planning has run.
    pub fn new(topic: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            title: String::new(),
            core_question: String::new(),
            summary: String::new(),
            status: ObjectiveStatus::Draft,
            failure: None,
            plan: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// One generated content unit. Created once per spec and retried in place:
/// new content, same id, incremented `attempt_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: Uuid,
    pub objective_id: Uuid,
    pub ordinal: u32,
    pub kind: ComponentKind,
    pub content: String,
    pub validation_status: ValidationStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl Component {
    /// The empty `Pending` component created when a plan is accepted.
    pub fn pending(objective_id: Uuid, spec: &ComponentSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            objective_id,
            ordinal: spec.ordinal,
            kind: spec.kind,
            content: String::new(),
            validation_status: ValidationStatus::Pending,
            attempt_count: 0,
            last_error: None,
        }
    }
}

/// Bounds on the number of answer options in a comprehension check.
pub const CHECK_MIN_OPTIONS: usize = 2;
pub const CHECK_MAX_OPTIONS: usize = 6;

/// A multiple-choice question decoded from a `ComprehensionCheck` component's
/// JSON content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensionCheck {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: String,
}

impl ComprehensionCheck {
    /// Structural problems with the decoded question, if any.
    pub fn schema_issue(&self) -> Option<String> {
        if self.question.trim().is_empty() {
            return Some("question text is empty".to_string());
        }
        if self.options.len() < CHECK_MIN_OPTIONS || self.options.len() > CHECK_MAX_OPTIONS {
            return Some(format!(
                "expected {CHECK_MIN_OPTIONS}-{CHECK_MAX_OPTIONS} options, got {}",
                self.options.len()
            ));
        }
        if self.correct_index >= self.options.len() {
            return Some(format!(
                "correct_index {} is out of range for {} options",
                self.correct_index,
                self.options.len()
            ));
        }
        if self.explanation.trim().is_empty() {
            return Some("explanation is empty".to_string());
        }
        None
    }
}

/// The aggregate a caller receives once an objective is terminal.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveResult {
    pub objective: LearningObjective,
    pub components: Vec<Component>,
    pub checks: Vec<ComprehensionCheck>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_kind_wire_format() {
        let json = serde_json::to_string(&ComponentKind::CoreConcept).unwrap();
        assert_eq!(json, "\"CORE_CONCEPT\"");
        let parsed: ComponentKind = serde_json::from_str("\"COMPREHENSION_CHECK\"").unwrap();
        assert_eq!(parsed, ComponentKind::ComprehensionCheck);
    }

    #[test]
    fn component_kind_round_trips_through_str() {
        for kind in [
            ComponentKind::CoreConcept,
            ComponentKind::Fact,
            ComponentKind::Example,
            ComponentKind::Principle,
            ComponentKind::Analogy,
            ComponentKind::Warning,
            ComponentKind::ComprehensionCheck,
        ] {
            assert_eq!(kind.as_str().parse::<ComponentKind>().unwrap(), kind);
        }
        assert!("QUIZ".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn objective_status_terminality() {
        assert!(ObjectiveStatus::Ready.is_terminal());
        assert!(ObjectiveStatus::Failed.is_terminal());
        assert!(!ObjectiveStatus::Generating.is_terminal());
        assert!(!ObjectiveStatus::Validating.is_terminal());
    }

    #[test]
    fn validation_status_terminality() {
        assert!(ValidationStatus::Approved.is_terminal());
        assert!(ValidationStatus::Flagged.is_terminal());
        assert!(ValidationStatus::Failed.is_terminal());
        assert!(!ValidationStatus::Pending.is_terminal());
        assert!(!ValidationStatus::Rejected.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in ["DRAFT", "PLANNING", "GENERATING", "VALIDATING", "READY", "FAILED"] {
            let parsed: ObjectiveStatus = status.parse().unwrap();
            assert_eq!(parsed.as_str(), status);
        }
        for status in ["PENDING", "APPROVED", "FLAGGED", "REJECTED", "FAILED"] {
            let parsed: ValidationStatus = status.parse().unwrap();
            assert_eq!(parsed.as_str(), status);
        }
    }

    #[test]
    fn readiness_policy_admission() {
        assert!(ReadinessPolicy::Lenient.admits(ValidationStatus::Approved));
        assert!(ReadinessPolicy::Lenient.admits(ValidationStatus::Flagged));
        assert!(!ReadinessPolicy::Lenient.admits(ValidationStatus::Failed));
        assert!(!ReadinessPolicy::Lenient.admits(ValidationStatus::Rejected));
        assert!(ReadinessPolicy::Strict.admits(ValidationStatus::Approved));
        assert!(!ReadinessPolicy::Strict.admits(ValidationStatus::Flagged));
    }

    #[test]
    fn new_objective_starts_in_draft() {
        let objective = LearningObjective::new("Photosynthesis");
        assert_eq!(objective.status, ObjectiveStatus::Draft);
        assert_eq!(objective.topic, "Photosynthesis");
        assert!(objective.plan.is_none());
        assert!(objective.completed_at.is_none());
    }

    #[test]
    fn pending_component_inherits_spec_identity() {
        let objective_id = Uuid::new_v4();
        let spec = ComponentSpec {
            kind: ComponentKind::Fact,
            guidance: "State an important fact".to_string(),
            ordinal: 2,
        };
        let component = Component::pending(objective_id, &spec);
        assert_eq!(component.objective_id, objective_id);
        assert_eq!(component.ordinal, 2);
        assert_eq!(component.kind, ComponentKind::Fact);
        assert_eq!(component.validation_status, ValidationStatus::Pending);
        assert_eq!(component.attempt_count, 0);
    }

    fn check_fixture() -> ComprehensionCheck {
        ComprehensionCheck {
            question: "What drives the water cycle?".to_string(),
            options: vec![
                "The sun".to_string(),
                "The moon".to_string(),
                "Wind turbines".to_string(),
                "Ocean currents".to_string(),
            ],
            correct_index: 0,
            explanation: "Solar energy drives evaporation.".to_string(),
        }
    }

    #[test]
    fn well_formed_check_has_no_schema_issue() {
        assert_eq!(check_fixture().schema_issue(), None);
    }

    #[test]
    fn check_schema_rejects_out_of_range_index() {
        let mut check = check_fixture();
        check.correct_index = 4;
        assert!(check.schema_issue().unwrap().contains("out of range"));
    }

    #[test]
    fn check_schema_rejects_too_few_options() {
        let mut check = check_fixture();
        check.options.truncate(1);
        check.correct_index = 0;
        assert!(check.schema_issue().is_some());
    }

    #[test]
    fn check_decodes_from_json_content() {
        let content = r#"{
            "question": "What drives the water cycle?",
            "options": ["The sun", "The moon"],
            "correct_index": 0,
            "explanation": "Solar energy drives evaporation."
        }"#;
        let check: ComprehensionCheck = serde_json::from_str(content).unwrap();
        assert_eq!(check.options.len(), 2);
        assert_eq!(check.schema_issue(), None);
    }
}
