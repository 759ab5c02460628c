//! API Models
//!
//! Request and response payloads for the REST surface, with `utoipa`
//! annotations for the generated OpenAPI documentation. Core domain types
//! are mirrored into view structs here so the wire format stays decoupled
//! from the pipeline's internal model.

use chrono::{DateTime, Utc};
use mentor_core::coordinator::StatusReport;
use mentor_core::{
    Component, ComprehensionCheck, Failure, LearningObjective, ObjectiveResult, UsageSummary,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct SubmitPayload {
    #[schema(example = "The Water Cycle")]
    pub topic: String,
}

#[derive(Serialize, ToSchema)]
pub struct SubmittedResponse {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct ComponentStatusView {
    pub ordinal: u32,
    #[schema(example = "FACT")]
    pub kind: String,
    #[schema(example = "APPROVED")]
    pub validation_status: String,
    pub attempt_count: u32,
}

#[derive(Serialize, ToSchema)]
pub struct FailureView {
    #[schema(example = "COMPONENTS_FAILED")]
    pub kind: String,
    pub detail: String,
    pub failed_ordinals: Vec<u32>,
}

impl From<&Failure> for FailureView {
    fn from(failure: &Failure) -> Self {
        Self {
            kind: failure.kind.to_string(),
            detail: failure.detail.clone(),
            failed_ordinals: failure.failed_ordinals.clone(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(example = "GENERATING")]
    pub status: String,
    pub components: Vec<ComponentStatusView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureView>,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        Self {
            id: report.id,
            status: report.status.to_string(),
            components: report
                .components
                .iter()
                .map(|c| ComponentStatusView {
                    ordinal: c.ordinal,
                    kind: c.kind.to_string(),
                    validation_status: c.validation_status.to_string(),
                    attempt_count: c.attempt_count,
                })
                .collect(),
            failure: report.failure.as_ref().map(FailureView::from),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ObjectiveView {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub topic: String,
    pub title: String,
    pub core_question: String,
    pub summary: String,
    #[schema(example = "READY")]
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&LearningObjective> for ObjectiveView {
    fn from(objective: &LearningObjective) -> Self {
        Self {
            id: objective.id,
            topic: objective.topic.clone(),
            title: objective.title.clone(),
            core_question: objective.core_question.clone(),
            summary: objective.summary.clone(),
            status: objective.status.to_string(),
            created_at: objective.created_at,
            completed_at: objective.completed_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ComponentView {
    pub ordinal: u32,
    #[schema(example = "FACT")]
    pub kind: String,
    pub content: String,
    #[schema(example = "APPROVED")]
    pub validation_status: String,
    pub attempt_count: u32,
}

impl From<&Component> for ComponentView {
    fn from(component: &Component) -> Self {
        Self {
            ordinal: component.ordinal,
            kind: component.kind.to_string(),
            content: component.content.clone(),
            validation_status: component.validation_status.to_string(),
            attempt_count: component.attempt_count,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct CheckView {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: String,
}

impl From<&ComprehensionCheck> for CheckView {
    fn from(check: &ComprehensionCheck) -> Self {
        Self {
            question: check.question.clone(),
            options: check.options.clone(),
            correct_index: check.correct_index,
            explanation: check.explanation.clone(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ResultResponse {
    pub objective: ObjectiveView,
    pub components: Vec<ComponentView>,
    pub checks: Vec<CheckView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureView>,
}

impl From<ObjectiveResult> for ResultResponse {
    fn from(result: ObjectiveResult) -> Self {
        Self {
            objective: ObjectiveView::from(&result.objective),
            components: result.components.iter().map(ComponentView::from).collect(),
            checks: result.checks.iter().map(CheckView::from).collect(),
            failure: result.objective.failure.as_ref().map(FailureView::from),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct UsageResponse {
    pub today_usd: f64,
    pub month_usd: f64,
    pub remaining_today_usd: f64,
    pub remaining_month_usd: f64,
    pub total_usd: f64,
    pub calls: usize,
}

impl From<UsageSummary> for UsageResponse {
    fn from(summary: UsageSummary) -> Self {
        Self {
            today_usd: summary.today_usd,
            month_usd: summary.month_usd,
            remaining_today_usd: summary.remaining_today_usd,
            remaining_month_usd: summary.remaining_month_usd,
            total_usd: summary.total_usd,
            calls: summary.calls,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentor_core::{FailureKind, ObjectiveStatus, ValidationStatus};

    #[test]
    fn submit_payload_requires_topic() {
        let payload: SubmitPayload = serde_json::from_str(r#"{"topic": "Photosynthesis"}"#).unwrap();
        assert_eq!(payload.topic, "Photosynthesis");
        assert!(serde_json::from_str::<SubmitPayload>("{}").is_err());
    }

    #[test]
    fn objective_view_uses_wire_status_strings() {
        let mut objective = LearningObjective::new("The Water Cycle");
        objective.status = ObjectiveStatus::Ready;
        let view = ObjectiveView::from(&objective);
        assert_eq!(view.status, "READY");
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("\"READY\""));
        // No completed_at yet, so the field is omitted entirely.
        assert!(!json.contains("completed_at"));
    }

    #[test]
    fn failure_view_carries_ordinals() {
        let failure = Failure {
            kind: FailureKind::ComponentsFailed,
            detail: "1 of 5 specs did not reach an acceptable state".to_string(),
            failed_ordinals: vec![3],
        };
        let view = FailureView::from(&failure);
        assert_eq!(view.kind, "COMPONENTS_FAILED");
        assert_eq!(view.failed_ordinals, vec![3]);
    }

    #[test]
    fn result_response_marks_flagged_components() {
        let mut objective = LearningObjective::new("The Water Cycle");
        objective.status = ObjectiveStatus::Ready;
        let spec = mentor_core::ComponentSpec {
            kind: mentor_core::ComponentKind::Fact,
            guidance: "guidance".to_string(),
            ordinal: 1,
        };
        let mut component = Component::pending(objective.id, &spec);
        component.validation_status = ValidationStatus::Flagged;
        component.content = "A fact awaiting human review.".to_string();

        let result = ObjectiveResult { objective, components: vec![component], checks: vec![] };
        let response = ResultResponse::from(result);
        assert_eq!(response.components[0].validation_status, "FLAGGED");
    }
}
