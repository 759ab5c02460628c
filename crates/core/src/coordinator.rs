//! End-to-end generation coordination.
//!
//! Drives one learning objective through its lifecycle: plan once, fan out
//! component work onto a bounded pool, route every draft through validation,
//! retry rejected specs in place, and join before computing the terminal
//! status. The coordinator is restart-safe: `run` recomputes everything from
//! persisted per-component state, so resuming after an interruption never
//! re-issues approved work or re-charges its cost.

use crate::budget::BudgetGuard;
use crate::completion::CompletionClient;
use crate::error::{CompletionError, GenerationError, PlanningError, StoreError};
use crate::planner::{self, PlanGenerator, PlanOutline};
use crate::store::{ObjectiveRecord, PersistenceGateway};
use crate::types::{
    Component, ComponentKind, ComponentSpec, ComprehensionCheck, Failure, FailureKind,
    LearningObjective, ObjectiveResult, ObjectiveStatus, Plan, ReadinessPolicy, ValidationStatus,
};
use crate::validator::{QualityValidator, Verdict};
use crate::worker::ComponentGenerator;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Static orchestration settings, supplied once at startup.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Concurrent generate/validate pipelines per objective.
    pub worker_count: usize,
    /// Maximum generation attempts per spec; `attempt_count` never exceeds it.
    pub retry_limit: u32,
    /// Planning attempts before the objective is abandoned.
    pub plan_attempts: u32,
    pub policy: ReadinessPolicy,
    /// Hard timeout applied to every completion call.
    pub call_timeout: Duration,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            retry_limit: 3,
            plan_attempts: 2,
            policy: ReadinessPolicy::default(),
            call_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("objective {0} not found")]
    UnknownObjective(Uuid),
    #[error("objective {0} has not finished")]
    NotFinished(Uuid),
}

/// Per-component view in a status report.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub ordinal: u32,
    pub kind: ComponentKind,
    pub validation_status: ValidationStatus,
    pub attempt_count: u32,
}

/// What a polling caller sees while an objective is in flight.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub id: Uuid,
    pub status: ObjectiveStatus,
    pub components: Vec<ComponentStatus>,
    pub failure: Option<Failure>,
}

/// Drives topics through planning, generation, validation, and aggregation.
pub struct GenerationCoordinator {
    store: Arc<dyn PersistenceGateway>,
    planner: PlanGenerator,
    generator: Arc<ComponentGenerator>,
    validator: Arc<QualityValidator>,
    config: GenerationConfig,
}

impl GenerationCoordinator {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn PersistenceGateway>,
        budget: Arc<BudgetGuard>,
        config: GenerationConfig,
    ) -> Self {
        let planner = PlanGenerator::new(
            Arc::clone(&client),
            Arc::clone(&budget),
            config.call_timeout,
        );
        let generator = Arc::new(ComponentGenerator::new(
            Arc::clone(&client),
            Arc::clone(&budget),
            config.call_timeout,
        ));
        let validator = Arc::new(QualityValidator::new(client, budget, config.call_timeout));
        Self { store, planner, generator, validator, config }
    }

    /// Validate the topic and create the objective in `Draft`. The caller
    /// spawns [`run`](Self::run) to make progress; submission itself issues
    /// no provider calls and records no usage.
    pub async fn submit(&self, topic: &str) -> Result<Uuid, CoordinatorError> {
        let topic = planner::validate_topic(topic).map_err(CoordinatorError::Planning)?;
        let objective = LearningObjective::new(topic);
        let id = objective.id;
        self.store.save_objective(&objective).await?;
        info!(%id, topic, "objective submitted");
        Ok(id)
    }

    /// Drive an objective to a terminal status. Idempotent: a terminal
    /// objective is left untouched, and a partially completed one resumes
    /// with only its unfinished specs.
    pub async fn run(&self, id: Uuid) -> Result<ObjectiveStatus, CoordinatorError> {
        let record = self.load(id).await?;
        let mut objective = record.objective;
        if objective.status.is_terminal() {
            info!(%id, status = %objective.status, "objective already terminal");
            return Ok(objective.status);
        }

        let plan = match objective.plan.clone() {
            Some(plan) => plan,
            None => match self.plan_objective(&mut objective).await? {
                Some(plan) => plan,
                None => return Ok(ObjectiveStatus::Failed),
            },
        };

        // Reconcile components against the plan. A fresh run creates every
        // pending row here; a resumed run only fills holes left by an
        // interrupted predecessor.
        let existing = self.load(id).await?.components;
        let mut by_ordinal: HashMap<u32, Component> =
            existing.into_iter().map(|c| (c.ordinal, c)).collect();
        for spec in &plan.specs {
            if !by_ordinal.contains_key(&spec.ordinal) {
                let component = Component::pending(id, spec);
                self.store.save_component(&component).await?;
                by_ordinal.insert(spec.ordinal, component);
            }
        }

        let pending: Vec<(ComponentSpec, Component)> = plan
            .specs
            .iter()
            .filter_map(|spec| {
                let component = by_ordinal.get(&spec.ordinal)?;
                (!component.validation_status.is_terminal())
                    .then(|| (spec.clone(), component.clone()))
            })
            .collect();

        let mut budget_denied = false;
        if !pending.is_empty() {
            objective.status = ObjectiveStatus::Generating;
            self.store.save_objective(&objective).await?;
            info!(%id, pending = pending.len(), "generating components");

            let tracker =
                Arc::new(ProgressTracker::new(objective.clone(), Arc::clone(&self.store)));
            let semaphore = Arc::new(Semaphore::new(self.config.worker_count));
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let mut tasks = JoinSet::new();
            for (spec, component) in pending {
                let task = SpecTask {
                    generator: Arc::clone(&self.generator),
                    validator: Arc::clone(&self.validator),
                    store: Arc::clone(&self.store),
                    tracker: Arc::clone(&tracker),
                    cancel: cancel_rx.clone(),
                    semaphore: Arc::clone(&semaphore),
                    topic: objective.topic.clone(),
                    spec,
                    component,
                    retry_limit: self.config.retry_limit,
                    backoff_base: self.config.backoff_base,
                };
                tasks.spawn(task.run());
            }
            drop(cancel_rx);

            // Barrier join: the objective only advances once every spec has
            // reached a terminal per-spec state or been cancelled.
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => {
                        if outcome.budget_denied && !budget_denied {
                            budget_denied = true;
                            warn!(%id, ordinal = outcome.ordinal, "budget denied; cancelling pending specs");
                            let _ = cancel_tx.send(true);
                        }
                    }
                    Err(join_err) => {
                        error!(%id, error = %join_err, "component task aborted");
                    }
                }
            }
            objective = tracker.objective().await;
        }

        self.finish(objective, &plan, budget_denied).await
    }

    /// Report the objective's lifecycle status plus each component's state.
    pub async fn status(&self, id: Uuid) -> Result<StatusReport, CoordinatorError> {
        let record = self.load(id).await?;
        let components = record
            .components
            .iter()
            .map(|c| ComponentStatus {
                ordinal: c.ordinal,
                kind: c.kind,
                validation_status: c.validation_status,
                attempt_count: c.attempt_count,
            })
            .collect();
        Ok(StatusReport {
            id,
            status: record.objective.status,
            components,
            failure: record.objective.failure.clone(),
        })
    }

    /// The full aggregate. Only meaningful once the objective is terminal;
    /// flagged components are included and marked by their status rather
    /// than silently presented as validated.
    pub async fn result(&self, id: Uuid) -> Result<ObjectiveResult, CoordinatorError> {
        let record = self.load(id).await?;
        if !record.objective.status.is_terminal() {
            return Err(CoordinatorError::NotFinished(id));
        }
        let mut components = Vec::new();
        let mut checks = Vec::new();
        for component in record.components {
            if component.kind == ComponentKind::ComprehensionCheck {
                let usable = matches!(
                    component.validation_status,
                    ValidationStatus::Approved | ValidationStatus::Flagged
                );
                if usable {
                    match serde_json::from_str::<ComprehensionCheck>(&component.content) {
                        Ok(check) => checks.push(check),
                        Err(err) => warn!(
                            component = %component.id, error = %err,
                            "stored comprehension check failed to decode"
                        ),
                    }
                }
            } else {
                components.push(component);
            }
        }
        Ok(ObjectiveResult { objective: record.objective, components, checks })
    }

    /// All known objectives, most recent first.
    pub async fn list(&self) -> Result<Vec<LearningObjective>, CoordinatorError> {
        Ok(self.store.list_objectives().await?)
    }

    async fn load(&self, id: Uuid) -> Result<ObjectiveRecord, CoordinatorError> {
        self.store
            .load_objective(id)
            .await?
            .ok_or(CoordinatorError::UnknownObjective(id))
    }

    /// Run the planner under the coordinator's bounded retry policy and
    /// persist the outcome. Returns the plan, or `None` when the objective
    /// was abandoned as `Failed`.
    async fn plan_objective(
        &self,
        objective: &mut LearningObjective,
    ) -> Result<Option<Plan>, CoordinatorError> {
        objective.status = ObjectiveStatus::Planning;
        self.store.save_objective(objective).await?;

        match self.plan_with_retries(&objective.topic).await {
            Ok(outline) => {
                let plan = outline.plan;
                objective.title = outline.title;
                objective.core_question = outline.core_question;
                objective.summary = outline.summary;
                objective.plan = Some(plan.clone());
                self.store.save_objective(objective).await?;
                Ok(Some(plan))
            }
            Err(err) => {
                warn!(id = %objective.id, error = %err, "planning exhausted; objective abandoned");
                objective.status = ObjectiveStatus::Failed;
                objective.failure = Some(Failure {
                    kind: FailureKind::PlanningFailed,
                    detail: err.to_string(),
                    failed_ordinals: Vec::new(),
                });
                objective.completed_at = Some(Utc::now());
                self.store.save_objective(objective).await?;
                Ok(None)
            }
        }
    }

    async fn plan_with_retries(&self, topic: &str) -> Result<PlanOutline, PlanningError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.planner.generate(topic).await {
                Ok(outline) => return Ok(outline),
                Err(err) => {
                    let retryable = matches!(
                        err,
                        PlanningError::PlanParse(_)
                            | PlanningError::Completion(CompletionError::Transient(_))
                    );
                    if !retryable || attempt >= self.config.plan_attempts {
                        return Err(err);
                    }
                    warn!(topic, attempt, error = %err, "planning attempt failed; retrying");
                    if matches!(err, PlanningError::Completion(_)) {
                        tokio::time::sleep(backoff_delay(self.config.backoff_base, attempt)).await;
                    }
                }
            }
        }
    }

    async fn finish(
        &self,
        mut objective: LearningObjective,
        plan: &Plan,
        budget_denied: bool,
    ) -> Result<ObjectiveStatus, CoordinatorError> {
        let record = self.load(objective.id).await?;
        let status_by_ordinal: HashMap<u32, ValidationStatus> = record
            .components
            .iter()
            .map(|c| (c.ordinal, c.validation_status))
            .collect();

        let failed_ordinals: Vec<u32> = plan
            .specs
            .iter()
            .filter(|spec| {
                let status = status_by_ordinal
                    .get(&spec.ordinal)
                    .copied()
                    .unwrap_or(ValidationStatus::Pending);
                !self.config.policy.admits(status)
            })
            .map(|spec| spec.ordinal)
            .collect();

        if budget_denied {
            objective.status = ObjectiveStatus::Failed;
            objective.failure = Some(Failure {
                kind: FailureKind::BudgetExhausted,
                detail: "budget exhausted during component generation".to_string(),
                failed_ordinals,
            });
        } else if failed_ordinals.is_empty() {
            objective.status = ObjectiveStatus::Ready;
            objective.failure = None;
        } else {
            objective.status = ObjectiveStatus::Failed;
            objective.failure = Some(Failure {
                kind: FailureKind::ComponentsFailed,
                detail: format!(
                    "{} of {} specs did not reach an acceptable state",
                    failed_ordinals.len(),
                    plan.specs.len()
                ),
                failed_ordinals,
            });
        }
        objective.completed_at = Some(Utc::now());
        self.store.save_objective(&objective).await?;
        info!(id = %objective.id, status = %objective.status, "objective finished");
        Ok(objective.status)
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt.saturating_sub(1).min(6))
}

/// Keeps the objective's Generating/Validating phase in step with the number
/// of generation calls in flight. The transition logic is synchronous and
/// in-memory; only the persistence of a changed snapshot awaits.
struct ProgressTracker {
    store: Arc<dyn PersistenceGateway>,
    inner: Mutex<TrackerInner>,
}

struct TrackerInner {
    objective: LearningObjective,
    generating: usize,
}

impl ProgressTracker {
    fn new(objective: LearningObjective, store: Arc<dyn PersistenceGateway>) -> Self {
        Self { store, inner: Mutex::new(TrackerInner { objective, generating: 0 }) }
    }

    async fn generation_started(&self) {
        self.shift(true).await;
    }

    async fn generation_finished(&self) {
        self.shift(false).await;
    }

    async fn shift(&self, starting: bool) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            if starting {
                inner.generating += 1;
            } else {
                inner.generating = inner.generating.saturating_sub(1);
            }
            let desired = if inner.generating > 0 {
                ObjectiveStatus::Generating
            } else {
                ObjectiveStatus::Validating
            };
            if inner.objective.status != desired && !inner.objective.status.is_terminal() {
                inner.objective.status = desired;
                Some(inner.objective.clone())
            } else {
                None
            }
        };
        if let Some(objective) = snapshot {
            if let Err(err) = self.store.save_objective(&objective).await {
                warn!(id = %objective.id, error = %err, "failed to persist phase transition");
            }
        }
    }

    async fn objective(&self) -> LearningObjective {
        self.inner.lock().await.objective.clone()
    }
}

/// Outcome of one spec's generate/validate pipeline.
struct SpecOutcome {
    ordinal: u32,
    budget_denied: bool,
}

/// One spec's bounded generate/validate retry loop, run on the worker pool.
struct SpecTask {
    generator: Arc<ComponentGenerator>,
    validator: Arc<QualityValidator>,
    store: Arc<dyn PersistenceGateway>,
    tracker: Arc<ProgressTracker>,
    cancel: watch::Receiver<bool>,
    semaphore: Arc<Semaphore>,
    topic: String,
    spec: ComponentSpec,
    component: Component,
    retry_limit: u32,
    backoff_base: Duration,
}

impl SpecTask {
    async fn run(mut self) -> SpecOutcome {
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return SpecOutcome { ordinal: self.spec.ordinal, budget_denied: false };
        };
        loop {
            if *self.cancel.borrow() {
                info!(ordinal = self.spec.ordinal, "spec cancelled before generation");
                return SpecOutcome { ordinal: self.spec.ordinal, budget_denied: false };
            }
            self.component.attempt_count += 1;
            self.tracker.generation_started().await;
            let generated = self.generator.generate(&self.spec, &self.topic).await;
            self.tracker.generation_finished().await;

            match generated {
                Ok(draft) => {
                    self.component.content = draft.content;
                    self.component.validation_status = ValidationStatus::Pending;
                    if let Err(err) = self.store.save_component(&self.component).await {
                        warn!(ordinal = self.spec.ordinal, error = %err, "failed to persist draft");
                    }
                    let verdict = self
                        .validator
                        .validate(&self.component.content, &self.spec, &self.topic)
                        .await;
                    match verdict {
                        Verdict::Approved => {
                            info!(ordinal = self.spec.ordinal, kind = %self.spec.kind, "component approved");
                            return self.finish(ValidationStatus::Approved, None, false).await;
                        }
                        Verdict::Flagged { reasons } => {
                            info!(ordinal = self.spec.ordinal, "component flagged for review");
                            return self
                                .finish(ValidationStatus::Flagged, Some(reasons.join("; ")), false)
                                .await;
                        }
                        Verdict::Rejected { reasons } => {
                            let detail = reasons.join("; ");
                            if self.component.attempt_count >= self.retry_limit {
                                info!(ordinal = self.spec.ordinal, "retries exhausted; spec failed");
                                return self
                                    .finish(ValidationStatus::Failed, Some(detail), false)
                                    .await;
                            }
                            info!(
                                ordinal = self.spec.ordinal,
                                attempt = self.component.attempt_count,
                                reason = %detail,
                                "draft rejected; regenerating"
                            );
                            self.persist_status(ValidationStatus::Rejected, Some(detail)).await;
                            self.backoff().await;
                        }
                    }
                }
                Err(err) if err.is_retryable() => {
                    if self.component.attempt_count >= self.retry_limit {
                        warn!(ordinal = self.spec.ordinal, error = %err, "retries exhausted; spec failed");
                        return self
                            .finish(ValidationStatus::Failed, Some(err.to_string()), false)
                            .await;
                    }
                    warn!(
                        ordinal = self.spec.ordinal,
                        attempt = self.component.attempt_count,
                        error = %err,
                        "transient generation failure; retrying"
                    );
                    self.persist_status(ValidationStatus::Pending, Some(err.to_string())).await;
                    self.backoff().await;
                }
                Err(err) => {
                    let budget_denied = matches!(err, GenerationError::BudgetDenied(_));
                    warn!(ordinal = self.spec.ordinal, error = %err, "spec failed permanently");
                    return self
                        .finish(ValidationStatus::Failed, Some(err.to_string()), budget_denied)
                        .await;
                }
            }
        }
    }

    async fn persist_status(&mut self, status: ValidationStatus, last_error: Option<String>) {
        self.component.validation_status = status;
        self.component.last_error = last_error.clone();
        if let Err(err) = self
            .store
            .update_component_status(self.component.id, status, self.component.attempt_count, last_error)
            .await
        {
            warn!(ordinal = self.spec.ordinal, error = %err, "failed to persist component status");
        }
    }

    async fn finish(
        &mut self,
        status: ValidationStatus,
        last_error: Option<String>,
        budget_denied: bool,
    ) -> SpecOutcome {
        self.persist_status(status, last_error).await;
        SpecOutcome { ordinal: self.spec.ordinal, budget_denied }
    }

    async fn backoff(&self) {
        tokio::time::sleep(backoff_delay(self.backoff_base, self.component.attempt_count)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetConfig;
    use crate::completion::{Completion, MockCompletionClient};
    use crate::store::MemoryGateway;

    const PLAN_JSON: &str = r#"{
        "learning_objective": {
            "title": "The Water Cycle",
            "core_question": "How does water move through Earth's systems?",
            "summary": "Water cycles continuously between oceans, atmosphere, and land."
        },
        "components": [
            { "type": "CORE_CONCEPT", "guidance": "Define the water cycle", "ordinal": 1 }
        ],
        "comprehension_check": { "guidance": "Test understanding of evaporation" }
    }"#;

    fn coordinator(client: MockCompletionClient) -> GenerationCoordinator {
        let config = GenerationConfig {
            backoff_base: Duration::from_millis(1),
            ..GenerationConfig::default()
        };
        GenerationCoordinator::new(
            Arc::new(client),
            Arc::new(MemoryGateway::new()),
            Arc::new(BudgetGuard::new(BudgetConfig::default())),
            config,
        )
    }

    #[tokio::test]
    async fn submit_rejects_invalid_topics_synchronously() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let coordinator = coordinator(client);
        let err = coordinator.submit("Ai").await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Planning(PlanningError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn planning_retries_once_on_a_parse_error() {
        let mut client = MockCompletionClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(Completion {
                    text: "sorry, here is your plan:".to_string(),
                    tokens_in: 10,
                    tokens_out: 10,
                })
            });
        client
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(Completion { text: PLAN_JSON.to_string(), tokens_in: 10, tokens_out: 10 })
            });
        let coordinator = coordinator(client);
        let outline = coordinator.plan_with_retries("The Water Cycle").await.unwrap();
        assert_eq!(outline.title, "The Water Cycle");
    }

    #[tokio::test]
    async fn planning_gives_up_after_the_attempt_budget() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(2).returning(|_| {
            Ok(Completion { text: "not a plan".to_string(), tokens_in: 10, tokens_out: 10 })
        });
        let coordinator = coordinator(client);
        let err = coordinator.plan_with_retries("The Water Cycle").await.unwrap_err();
        assert!(matches!(err, PlanningError::PlanParse(_)));
    }

    #[tokio::test]
    async fn planning_does_not_retry_budget_denials() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().never();
        let config = GenerationConfig {
            backoff_base: Duration::from_millis(1),
            ..GenerationConfig::default()
        };
        let coordinator = GenerationCoordinator::new(
            Arc::new(client),
            Arc::new(MemoryGateway::new()),
            Arc::new(BudgetGuard::new(BudgetConfig {
                daily_limit_usd: 0.0,
                ..BudgetConfig::default()
            })),
            config,
        );
        let err = coordinator.plan_with_retries("The Water Cycle").await.unwrap_err();
        assert!(matches!(err, PlanningError::BudgetDenied(_)));
    }

    #[tokio::test]
    async fn backoff_grows_exponentially_but_stays_bounded() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        // Exponent is capped so very high attempt counts cannot overflow.
        assert_eq!(backoff_delay(base, 40), backoff_delay(base, 7));
    }
}
