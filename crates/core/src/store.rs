//! Persistence gateway.
//!
//! The pipeline treats durable storage as a simple create/update contract
//! with last-write-wins semantics and per-row atomicity; it never relies on
//! multi-row transactions. [`MemoryGateway`] is the reference implementation
//! used by tests and by library consumers without a database.

use crate::error::StoreError;
use crate::types::{Component, LearningObjective, ValidationStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An objective with its stored components, ordered by ordinal.
#[derive(Debug, Clone)]
pub struct ObjectiveRecord {
    pub objective: LearningObjective,
    pub components: Vec<Component>,
}

/// Durable store for objectives, their plans, and their components.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Upsert the objective row, including its plan and failure details.
    async fn save_objective(&self, objective: &LearningObjective) -> Result<(), StoreError>;

    /// Upsert one component row (content included).
    async fn save_component(&self, component: &Component) -> Result<(), StoreError>;

    /// Update only the validation outcome of a component.
    async fn update_component_status(
        &self,
        component_id: Uuid,
        status: ValidationStatus,
        attempt_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Load an objective with its components, or `None` if unknown.
    async fn load_objective(&self, id: Uuid) -> Result<Option<ObjectiveRecord>, StoreError>;

    /// All stored objectives, most recent first.
    async fn list_objectives(&self) -> Result<Vec<LearningObjective>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    objectives: HashMap<Uuid, LearningObjective>,
    components: HashMap<Uuid, Component>,
}

/// In-memory [`PersistenceGateway`].
#[derive(Default)]
pub struct MemoryGateway {
    state: RwLock<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn save_objective(&self, objective: &LearningObjective) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.objectives.insert(objective.id, objective.clone());
        Ok(())
    }

    async fn save_component(&self, component: &Component) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.components.insert(component.id, component.clone());
        Ok(())
    }

    async fn update_component_status(
        &self,
        component_id: Uuid,
        status: ValidationStatus,
        attempt_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let component = state
            .components
            .get_mut(&component_id)
            .ok_or(StoreError::ComponentNotFound(component_id))?;
        component.validation_status = status;
        component.attempt_count = attempt_count;
        component.last_error = last_error;
        Ok(())
    }

    async fn load_objective(&self, id: Uuid) -> Result<Option<ObjectiveRecord>, StoreError> {
        let state = self.state.read().await;
        let Some(objective) = state.objectives.get(&id) else {
            return Ok(None);
        };
        let mut components: Vec<Component> = state
            .components
            .values()
            .filter(|component| component.objective_id == id)
            .cloned()
            .collect();
        components.sort_by_key(|component| component.ordinal);
        Ok(Some(ObjectiveRecord { objective: objective.clone(), components }))
    }

    async fn list_objectives(&self) -> Result<Vec<LearningObjective>, StoreError> {
        let state = self.state.read().await;
        let mut objectives: Vec<LearningObjective> = state.objectives.values().cloned().collect();
        objectives.sort_by_key(|objective| std::cmp::Reverse(objective.created_at));
        Ok(objectives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ComponentKind, ComponentSpec};

    fn spec(ordinal: u32) -> ComponentSpec {
        ComponentSpec {
            kind: ComponentKind::Fact,
            guidance: "guidance".to_string(),
            ordinal,
        }
    }

    #[tokio::test]
    async fn load_returns_components_in_ordinal_order() {
        let gateway = MemoryGateway::new();
        let objective = LearningObjective::new("The Water Cycle");
        gateway.save_objective(&objective).await.unwrap();
        for ordinal in [3, 1, 2] {
            gateway
                .save_component(&Component::pending(objective.id, &spec(ordinal)))
                .await
                .unwrap();
        }
        let record = gateway.load_objective(objective.id).await.unwrap().unwrap();
        let ordinals: Vec<u32> = record.components.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn save_objective_is_last_write_wins() {
        let gateway = MemoryGateway::new();
        let mut objective = LearningObjective::new("The Water Cycle");
        gateway.save_objective(&objective).await.unwrap();
        objective.title = "The Water Cycle".to_string();
        gateway.save_objective(&objective).await.unwrap();
        let record = gateway.load_objective(objective.id).await.unwrap().unwrap();
        assert_eq!(record.objective.title, "The Water Cycle");
    }

    #[tokio::test]
    async fn status_update_touches_only_validation_fields() {
        let gateway = MemoryGateway::new();
        let objective = LearningObjective::new("The Water Cycle");
        let mut component = Component::pending(objective.id, &spec(1));
        component.content = "Water evaporates from the oceans.".to_string();
        gateway.save_component(&component).await.unwrap();

        gateway
            .update_component_status(
                component.id,
                ValidationStatus::Approved,
                2,
                None,
            )
            .await
            .unwrap();

        gateway.save_objective(&objective).await.unwrap();
        let record = gateway.load_objective(objective.id).await.unwrap().unwrap();
        let stored = &record.components[0];
        assert_eq!(stored.validation_status, ValidationStatus::Approved);
        assert_eq!(stored.attempt_count, 2);
        assert_eq!(stored.content, "Water evaporates from the oceans.");
    }

    #[tokio::test]
    async fn unknown_ids_are_none_or_not_found() {
        let gateway = MemoryGateway::new();
        assert!(gateway.load_objective(Uuid::new_v4()).await.unwrap().is_none());
        let err = gateway
            .update_component_status(Uuid::new_v4(), ValidationStatus::Approved, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ComponentNotFound(_)));
    }
}
