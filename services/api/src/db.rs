//! Postgres Persistence Gateway
//!
//! Implements the pipeline's `PersistenceGateway` contract over `sqlx`.
//! Writes are single-row upserts with last-write-wins semantics; the
//! coordinator never asks for multi-row transactions. Enums travel as their
//! wire strings and the plan as a JSONB document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentor_core::{
    Component, ComponentKind, Failure, LearningObjective, ObjectiveRecord, ObjectiveStatus,
    PersistenceGateway, Plan, StoreError, ValidationStatus,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// A wrapper around the `PgPool` implementing the persistence contract.
#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn decode(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("stored value failed to decode: {e}"))
}

fn objective_from_row(row: &PgRow) -> Result<LearningObjective, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    let plan: Option<serde_json::Value> = row.try_get("plan").map_err(backend)?;
    let failure: Option<serde_json::Value> = row.try_get("failure").map_err(backend)?;
    Ok(LearningObjective {
        id: row.try_get::<Uuid, _>("id").map_err(backend)?,
        topic: row.try_get("topic").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        core_question: row.try_get("core_question").map_err(backend)?,
        summary: row.try_get("summary").map_err(backend)?,
        status: status.parse::<ObjectiveStatus>().map_err(decode)?,
        failure: failure
            .map(serde_json::from_value::<Failure>)
            .transpose()
            .map_err(decode)?,
        plan: plan.map(serde_json::from_value::<Plan>).transpose().map_err(decode)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(backend)?,
        completed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("completed_at")
            .map_err(backend)?,
    })
}

fn component_from_row(row: &PgRow) -> Result<Component, StoreError> {
    let kind: String = row.try_get("kind").map_err(backend)?;
    let status: String = row.try_get("validation_status").map_err(backend)?;
    let attempt_count: i32 = row.try_get("attempt_count").map_err(backend)?;
    let ordinal: i32 = row.try_get("ordinal").map_err(backend)?;
    Ok(Component {
        id: row.try_get::<Uuid, _>("id").map_err(backend)?,
        objective_id: row.try_get::<Uuid, _>("objective_id").map_err(backend)?,
        ordinal: ordinal as u32,
        kind: kind.parse::<ComponentKind>().map_err(decode)?,
        content: row.try_get("content").map_err(backend)?,
        validation_status: status.parse::<ValidationStatus>().map_err(decode)?,
        attempt_count: attempt_count as u32,
        last_error: row.try_get("last_error").map_err(backend)?,
    })
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn save_objective(&self, objective: &LearningObjective) -> Result<(), StoreError> {
        let plan = objective
            .plan
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(decode)?;
        let failure = objective
            .failure
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(decode)?;
        sqlx::query(
            r#"
            INSERT INTO learning_objectives
                (id, topic, title, core_question, summary, status, failure, plan, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                core_question = EXCLUDED.core_question,
                summary = EXCLUDED.summary,
                status = EXCLUDED.status,
                failure = EXCLUDED.failure,
                plan = EXCLUDED.plan,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(objective.id)
        .bind(&objective.topic)
        .bind(&objective.title)
        .bind(&objective.core_question)
        .bind(&objective.summary)
        .bind(objective.status.as_str())
        .bind(failure)
        .bind(plan)
        .bind(objective.created_at)
        .bind(objective.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn save_component(&self, component: &Component) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO components
                (id, objective_id, ordinal, kind, content, validation_status, attempt_count, last_error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                content = EXCLUDED.content,
                validation_status = EXCLUDED.validation_status,
                attempt_count = EXCLUDED.attempt_count,
                last_error = EXCLUDED.last_error
            "#,
        )
        .bind(component.id)
        .bind(component.objective_id)
        .bind(component.ordinal as i32)
        .bind(component.kind.as_str())
        .bind(&component.content)
        .bind(component.validation_status.as_str())
        .bind(component.attempt_count as i32)
        .bind(&component.last_error)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn update_component_status(
        &self,
        component_id: Uuid,
        status: ValidationStatus,
        attempt_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE components
            SET validation_status = $2, attempt_count = $3, last_error = $4
            WHERE id = $1
            "#,
        )
        .bind(component_id)
        .bind(status.as_str())
        .bind(attempt_count as i32)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ComponentNotFound(component_id));
        }
        Ok(())
    }

    async fn load_objective(&self, id: Uuid) -> Result<Option<ObjectiveRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM learning_objectives WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let objective = objective_from_row(&row)?;

        let component_rows =
            sqlx::query("SELECT * FROM components WHERE objective_id = $1 ORDER BY ordinal ASC")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
        let components = component_rows
            .iter()
            .map(component_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(ObjectiveRecord { objective, components }))
    }

    async fn list_objectives(&self) -> Result<Vec<LearningObjective>, StoreError> {
        let rows = sqlx::query("SELECT * FROM learning_objectives ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(objective_from_row).collect()
    }
}
