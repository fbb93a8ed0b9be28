//! Repository for the `workflows` table.

use phenoflow_core::types::WorkflowId;
use sqlx::PgPool;

use crate::models::step::CreateStep;
use crate::models::workflow::{CreateWorkflow, Workflow};
use crate::repositories::StepRepo;

/// Column list for workflows queries.
const COLUMNS: &str = "id, name, about, user_name, complete, restricted, created_at, updated_at";

/// Provides persistence for workflow definitions.
pub struct WorkflowRepo;

impl WorkflowRepo {
    /// Insert a workflow together with all of its steps in one transaction.
    pub async fn create_with_steps(
        pool: &PgPool,
        input: &CreateWorkflow,
        steps: &[CreateStep],
    ) -> Result<Workflow, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO workflows (id, name, about, user_name, restricted)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        let workflow = sqlx::query_as::<_, Workflow>(&query)
            .bind(input.id)
            .bind(&input.name)
            .bind(&input.about)
            .bind(&input.user_name)
            .bind(input.restricted)
            .fetch_one(&mut *tx)
            .await?;

        StepRepo::insert_steps(&mut tx, workflow.id, steps).await?;

        tx.commit().await?;
        Ok(workflow)
    }

    /// Find a workflow by its identity.
    pub async fn find_by_id(pool: &PgPool, id: WorkflowId) -> Result<Option<Workflow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflows WHERE id = $1");
        sqlx::query_as::<_, Workflow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All workflows sharing a `(name, about, user_name)` triple, oldest first.
    pub async fn find_by_identity(
        pool: &PgPool,
        name: &str,
        about: &str,
        user_name: &str,
    ) -> Result<Vec<Workflow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflows
             WHERE name = $1 AND about = $2 AND user_name = $3
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, Workflow>(&query)
            .bind(name)
            .bind(about)
            .bind(user_name)
            .fetch_all(pool)
            .await
    }

    /// List every workflow, oldest first.
    pub async fn list(pool: &PgPool) -> Result<Vec<Workflow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflows ORDER BY created_at, id");
        sqlx::query_as::<_, Workflow>(&query).fetch_all(pool).await
    }

    /// Set the completeness flag. Returns `true` if a row was updated.
    pub async fn mark_complete(
        pool: &PgPool,
        id: WorkflowId,
        complete: bool,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE workflows SET complete = $1, updated_at = now() WHERE id = $2")
                .bind(complete)
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a workflow. Steps and parent links cascade.
    /// Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: WorkflowId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
