//! Repository for the `workflow_parents` table.

use phenoflow_core::types::WorkflowId;
use sqlx::PgPool;

use crate::models::parent_link::{CreateWorkflowParent, WorkflowParent};

/// Column list for workflow_parents queries.
const COLUMNS: &str =
    "id, workflow_id, parent_id, name, distinct_step_name, distinct_step_position, created_at";

/// Provides persistence for parent/child links.
pub struct ParentLinkRepo;

impl ParentLinkRepo {
    /// Link a child to its parent. A child has at most one parent, so an
    /// existing link for the child is replaced.
    pub async fn upsert(
        pool: &PgPool,
        input: &CreateWorkflowParent,
    ) -> Result<WorkflowParent, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_parents
                (workflow_id, parent_id, name, distinct_step_name, distinct_step_position)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (workflow_id) DO UPDATE SET
                parent_id = EXCLUDED.parent_id,
                name = EXCLUDED.name,
                distinct_step_name = EXCLUDED.distinct_step_name,
                distinct_step_position = EXCLUDED.distinct_step_position
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkflowParent>(&query)
            .bind(input.workflow_id)
            .bind(input.parent_id)
            .bind(&input.name)
            .bind(&input.distinct_step_name)
            .bind(input.distinct_step_position)
            .fetch_one(pool)
            .await
    }

    /// The parent link of a child, if it has one.
    pub async fn find_parent(
        pool: &PgPool,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowParent>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflow_parents WHERE workflow_id = $1");
        sqlx::query_as::<_, WorkflowParent>(&query)
            .bind(workflow_id)
            .fetch_optional(pool)
            .await
    }

    /// All children linked to a parent, in link order.
    pub async fn list_children(
        pool: &PgPool,
        parent_id: WorkflowId,
    ) -> Result<Vec<WorkflowParent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_parents WHERE parent_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, WorkflowParent>(&query)
            .bind(parent_id)
            .fetch_all(pool)
            .await
    }
}
