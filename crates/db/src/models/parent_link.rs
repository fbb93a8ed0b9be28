//! Parent/child links between data-source variants.

use phenoflow_core::types::{DbId, Timestamp, WorkflowId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `workflow_parents` table.
///
/// `workflow_id` is the child; `distinct_step_name` is the connector step
/// that tells the child apart from its parent.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkflowParent {
    pub id: DbId,
    pub workflow_id: WorkflowId,
    pub parent_id: WorkflowId,
    pub name: String,
    pub distinct_step_name: String,
    pub distinct_step_position: i32,
    pub created_at: Timestamp,
}

/// Input for linking a child definition to its parent.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowParent {
    pub workflow_id: WorkflowId,
    pub parent_id: WorkflowId,
    pub name: String,
    pub distinct_step_name: String,
    pub distinct_step_position: i32,
}
