//! Workflow definition rows.

use phenoflow_core::types::{Timestamp, WorkflowId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A row from the `workflows` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub about: String,
    pub user_name: String,
    /// Set once the definition has been rendered and published.
    pub complete: bool,
    pub restricted: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Create DTO
// ---------------------------------------------------------------------------

/// Input for creating a workflow record. The identity is supplied by the
/// caller, not generated by the database.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflow {
    pub id: WorkflowId,
    pub name: String,
    pub about: String,
    pub user_name: String,
    pub restricted: bool,
}
