//! Step rows and the nested create DTOs used to persist a definition.

use phenoflow_core::definition::{GeneratedStep, StepType};
use phenoflow_core::types::{DbId, Timestamp, WorkflowId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A step joined with its input and output rows.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StepRow {
    pub id: DbId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub doc: String,
    pub step_type: String,
    pub position: i32,
    pub input_doc: Option<String>,
    pub output_doc: Option<String>,
    pub output_extension: Option<String>,
    pub created_at: Timestamp,
}

/// A row from the `implementations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImplementationRow {
    pub id: DbId,
    pub step_id: DbId,
    pub file_name: String,
    pub language: String,
}

// ---------------------------------------------------------------------------
// Create DTOs
// ---------------------------------------------------------------------------

/// Implementation metadata to insert for a step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateImplementation {
    pub file_name: String,
    pub language: String,
}

/// A step with its input, output, and implementation rows.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStep {
    pub name: String,
    pub doc: String,
    pub step_type: StepType,
    pub position: i32,
    pub input_doc: String,
    pub output_doc: String,
    pub output_extension: String,
    pub implementations: Vec<CreateImplementation>,
}

impl From<&GeneratedStep> for CreateStep {
    /// Only implementation units are persisted; placeholders are dropped.
    fn from(step: &GeneratedStep) -> Self {
        Self {
            name: step.step_name.clone(),
            doc: step.step_doc.clone(),
            step_type: step.step_type,
            position: step.position,
            input_doc: step.input_doc.clone(),
            output_doc: step.output_doc.clone(),
            output_extension: step.output_extension.clone(),
            implementations: step
                .implementations
                .iter()
                .filter(|i| i.is_unit())
                .map(|i| CreateImplementation {
                    file_name: i.file_name.replace('/', ""),
                    language: i.language.clone(),
                })
                .collect(),
        }
    }
}
