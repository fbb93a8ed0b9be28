//! Shared primitive aliases.

/// Surrogate key of step-level rows.
pub type DbId = i64;

/// Opaque identity of a workflow definition.
pub type WorkflowId = uuid::Uuid;

pub type Timestamp = chrono::DateTime<chrono::Utc>;
