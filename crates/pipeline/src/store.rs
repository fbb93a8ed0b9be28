//! Persistence seam used by the pipeline.
//!
//! The resolver, importer, and reaper talk to a [`DefinitionStore`] rather
//! than the repositories directly, so orchestration can run against the
//! Postgres store in production and an in-memory store in tests.

use async_trait::async_trait;
use phenoflow_core::definition::StoredStep;
use phenoflow_core::types::WorkflowId;
use phenoflow_db::models::parent_link::{CreateWorkflowParent, WorkflowParent};
use phenoflow_db::models::step::CreateStep;
use phenoflow_db::models::workflow::{CreateWorkflow, Workflow};
use phenoflow_db::repositories::{ParentLinkRepo, StepRepo, WorkflowRepo};
use phenoflow_db::DbPool;

/// A workflow together with its steps in position order.
#[derive(Debug, Clone)]
pub struct StoredDefinition {
    pub workflow: Workflow,
    pub steps: Vec<StoredStep>,
}

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Workflows sharing `(name, about, user_name)`, oldest first.
    async fn find_by_identity(
        &self,
        name: &str,
        about: &str,
        user_name: &str,
    ) -> Result<Vec<Workflow>, sqlx::Error>;

    async fn has_step(&self, workflow_id: WorkflowId, name: &str) -> Result<bool, sqlx::Error>;

    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<StoredDefinition>, sqlx::Error>;

    /// Create a workflow and all its steps atomically.
    async fn create(
        &self,
        workflow: &CreateWorkflow,
        steps: &[CreateStep],
    ) -> Result<Workflow, sqlx::Error>;

    /// Replace every step of a workflow atomically, resetting completeness.
    async fn replace_steps(
        &self,
        workflow_id: WorkflowId,
        steps: &[CreateStep],
    ) -> Result<(), sqlx::Error>;

    async fn mark_complete(&self, workflow_id: WorkflowId) -> Result<bool, sqlx::Error>;

    /// Delete a workflow's steps and row. Returns `false` when it was absent.
    async fn delete(&self, workflow_id: WorkflowId) -> Result<bool, sqlx::Error>;

    async fn upsert_parent(
        &self,
        link: &CreateWorkflowParent,
    ) -> Result<WorkflowParent, sqlx::Error>;

    async fn find_parent(&self, workflow_id: WorkflowId)
        -> Result<Option<WorkflowParent>, sqlx::Error>;

    async fn list_children(&self, parent_id: WorkflowId)
        -> Result<Vec<WorkflowParent>, sqlx::Error>;
}

/// [`DefinitionStore`] backed by the Postgres repositories.
#[derive(Debug, Clone)]
pub struct PgDefinitionStore {
    pool: DbPool,
}

impl PgDefinitionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DefinitionStore for PgDefinitionStore {
    async fn find_by_identity(
        &self,
        name: &str,
        about: &str,
        user_name: &str,
    ) -> Result<Vec<Workflow>, sqlx::Error> {
        WorkflowRepo::find_by_identity(&self.pool, name, about, user_name).await
    }

    async fn has_step(&self, workflow_id: WorkflowId, name: &str) -> Result<bool, sqlx::Error> {
        StepRepo::has_step(&self.pool, workflow_id, name).await
    }

    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<StoredDefinition>, sqlx::Error> {
        let Some(workflow) = WorkflowRepo::find_by_id(&self.pool, workflow_id).await? else {
            return Ok(None);
        };
        let steps = StepRepo::list_for_workflow(&self.pool, workflow_id).await?;
        Ok(Some(StoredDefinition { workflow, steps }))
    }

    async fn create(
        &self,
        workflow: &CreateWorkflow,
        steps: &[CreateStep],
    ) -> Result<Workflow, sqlx::Error> {
        WorkflowRepo::create_with_steps(&self.pool, workflow, steps).await
    }

    async fn replace_steps(
        &self,
        workflow_id: WorkflowId,
        steps: &[CreateStep],
    ) -> Result<(), sqlx::Error> {
        StepRepo::replace_for_workflow(&self.pool, workflow_id, steps).await
    }

    async fn mark_complete(&self, workflow_id: WorkflowId) -> Result<bool, sqlx::Error> {
        WorkflowRepo::mark_complete(&self.pool, workflow_id, true).await
    }

    async fn delete(&self, workflow_id: WorkflowId) -> Result<bool, sqlx::Error> {
        StepRepo::delete_for_workflow(&self.pool, workflow_id).await?;
        WorkflowRepo::delete(&self.pool, workflow_id).await
    }

    async fn upsert_parent(
        &self,
        link: &CreateWorkflowParent,
    ) -> Result<WorkflowParent, sqlx::Error> {
        ParentLinkRepo::upsert(&self.pool, link).await
    }

    async fn find_parent(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowParent>, sqlx::Error> {
        ParentLinkRepo::find_parent(&self.pool, workflow_id).await
    }

    async fn list_children(
        &self,
        parent_id: WorkflowId,
    ) -> Result<Vec<WorkflowParent>, sqlx::Error> {
        ParentLinkRepo::list_children(&self.pool, parent_id).await
    }
}
