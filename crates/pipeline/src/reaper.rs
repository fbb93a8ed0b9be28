//! Removal of workflows and their remote repositories.
//!
//! A workflow family (a parent and its connector-variant children) is
//! always removed together. The partial-import scan finds repositories
//! whose branch set was never completed and removes their family.

use std::collections::HashSet;
use std::sync::Arc;

use phenoflow_core::naming::{is_managed_repository, parse_repository_id};
use phenoflow_core::types::WorkflowId;
use phenoflow_github::GitHost;

use crate::error::PipelineError;
use crate::storage::ImplementationStorage;
use crate::store::DefinitionStore;

pub struct Reaper {
    store: Arc<dyn DefinitionStore>,
    storage: ImplementationStorage,
    host: Arc<dyn GitHost>,
    organisation: String,
    expected_branch_count: usize,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        storage: ImplementationStorage,
        host: Arc<dyn GitHost>,
        organisation: impl Into<String>,
        expected_branch_count: usize,
    ) -> Self {
        Self {
            store,
            storage,
            host,
            organisation: organisation.into(),
            expected_branch_count,
        }
    }

    /// Remove one workflow: its rows, its files, and the repository named
    /// after it. Returns the deleted repository, if one was found.
    pub async fn remove_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<String>, PipelineError> {
        let removed = self.store.delete(workflow_id).await?;
        self.storage.remove_workflow(&workflow_id).await?;
        let repo = self.delete_repository_of(workflow_id).await?;
        tracing::info!(workflow_id = %workflow_id, removed, repo = ?repo, "Workflow removed");
        Ok(repo)
    }

    /// Remove a workflow with its whole family.
    ///
    /// A child takes its siblings and parent with it; a parent takes its
    /// children. Returns every repository deleted.
    pub async fn remove_workflows(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<String>, PipelineError> {
        let mut order: Vec<WorkflowId> = Vec::new();
        if let Some(link) = self.store.find_parent(workflow_id).await? {
            for sibling in self.store.list_children(link.parent_id).await? {
                if sibling.workflow_id != workflow_id {
                    order.push(sibling.workflow_id);
                }
            }
            order.push(link.parent_id);
        }
        for child in self.store.list_children(workflow_id).await? {
            order.push(child.workflow_id);
        }
        order.push(workflow_id);

        let mut repos = Vec::new();
        let mut seen = HashSet::new();
        for id in order {
            if !seen.insert(id) {
                continue;
            }
            if let Some(repo) = self.remove_workflow(id).await? {
                repos.push(repo);
            }
        }
        Ok(repos)
    }

    /// Remove every family whose repository has fewer branches than a fully
    /// published one. Returns the repositories deleted.
    pub async fn remove_partial_imports(&self) -> Result<Vec<String>, PipelineError> {
        let repositories = self.host.list_repositories(&self.organisation).await?;
        let mut removed: HashSet<String> = HashSet::new();

        for repository in repositories {
            if !is_managed_repository(&repository.name) || removed.contains(&repository.name) {
                continue;
            }
            let branches = self
                .host
                .list_branches(&self.organisation, &repository.name)
                .await?;
            if branches.len() >= self.expected_branch_count {
                continue;
            }
            tracing::info!(
                repo = %repository.name,
                branches = branches.len(),
                expected = self.expected_branch_count,
                "Removing partial import",
            );
            match parse_repository_id(&repository.name) {
                Some(id) => removed.extend(self.remove_workflows(id).await?),
                None => {
                    self.host
                        .delete_repository(&self.organisation, &repository.name)
                        .await?;
                }
            }
            removed.insert(repository.name);
        }

        let mut removed: Vec<String> = removed.into_iter().collect();
        removed.sort();
        Ok(removed)
    }

    /// Delete every managed repository of the organisation.
    pub async fn clear_all_repositories(&self) -> Result<usize, PipelineError> {
        let repositories = self.host.list_repositories(&self.organisation).await?;
        let mut deleted = 0;
        for repository in repositories.iter().filter(|r| is_managed_repository(&r.name)) {
            self.host
                .delete_repository(&self.organisation, &repository.name)
                .await?;
            deleted += 1;
        }
        tracing::info!(deleted, "Repositories cleared");
        Ok(deleted)
    }

    /// Delete the first managed repository whose name carries the id.
    async fn delete_repository_of(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<String>, PipelineError> {
        let id = workflow_id.to_string();
        let repositories = self.host.list_repositories(&self.organisation).await?;
        let Some(repository) = repositories
            .into_iter()
            .find(|r| is_managed_repository(&r.name) && r.name.contains(&id))
        else {
            return Ok(None);
        };
        self.host
            .delete_repository(&self.organisation, &repository.name)
            .await?;
        Ok(Some(repository.name))
    }
}
