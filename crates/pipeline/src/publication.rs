//! Render, compose, and publish a set of stored workflows.

use std::collections::HashMap;
use std::sync::Arc;

use phenoflow_core::definition::StoredStep;
use phenoflow_core::naming::{repository_name, submodule_url};
use phenoflow_core::types::WorkflowId;
use phenoflow_db::models::workflow::Workflow;
use phenoflow_github::publish::BASE_BRANCH;
use phenoflow_github::{PublishRequest, Publisher, SubmoduleLink};
use serde::Serialize;

use crate::compose::{compose, ComposeItem};
use crate::error::PipelineError;
use crate::generator::{GenerateRequest, WorkflowGenerator};
use crate::materialize::{MaterializeRequest, Materializer};

/// A stored workflow to publish.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub workflow: Workflow,
    /// Steps in position order.
    pub steps: Vec<StoredStep>,
    /// Parent workflow, which names the repository when present.
    pub parent_id: Option<WorkflowId>,
}

impl PublishTarget {
    pub fn repository(&self) -> String {
        repository_name(
            &self.workflow.name,
            &self.parent_id.unwrap_or(self.workflow.id),
        )
    }

    /// Branch for this workflow: its connector step's name.
    pub fn branch(&self) -> String {
        self.steps
            .first()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| BASE_BRANCH.to_string())
    }
}

/// Where a workflow ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedRepository {
    pub workflow_id: WorkflowId,
    pub repo: String,
    pub branch: String,
    pub sha: String,
}

pub struct PublicationService {
    generator: Arc<dyn WorkflowGenerator>,
    materializer: Materializer,
    publisher: Publisher,
    repository_prefix: String,
}

impl PublicationService {
    pub fn new(
        generator: Arc<dyn WorkflowGenerator>,
        materializer: Materializer,
        publisher: Publisher,
        repository_prefix: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            materializer,
            publisher,
            repository_prefix: repository_prefix.into(),
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Publish `targets`, nested children first.
    ///
    /// Children go to the base branch so their commit can be pinned as a
    /// submodule of each parent; parents and independent workflows go to
    /// their connector branch. The first failure aborts the rest.
    pub async fn publish_all(
        &self,
        targets: &[PublishTarget],
    ) -> Result<Vec<PublishedRepository>, PipelineError> {
        let mut items = Vec::with_capacity(targets.len());
        for target in targets {
            let request = GenerateRequest::from_stored(
                target.workflow.id,
                &target.workflow.user_name,
                &target.steps,
            );
            let rendered = self.generator.generate(&request).await.map_err(|e| {
                tracing::error!(workflow_id = %target.workflow.id, error = %e, "Generation failed");
                e
            })?;
            items.push(ComposeItem {
                name: target.workflow.name.clone(),
                repository: target.repository(),
                rendered,
            });
        }

        let plan = compose(&mut items);
        let mut published = Vec::with_capacity(targets.len());

        let mut links: HashMap<usize, SubmoduleLink> = HashMap::new();
        for &child in &plan.children {
            let result = self
                .publish_one(&targets[child], &items[child], BASE_BRANCH, Vec::new(), &[])
                .await?;
            links.insert(
                child,
                SubmoduleLink {
                    name: result.repo.clone(),
                    url: submodule_url(&self.repository_prefix, &result.repo),
                    sha: result.sha.clone(),
                },
            );
            published.push(result);
        }

        let mut remaining: Vec<usize> = plan
            .parents
            .keys()
            .copied()
            .chain(plan.independents.iter().copied())
            .collect();
        remaining.sort_unstable();
        for idx in remaining {
            let submodules: Vec<SubmoduleLink> = plan
                .parents
                .get(&idx)
                .map(|children| children.iter().filter_map(|c| links.get(c).cloned()).collect())
                .unwrap_or_default();
            let nested: Vec<&str> = plan.nested_steps(idx).collect();
            let target = &targets[idx];
            let result = self
                .publish_one(target, &items[idx], &target.branch(), submodules, &nested)
                .await?;
            published.push(result);
        }
        Ok(published)
    }

    async fn publish_one(
        &self,
        target: &PublishTarget,
        item: &ComposeItem,
        branch: &str,
        submodules: Vec<SubmoduleLink>,
        nested_steps: &[&str],
    ) -> Result<PublishedRepository, PipelineError> {
        let mut rendered = item.rendered.clone();
        rendered
            .steps
            .retain(|s| !nested_steps.contains(&s.name.as_str()));

        let workflow = &target.workflow;
        let materialized = self
            .materializer
            .materialize(MaterializeRequest {
                workflow_id: workflow.id,
                name: &workflow.name,
                about: &workflow.about,
                author: &workflow.user_name,
                steps: &target.steps,
                rendered: &rendered,
            })
            .await?;

        let sha = self
            .publisher
            .publish(&PublishRequest {
                repo: item.repository.clone(),
                description: workflow.about.clone(),
                restricted: workflow.restricted,
                branch: branch.to_string(),
                content_dir: materialized.dir,
                submodules,
            })
            .await
            .map_err(|e| {
                tracing::error!(workflow_id = %workflow.id, error = %e, "Publish failed");
                e
            })?;

        tracing::info!(
            workflow_id = %workflow.id,
            repo = %item.repository,
            branch = %branch,
            sha = %sha,
            "Workflow published",
        );
        Ok(PublishedRepository {
            workflow_id: workflow.id,
            repo: item.repository.clone(),
            branch: branch.to_string(),
            sha,
        })
    }
}
