//! Batch import and connector variants.
//!
//! A batch is a list of generated definitions, usually the data-source
//! variants of one phenotype. Each is resolved and persisted in order; the
//! first new or changed variant of a phenotype becomes the family parent
//! and later ones are linked to it as children. Everything that changed is
//! then published in one composed pass.

use std::collections::HashMap;
use std::sync::Arc;

use phenoflow_core::definition::{
    GeneratedDefinition, GeneratedImplementation, GeneratedStep, StepType, StoredStep,
    SUPPORTED_LANGUAGES,
};
use phenoflow_core::error::CoreError;
use phenoflow_core::naming::{identity_key, slug};
use phenoflow_core::types::WorkflowId;
use phenoflow_db::models::parent_link::CreateWorkflowParent;
use serde::{Deserialize, Serialize};

use crate::batch::{DefinitionBatch, MalformedDefinition};
use crate::error::PipelineError;
use crate::lock::IdentityLocks;
use crate::publication::{PublicationService, PublishTarget, PublishedRepository};
use crate::resolver::{ImportOutcome, NewDefinition, Resolver};
use crate::storage::ImplementationStorage;
use crate::store::DefinitionStore;

/// Output extension of a connector step.
const CONNECTOR_OUTPUT_EXTENSION: &str = "csv";

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionOutcome {
    Created,
    Updated,
    Unchanged,
    Failed,
}

impl From<ImportOutcome> for DefinitionOutcome {
    fn from(outcome: ImportOutcome) -> Self {
        match outcome {
            ImportOutcome::Created(_) => Self::Created,
            ImportOutcome::Updated(_) => Self::Updated,
            ImportOutcome::Unchanged(_) => Self::Unchanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionReport {
    pub name: String,
    pub workflow_id: Option<WorkflowId>,
    pub outcome: DefinitionOutcome,
}

/// Caller-visible result of a batch. Error detail stays in the logs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub definitions: Vec<DefinitionReport>,
    pub published: Vec<PublishedRepository>,
    pub success: bool,
}

impl BatchReport {
    pub fn count(&self, outcome: DefinitionOutcome) -> usize {
        self.definitions
            .iter()
            .filter(|d| d.outcome == outcome)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

fn default_connector_type() -> StepType {
    StepType::External
}

/// A data-source connector to graft onto an existing workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSpec {
    /// Human-readable name of the data source, e.g. `GP Records`.
    pub data_source: String,
    #[serde(default = "default_connector_type")]
    pub step_type: StepType,
    pub language: String,
    pub file_name: String,
    pub implementation_template: String,
}

impl ConnectorSpec {
    pub fn validate(&self) -> Result<(), CoreError> {
        if slug(&self.data_source).is_empty() {
            return Err(CoreError::Validation("dataSource must not be empty".into()));
        }
        if !self.step_type.is_entry() {
            return Err(CoreError::Validation(format!(
                "Connector type must be load or external, got {}",
                self.step_type
            )));
        }
        if !SUPPORTED_LANGUAGES.contains(&self.language.as_str()) {
            return Err(CoreError::Validation(format!(
                "Unsupported connector language '{}'",
                self.language
            )));
        }
        if !self.file_name.contains('.') {
            return Err(CoreError::Validation(format!(
                "Connector file '{}' has no extension",
                self.file_name
            )));
        }
        Ok(())
    }

    pub fn step_name(&self) -> String {
        format!("read-potential-cases-{}", slug(&self.data_source))
    }

    /// The connector as the first step of a workflow whose previous first
    /// step consumed `input_doc`.
    fn to_step(&self, input_doc: &str) -> GeneratedStep {
        GeneratedStep {
            step_name: self.step_name(),
            step_doc: format!("Read potential cases from {}", self.data_source),
            step_type: self.step_type,
            position: 1,
            input_doc: input_doc.to_string(),
            output_doc: format!("Initial potential cases, read from {}", self.data_source),
            output_extension: CONNECTOR_OUTPUT_EXTENSION.to_string(),
            implementations: vec![GeneratedImplementation {
                file_name: self.file_name.clone(),
                language: self.language.clone(),
                implementation_template: Some(self.implementation_template.clone()),
            }],
        }
    }
}

// ---------------------------------------------------------------------------
// Importer
// ---------------------------------------------------------------------------

pub struct Importer {
    resolver: Resolver,
    store: Arc<dyn DefinitionStore>,
    storage: ImplementationStorage,
    locks: Arc<IdentityLocks>,
    publication: PublicationService,
}

impl Importer {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        storage: ImplementationStorage,
        locks: Arc<IdentityLocks>,
        publication: PublicationService,
    ) -> Self {
        Self {
            resolver: Resolver::new(Arc::clone(&store), storage.clone(), Arc::clone(&locks)),
            store,
            storage,
            locks,
            publication,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Import and publish a batch of definitions.
    ///
    /// A definition that fails is reported and skipped; the others carry on.
    /// Unchanged definitions are neither linked nor republished.
    pub async fn import_batch(
        &self,
        definitions: &[GeneratedDefinition],
        restricted: bool,
    ) -> BatchReport {
        self.import_entries(definitions.iter().map(Ok), restricted)
            .await
    }

    /// Import a batch read from a file. Elements that could not be decoded
    /// are reported as failed alongside the rest.
    pub async fn import_decoded(&self, batch: &DefinitionBatch, restricted: bool) -> BatchReport {
        self.import_entries(batch.entries.iter().map(Result::as_ref), restricted)
            .await
    }

    async fn import_entries<'a>(
        &self,
        entries: impl Iterator<Item = Result<&'a GeneratedDefinition, &'a MalformedDefinition>>,
        restricted: bool,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let mut family_parents: HashMap<String, WorkflowId> = HashMap::new();
        let mut modified: Vec<WorkflowId> = Vec::new();

        for entry in entries {
            let definition = match entry {
                Ok(definition) => definition,
                Err(malformed) => {
                    tracing::error!(name = %malformed.name, error = %malformed.error, "Malformed definition");
                    report.definitions.push(DefinitionReport {
                        name: malformed.name.clone(),
                        workflow_id: None,
                        outcome: DefinitionOutcome::Failed,
                    });
                    continue;
                }
            };
            let outcome = match self.resolver.import_definition(definition, restricted).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(name = %definition.name, error = %e, "Import failed");
                    report.definitions.push(DefinitionReport {
                        name: definition.name.clone(),
                        workflow_id: None,
                        outcome: DefinitionOutcome::Failed,
                    });
                    continue;
                }
            };

            let workflow_id = outcome.workflow_id();
            let mut entry = DefinitionReport {
                name: definition.name.clone(),
                workflow_id: Some(workflow_id),
                outcome: outcome.into(),
            };
            if outcome.is_modified() {
                match self
                    .link_to_family(definition, workflow_id, &mut family_parents)
                    .await
                {
                    Ok(()) => modified.push(workflow_id),
                    Err(e) => {
                        tracing::error!(workflow_id = %workflow_id, error = %e, "Linking to parent failed");
                        entry.outcome = DefinitionOutcome::Failed;
                    }
                }
            }
            report.definitions.push(entry);
        }

        let publish_result = match self.publish_targets(&modified).await {
            Ok(targets) => self.publication.publish_all(&targets).await,
            Err(e) => Err(e),
        };
        let published = match publish_result {
            Ok(published) => published,
            Err(e) => {
                tracing::error!(error = %e, "Batch publication failed");
                report.success = false;
                return report;
            }
        };

        report.published = published;
        report.success = report.count(DefinitionOutcome::Failed) == 0;
        tracing::info!(
            created = report.count(DefinitionOutcome::Created),
            updated = report.count(DefinitionOutcome::Updated),
            unchanged = report.count(DefinitionOutcome::Unchanged),
            failed = report.count(DefinitionOutcome::Failed),
            published = report.published.len(),
            "Batch imported",
        );
        report
    }

    /// The first entry-type variant of a phenotype in a batch becomes its
    /// parent; later variants become its children unless already linked.
    async fn link_to_family(
        &self,
        definition: &GeneratedDefinition,
        workflow_id: WorkflowId,
        family_parents: &mut HashMap<String, WorkflowId>,
    ) -> Result<(), PipelineError> {
        let Some(connector) = definition.connector_step_name() else {
            return Ok(());
        };
        let key = identity_key(&definition.name, &definition.about, &definition.user_name);
        let Some(&parent_id) = family_parents.get(&key) else {
            family_parents.insert(key, workflow_id);
            return Ok(());
        };
        if parent_id == workflow_id || self.store.find_parent(workflow_id).await?.is_some() {
            return Ok(());
        }

        self.store
            .upsert_parent(&CreateWorkflowParent {
                workflow_id,
                parent_id,
                name: definition.name.clone(),
                distinct_step_name: connector.to_string(),
                distinct_step_position: 0,
            })
            .await?;
        tracing::info!(workflow_id = %workflow_id, parent_id = %parent_id, connector, "Linked to parent");
        Ok(())
    }

    async fn publish_targets(
        &self,
        workflow_ids: &[WorkflowId],
    ) -> Result<Vec<PublishTarget>, PipelineError> {
        let mut targets = Vec::with_capacity(workflow_ids.len());
        for &id in workflow_ids {
            let stored = self
                .store
                .load(id)
                .await?
                .ok_or(PipelineError::WorkflowNotFound(id))?;
            let parent_id = self.store.find_parent(id).await?.map(|link| link.parent_id);
            targets.push(PublishTarget {
                workflow: stored.workflow,
                steps: stored.steps,
                parent_id,
            });
        }
        Ok(targets)
    }

    /// Create a variant of an existing workflow reading from a new data
    /// source, link it as the existing workflow's child, and publish it.
    pub async fn add_connector(
        &self,
        existing_id: WorkflowId,
        connector: &ConnectorSpec,
        new_id: Option<WorkflowId>,
    ) -> Result<Vec<PublishedRepository>, PipelineError> {
        connector.validate()?;
        let existing = self
            .store
            .load(existing_id)
            .await?
            .ok_or(PipelineError::WorkflowNotFound(existing_id))?;

        let mut steps = Vec::with_capacity(existing.steps.len());
        for step in &existing.steps {
            steps.push(self.copy_step(existing_id, step).await?);
        }
        let Some(first) = steps.first_mut() else {
            return Err(CoreError::Validation(format!(
                "Workflow {existing_id} has no steps to attach a connector to"
            ))
            .into());
        };
        *first = connector.to_step(&first.input_doc);

        let workflow = &existing.workflow;
        let id = new_id.unwrap_or_else(uuid::Uuid::new_v4);
        {
            let key = identity_key(&workflow.name, &workflow.about, &workflow.user_name);
            let _guard = self.locks.acquire(&key).await;
            self.resolver
                .create_definition(&NewDefinition {
                    id,
                    name: &workflow.name,
                    about: &workflow.about,
                    user_name: &workflow.user_name,
                    restricted: workflow.restricted,
                    steps: &steps,
                })
                .await?;
        }

        self.store
            .upsert_parent(&CreateWorkflowParent {
                workflow_id: id,
                parent_id: existing_id,
                name: workflow.name.clone(),
                distinct_step_name: connector.step_name(),
                distinct_step_position: 0,
            })
            .await?;
        tracing::info!(workflow_id = %id, parent_id = %existing_id, connector = %connector.step_name(), "Connector added");

        let targets = self.publish_targets(&[id]).await?;
        self.publication.publish_all(&targets).await
    }

    /// A stored step as an incoming one, with implementation bytes read
    /// back from storage.
    async fn copy_step(
        &self,
        workflow_id: WorkflowId,
        step: &StoredStep,
    ) -> Result<GeneratedStep, PipelineError> {
        let mut implementations = Vec::with_capacity(step.implementations.len());
        for implementation in &step.implementations {
            let implementation_template = if implementation.is_unit() {
                let bytes = self
                    .storage
                    .read(&workflow_id, &implementation.language, &implementation.file_name)
                    .await?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            } else {
                None
            };
            implementations.push(GeneratedImplementation {
                file_name: implementation.file_name.clone(),
                language: implementation.language.clone(),
                implementation_template,
            });
        }
        Ok(GeneratedStep {
            step_name: step.name.clone(),
            step_doc: step.doc.clone(),
            step_type: step.step_type,
            position: step.position,
            input_doc: step.input_doc.clone(),
            output_doc: step.output_doc.clone(),
            output_extension: step.output_extension.clone(),
            implementations,
        })
    }
}
