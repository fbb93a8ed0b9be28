//! Matching and change detection for incoming definitions.
//!
//! An incoming definition is resolved against persisted workflows sharing
//! its `(name, about, author)` identity. Data-source variants of one
//! phenotype share that identity and are told apart by their connector
//! step name. A resolved workflow is compared step by step, and its steps
//! are replaced wholesale when anything differs.

use std::sync::Arc;

use phenoflow_core::definition::{duplicate_step_names, validate_definition, GeneratedDefinition, GeneratedStep};
use phenoflow_core::diff::{compare_structure, DefinitionDiff, StructuralDiff};
use phenoflow_core::naming::{identity_key, sanitize_author};
use phenoflow_core::types::WorkflowId;
use phenoflow_db::models::step::CreateStep;
use phenoflow_db::models::workflow::{CreateWorkflow, Workflow};

use crate::error::PipelineError;
use crate::lock::IdentityLocks;
use crate::storage::ImplementationStorage;
use crate::store::DefinitionStore;

/// More stored variants than this for one identity is an ambiguity.
pub const MAX_CANDIDATES: usize = 4;

/// What an import did to the identity it resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Created(WorkflowId),
    Updated(WorkflowId),
    /// Matched a stored definition with identical steps and content.
    Unchanged(WorkflowId),
}

impl ImportOutcome {
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Unchanged(id) => *id,
        }
    }

    /// Whether the workflow needs (re)publication.
    pub fn is_modified(&self) -> bool {
        !matches!(self, Self::Unchanged(_))
    }
}

/// A new workflow to persist with its steps.
#[derive(Debug, Clone)]
pub struct NewDefinition<'a> {
    pub id: WorkflowId,
    pub name: &'a str,
    pub about: &'a str,
    pub user_name: &'a str,
    pub restricted: bool,
    pub steps: &'a [GeneratedStep],
}

pub struct Resolver {
    store: Arc<dyn DefinitionStore>,
    storage: ImplementationStorage,
    locks: Arc<IdentityLocks>,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        storage: ImplementationStorage,
        locks: Arc<IdentityLocks>,
    ) -> Self {
        Self {
            store,
            storage,
            locks,
        }
    }

    /// Find the stored workflow an incoming definition resolves to.
    ///
    /// With a connector, the first candidate already holding a step of that
    /// name wins; a single candidate without a connector is taken as is.
    pub async fn find_existing(
        &self,
        name: &str,
        about: &str,
        user_name: &str,
        connector: Option<&str>,
    ) -> Result<Option<Workflow>, PipelineError> {
        let candidates = self
            .store
            .find_by_identity(name, about, &sanitize_author(user_name))
            .await?;

        if candidates.len() > MAX_CANDIDATES {
            return Err(PipelineError::Ambiguous {
                name: name.to_string(),
                count: candidates.len(),
            });
        }

        let Some(connector) = connector else {
            return Ok(candidates.into_iter().next());
        };
        for candidate in candidates {
            if self.store.has_step(candidate.id, connector).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Compare incoming steps with a stored workflow, reading stored
    /// implementation bytes only when the structure matches.
    ///
    /// A stored file that cannot be read is an error, not a change.
    pub async fn detect_change(
        &self,
        workflow_id: WorkflowId,
        incoming: &[GeneratedStep],
    ) -> Result<DefinitionDiff, PipelineError> {
        let stored = self
            .store
            .load(workflow_id)
            .await?
            .ok_or(PipelineError::WorkflowNotFound(workflow_id))?;

        let checks = match compare_structure(incoming, &stored.steps) {
            StructuralDiff::Changed(reason) => return Ok(DefinitionDiff::Changed(reason)),
            StructuralDiff::NeedsContentCheck(checks) => checks,
        };
        for check in checks {
            let bytes = self
                .storage
                .read(&workflow_id, check.language, check.file_name)
                .await?;
            if let Some(reason) = check.compare(&bytes) {
                return Ok(DefinitionDiff::Changed(reason));
            }
        }
        Ok(DefinitionDiff::Unchanged)
    }

    /// Import one definition: create it, replace its steps, or leave it be.
    ///
    /// Nothing is written when validation fails. The identity lock is held
    /// from lookup until the rows are committed.
    pub async fn import_definition(
        &self,
        definition: &GeneratedDefinition,
        restricted: bool,
    ) -> Result<ImportOutcome, PipelineError> {
        let duplicates = duplicate_step_names(&definition.steps);
        if !duplicates.is_empty() {
            return Err(PipelineError::DuplicateSteps {
                definition: definition.name.clone(),
                names: duplicates,
            });
        }
        validate_definition(definition)?;

        let key = identity_key(&definition.name, &definition.about, &definition.user_name);
        let _guard = self.locks.acquire(&key).await;

        let existing = self
            .find_existing(
                &definition.name,
                &definition.about,
                &definition.user_name,
                definition.connector_step_name(),
            )
            .await?;

        let Some(existing) = existing else {
            let id = self.fresh_id(definition.id).await?;
            self.create_definition(&NewDefinition {
                id,
                name: &definition.name,
                about: &definition.about,
                user_name: &definition.user_name,
                restricted,
                steps: &definition.steps,
            })
            .await?;
            return Ok(ImportOutcome::Created(id));
        };

        match self.detect_change(existing.id, &definition.steps).await? {
            DefinitionDiff::Unchanged => {
                tracing::info!(workflow_id = %existing.id, name = %definition.name, "Definition unchanged");
                Ok(ImportOutcome::Unchanged(existing.id))
            }
            DefinitionDiff::Changed(reason) => {
                tracing::info!(
                    workflow_id = %existing.id,
                    name = %definition.name,
                    reason = %reason,
                    "Definition changed, replacing steps",
                );
                self.storage
                    .write_definition(&existing.id, &definition.steps)
                    .await?;
                let steps = create_steps(&definition.steps);
                self.store.replace_steps(existing.id, &steps).await?;
                self.store.mark_complete(existing.id).await?;
                Ok(ImportOutcome::Updated(existing.id))
            }
        }
    }

    /// Persist a new workflow. Implementation files are written before the
    /// rows that reference them.
    pub async fn create_definition(&self, new: &NewDefinition<'_>) -> Result<Workflow, PipelineError> {
        let duplicates = duplicate_step_names(new.steps);
        if !duplicates.is_empty() {
            return Err(PipelineError::DuplicateSteps {
                definition: new.name.to_string(),
                names: duplicates,
            });
        }

        self.storage.write_definition(&new.id, new.steps).await?;
        let workflow = self
            .store
            .create(
                &CreateWorkflow {
                    id: new.id,
                    name: new.name.to_string(),
                    about: new.about.to_string(),
                    user_name: sanitize_author(new.user_name),
                    restricted: new.restricted,
                },
                &create_steps(new.steps),
            )
            .await?;
        self.store.mark_complete(workflow.id).await?;

        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, steps = new.steps.len(), "Workflow created");
        Ok(workflow)
    }

    /// The incoming id, unless a workflow already holds it.
    async fn fresh_id(&self, proposed: WorkflowId) -> Result<WorkflowId, PipelineError> {
        if self.store.load(proposed).await?.is_some() {
            let id = uuid::Uuid::new_v4();
            tracing::warn!(proposed = %proposed, assigned = %id, "Workflow id already taken");
            return Ok(id);
        }
        Ok(proposed)
    }
}

fn create_steps(steps: &[GeneratedStep]) -> Vec<CreateStep> {
    steps.iter().map(CreateStep::from).collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use phenoflow_core::definition::StepType;
    use phenoflow_core::diff::{ChangeReason, StepField};

    use super::*;
    use crate::testing::{definition, step, MemoryDefinitionStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryDefinitionStore>,
        storage: ImplementationStorage,
        resolver: Resolver,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryDefinitionStore::default());
        let storage = ImplementationStorage::new(dir.path().join("uploads"), dir.path().join("output"));
        let resolver = Resolver::new(store.clone(), storage.clone(), Arc::new(IdentityLocks::new()));
        Fixture {
            _dir: dir,
            store,
            storage,
            resolver,
        }
    }

    fn diabetes(connector: &str) -> GeneratedDefinition {
        definition(
            "Diabetes",
            vec![
                step(connector, StepType::Load, 1, "print('read')"),
                step("diabetes-check", StepType::Logic, 2, "codes = []"),
                step("output-cases", StepType::Output, 3, "print('out')"),
            ],
        )
    }

    #[tokio::test]
    async fn reimport_of_unchanged_definition_is_a_no_op() {
        let f = fixture();
        let def = diabetes("read-disc");

        let first = f.resolver.import_definition(&def, false).await.unwrap();
        assert_matches!(first, ImportOutcome::Created(id) if id == def.id);
        let second = f.resolver.import_definition(&def, false).await.unwrap();
        assert_eq!(second, ImportOutcome::Unchanged(def.id));
        assert_eq!(f.store.workflow_count().await, 1);
        assert_eq!(f.store.replace_count().await, 0);
    }

    #[tokio::test]
    async fn each_single_field_change_replaces_steps() {
        type Mutation = fn(&mut GeneratedDefinition);
        let mutations: [Mutation; 3] = [
            |d| d.steps[1].step_doc = "changed doc".to_string(),
            |d| d.steps[1].step_type = StepType::Boolean,
            |d| d.steps[1].implementations[0].implementation_template = Some("codes = [1]".into()),
        ];
        for mutate in mutations {
            let f = fixture();
            let def = diabetes("read-disc");
            f.resolver.import_definition(&def, false).await.unwrap();

            let mut changed = def.clone();
            mutate(&mut changed);
            let outcome = f.resolver.import_definition(&changed, false).await.unwrap();
            assert_eq!(outcome, ImportOutcome::Updated(def.id));
            assert_eq!(f.store.replace_count().await, 1);
            assert_eq!(f.store.workflow_count().await, 1);
        }
    }

    #[tokio::test]
    async fn changed_content_is_written_before_replacement() {
        let f = fixture();
        let def = diabetes("read-disc");
        f.resolver.import_definition(&def, false).await.unwrap();

        let mut changed = def.clone();
        changed.steps[1].implementations[0].implementation_template = Some("codes = [2]".into());
        f.resolver.import_definition(&changed, false).await.unwrap();

        let bytes = f.storage.read(&def.id, "python", "diabetes-check.py").await.unwrap();
        assert_eq!(bytes, b"codes = [2]");
        assert_eq!(
            f.resolver.detect_change(def.id, &changed.steps).await.unwrap(),
            DefinitionDiff::Unchanged
        );
    }

    #[tokio::test]
    async fn duplicate_steps_abort_before_any_write() {
        let f = fixture();
        let mut def = diabetes("read-disc");
        def.steps[2].step_name = "diabetes-check".to_string();

        let err = f.resolver.import_definition(&def, false).await.unwrap_err();
        assert_matches!(err, PipelineError::DuplicateSteps { ref definition, .. } if definition == "Diabetes");
        assert_eq!(f.store.workflow_count().await, 0);
        assert!(!f.storage.language_dir(&def.id, "python").exists());
    }

    #[tokio::test]
    async fn more_than_four_candidates_is_ambiguous() {
        let f = fixture();
        for i in 0..5 {
            let mut def = diabetes(&format!("read-source-{i}"));
            def.id = uuid::Uuid::new_v4();
            f.resolver.import_definition(&def, false).await.unwrap();
        }
        assert_eq!(f.store.workflow_count().await, 5);

        let mut sixth = diabetes("read-source-5");
        sixth.id = uuid::Uuid::new_v4();
        let err = f.resolver.import_definition(&sixth, false).await.unwrap_err();
        assert_matches!(err, PipelineError::Ambiguous { count: 5, .. });
        assert_eq!(f.store.workflow_count().await, 5);
    }

    #[tokio::test]
    async fn connector_selects_among_variants() {
        let f = fixture();
        let disc = diabetes("read-disc");
        let mut gp = diabetes("read-gp");
        gp.id = uuid::Uuid::new_v4();
        f.resolver.import_definition(&disc, false).await.unwrap();
        let outcome = f.resolver.import_definition(&gp, false).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Created(gp.id));

        let found = f
            .resolver
            .find_existing("Diabetes", "Diabetes phenotype", "alice", Some("read-gp"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, gp.id);
        assert!(f
            .resolver
            .find_existing("Diabetes", "Diabetes phenotype", "alice", Some("read-other"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn author_markup_does_not_split_identity() {
        let f = fixture();
        let def = diabetes("read-disc");
        f.resolver.import_definition(&def, false).await.unwrap();

        let mut marked = def.clone();
        marked.user_name = "<b>alice</b>".to_string();
        let outcome = f.resolver.import_definition(&marked, false).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Unchanged(def.id));
    }

    #[tokio::test]
    async fn structural_change_is_reported_without_reading_files() {
        let f = fixture();
        let def = diabetes("read-disc");
        f.resolver.import_definition(&def, false).await.unwrap();
        std::fs::remove_dir_all(f.storage.language_dir(&def.id, "python")).unwrap();

        let mut changed = def.clone();
        changed.steps[2].output_extension = "txt".to_string();
        assert_eq!(
            f.resolver.detect_change(def.id, &changed.steps).await.unwrap(),
            DefinitionDiff::Changed(ChangeReason::StepField {
                position: 3,
                field: StepField::OutputExtension,
            })
        );
    }

    #[tokio::test]
    async fn unreadable_stored_file_is_an_error() {
        let f = fixture();
        let def = diabetes("read-disc");
        f.resolver.import_definition(&def, false).await.unwrap();
        std::fs::remove_dir_all(f.storage.language_dir(&def.id, "python")).unwrap();

        let err = f.resolver.import_definition(&def, false).await.unwrap_err();
        assert_matches!(err, PipelineError::Storage(_));
    }

    #[tokio::test]
    async fn taken_id_is_replaced() {
        let f = fixture();
        let def = diabetes("read-disc");
        f.resolver.import_definition(&def, false).await.unwrap();

        let mut other = definition("Asthma", def.steps.clone());
        other.id = def.id;
        let outcome = f.resolver.import_definition(&other, false).await.unwrap();
        assert_matches!(outcome, ImportOutcome::Created(id) if id != def.id);
    }
}
