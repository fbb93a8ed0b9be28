//! In-memory collaborators for pipeline tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use phenoflow_core::definition::{
    GeneratedDefinition, GeneratedImplementation, GeneratedStep, StepType, StoredImplementation,
    StoredStep,
};
use phenoflow_core::types::WorkflowId;
use phenoflow_db::models::parent_link::{CreateWorkflowParent, WorkflowParent};
use phenoflow_db::models::step::CreateStep;
use phenoflow_db::models::workflow::{CreateWorkflow, Workflow};
use tokio::sync::Mutex;

use crate::error::GeneratorError;
use crate::generator::{GenerateRequest, RenderedStep, RenderedWorkflow, WorkflowGenerator};
use crate::store::{DefinitionStore, StoredDefinition};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn step(name: &str, step_type: StepType, position: i32, source: &str) -> GeneratedStep {
    GeneratedStep {
        step_name: name.to_string(),
        step_doc: format!("{name} doc"),
        step_type,
        position,
        input_doc: "Potential cases".to_string(),
        output_doc: "Cases".to_string(),
        output_extension: "csv".to_string(),
        implementations: vec![GeneratedImplementation {
            file_name: format!("{name}.py"),
            language: "python".to_string(),
            implementation_template: Some(source.to_string()),
        }],
    }
}

pub fn definition(name: &str, steps: Vec<GeneratedStep>) -> GeneratedDefinition {
    GeneratedDefinition {
        id: uuid::Uuid::new_v4(),
        name: name.to_string(),
        about: format!("{name} phenotype"),
        user_name: "alice".to_string(),
        steps,
    }
}

// ---------------------------------------------------------------------------
// Definition store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    workflows: Vec<Workflow>,
    steps: HashMap<WorkflowId, Vec<StoredStep>>,
    parents: Vec<WorkflowParent>,
    replacements: usize,
    next_link_id: i64,
}

/// A [`DefinitionStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryDefinitionStore {
    state: Mutex<State>,
}

impl MemoryDefinitionStore {
    pub async fn workflow_count(&self) -> usize {
        self.state.lock().await.workflows.len()
    }

    /// Number of step-set replacements so far.
    pub async fn replace_count(&self) -> usize {
        self.state.lock().await.replacements
    }

    pub async fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.state.lock().await.workflows.iter().map(|w| w.id).collect()
    }
}

fn stored_steps(steps: &[CreateStep]) -> Vec<StoredStep> {
    let mut stored: Vec<StoredStep> = steps
        .iter()
        .map(|s| StoredStep {
            name: s.name.clone(),
            doc: s.doc.clone(),
            step_type: s.step_type,
            position: s.position,
            input_doc: s.input_doc.clone(),
            output_doc: s.output_doc.clone(),
            output_extension: s.output_extension.clone(),
            implementations: s
                .implementations
                .iter()
                .map(|i| StoredImplementation {
                    file_name: i.file_name.clone(),
                    language: i.language.clone(),
                })
                .collect(),
        })
        .collect();
    stored.sort_by_key(|s| s.position);
    stored
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn find_by_identity(
        &self,
        name: &str,
        about: &str,
        user_name: &str,
    ) -> Result<Vec<Workflow>, sqlx::Error> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .iter()
            .filter(|w| w.name == name && w.about == about && w.user_name == user_name)
            .cloned()
            .collect())
    }

    async fn has_step(&self, workflow_id: WorkflowId, name: &str) -> Result<bool, sqlx::Error> {
        let state = self.state.lock().await;
        Ok(state
            .steps
            .get(&workflow_id)
            .is_some_and(|steps| steps.iter().any(|s| s.name == name)))
    }

    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<StoredDefinition>, sqlx::Error> {
        let state = self.state.lock().await;
        Ok(state
            .workflows
            .iter()
            .find(|w| w.id == workflow_id)
            .map(|w| StoredDefinition {
                workflow: w.clone(),
                steps: state.steps.get(&workflow_id).cloned().unwrap_or_default(),
            }))
    }

    async fn create(
        &self,
        workflow: &CreateWorkflow,
        steps: &[CreateStep],
    ) -> Result<Workflow, sqlx::Error> {
        let mut state = self.state.lock().await;
        if state.workflows.iter().any(|w| w.id == workflow.id) {
            return Err(sqlx::Error::RowNotFound);
        }
        let now = Utc::now();
        let row = Workflow {
            id: workflow.id,
            name: workflow.name.clone(),
            about: workflow.about.clone(),
            user_name: workflow.user_name.clone(),
            complete: false,
            restricted: workflow.restricted,
            created_at: now,
            updated_at: now,
        };
        state.workflows.push(row.clone());
        state.steps.insert(workflow.id, stored_steps(steps));
        Ok(row)
    }

    async fn replace_steps(
        &self,
        workflow_id: WorkflowId,
        steps: &[CreateStep],
    ) -> Result<(), sqlx::Error> {
        let mut state = self.state.lock().await;
        state.steps.insert(workflow_id, stored_steps(steps));
        if let Some(w) = state.workflows.iter_mut().find(|w| w.id == workflow_id) {
            w.complete = false;
            w.updated_at = Utc::now();
        }
        state.replacements += 1;
        Ok(())
    }

    async fn mark_complete(&self, workflow_id: WorkflowId) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().await;
        let Some(w) = state.workflows.iter_mut().find(|w| w.id == workflow_id) else {
            return Ok(false);
        };
        w.complete = true;
        Ok(true)
    }

    async fn delete(&self, workflow_id: WorkflowId) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().await;
        let before = state.workflows.len();
        state.workflows.retain(|w| w.id != workflow_id);
        state.steps.remove(&workflow_id);
        state
            .parents
            .retain(|p| p.workflow_id != workflow_id && p.parent_id != workflow_id);
        Ok(state.workflows.len() < before)
    }

    async fn upsert_parent(
        &self,
        link: &CreateWorkflowParent,
    ) -> Result<WorkflowParent, sqlx::Error> {
        let mut state = self.state.lock().await;
        state.parents.retain(|p| p.workflow_id != link.workflow_id);
        state.next_link_id += 1;
        let row = WorkflowParent {
            id: state.next_link_id,
            workflow_id: link.workflow_id,
            parent_id: link.parent_id,
            name: link.name.clone(),
            distinct_step_name: link.distinct_step_name.clone(),
            distinct_step_position: link.distinct_step_position,
            created_at: Utc::now(),
        };
        state.parents.push(row.clone());
        Ok(row)
    }

    async fn find_parent(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<WorkflowParent>, sqlx::Error> {
        let state = self.state.lock().await;
        Ok(state
            .parents
            .iter()
            .find(|p| p.workflow_id == workflow_id)
            .cloned())
    }

    async fn list_children(
        &self,
        parent_id: WorkflowId,
    ) -> Result<Vec<WorkflowParent>, sqlx::Error> {
        let state = self.state.lock().await;
        Ok(state
            .parents
            .iter()
            .filter(|p| p.parent_id == parent_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Descriptor text rendered for a step list, shared by the static generator
/// and tests that need to predict it.
pub fn render_descriptor(steps: &[&str]) -> String {
    let mut out = String::from(
        "cwlVersion: v1.0\nclass: Workflow\ninputs:\n  potentialCases:\n    id: potentialCases\n    type: File\noutputs:\n  cases:\n    id: cases\n    type: File\n    outputSource: last/output\nsteps:\n",
    );
    for (idx, name) in steps.iter().enumerate() {
        out.push_str(&format!("  '{}':\n    run: {name}.cwl\n", idx + 1));
    }
    out
}

/// Renders every step as its own unit, except steps registered as nested,
/// which are rendered with the given body and no file name.
#[derive(Debug, Default)]
pub struct StaticGenerator {
    nested: HashMap<String, String>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl StaticGenerator {
    pub fn with_nested(mut self, step_name: &str, body: &str) -> Self {
        self.nested.insert(step_name.to_string(), body.to_string());
        self
    }

    pub async fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl WorkflowGenerator for StaticGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<RenderedWorkflow, GeneratorError> {
        self.requests.lock().await.push(request.clone());
        let names: Vec<&str> = request.steps.iter().map(|s| s.name.as_str()).collect();
        let steps = request
            .steps
            .iter()
            .map(|s| match self.nested.get(&s.name) {
                Some(body) => RenderedStep {
                    name: s.name.clone(),
                    content: body.clone(),
                    step_type: Some(s.step_type.clone()),
                    file_name: None,
                    language: None,
                },
                None => RenderedStep {
                    name: s.name.clone(),
                    content: format!("class: CommandLineTool\nid: {}\n", s.name),
                    step_type: Some(s.step_type.clone()),
                    file_name: s.implementation.as_ref().map(|i| i.file_name.clone()),
                    language: s.implementation.as_ref().map(|i| i.language.clone()),
                },
            })
            .collect();
        Ok(RenderedWorkflow {
            workflow: render_descriptor(&names),
            workflow_inputs: format!(
                "inputModule1:\n  class: File\n  path: python/{}.py\n",
                names.first().copied().unwrap_or_default()
            ),
            steps,
        })
    }
}
