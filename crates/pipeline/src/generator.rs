//! Client for the workflow generation service.
//!
//! The service renders a stored definition into its workflow descriptor,
//! inputs descriptor, and one descriptor per step. Its output is treated
//! as opaque text apart from the per-step unit metadata.

use std::collections::HashMap;

use async_trait::async_trait;
use phenoflow_core::definition::{StoredStep, FALLBACK_LANGUAGE};
use phenoflow_core::types::WorkflowId;
use serde::{Deserialize, Serialize};

use crate::error::GeneratorError;

// ---------------------------------------------------------------------------
// Request and response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GenerateDoc {
    pub doc: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOutput {
    pub doc: String,
    pub extension: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImplementation {
    pub file_name: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateStep {
    pub name: String,
    pub doc: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub position: i32,
    pub inputs: Vec<GenerateDoc>,
    pub outputs: Vec<GenerateOutput>,
    pub implementation: Option<GenerateImplementation>,
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub workflow_id: WorkflowId,
    pub user_name: String,
    pub steps: Vec<GenerateStep>,
}

impl GenerateRequest {
    /// Build a request from a stored definition.
    pub fn from_stored(workflow_id: WorkflowId, user_name: &str, steps: &[StoredStep]) -> Self {
        let steps = steps
            .iter()
            .map(|step| GenerateStep {
                name: step.name.clone(),
                doc: step.doc.clone(),
                step_type: step.step_type.as_str().to_string(),
                position: step.position,
                inputs: vec![GenerateDoc {
                    doc: step.input_doc.clone(),
                }],
                outputs: vec![GenerateOutput {
                    doc: step.output_doc.clone(),
                    extension: step.output_extension.clone(),
                }],
                implementation: step.unit().map(|unit| GenerateImplementation {
                    file_name: unit.file_name.clone(),
                    language: unit.language.clone(),
                }),
            })
            .collect();
        Self {
            workflow_id,
            user_name: user_name.to_string(),
            steps,
        }
    }
}

/// One rendered step. Steps without a file name are nested workflows
/// rather than implementation units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedStep {
    pub name: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub step_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl RenderedStep {
    pub fn is_nested(&self) -> bool {
        self.file_name.is_none()
    }
}

/// The generation service's rendering of a workflow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedWorkflow {
    pub workflow: String,
    pub workflow_inputs: String,
    pub steps: Vec<RenderedStep>,
}

impl RenderedWorkflow {
    pub fn step(&self, name: &str) -> Option<&RenderedStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Language directory of each step's implementation unit.
///
/// The rendered step's language wins, then the stored unit's language;
/// otherwise the step is filed under the fallback directory.
pub fn implementation_units(
    rendered: &RenderedWorkflow,
    steps: &[StoredStep],
) -> HashMap<String, String> {
    steps
        .iter()
        .filter(|step| step.unit().is_some())
        .map(|step| {
            let language = rendered
                .step(&step.name)
                .and_then(|r| r.language.clone())
                .or_else(|| step.unit().map(|u| u.language.clone()))
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| {
                    tracing::warn!(step = %step.name, "No implementation language, using fallback");
                    FALLBACK_LANGUAGE.to_string()
                });
            (step.name.clone(), language)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WorkflowGenerator: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<RenderedWorkflow, GeneratorError>;
}

/// HTTP client for the generation service.
pub struct GeneratorClient {
    client: reqwest::Client,
    base_url: String,
}

impl GeneratorClient {
    /// Create a client for the service at `base_url`.
    ///
    /// Requests carry no timeout; rendering large workflows can be slow.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Return an error for non-2xx responses.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GeneratorError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GeneratorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl WorkflowGenerator for GeneratorClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<RenderedWorkflow, GeneratorError> {
        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(request)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let rendered: RenderedWorkflow = response.json().await?;
        tracing::debug!(
            workflow_id = %request.workflow_id,
            steps = rendered.steps.len(),
            "Workflow rendered",
        );
        Ok(rendered)
    }
}
