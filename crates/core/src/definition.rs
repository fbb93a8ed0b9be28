//! Workflow definition types.
//!
//! Incoming definitions arrive from the parsing service as
//! `{id, name, about, userName, steps:[...]}` JSON. Persisted
//! definitions are read back as [`StoredStep`] lists for change
//! detection and rendering.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::WorkflowId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Implementation languages accepted for uploaded connector templates.
pub const SUPPORTED_LANGUAGES: &[&str] = &["knime", "python", "js"];

/// Language directory used when a step's implementation language is unknown.
pub const FALLBACK_LANGUAGE: &str = "other";

// ---------------------------------------------------------------------------
// Step type
// ---------------------------------------------------------------------------

/// The fixed vocabulary of step type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Load,
    External,
    Logic,
    Boolean,
    Output,
}

impl StepType {
    /// String representation for display, logging, and database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::External => "external",
            Self::Logic => "logic",
            Self::Boolean => "boolean",
            Self::Output => "output",
        }
    }

    /// Parse from the database `step_type` column.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "load" => Ok(Self::Load),
            "external" => Ok(Self::External),
            "logic" => Ok(Self::Logic),
            "boolean" => Ok(Self::Boolean),
            "output" => Ok(Self::Output),
            other => Err(CoreError::Validation(format!(
                "Unknown step type '{other}'"
            ))),
        }
    }

    /// Whether a step of this type can be a definition's connector step.
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::Load | Self::External)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Incoming definitions
// ---------------------------------------------------------------------------

/// One implementation unit attached to an incoming step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImplementation {
    pub file_name: String,
    pub language: String,
    /// Source text; absent for template placeholders.
    #[serde(default)]
    pub implementation_template: Option<String>,
}

impl GeneratedImplementation {
    /// Whether this entry is a real implementation unit rather than a
    /// template placeholder.
    pub fn is_unit(&self) -> bool {
        has_extension(&self.file_name)
    }
}

/// One step of an incoming definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedStep {
    #[validate(length(min = 1, message = "step name must not be empty"))]
    pub step_name: String,
    #[serde(default)]
    pub step_doc: String,
    pub step_type: StepType,
    pub position: i32,
    #[serde(default)]
    pub input_doc: String,
    #[serde(default)]
    pub output_doc: String,
    #[serde(default)]
    pub output_extension: String,
    #[serde(default)]
    pub implementations: Vec<GeneratedImplementation>,
}

/// A generated workflow definition as produced by the parsing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedDefinition {
    pub id: WorkflowId,
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "about must not be empty"))]
    pub about: String,
    #[validate(length(min = 1, message = "userName must not be empty"))]
    pub user_name: String,
    #[validate(length(min = 1, message = "a definition needs at least one step"), nested)]
    pub steps: Vec<GeneratedStep>,
}

impl GeneratedDefinition {
    /// The first step, when it is of an entry type (`load`/`external`).
    pub fn entry_step(&self) -> Option<&GeneratedStep> {
        self.steps.first().filter(|step| step.step_type.is_entry())
    }

    /// Name of the connector step used to tell data-source variants apart.
    pub fn connector_step_name(&self) -> Option<&str> {
        self.entry_step().map(|step| step.step_name.as_str())
    }
}

/// Validate an incoming definition before anything is written.
///
/// Checks required fields and rejects duplicate step names.
pub fn validate_definition(definition: &GeneratedDefinition) -> Result<(), CoreError> {
    definition
        .validate()
        .map_err(|e| CoreError::Validation(format!("{}: {e}", definition.name)))?;

    for step in &definition.steps {
        if step.step_name.contains(['/', '\\']) {
            return Err(CoreError::Validation(format!(
                "Step name '{}' in '{}' must not contain path separators",
                step.step_name, definition.name
            )));
        }
        for implementation in step.implementations.iter().filter(|i| i.is_unit()) {
            if !is_valid_language(&implementation.language) {
                return Err(CoreError::Validation(format!(
                    "Unsupported language '{}' in step '{}'",
                    implementation.language, step.step_name
                )));
            }
            if !is_safe_file_name(&implementation.file_name) {
                return Err(CoreError::Validation(format!(
                    "Invalid file name '{}' in step '{}'",
                    implementation.file_name, step.step_name
                )));
            }
        }
    }

    let duplicates = duplicate_step_names(&definition.steps);
    if !duplicates.is_empty() {
        return Err(CoreError::Validation(format!(
            "Duplicate steps found in definition '{}': {}",
            definition.name,
            duplicates.join(", ")
        )));
    }
    Ok(())
}

/// Step names that occur more than once, in first-seen order.
pub fn duplicate_step_names(steps: &[GeneratedStep]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = Vec::new();
    for step in steps {
        if !seen.insert(step.step_name.as_str()) && !duplicates.contains(&step.step_name) {
            duplicates.push(step.step_name.clone());
        }
    }
    duplicates
}

// ---------------------------------------------------------------------------
// Persisted definitions
// ---------------------------------------------------------------------------

/// Implementation metadata as persisted; the bytes live on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImplementation {
    pub file_name: String,
    pub language: String,
}

impl StoredImplementation {
    pub fn is_unit(&self) -> bool {
        has_extension(&self.file_name)
    }
}

/// A persisted step together with its input, output, and implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStep {
    pub name: String,
    pub doc: String,
    pub step_type: StepType,
    pub position: i32,
    pub input_doc: String,
    pub output_doc: String,
    pub output_extension: String,
    pub implementations: Vec<StoredImplementation>,
}

impl StoredStep {
    /// The implementation unit (file with an extension) of this step, if any.
    pub fn unit(&self) -> Option<&StoredImplementation> {
        self.implementations.iter().find(|i| i.is_unit())
    }
}

/// Language tags name a directory, so only `[A-Za-z0-9_-]` is allowed.
pub fn is_valid_language(language: &str) -> bool {
    !language.is_empty()
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Whether a file name stays a single path component once slashes are
/// stripped.
pub fn is_safe_file_name(file_name: &str) -> bool {
    let stripped = file_name.replace('/', "");
    !matches!(stripped.as_str(), "" | "." | "..") && !stripped.contains(['\\', '\0'])
}

/// Whether a file name carries an extension.
pub fn has_extension(file_name: &str) -> bool {
    file_name.contains('.')
}
