use std::path::PathBuf;

use phenoflow_core::error::CoreError;
use phenoflow_core::types::WorkflowId;
use phenoflow_github::{GitHostError, PublishError};

/// Errors from implementation file storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The file a row refers to is not on disk.
    #[error("Implementation file missing: {}", path.display())]
    Missing { path: PathBuf },

    /// A language or file name that would resolve outside its directory.
    #[error("Refusing unsafe implementation path: {language}/{file_name}")]
    UnsafePath { language: String, file_name: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Errors from the generation service.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generator error ({status}): {body}")]
    Api { status: u16, body: String },
}

/// Errors surfaced by import, publication, and removal.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    GitHost(#[from] GitHostError),

    /// Too many stored definitions share the incoming identity.
    #[error("{count} existing definitions match '{name}'; refusing to choose")]
    Ambiguous { name: String, count: usize },

    #[error("Duplicate steps found in '{definition}': {}", names.join(", "))]
    DuplicateSteps {
        definition: String,
        names: Vec<String>,
    },

    #[error("Workflow {0} not found")]
    WorkflowNotFound(WorkflowId),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
