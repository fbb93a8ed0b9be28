//! Implementation source storage.
//!
//! Implementation bytes are the content of record for every
//! implementation row, kept at `<uploads>/<workflowId>/<language>/<fileName>`.
//! Writes go through a staging file in the destination directory and are
//! renamed into place, so a reader never sees a partially written file.

use std::path::{Path, PathBuf};

use phenoflow_core::definition::{is_safe_file_name, is_valid_language, GeneratedStep};
use phenoflow_core::hashing::staging_tag;
use phenoflow_core::types::WorkflowId;

use crate::error::StorageError;

/// Filesystem storage for implementation sources and publish trees.
#[derive(Debug, Clone)]
pub struct ImplementationStorage {
    uploads_dir: PathBuf,
    output_dir: PathBuf,
}

impl ImplementationStorage {
    pub fn new(uploads_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Directory holding a workflow's implementation sources for one language.
    pub fn language_dir(&self, workflow_id: &WorkflowId, language: &str) -> PathBuf {
        self.uploads_dir
            .join(workflow_id.to_string())
            .join(language)
    }

    /// Location of an implementation file. Slashes are stripped from the
    /// file name so it cannot escape its language directory.
    pub fn implementation_path(
        &self,
        workflow_id: &WorkflowId,
        language: &str,
        file_name: &str,
    ) -> PathBuf {
        self.language_dir(workflow_id, language)
            .join(file_name.replace('/', ""))
    }

    /// `implementation_path`, refusing names that would leave the workflow's
    /// uploads directory.
    fn checked_path(
        &self,
        workflow_id: &WorkflowId,
        language: &str,
        file_name: &str,
    ) -> Result<PathBuf, StorageError> {
        if !is_valid_language(language) || !is_safe_file_name(file_name) {
            return Err(StorageError::UnsafePath {
                language: language.to_string(),
                file_name: file_name.to_string(),
            });
        }
        Ok(self.implementation_path(workflow_id, language, file_name))
    }

    /// Directory a workflow is materialized into before publication.
    pub fn output_dir_for(&self, workflow_id: &WorkflowId) -> PathBuf {
        self.output_dir.join(workflow_id.to_string())
    }

    /// Atomically write an implementation file, creating directories as needed.
    pub async fn write(
        &self,
        workflow_id: &WorkflowId,
        language: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.checked_path(workflow_id, language, file_name)?;
        let dir = self.language_dir(workflow_id, language);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(StorageError::io(&dir))?;

        let staging = dir.join(format!(
            ".{}.{}.staging",
            file_name.replace('/', ""),
            staging_tag(content)
        ));
        tokio::fs::write(&staging, content)
            .await
            .map_err(StorageError::io(&staging))?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StorageError::Io { path, source: e });
        }
        Ok(path)
    }

    /// Read an implementation file.
    pub async fn read(
        &self,
        workflow_id: &WorkflowId,
        language: &str,
        file_name: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let path = self.checked_path(workflow_id, language, file_name)?;
        read_file(&path).await
    }

    /// Write every implementation unit of a definition.
    ///
    /// Entries without an extension are template placeholders and are not
    /// written. A unit without content is written as an empty file.
    pub async fn write_definition(
        &self,
        workflow_id: &WorkflowId,
        steps: &[GeneratedStep],
    ) -> Result<usize, StorageError> {
        let mut written = 0;
        for step in steps {
            for implementation in step.implementations.iter().filter(|i| i.is_unit()) {
                let content = implementation
                    .implementation_template
                    .as_deref()
                    .unwrap_or_default();
                self.write(
                    workflow_id,
                    &implementation.language,
                    &implementation.file_name,
                    content.as_bytes(),
                )
                .await?;
                written += 1;
            }
        }
        tracing::debug!(workflow_id = %workflow_id, files = written, "Implementation files written");
        Ok(written)
    }

    /// Remove a workflow's uploads and publish tree. Absent directories are
    /// not an error.
    pub async fn remove_workflow(&self, workflow_id: &WorkflowId) -> Result<(), StorageError> {
        remove_dir(&self.uploads_dir.join(workflow_id.to_string())).await?;
        remove_dir(&self.output_dir_for(workflow_id)).await
    }
}

pub(crate) async fn read_file(path: &Path) -> Result<Vec<u8>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::Missing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(StorageError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn remove_dir(path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
