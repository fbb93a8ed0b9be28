//! Publication of a materialized directory onto a repository branch.
//!
//! One publish walks these stages in order, aborting on the first failure:
//!
//! | Stage | Effect |
//! |-------|--------|
//! | `EnsureRepository` | create the repository (and its release webhook) if absent |
//! | `ResolveBase` | tip commit and tree of the branch, falling back to `main` |
//! | `BuildTree` | one blob per file (concurrently), submodule entries, new tree |
//! | `Commit` | commit with the resolved tip as its single parent |
//! | `UpdateRef` | create the branch ref, or move it when it already exists |
//! | `SetDefaultBranch` | point the repository's default branch at this branch |
//!
//! Blobs and trees created before a failure are left for the host to
//! collect.
//!
//! Hosts in [`PublishMode::Contents`] replace the middle stages with
//! `CreateBranch` (branch off `main` unless it is `main`) and `UploadFiles`
//! (one commit per file). Submodules are not published on such hosts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::try_join_all;

use crate::error::GitHostError;
use crate::host::{CommitInfo, GitHost, NewRepository, PublishMode, RefOutcome, TreeEntry};

/// Message of every commit made by the publisher.
pub const COMMIT_MESSAGE: &str = "Update made by Phenoflow";

/// Branch used when the target branch does not exist yet.
pub const BASE_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The stage a publish failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    EnsureRepository,
    ResolveBase,
    BuildTree,
    Commit,
    UpdateRef,
    CreateBranch,
    UploadFiles,
    SetDefaultBranch,
}

impl PublishStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnsureRepository => "ensure_repository",
            Self::ResolveBase => "resolve_base",
            Self::BuildTree => "build_tree",
            Self::Commit => "commit",
            Self::UpdateRef => "update_ref",
            Self::CreateBranch => "create_branch",
            Self::UploadFiles => "upload_files",
            Self::SetDefaultBranch => "set_default_branch",
        }
    }
}

impl std::fmt::Display for PublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a publish.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The git host rejected a stage.
    #[error("Publishing {repo} failed at {stage}: {source}")]
    Host {
        stage: PublishStage,
        repo: String,
        #[source]
        source: GitHostError,
    },

    /// A materialized file could not be read.
    #[error("Unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PublishError {
    fn host(stage: PublishStage, repo: &str) -> impl FnOnce(GitHostError) -> Self + '_ {
        move |source| Self::Host {
            stage,
            repo: repo.to_string(),
            source,
        }
    }
}

/// A child repository commit embedded in a parent tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmoduleLink {
    /// Child repository name, also used as the submodule path.
    pub name: String,
    pub url: String,
    /// Child commit the submodule is pinned to.
    pub sha: String,
}

/// What to publish and where.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub repo: String,
    /// Description for a newly created repository.
    pub description: String,
    /// Create the repository as private.
    pub restricted: bool,
    pub branch: String,
    /// Materialized directory whose files become the tree.
    pub content_dir: PathBuf,
    pub submodules: Vec<SubmoduleLink>,
}

/// Repository-level settings shared by every publish.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub organisation: String,
    pub homepage: String,
    /// Release webhook registered on newly created repositories.
    pub release_webhook: Option<String>,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Publishes materialized directories through a [`GitHost`].
#[derive(Clone)]
pub struct Publisher {
    host: Arc<dyn GitHost>,
    settings: PublisherSettings,
}

impl Publisher {
    pub fn new(host: Arc<dyn GitHost>, settings: PublisherSettings) -> Self {
        Self { host, settings }
    }

    pub fn host(&self) -> &Arc<dyn GitHost> {
        &self.host
    }

    pub fn organisation(&self) -> &str {
        &self.settings.organisation
    }

    /// Publish a directory onto a branch, returning the new commit SHA.
    pub async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let org = self.organisation();
        let repo = request.repo.as_str();

        self.ensure_repository(request).await?;

        if self.host.publish_mode() == PublishMode::Contents {
            return self.publish_contents(request).await;
        }

        let base = self
            .resolve_base(repo, &request.branch)
            .await
            .map_err(PublishError::host(PublishStage::ResolveBase, repo))?;

        let tree = self.build_tree(request, &base.tree_sha).await?;

        let commit = self
            .host
            .create_commit(org, repo, COMMIT_MESSAGE, &tree, &base.sha)
            .await
            .map_err(PublishError::host(PublishStage::Commit, repo))?;

        self.update_branch(repo, &request.branch, &commit)
            .await
            .map_err(PublishError::host(PublishStage::UpdateRef, repo))?;

        self.host
            .set_default_branch(org, repo, &request.branch)
            .await
            .map_err(PublishError::host(PublishStage::SetDefaultBranch, repo))?;

        tracing::info!(repo, branch = %request.branch, commit = %commit, "Published workflow");
        Ok(commit)
    }

    async fn publish_contents(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let org = self.organisation();
        let repo = request.repo.as_str();
        let branch = request.branch.as_str();

        if branch != BASE_BRANCH {
            self.host
                .create_branch(org, repo, branch, BASE_BRANCH)
                .await
                .map_err(PublishError::host(PublishStage::CreateBranch, repo))?;
        }

        let files = read_files(&request.content_dir).await?;
        for (path, content) in &files {
            self.host
                .put_file(org, repo, branch, path, content, COMMIT_MESSAGE)
                .await
                .map_err(PublishError::host(PublishStage::UploadFiles, repo))?;
        }
        if !request.submodules.is_empty() {
            tracing::warn!(
                repo,
                count = request.submodules.len(),
                "Host cannot embed submodules, publishing files only"
            );
        }

        self.host
            .set_default_branch(org, repo, branch)
            .await
            .map_err(PublishError::host(PublishStage::SetDefaultBranch, repo))?;

        let commit = self
            .host
            .get_ref(org, repo, branch)
            .await
            .and_then(|tip| {
                tip.ok_or_else(|| GitHostError::Api {
                    status: 404,
                    body: format!("{branch} vanished from {repo}"),
                })
            })
            .map_err(PublishError::host(PublishStage::UploadFiles, repo))?;

        tracing::info!(repo, branch, commit = %commit, files = files.len(), "Published workflow");
        Ok(commit)
    }

    async fn ensure_repository(&self, request: &PublishRequest) -> Result<(), PublishError> {
        let org = self.organisation();
        let repo = request.repo.as_str();
        let to_error = PublishError::host(PublishStage::EnsureRepository, repo);

        let existing = match self.host.list_repositories(org).await {
            Ok(existing) => existing,
            Err(e) => return Err(to_error(e)),
        };
        if existing.iter().any(|r| r.name == repo) {
            return Ok(());
        }

        let new_repository = NewRepository {
            name: repo.to_string(),
            description: request.description.clone(),
            homepage: self.settings.homepage.clone(),
            private: request.restricted,
            auto_init: true,
        };
        self.host
            .create_repository(org, &new_repository)
            .await
            .map_err(to_error)?;
        tracing::info!(repo, private = request.restricted, "Created repository");

        if let Some(url) = &self.settings.release_webhook {
            if let Err(e) = self.host.create_release_webhook(org, repo, url).await {
                tracing::error!(repo, error = %e, "Unable to add release webhook");
            }
        }
        Ok(())
    }

    async fn resolve_base(&self, repo: &str, branch: &str) -> Result<CommitInfo, GitHostError> {
        let org = self.organisation();
        let tip = match self.host.get_ref(org, repo, branch).await? {
            Some(sha) => sha,
            None => {
                tracing::debug!(repo, branch, "Branch absent, basing on {BASE_BRANCH}");
                self.host
                    .get_ref(org, repo, BASE_BRANCH)
                    .await?
                    .ok_or_else(|| GitHostError::Api {
                        status: 404,
                        body: format!("neither {branch} nor {BASE_BRANCH} exists in {repo}"),
                    })?
            }
        };
        self.host.get_commit(org, repo, &tip).await
    }

    async fn build_tree(
        &self,
        request: &PublishRequest,
        base_tree: &str,
    ) -> Result<String, PublishError> {
        let org = self.organisation();
        let repo = request.repo.as_str();

        let files = collect_files(&request.content_dir)
            .await
            .map_err(|source| PublishError::Read {
                path: request.content_dir.clone(),
                source,
            })?;

        let mut entries = try_join_all(files.iter().map(|(path, full)| async move {
            let content = tokio::fs::read(full)
                .await
                .map_err(|source| PublishError::Read {
                    path: full.clone(),
                    source,
                })?;
            let sha = self
                .host
                .create_blob(org, repo, &content)
                .await
                .map_err(PublishError::host(PublishStage::BuildTree, repo))?;
            Ok::<_, PublishError>(TreeEntry::blob(path.as_str(), sha))
        }))
        .await?;

        if !request.submodules.is_empty() {
            let sha = self
                .host
                .create_blob(org, repo, gitmodules(&request.submodules).as_bytes())
                .await
                .map_err(PublishError::host(PublishStage::BuildTree, repo))?;
            entries.push(TreeEntry::blob(".gitmodules", sha));
            entries.extend(
                request
                    .submodules
                    .iter()
                    .map(|s| TreeEntry::submodule(s.name.as_str(), s.sha.as_str())),
            );
        }

        self.host
            .create_tree(org, repo, base_tree, &entries)
            .await
            .map_err(PublishError::host(PublishStage::BuildTree, repo))
    }

    async fn update_branch(&self, repo: &str, branch: &str, sha: &str) -> Result<(), GitHostError> {
        let org = self.organisation();
        match self.host.create_ref(org, repo, branch, sha).await? {
            RefOutcome::Created => Ok(()),
            RefOutcome::AlreadyExists => self.host.update_ref(org, repo, branch, sha).await,
        }
    }
}

/// Contents of a `.gitmodules` file for the given links.
pub fn gitmodules(submodules: &[SubmoduleLink]) -> String {
    submodules
        .iter()
        .map(|s| format!("[submodule \"{0}\"]\n\tpath = {0}\n\turl = {1}", s.name, s.url))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Every file below `root` with its content, keyed as in [`collect_files`].
async fn read_files(root: &Path) -> Result<Vec<(String, Vec<u8>)>, PublishError> {
    let files = collect_files(root)
        .await
        .map_err(|source| PublishError::Read {
            path: root.to_path_buf(),
            source,
        })?;
    let mut contents = Vec::with_capacity(files.len());
    for (path, full) in files {
        let content = tokio::fs::read(&full)
            .await
            .map_err(|source| PublishError::Read { path: full, source })?;
        contents.push((path, content));
    }
    Ok(contents)
}

/// Every file below `root` as `(relative path with '/' separators, full path)`,
/// sorted by relative path.
async fn collect_files(root: &Path) -> Result<Vec<(String, PathBuf)>, std::io::Error> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.push((relative, path));
        }
    }
    files.sort();
    Ok(files)
}
