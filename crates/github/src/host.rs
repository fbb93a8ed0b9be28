//! The git host seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GitHostError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A repository as listed for an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Settings for a repository about to be created.
#[derive(Debug, Clone, Serialize)]
pub struct NewRepository {
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub private: bool,
    /// Create an initial commit so `main` exists.
    pub auto_init: bool,
}

/// A commit and the tree it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub tree_sha: String,
}

/// What a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEntryKind {
    Blob,
    /// A commit in another repository (a submodule).
    Submodule,
}

impl TreeEntryKind {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Blob => "100644",
            Self::Submodule => "160000",
        }
    }

    pub fn object_type(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Submodule => "commit",
        }
    }
}

/// One path in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: TreeEntryKind,
    pub sha: String,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: TreeEntryKind::Blob,
            sha: sha.into(),
        }
    }

    pub fn submodule(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: TreeEntryKind::Submodule,
            sha: sha.into(),
        }
    }
}

/// Result of asking the host to create a branch ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefOutcome {
    Created,
    AlreadyExists,
}

/// How a host takes new content onto a branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    /// Blobs, one tree, and one commit per publish through the git data API.
    #[default]
    GitData,
    /// One commit per file through the repository contents API, for hosts
    /// without git data write endpoints.
    Contents,
}

/// Which API flavour a base URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    GitHub,
    Gitea,
}

impl HostKind {
    /// Any URL mentioning `github` is GitHub; everything else is Gitea.
    pub fn for_base_url(base_url: &str) -> Self {
        if base_url.contains("github") {
            Self::GitHub
        } else {
            Self::Gitea
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Git data-object and repository operations against one host.
///
/// `owner` is the organization that owns every repository.
#[async_trait]
pub trait GitHost: Send + Sync {
    /// Every repository of the organization, across all pages.
    async fn list_repositories(&self, owner: &str) -> Result<Vec<RemoteRepository>, GitHostError>;

    async fn create_repository(
        &self,
        owner: &str,
        repository: &NewRepository,
    ) -> Result<(), GitHostError>;

    /// Delete a repository. Deleting an absent repository succeeds.
    async fn delete_repository(&self, owner: &str, repo: &str) -> Result<(), GitHostError>;

    /// Register a JSON webhook fired on `release` events.
    async fn create_release_webhook(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
    ) -> Result<(), GitHostError>;

    /// Names of every branch of a repository.
    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>, GitHostError>;

    /// Tip commit of a branch, or `None` when the branch does not exist.
    async fn get_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<String>, GitHostError>;

    async fn get_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CommitInfo, GitHostError>;

    /// Entries of a tree, recursively flattened to full paths.
    async fn get_tree(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<TreeEntry>, GitHostError>;

    /// Store file content, returning the blob SHA.
    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &[u8],
    ) -> Result<String, GitHostError>;

    /// Create a tree layering `entries` over `base_tree`, returning its SHA.
    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, GitHostError>;

    /// Create a commit with a single parent, returning its SHA.
    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree: &str,
        parent: &str,
    ) -> Result<String, GitHostError>;

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<RefOutcome, GitHostError>;

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHostError>;

    async fn set_default_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), GitHostError>;

    fn publish_mode(&self) -> PublishMode {
        PublishMode::GitData
    }

    /// Create `branch` at the tip of `from`.
    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        from: &str,
    ) -> Result<RefOutcome, GitHostError> {
        let tip = self
            .get_ref(owner, repo, from)
            .await?
            .ok_or_else(|| missing_branch(repo, from))?;
        self.create_ref(owner, repo, branch, &tip).await
    }

    /// Create or replace one file on a branch with a commit of its own.
    async fn put_file(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), GitHostError> {
        let tip = self
            .get_ref(owner, repo, branch)
            .await?
            .ok_or_else(|| missing_branch(repo, branch))?;
        let base = self.get_commit(owner, repo, &tip).await?;
        let blob = self.create_blob(owner, repo, content).await?;
        let tree = self
            .create_tree(owner, repo, &base.tree_sha, &[TreeEntry::blob(path, blob)])
            .await?;
        let commit = self.create_commit(owner, repo, message, &tree, &tip).await?;
        self.update_ref(owner, repo, branch, &commit).await
    }
}

fn missing_branch(repo: &str, branch: &str) -> GitHostError {
    GitHostError::Api {
        status: 404,
        body: format!("branch {branch} does not exist in {repo}"),
    }
}
