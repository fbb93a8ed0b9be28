//! In-process git host for dry runs and tests.
//!
//! Trees are kept flat (full path to entry) and object SHAs are SHA-256
//! digests of their content, so identical content yields identical blobs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use phenoflow_core::hashing::object_id;
use tokio::sync::Mutex;

use crate::error::GitHostError;
use crate::host::{
    CommitInfo, GitHost, NewRepository, PublishMode, RefOutcome, RemoteRepository, TreeEntry,
};

/// A branch tip moved by `create_ref` or `update_ref`, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub repo: String,
    pub branch: String,
    pub sha: String,
}

#[derive(Debug, Clone, Default)]
struct MemoryRepository {
    description: String,
    private: bool,
    default_branch: String,
    branches: BTreeMap<String, String>,
    webhooks: Vec<String>,
}

#[derive(Debug, Clone)]
struct MemoryCommit {
    tree: String,
    message: String,
}

#[derive(Debug, Default)]
struct State {
    repositories: BTreeMap<(String, String), MemoryRepository>,
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, BTreeMap<String, TreeEntry>>,
    commits: HashMap<String, MemoryCommit>,
    ref_updates: Vec<RefUpdate>,
    sequence: u64,
    failing: bool,
}

impl State {
    fn repository(&self, owner: &str, repo: &str) -> Result<&MemoryRepository, GitHostError> {
        self.repositories
            .get(&(owner.to_string(), repo.to_string()))
            .ok_or_else(|| not_found(&format!("{owner}/{repo}")))
    }

    fn repository_mut(
        &mut self,
        owner: &str,
        repo: &str,
    ) -> Result<&mut MemoryRepository, GitHostError> {
        self.repositories
            .get_mut(&(owner.to_string(), repo.to_string()))
            .ok_or_else(|| not_found(&format!("{owner}/{repo}")))
    }

    fn check_writable(&self) -> Result<(), GitHostError> {
        if self.failing {
            return Err(GitHostError::Api {
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn put_commit(&mut self, tree: &str, parent: Option<&str>, message: &str) -> String {
        self.sequence += 1;
        let sha = object_id(
            "commit",
            format!("{tree}\n{}\n{message}\n{}", parent.unwrap_or(""), self.sequence).as_bytes(),
        );
        self.commits.insert(
            sha.clone(),
            MemoryCommit {
                tree: tree.to_string(),
                message: message.to_string(),
            },
        );
        sha
    }

    fn put_tree(&mut self, entries: BTreeMap<String, TreeEntry>) -> String {
        let listing: String = entries
            .values()
            .map(|e| format!("{} {} {}\n", e.kind.mode(), e.sha, e.path))
            .collect();
        let sha = object_id("tree", listing.as_bytes());
        self.trees.insert(sha.clone(), entries);
        sha
    }
}

fn not_found(what: &str) -> GitHostError {
    GitHostError::Api {
        status: 404,
        body: format!("{what} not found"),
    }
}

/// A git host held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryGitHost {
    state: Mutex<State>,
    mode: PublishMode,
}

impl MemoryGitHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `mode` to publishers, to exercise the contents-API path.
    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.mode = mode;
        self
    }

    /// Seed a repository with the given branches, each at its own commit.
    pub async fn seed_repository(&self, owner: &str, repo: &str, branches: &[&str]) {
        let mut state = self.state.lock().await;
        let tree = state.put_tree(BTreeMap::new());
        let mut repository = MemoryRepository {
            default_branch: "main".to_string(),
            ..MemoryRepository::default()
        };
        for branch in branches {
            let sha = state.put_commit(&tree, None, &format!("seed {branch}"));
            repository.branches.insert(branch.to_string(), sha);
        }
        state
            .repositories
            .insert((owner.to_string(), repo.to_string()), repository);
    }

    /// Make every subsequent write fail, or stop doing so.
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    /// Every ref update so far, oldest first.
    pub async fn ref_updates(&self) -> Vec<RefUpdate> {
        self.state.lock().await.ref_updates.clone()
    }

    /// Names of all repositories of an owner.
    pub async fn repository_names(&self, owner: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .repositories
            .keys()
            .filter(|(o, _)| o == owner)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub async fn default_branch(&self, owner: &str, repo: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.repository(owner, repo).ok().map(|r| r.default_branch.clone())
    }

    pub async fn is_private(&self, owner: &str, repo: &str) -> Option<bool> {
        let state = self.state.lock().await;
        state.repository(owner, repo).ok().map(|r| r.private)
    }

    pub async fn webhooks(&self, owner: &str, repo: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .repository(owner, repo)
            .map(|r| r.webhooks.clone())
            .unwrap_or_default()
    }

    /// Message of a commit.
    pub async fn commit_message(&self, sha: &str) -> Option<String> {
        self.state.lock().await.commits.get(sha).map(|c| c.message.clone())
    }

    /// Files at a branch tip: path to blob content. Submodule entries map to
    /// the pinned commit SHA.
    pub async fn files(&self, owner: &str, repo: &str, branch: &str) -> BTreeMap<String, Vec<u8>> {
        let state = self.state.lock().await;
        let Some(tree) = state
            .repository(owner, repo)
            .ok()
            .and_then(|r| r.branches.get(branch))
            .and_then(|sha| state.commits.get(sha))
            .and_then(|commit| state.trees.get(&commit.tree))
        else {
            return BTreeMap::new();
        };
        tree.values()
            .map(|entry| {
                let content = state
                    .blobs
                    .get(&entry.sha)
                    .cloned()
                    .unwrap_or_else(|| entry.sha.clone().into_bytes());
                (entry.path.clone(), content)
            })
            .collect()
    }
}

#[async_trait]
impl GitHost for MemoryGitHost {
    async fn list_repositories(&self, owner: &str) -> Result<Vec<RemoteRepository>, GitHostError> {
        let state = self.state.lock().await;
        Ok(state
            .repositories
            .iter()
            .filter(|((o, _), _)| o == owner)
            .map(|((_, name), repo)| RemoteRepository {
                name: name.clone(),
                private: repo.private,
                default_branch: Some(repo.default_branch.clone()),
            })
            .collect())
    }

    async fn create_repository(
        &self,
        owner: &str,
        repository: &NewRepository,
    ) -> Result<(), GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        let key = (owner.to_string(), repository.name.clone());
        if state.repositories.contains_key(&key) {
            return Err(GitHostError::Api {
                status: 422,
                body: "name already exists on this account".to_string(),
            });
        }
        let mut created = MemoryRepository {
            description: repository.description.clone(),
            private: repository.private,
            default_branch: "main".to_string(),
            ..MemoryRepository::default()
        };
        if repository.auto_init {
            let tree = state.put_tree(BTreeMap::new());
            let sha = state.put_commit(&tree, None, "Initial commit");
            created.branches.insert("main".to_string(), sha);
        }
        tracing::debug!(repo = %repository.name, description = %created.description, "Created in-memory repository");
        state.repositories.insert(key, created);
        Ok(())
    }

    async fn delete_repository(&self, owner: &str, repo: &str) -> Result<(), GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        state
            .repositories
            .remove(&(owner.to_string(), repo.to_string()));
        Ok(())
    }

    async fn create_release_webhook(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
    ) -> Result<(), GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        state.repository_mut(owner, repo)?.webhooks.push(url.to_string());
        Ok(())
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>, GitHostError> {
        let state = self.state.lock().await;
        Ok(state.repository(owner, repo)?.branches.keys().cloned().collect())
    }

    async fn get_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<String>, GitHostError> {
        let state = self.state.lock().await;
        Ok(state.repository(owner, repo)?.branches.get(branch).cloned())
    }

    async fn get_commit(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<CommitInfo, GitHostError> {
        let state = self.state.lock().await;
        let commit = state
            .commits
            .get(sha)
            .ok_or_else(|| not_found(&format!("commit {sha}")))?;
        Ok(CommitInfo {
            sha: sha.to_string(),
            tree_sha: commit.tree.clone(),
        })
    }

    async fn get_tree(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<Vec<TreeEntry>, GitHostError> {
        let state = self.state.lock().await;
        let tree = state
            .trees
            .get(sha)
            .ok_or_else(|| not_found(&format!("tree {sha}")))?;
        Ok(tree.values().cloned().collect())
    }

    async fn create_blob(
        &self,
        _owner: &str,
        _repo: &str,
        content: &[u8],
    ) -> Result<String, GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        let sha = object_id("blob", content);
        state.blobs.insert(sha.clone(), content.to_vec());
        Ok(sha)
    }

    async fn create_tree(
        &self,
        _owner: &str,
        _repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        let mut tree = state
            .trees
            .get(base_tree)
            .cloned()
            .ok_or_else(|| not_found(&format!("tree {base_tree}")))?;
        for entry in entries {
            tree.insert(entry.path.clone(), entry.clone());
        }
        Ok(state.put_tree(tree))
    }

    async fn create_commit(
        &self,
        _owner: &str,
        _repo: &str,
        message: &str,
        tree: &str,
        parent: &str,
    ) -> Result<String, GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        if !state.trees.contains_key(tree) {
            return Err(not_found(&format!("tree {tree}")));
        }
        if !state.commits.contains_key(parent) {
            return Err(not_found(&format!("commit {parent}")));
        }
        Ok(state.put_commit(tree, Some(parent), message))
    }

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<RefOutcome, GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        let repository = state.repository_mut(owner, repo)?;
        if repository.branches.contains_key(branch) {
            return Ok(RefOutcome::AlreadyExists);
        }
        repository.branches.insert(branch.to_string(), sha.to_string());
        state.ref_updates.push(RefUpdate {
            repo: repo.to_string(),
            branch: branch.to_string(),
            sha: sha.to_string(),
        });
        Ok(RefOutcome::Created)
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        let repository = state.repository_mut(owner, repo)?;
        let Some(tip) = repository.branches.get_mut(branch) else {
            return Err(not_found(&format!("branch {branch}")));
        };
        *tip = sha.to_string();
        state.ref_updates.push(RefUpdate {
            repo: repo.to_string(),
            branch: branch.to_string(),
            sha: sha.to_string(),
        });
        Ok(())
    }

    async fn set_default_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), GitHostError> {
        let mut state = self.state.lock().await;
        state.check_writable()?;
        let repository = state.repository_mut(owner, repo)?;
        if !repository.branches.contains_key(branch) {
            return Err(GitHostError::Api {
                status: 422,
                body: format!("branch {branch} does not exist"),
            });
        }
        repository.default_branch = branch.to_string();
        Ok(())
    }

    fn publish_mode(&self) -> PublishMode {
        self.mode
    }
}
