//! REST client for the Gitea API (`/api/v1`).
//!
//! Gitea shares GitHub's read endpoints for refs, commits, and trees but
//! has no git data write endpoints, so content goes onto a branch through
//! the contents API, one commit per file. Blob, tree, commit, and ref
//! creation report [`GitHostError::Unsupported`].

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;

use crate::error::GitHostError;
use crate::host::{
    CommitInfo, GitHost, NewRepository, PublishMode, RefOutcome, RemoteRepository, TreeEntry,
    TreeEntryKind,
};
use crate::http;
use crate::publish::BASE_BRANCH;

/// Page size for paginated listings; Gitea caps `limit` at 50 by default.
const PAGE_LIMIT: u32 = 50;

const USER_AGENT: &str = concat!("phenoflow/", env!("CARGO_PKG_VERSION"));

/// HTTP client for a Gitea instance.
pub struct GiteaApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    #[serde(rename = "ref")]
    name: String,
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeItem>,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

impl GiteaApi {
    /// Open a client for the API at `base_url`, e.g.
    /// `http://proxy/git/api/v1`.
    pub fn connect(base_url: &str, token: &str) -> Result<Self, GitHostError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GitHostError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    // ---- private helpers ----

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.authorize(self.client.request(method, format!("{}{path}", self.base_url)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.token.is_empty() {
            builder
        } else {
            builder.header("Authorization", format!("token {}", self.token))
        }
    }

    /// URL of a file in the contents API, each path segment encoded.
    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> Result<Url, GitHostError> {
        let mut url = Url::parse(&format!("{}/repos/{owner}/{repo}/contents", self.base_url))
            .map_err(|e| GitHostError::Connect(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| GitHostError::Connect(format!("{} cannot carry a path", self.base_url)))?
            .extend(path.split('/'));
        Ok(url)
    }

    async fn paginate<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, GitHostError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let response = self
                .request(Method::GET, path)
                .query(&[("limit", PAGE_LIMIT), ("page", page)])
                .send()
                .await?;
            let batch: Vec<T> = http::parse_response(response).await?;
            if batch.is_empty() {
                return Ok(items);
            }
            items.extend(batch);
            page += 1;
        }
    }

    async fn file_sha(
        &self,
        url: &Url,
        branch: &str,
    ) -> Result<String, GitHostError> {
        let response = self
            .authorize(self.client.get(url.clone()))
            .query(&[("ref", branch)])
            .send()
            .await?;
        let existing: ShaResponse = http::parse_response(response).await?;
        Ok(existing.sha)
    }
}

#[async_trait]
impl GitHost for GiteaApi {
    async fn list_repositories(&self, owner: &str) -> Result<Vec<RemoteRepository>, GitHostError> {
        self.paginate(&format!("/orgs/{owner}/repos")).await
    }

    async fn create_repository(
        &self,
        owner: &str,
        repository: &NewRepository,
    ) -> Result<(), GitHostError> {
        let body = json!({
            "name": repository.name,
            "description": repository.description,
            "private": repository.private,
            "auto_init": repository.auto_init,
            "default_branch": BASE_BRANCH,
        });
        let response = self
            .request(Method::POST, &format!("/orgs/{owner}/repos"))
            .json(&body)
            .send()
            .await?;
        http::check_status(response).await?;

        // Creation takes no homepage; it is the repository's website.
        let response = self
            .request(Method::PATCH, &format!("/repos/{owner}/{}", repository.name))
            .json(&json!({ "website": repository.homepage }))
            .send()
            .await?;
        http::check_status(response).await
    }

    async fn delete_repository(&self, owner: &str, repo: &str) -> Result<(), GitHostError> {
        let response = self
            .request(Method::DELETE, &format!("/repos/{owner}/{repo}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(repo, "Repository already absent");
            return Ok(());
        }
        http::check_status(response).await
    }

    async fn create_release_webhook(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
    ) -> Result<(), GitHostError> {
        let body = json!({
            "type": "gitea",
            "active": true,
            "events": ["release"],
            "config": { "url": url, "content_type": "json" },
        });
        let response = self
            .request(Method::POST, &format!("/repos/{owner}/{repo}/hooks"))
            .json(&body)
            .send()
            .await?;
        http::check_status(response).await
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>, GitHostError> {
        let branches: Vec<BranchResponse> = self
            .paginate(&format!("/repos/{owner}/{repo}/branches"))
            .await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    /// Gitea matches refs by prefix, so the exact ref is picked from the list.
    async fn get_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<String>, GitHostError> {
        let response = self
            .request(Method::GET, &format!("/repos/{owner}/{repo}/git/refs/heads/{branch}"))
            .send()
            .await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::CONFLICT) {
            return Ok(None);
        }
        let refs: Vec<RefResponse> = http::parse_response(response).await?;
        let wanted = format!("refs/heads/{branch}");
        Ok(refs
            .into_iter()
            .find(|r| r.name == wanted)
            .map(|r| r.object.sha))
    }

    async fn get_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CommitInfo, GitHostError> {
        let response = self
            .request(Method::GET, &format!("/repos/{owner}/{repo}/git/commits/{sha}"))
            .send()
            .await?;
        let commit: CommitResponse = http::parse_response(response).await?;
        Ok(CommitInfo {
            sha: commit.sha,
            tree_sha: commit.commit.tree.sha,
        })
    }

    async fn get_tree(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<TreeEntry>, GitHostError> {
        let response = self
            .request(Method::GET, &format!("/repos/{owner}/{repo}/git/trees/{sha}"))
            .query(&[("recursive", "true")])
            .send()
            .await?;
        let tree: TreeResponse = http::parse_response(response).await?;
        Ok(tree
            .tree
            .into_iter()
            .filter_map(|item| {
                let kind = match item.kind.as_str() {
                    "blob" => TreeEntryKind::Blob,
                    "commit" => TreeEntryKind::Submodule,
                    _ => return None,
                };
                Some(TreeEntry {
                    path: item.path,
                    kind,
                    sha: item.sha,
                })
            })
            .collect())
    }

    async fn create_blob(&self, _: &str, _: &str, _: &[u8]) -> Result<String, GitHostError> {
        Err(GitHostError::Unsupported("blob creation"))
    }

    async fn create_tree(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &[TreeEntry],
    ) -> Result<String, GitHostError> {
        Err(GitHostError::Unsupported("tree creation"))
    }

    async fn create_commit(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
    ) -> Result<String, GitHostError> {
        Err(GitHostError::Unsupported("commit creation"))
    }

    async fn create_ref(&self, _: &str, _: &str, _: &str, _: &str) -> Result<RefOutcome, GitHostError> {
        Err(GitHostError::Unsupported("ref creation"))
    }

    async fn update_ref(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), GitHostError> {
        Err(GitHostError::Unsupported("ref updates"))
    }

    async fn set_default_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), GitHostError> {
        let response = self
            .request(Method::PATCH, &format!("/repos/{owner}/{repo}"))
            .json(&json!({ "default_branch": branch }))
            .send()
            .await?;
        http::check_status(response).await
    }

    fn publish_mode(&self) -> PublishMode {
        PublishMode::Contents
    }

    async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        from: &str,
    ) -> Result<RefOutcome, GitHostError> {
        let body = json!({ "new_branch_name": branch, "old_branch_name": from });
        let response = self
            .request(Method::POST, &format!("/repos/{owner}/{repo}/branches"))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(RefOutcome::AlreadyExists);
        }
        http::check_status(response).await?;
        Ok(RefOutcome::Created)
    }

    /// POST creates the file; when that is refused the file exists and is
    /// replaced with a PUT carrying its current SHA.
    async fn put_file(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), GitHostError> {
        let url = self.contents_url(owner, repo, path)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let mut body = json!({ "message": message, "content": encoded, "branch": branch });

        let response = self
            .authorize(self.client.post(url.clone()))
            .json(&body)
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        tracing::debug!(repo, path, status = response.status().as_u16(), "Create refused, updating");

        body["sha"] = json!(self.file_sha(&url, branch).await?);
        let response = self
            .authorize(self.client.put(url))
            .json(&body)
            .send()
            .await?;
        http::check_status(response).await
    }
}
