//! REST client for the GitHub API.
//!
//! Wraps the repository, branch, and git data endpoints used for
//! publication using [`reqwest`]. Against `github.com` every request runs
//! through a rate-limit-aware retry loop; see [`crate::rate_limit`].

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::error::GitHostError;
use crate::http;
use crate::host::{CommitInfo, GitHost, NewRepository, RefOutcome, RemoteRepository, TreeEntry, TreeEntryKind};
use crate::rate_limit::{self, RateLimitPolicy};

/// Page size for paginated listings.
const PER_PAGE: u32 = 100;

const USER_AGENT: &str = concat!("phenoflow/", env!("CARGO_PKG_VERSION"));

/// HTTP client for a GitHub-compatible API.
pub struct GitHubApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    rate_limit: Option<RateLimitPolicy>,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

impl GitHubApi {
    /// Open a client for the API at `base_url`, e.g. `https://api.github.com`.
    ///
    /// Rate-limit retry is enabled when the URL points at `github.com`.
    pub fn connect(base_url: &str, token: &str, max_retries: u32) -> Result<Self, GitHostError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GitHostError::Connect(e.to_string()))?;
        let rate_limit = base_url.contains("github.com").then(|| RateLimitPolicy {
            max_retries,
            ..RateLimitPolicy::default()
        });
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limit,
        })
    }

    /// Override the rate-limit policy; `None` disables retry.
    pub fn with_rate_limit(mut self, policy: Option<RateLimitPolicy>) -> Self {
        self.rate_limit = policy;
        self
    }

    // ---- private helpers ----

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    /// Send a request, retrying on rate-limit responses per the policy.
    ///
    /// Non-rate-limit responses are returned as they are, whatever their
    /// status.
    async fn send(
        &self,
        build: impl Fn() -> RequestBuilder + Send + Sync,
    ) -> Result<reqwest::Response, GitHostError> {
        let mut attempt = 0u32;
        loop {
            let response = build().send().await?;
            let Some(policy) = &self.rate_limit else {
                return Ok(response);
            };
            let status = response.status();
            if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let headers = response.headers().clone();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            match rate_limit::classify(status.as_u16(), &headers, &body, chrono::Utc::now()) {
                Some(limit) if attempt < policy.max_retries => {
                    attempt += 1;
                    let wait = limit.wait().min(policy.max_wait);
                    tracing::warn!(
                        attempt,
                        kind = limit.kind(),
                        wait_secs = wait.as_secs(),
                        "Git host rate limit hit, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Some(limit) => {
                    tracing::error!(kind = limit.kind(), "Git host rate limit retries exhausted");
                    return Err(GitHostError::RateLimited {
                        retry_after: limit.wait(),
                    });
                }
                None => {
                    return Err(GitHostError::Api {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
        }
    }

    /// Fetch every page of a listing until an empty page is returned.
    async fn paginate<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, GitHostError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let response = self
                .send(|| {
                    self.request(Method::GET, path)
                        .query(&[("per_page", PER_PAGE), ("page", page)])
                })
                .await?;
            let batch: Vec<T> = http::parse_response(response).await?;
            if batch.is_empty() {
                return Ok(items);
            }
            items.extend(batch);
            page += 1;
        }
    }
}

#[async_trait]
impl GitHost for GitHubApi {
    async fn list_repositories(&self, owner: &str) -> Result<Vec<RemoteRepository>, GitHostError> {
        self.paginate(&format!("/orgs/{owner}/repos")).await
    }

    async fn create_repository(
        &self,
        owner: &str,
        repository: &NewRepository,
    ) -> Result<(), GitHostError> {
        let path = format!("/orgs/{owner}/repos");
        let response = self
            .send(|| self.request(Method::POST, &path).json(repository))
            .await?;
        http::check_status(response).await
    }

    async fn delete_repository(&self, owner: &str, repo: &str) -> Result<(), GitHostError> {
        let path = format!("/repos/{owner}/{repo}");
        let response = self.send(|| self.request(Method::DELETE, &path)).await?;
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
        let path = format!("/repos/{owner}/{repo}/hooks");
        let body = json!({
            "name": "web",
            "active": true,
            "events": ["release"],
            "config": {
                "url": url,
                "content_type": "json",
                "insecure_ssl": "0",
            },
        });
        let response = self
            .send(|| self.request(Method::POST, &path).json(&body))
            .await?;
        http::check_status(response).await
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<String>, GitHostError> {
        let branches: Vec<BranchResponse> = self
            .paginate(&format!("/repos/{owner}/{repo}/branches"))
            .await?;
        Ok(branches.into_iter().map(|b| b.name).collect())
    }

    async fn get_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<String>, GitHostError> {
        let path = format!("/repos/{owner}/{repo}/git/ref/heads/{branch}");
        let response = self.send(|| self.request(Method::GET, &path)).await?;
        // 409 is returned for a repository without any commits.
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::CONFLICT) {
            return Ok(None);
        }
        let reference: RefResponse = http::parse_response(response).await?;
        Ok(Some(reference.object.sha))
    }

    async fn get_commit(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CommitInfo, GitHostError> {
        let path = format!("/repos/{owner}/{repo}/git/commits/{sha}");
        let response = self.send(|| self.request(Method::GET, &path)).await?;
        let commit: CommitResponse = http::parse_response(response).await?;
        Ok(CommitInfo {
            sha: commit.sha,
            tree_sha: commit.tree.sha,
        })
    }

    async fn get_tree(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<TreeEntry>, GitHostError> {
        let path = format!("/repos/{owner}/{repo}/git/trees/{sha}");
        let response = self
            .send(|| self.request(Method::GET, &path).query(&[("recursive", "1")]))
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

    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &[u8],
    ) -> Result<String, GitHostError> {
        let path = format!("/repos/{owner}/{repo}/git/blobs");
        let body = json!({
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "encoding": "base64",
        });
        let response = self
            .send(|| self.request(Method::POST, &path).json(&body))
            .await?;
        let blob: ShaResponse = http::parse_response(response).await?;
        Ok(blob.sha)
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, GitHostError> {
        let path = format!("/repos/{owner}/{repo}/git/trees");
        let tree: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "path": entry.path,
                    "mode": entry.kind.mode(),
                    "type": entry.kind.object_type(),
                    "sha": entry.sha,
                })
            })
            .collect();
        let body = json!({ "base_tree": base_tree, "tree": tree });
        let response = self
            .send(|| self.request(Method::POST, &path).json(&body))
            .await?;
        let created: ShaResponse = http::parse_response(response).await?;
        Ok(created.sha)
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree: &str,
        parent: &str,
    ) -> Result<String, GitHostError> {
        let path = format!("/repos/{owner}/{repo}/git/commits");
        let body = json!({ "message": message, "tree": tree, "parents": [parent] });
        let response = self
            .send(|| self.request(Method::POST, &path).json(&body))
            .await?;
        let commit: ShaResponse = http::parse_response(response).await?;
        Ok(commit.sha)
    }

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<RefOutcome, GitHostError> {
        let path = format!("/repos/{owner}/{repo}/git/refs");
        let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        let response = self
            .send(|| self.request(Method::POST, &path).json(&body))
            .await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let text = response.text().await.unwrap_or_default();
            if text.contains("already exists") {
                return Ok(RefOutcome::AlreadyExists);
            }
            return Err(GitHostError::Api {
                status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                body: text,
            });
        }
        http::check_status(response).await?;
        Ok(RefOutcome::Created)
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHostError> {
        let path = format!("/repos/{owner}/{repo}/git/refs/heads/{branch}");
        let body = json!({ "sha": sha, "force": false });
        let response = self
            .send(|| self.request(Method::PATCH, &path).json(&body))
            .await?;
        http::check_status(response).await
    }

    async fn set_default_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), GitHostError> {
        let path = format!("/repos/{owner}/{repo}");
        let body = json!({ "default_branch": branch });
        let response = self
            .send(|| self.request(Method::PATCH, &path).json(&body))
            .await?;
        http::check_status(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_retry_only_for_github() {
        let api = GitHubApi::connect("https://api.github.com/", "t", 2).unwrap();
        assert!(api.rate_limit.is_some());
        assert_eq!(api.base_url, "https://api.github.com");

        let api = GitHubApi::connect("https://git.example.org/api/v1", "t", 2).unwrap();
        assert!(api.rate_limit.is_none());
    }

    #[test]
    fn tree_entry_modes() {
        assert_eq!(TreeEntryKind::Blob.mode(), "100644");
        assert_eq!(TreeEntryKind::Submodule.mode(), "160000");
        assert_eq!(TreeEntryKind::Submodule.object_type(), "commit");
    }
}
