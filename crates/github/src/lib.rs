//! Remote git hosting for published workflows.
//!
//! [`host::GitHost`] is the seam between publication and the remote: the
//! [`api::GitHubApi`] client talks to a GitHub-compatible REST API,
//! [`gitea::GiteaApi`] to a Gitea instance, and [`memory::MemoryGitHost`]
//! keeps everything in process for dry runs and tests.
//! [`publish::Publisher`] drives one materialized directory onto a
//! repository branch, through the git data API or, on Gitea, the contents
//! API.

use std::sync::Arc;

pub mod api;
pub mod error;
pub mod gitea;
pub mod host;
mod http;
pub mod memory;
pub mod publish;
pub mod rate_limit;

pub use api::GitHubApi;
pub use error::GitHostError;
pub use gitea::GiteaApi;
pub use host::{GitHost, HostKind, PublishMode};
pub use memory::MemoryGitHost;
pub use publish::{PublishError, PublishRequest, PublishStage, Publisher, SubmoduleLink};

/// Open the client matching the API at `base_url`.
///
/// `max_retries` bounds rate-limit retries and only applies to GitHub.
pub fn connect(
    base_url: &str,
    token: &str,
    max_retries: u32,
) -> Result<Arc<dyn GitHost>, GitHostError> {
    Ok(match HostKind::for_base_url(base_url) {
        HostKind::GitHub => Arc::new(GitHubApi::connect(base_url, token, max_retries)?),
        HostKind::Gitea => Arc::new(GiteaApi::connect(base_url, token)?),
    })
}
