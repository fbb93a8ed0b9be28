use std::path::PathBuf;

use crate::error::PipelineError;

/// Git host settings.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// API base URL (default: `https://api.github.com`).
    pub base_url: String,
    /// Bearer token; empty means unauthenticated.
    pub token: String,
    /// Organisation owning every published repository.
    pub organisation: String,
    /// Prefix of submodule URLs, `<prefix>/<repo>.git`.
    pub repository_prefix: String,
    /// Webhook registered on `release` events of new repositories.
    pub zenodo_webhook: Option<String>,
    pub homepage: String,
    /// Branch count of a fully published repository.
    pub expected_branch_count: usize,
    /// Additional attempts after a rate-limit response.
    pub rate_limit_retries: u32,
}

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    /// Root of `uploads/<workflowId>/<language>/<fileName>`.
    pub uploads_dir: PathBuf,
    /// Root of the materialized publish trees.
    pub output_dir: PathBuf,
    /// Generation service base URL.
    pub generator_url: String,
    pub github: GitHubConfig,
    /// Publish into the in-memory git host.
    pub dry_run: bool,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                         |
    /// |--------------------------------|---------------------------------|
    /// | `DATABASE_URL`                 | required                        |
    /// | `UPLOADS_DIR`                  | `uploads`                       |
    /// | `OUTPUT_DIR`                   | `output`                        |
    /// | `GENERATOR_URL`                | `http://localhost:3004`         |
    /// | `GITHUB_BASE_URL`              | `https://api.github.com`        |
    /// | `GITHUB_ACCESS_TOKEN`          | empty                           |
    /// | `GITHUB_ORGANISATION`          | `phenoflow`                     |
    /// | `GITHUB_REPOSITORY_PREFIX`     | `https://github.com/phenoflow`  |
    /// | `GITHUB_ZENODO_WEBHOOK`        | unset                           |
    /// | `GITHUB_HOMEPAGE`              | `https://kclhi.org/phenoflow`   |
    /// | `GITHUB_EXPECTED_BRANCH_COUNT` | `2`                             |
    /// | `GITHUB_RATE_LIMIT_RETRIES`    | `2`                             |
    /// | `GIT_HOST_DRY_RUN`             | `false`                         |
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| PipelineError::Config("DATABASE_URL must be set".into()))?;

        let expected_branch_count: usize = var("GITHUB_EXPECTED_BRANCH_COUNT", "2")
            .parse()
            .map_err(|_| {
                PipelineError::Config("GITHUB_EXPECTED_BRANCH_COUNT must be a valid usize".into())
            })?;

        let rate_limit_retries: u32 = var("GITHUB_RATE_LIMIT_RETRIES", "2")
            .parse()
            .map_err(|_| {
                PipelineError::Config("GITHUB_RATE_LIMIT_RETRIES must be a valid u32".into())
            })?;

        let dry_run: bool = var("GIT_HOST_DRY_RUN", "false")
            .parse()
            .map_err(|_| PipelineError::Config("GIT_HOST_DRY_RUN must be true or false".into()))?;

        let github = GitHubConfig {
            base_url: var("GITHUB_BASE_URL", "https://api.github.com"),
            token: var("GITHUB_ACCESS_TOKEN", ""),
            organisation: var("GITHUB_ORGANISATION", "phenoflow"),
            repository_prefix: var("GITHUB_REPOSITORY_PREFIX", "https://github.com/phenoflow"),
            zenodo_webhook: lookup("GITHUB_ZENODO_WEBHOOK").filter(|s| !s.is_empty()),
            homepage: var("GITHUB_HOMEPAGE", "https://kclhi.org/phenoflow"),
            expected_branch_count,
            rate_limit_retries,
        };

        Ok(Self {
            database_url,
            uploads_dir: var("UPLOADS_DIR", "uploads").into(),
            output_dir: var("OUTPUT_DIR", "output").into(),
            generator_url: var("GENERATOR_URL", "http://localhost:3004"),
            github,
            dry_run,
        })
    }
}
