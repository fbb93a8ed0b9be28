use std::time::Duration;

/// Errors from a git host.
#[derive(Debug, thiserror::Error)]
pub enum GitHostError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The host returned a non-2xx status code.
    #[error("Git host API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// Still rate limited after every retry was spent.
    #[error("Git host rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The host has no endpoint for this operation.
    #[error("Git host does not support {0}")]
    Unsupported(&'static str),

    /// No session could be opened with the host.
    #[error("Unable to connect to git host: {0}")]
    Connect(String),
}

impl GitHostError {
    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
