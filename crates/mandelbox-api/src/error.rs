use thiserror::Error;

/// Top-level error type for the `mandelbox-api` crate.
///
/// Only transport-level failures live here. A remote service answering
/// with an unexpected status is *not* an error at this layer: callers get
/// an [`ApiResponse`](crate::ApiResponse) and classify the status themselves.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// Request body could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` when the failure means the network itself is unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_connect() || e.is_timeout())
    }
}
