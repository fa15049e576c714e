// ── Core error types ──
//
// Errors raised by mandelbox-core outside the flow pipeline. Inside a flow,
// failures are values on the failure channel and never surface as
// `CoreError`. The `From<mandelbox_api::Error>` impl translates transport
// errors into domain-appropriate variants.

use thiserror::Error;

use crate::bus::TriggerName;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Signal bus ───────────────────────────────────────────────────
    #[error("Publisher for trigger `{trigger}` was already claimed")]
    PublisherClaimed { trigger: TriggerName },

    // ── Tokens ───────────────────────────────────────────────────────
    #[error("Invalid token: {message}")]
    InvalidToken { message: String },

    #[error("Config token error: {message}")]
    ConfigToken { message: String },

    // ── Protocol process ─────────────────────────────────────────────
    #[error("Failed to launch protocol at {path}: {reason}")]
    ProtocolSpawn { path: String, reason: String },

    #[error("Protocol process is not running")]
    ProtocolNotRunning,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether this failure looks like missing or flaky connectivity.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Timeout { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<mandelbox_api::Error> for CoreError {
    fn from(err: mandelbox_api::Error) -> Self {
        match err {
            mandelbox_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            mandelbox_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            mandelbox_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid URL: {e}"),
            },
            mandelbox_api::Error::Tls(message) => CoreError::ConnectionFailed {
                url: "<tls>".into(),
                reason: message,
            },
            mandelbox_api::Error::Serialization(e) => CoreError::Internal(e.to_string()),
        }
    }
}
