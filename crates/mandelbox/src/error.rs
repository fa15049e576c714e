//! CLI error types with miette diagnostics.
//!
//! Error windows raised by the launch pipeline map onto distinct exit
//! codes so scripts can tell a lapsed subscription from a dead network.

use miette::Diagnostic;
use thiserror::Error;

use mandelbox_config::ConfigError;
use mandelbox_core::{CoreError, ErrorWindow};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const PAYMENT: i32 = 4;
    pub const MAINTENANCE: i32 = 5;
    pub const INTERNET: i32 = 6;
    pub const PROTOCOL: i32 = 7;
    pub const INTERNAL: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Launch pipeline ──────────────────────────────────────────────

    #[error("{title} ({window})")]
    #[diagnostic(code(mandelbox::error_window), help("{text}"))]
    Window {
        window: ErrorWindow,
        title: &'static str,
        text: &'static str,
    },

    // ── Authentication ───────────────────────────────────────────────

    #[error("No cached credentials")]
    #[diagnostic(
        code(mandelbox::no_credentials),
        help(
            "Open the URL printed by `mandelbox auth-url`, sign in, then run:\n\
             mandelbox login --callback-url <redirect URL>\n\
             Or set MANDELBOX_ACCESS_TOKEN and MANDELBOX_REFRESH_TOKEN."
        )
    )]
    NoCredentials,

    #[error("Login failed: {reason}")]
    #[diagnostic(
        code(mandelbox::login_failed),
        help("Callback URLs are single-use. Start over with `mandelbox auth-url`.")
    )]
    LoginFailed { reason: String },

    // ── Connectivity ─────────────────────────────────────────────────

    #[error("Could not reach {url}")]
    #[diagnostic(
        code(mandelbox::connection_failed),
        help("Check your Internet connection and the webserver URL in your config.")
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("No region answered a probe")]
    #[diagnostic(
        code(mandelbox::no_regions),
        help("Check your Internet connection, or pass --region to skip probing.")
    )]
    NoRegions,

    // ── Protocol ─────────────────────────────────────────────────────

    #[error("Streaming protocol failed: {message}")]
    #[diagnostic(
        code(mandelbox::protocol),
        help("Check `protocol.path` in your config. Run with -vv for protocol output.")
    )]
    Protocol { message: String },

    // ── Validation / configuration ───────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(mandelbox::validation))]
    Validation { field: String, reason: String },

    #[error("Config file already exists at {path}")]
    #[diagnostic(code(mandelbox::config_exists), help("Pass --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(mandelbox::config))]
    Config(ConfigError),

    // ── Internal / IO ────────────────────────────────────────────────

    #[error("Internal error: {message}")]
    #[diagnostic(code(mandelbox::internal))]
    Internal { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    Render(String),
}

impl CliError {
    pub fn window(window: ErrorWindow) -> Self {
        Self::Window {
            window,
            title: window.title(),
            text: window.text(),
        }
    }

    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Window { window, .. } => window_exit_code(*window),
            Self::NoCredentials | Self::LoginFailed { .. } => exit_code::AUTH,
            Self::ConnectionFailed { .. } | Self::NoRegions => exit_code::INTERNET,
            Self::Protocol { .. } => exit_code::PROTOCOL,
            Self::Validation { .. }
            | Self::ConfigExists { .. }
            | Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            Self::Internal { .. } => exit_code::INTERNAL,
            _ => exit_code::GENERAL,
        }
    }
}

/// Exit code for a user-facing error window.
pub fn window_exit_code(window: ErrorWindow) -> i32 {
    match window {
        ErrorWindow::UnauthorizedError | ErrorWindow::AuthError => exit_code::AUTH,
        ErrorWindow::NoPaymentError => exit_code::PAYMENT,
        ErrorWindow::MaintenanceError => exit_code::MAINTENANCE,
        ErrorWindow::InternetError => exit_code::INTERNET,
        ErrorWindow::ProtocolError => exit_code::PROTOCOL,
        ErrorWindow::NavigationError => exit_code::GENERAL,
        ErrorWindow::MandelboxInternalError
        | ErrorWindow::CommitHashMismatch
        | ErrorWindow::CouldNotLockInstance
        | ErrorWindow::NoInstanceAvailable
        | ErrorWindow::RegionNotEnabled
        | ErrorWindow::UserAlreadyActive => exit_code::INTERNAL,
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed {
                url,
                source: reason.into(),
            },

            CoreError::Timeout { timeout_secs } => Self::ConnectionFailed {
                url: "(request)".into(),
                source: format!("timed out after {timeout_secs}s").into(),
            },

            CoreError::InvalidToken { message } | CoreError::ConfigToken { message } => {
                Self::LoginFailed { reason: message }
            }

            CoreError::ProtocolSpawn { path, reason } => Self::Protocol {
                message: format!("cannot start {path}: {reason}"),
            },
            CoreError::ProtocolNotRunning => Self::Protocol {
                message: "process is not running".into(),
            },

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            other @ (CoreError::Api { .. }
            | CoreError::PublisherClaimed { .. }
            | CoreError::Internal(_)) => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl From<mandelbox_api::Error> for CliError {
    fn from(err: mandelbox_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
