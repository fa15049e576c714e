// ── Domain model ──
//
// Values carried between pipeline stages and through the signal bus.
// Secrets are held as `SecretString` end to end and only exposed at the
// wire boundary.

use std::fmt;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

// ── Subscription ────────────────────────────────────────────────────

/// Billing state embedded in the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Incomplete,
    IncompleteExpired,
    Canceled,
    Unpaid,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Only these two statuses may start a mandelbox.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

// ── Credentials ─────────────────────────────────────────────────────

/// How a previously saved config token is available, if at all.
#[derive(Debug, Clone)]
pub enum StoredConfigToken {
    Plain(SecretString),
    /// `base64(nonce || ciphertext)` sealed with a password-derived key.
    Encrypted {
        ciphertext: String,
        password: SecretString,
    },
}

/// Input of the auth flow: whatever credentials were persisted or just
/// obtained from a login callback.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub user_email: Option<String>,
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub config_token: Option<StoredConfigToken>,
}

/// Credentials of a signed-in user. Created by the auth flow, replaced
/// wholesale on refresh, cleared on sign-out.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub user_email: String,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub config_token: SecretString,
    /// `true` when the config token was generated during this session.
    pub is_new_config_token: bool,
    pub subscription_status: Option<SubscriptionStatus>,
}

// ── Mandelbox ───────────────────────────────────────────────────────

/// A remote instance handed out by the webserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MandelboxAssignment {
    pub mandelbox_id: String,
    /// Absent when the webserver leaves it to the host service.
    pub ip: Option<String>,
}

/// Host ports forwarded to the mandelbox's fixed internal ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandelboxPorts {
    pub port_32262: u16,
    pub port_32263: u16,
    pub port_32273: u16,
}

/// Host service coordinates reported while the mandelbox spins up.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub ip: String,
    pub port: u16,
    pub client_app_auth_secret: SecretString,
}

/// Everything the protocol needs to connect to a mandelbox.
#[derive(Debug, Clone)]
pub struct HostSpinUpResult {
    pub mandelbox_ip: String,
    pub mandelbox_secret: SecretString,
    pub mandelbox_ports: MandelboxPorts,
}

/// Browser data optionally imported into the remote session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportPayload {
    pub cookies: Option<String>,
    pub bookmarks: Option<String>,
    pub json_data: Option<String>,
}

// ── Error windows ───────────────────────────────────────────────────

/// User-visible error surfaces. The string form is the stable identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorWindow {
    NoPaymentError,
    UnauthorizedError,
    ProtocolError,
    MandelboxInternalError,
    CommitHashMismatch,
    CouldNotLockInstance,
    NoInstanceAvailable,
    RegionNotEnabled,
    UserAlreadyActive,
    AuthError,
    NavigationError,
    MaintenanceError,
    InternetError,
}

impl ErrorWindow {
    pub fn title(self) -> &'static str {
        match self {
            Self::NoPaymentError => "Your free trial has expired!",
            Self::UnauthorizedError => "There was an error authenticating you.",
            Self::ProtocolError => "The streamed browser lost connection.",
            Self::MandelboxInternalError => "There was an unexpected error with our servers.",
            Self::CommitHashMismatch => "Your version is out of date.",
            Self::CouldNotLockInstance => "We encountered an unexpected database error.",
            Self::NoInstanceAvailable => "Our servers are at capacity.",
            Self::RegionNotEnabled => "Your region is not currently supported.",
            Self::UserAlreadyActive => "You are connected on another device.",
            Self::AuthError => "We've added extra security measures to our login system.",
            Self::NavigationError => "There was an error loading the window.",
            Self::MaintenanceError => "We are currently pushing out an update.",
            Self::InternetError => "Please check your Internet connection.",
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Self::NoPaymentError => "To keep using the service, please sign up for a paid plan.",
            Self::UnauthorizedError | Self::NavigationError => {
                "Please try logging in again or contact support for help."
            }
            Self::ProtocolError => {
                "This could be due to inactivity or weak Internet. Please try again."
            }
            Self::MandelboxInternalError => {
                "This is likely a temporary problem. Please try again in a few minutes."
            }
            Self::CommitHashMismatch => {
                "Please allow a few seconds for an update to download, then try again."
            }
            Self::CouldNotLockInstance => "Retrying could cause this error to go away.",
            Self::NoInstanceAvailable => "We may have more capacity if you try again shortly.",
            Self::RegionNotEnabled => "If this looks wrong, please contact support.",
            Self::UserAlreadyActive => "Close the other session and try again.",
            Self::AuthError => "Please sign out and sign back in.",
            Self::MaintenanceError => "Please check back in a few minutes.",
            Self::InternetError => {
                "We were unable to reach our servers, likely because of a weak connection."
            }
        }
    }
}

// ── Stage failures ──────────────────────────────────────────────────

/// Why the auth flow could not produce an `AuthState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum AuthFailureKind {
    MissingCredentials,
    Rejected,
    MalformedToken,
    ConfigToken,
    Network,
}

/// Failure sentinel of the auth and refresh flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub kind: AuthFailureKind,
    pub message: String,
    pub status: Option<u16>,
}

impl AuthFailure {
    pub fn new(kind: AuthFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error_window(&self) -> ErrorWindow {
        match self.kind {
            AuthFailureKind::Network => ErrorWindow::InternetError,
            _ => ErrorWindow::AuthError,
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// The subscription does not allow a launch. Carries the credentials so
/// the refresh-after-payment path can pick them up.
#[derive(Debug, Clone)]
pub struct PaymentFailure {
    pub state: AuthState,
    pub status: Option<SubscriptionStatus>,
}

impl PaymentFailure {
    pub fn error_window(&self) -> ErrorWindow {
        ErrorWindow::NoPaymentError
    }
}

/// Why a mandelbox could not be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateFailure {
    /// The region list stayed empty for every probing attempt.
    NoRegions { attempts: u32 },
    /// HTTP 402.
    NoAccess,
    /// HTTP 401 or 422.
    Unauthorized { status: u16 },
    /// HTTP 512.
    Maintenance,
    /// The scheduler refused with a known code.
    Rejected { window: ErrorWindow },
    Internal { status: Option<u16>, reason: String },
    /// The webserver could not be reached.
    Network { reason: String },
}

impl CreateFailure {
    pub fn error_window(&self) -> ErrorWindow {
        match self {
            Self::NoRegions { .. } | Self::Network { .. } => ErrorWindow::InternetError,
            Self::NoAccess => ErrorWindow::NoPaymentError,
            Self::Unauthorized { .. } => ErrorWindow::UnauthorizedError,
            Self::Maintenance => ErrorWindow::MaintenanceError,
            Self::Rejected { window } => *window,
            Self::Internal { .. } => ErrorWindow::MandelboxInternalError,
        }
    }
}

impl fmt::Display for CreateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRegions { attempts } => {
                write!(f, "no reachable region after {attempts} attempts")
            }
            Self::NoAccess => f.write_str("account has no access (HTTP 402)"),
            Self::Unauthorized { status } => write!(f, "unauthorized (HTTP {status})"),
            Self::Maintenance => f.write_str("webserver under maintenance (HTTP 512)"),
            Self::Rejected { window } => write!(f, "assignment rejected: {window}"),
            Self::Internal { status: Some(status), reason } => {
                write!(f, "internal error (HTTP {status}): {reason}")
            }
            Self::Internal { status: None, reason } => write!(f, "internal error: {reason}"),
            Self::Network { reason } => write!(f, "network error: {reason}"),
        }
    }
}

/// Why the host never became ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostFailure {
    /// The host-service lookup answered with a non-200 status.
    InfoRejected { status: u16 },
    /// The host stayed pending past the poll deadline.
    Timeout { after: Duration },
    /// The host refused the config push.
    ConfigRejected { status: u16 },
    /// The config push succeeded but carried no usable connection details.
    MalformedDescriptor,
    Network { reason: String },
}

impl HostFailure {
    pub fn error_window(&self) -> ErrorWindow {
        match self {
            Self::Network { .. } => ErrorWindow::InternetError,
            _ => ErrorWindow::MandelboxInternalError,
        }
    }
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InfoRejected { status } => write!(f, "host lookup rejected (HTTP {status})"),
            Self::Timeout { after } => write!(f, "host not ready after {}s", after.as_secs()),
            Self::ConfigRejected { status } => write!(f, "host config rejected (HTTP {status})"),
            Self::MalformedDescriptor => f.write_str("host returned no connection details"),
            Self::Network { reason } => write!(f, "network error: {reason}"),
        }
    }
}

/// Either stage of the combined mandelbox flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MandelboxFailure {
    Create(CreateFailure),
    Host(HostFailure),
}

impl MandelboxFailure {
    pub fn error_window(&self) -> ErrorWindow {
        match self {
            Self::Create(f) => f.error_window(),
            Self::Host(f) => f.error_window(),
        }
    }
}

impl fmt::Display for MandelboxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(inner) => write!(f, "create: {inner}"),
            Self::Host(inner) => write!(f, "host: {inner}"),
        }
    }
}

// ── Protocol ────────────────────────────────────────────────────────

/// Emitted every time the protocol process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolClosed {
    /// Unexpected exit, as opposed to one the manager asked for.
    pub crashed: bool,
    pub exit_code: Option<i32>,
    /// Number of crashes so far in this session, including this one.
    pub crash_count: u32,
}
