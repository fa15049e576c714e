//! Configuration for the mandelbox launcher.
//!
//! TOML settings, cached credential resolution (env + keyring + plaintext),
//! and translation to `mandelbox_core::LauncherConfig`. The core crate never
//! touches disk; everything file- or keyring-shaped lives here.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use mandelbox_api::{DEFAULT_HOST_SERVICE_PORT, OAuthSettings, Region, TransportConfig};
use mandelbox_core::config::LOCAL_COMMIT_HASH;
use mandelbox_core::{
    AuthRequest, AuthState, LauncherConfig, PollPolicy, ProtocolConfig, RegionPolicy,
    StoredConfigToken,
};

/// Keyring service all cached tokens are stored under.
pub const KEYRING_SERVICE: &str = "mandelbox";

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "MANDELBOX_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("keyring unavailable: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub webserver: WebserverSection,
    #[serde(default)]
    pub regions: RegionSection,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub credentials: CredentialSection,
    /// Reported to the webserver on assign. Unset means a local build.
    pub commit_hash: Option<String>,
}

/// OAuth provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthSection {
    #[serde(default = "default_auth_domain")]
    pub domain: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
    #[serde(default = "default_audience")]
    pub audience: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            domain: default_auth_domain(),
            client_id: default_client_id(),
            callback_url: default_callback_url(),
            audience: default_audience(),
        }
    }
}

fn default_auth_domain() -> String {
    "auth.fractal.co".into()
}
fn default_client_id() -> String {
    "Ulk5B2RfB7mM8BVjA3JtkrZT7HhWIBLD".into()
}
fn default_callback_url() -> String {
    "http://localhost/callback".into()
}
fn default_audience() -> String {
    "https://api.fractal.co".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebserverSection {
    #[serde(default = "default_webserver_url")]
    pub url: String,
    #[serde(default = "default_host_service_port")]
    pub host_service_port: u16,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for WebserverSection {
    fn default() -> Self {
        Self {
            url: default_webserver_url(),
            host_service_port: default_host_service_port(),
            timeout: default_timeout(),
        }
    }
}

fn default_webserver_url() -> String {
    "https://prod-server.fractal.co".into()
}
fn default_host_service_port() -> u16 {
    DEFAULT_HOST_SERVICE_PORT
}
fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegionSection {
    /// Region names such as `us-east-1`.
    #[serde(default = "default_allowed_regions")]
    pub allowed: Vec<String>,
    /// Always request this region instead of probing.
    pub pinned: Option<String>,
    #[serde(default = "default_region_attempts")]
    pub attempts: u32,
    #[serde(default = "default_region_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for RegionSection {
    fn default() -> Self {
        Self {
            allowed: default_allowed_regions(),
            pinned: None,
            attempts: default_region_attempts(),
            retry_delay_ms: default_region_retry_delay_ms(),
        }
    }
}

fn default_allowed_regions() -> Vec<String> {
    Region::DEFAULT_ALLOWED
        .iter()
        .map(ToString::to_string)
        .collect()
}
fn default_region_attempts() -> u32 {
    20
}
fn default_region_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollSection {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_poll_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolSection {
    #[serde(default = "default_protocol_path")]
    pub path: PathBuf,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Where `protocol.log` is rotated daily. Unset disables the file.
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub mirror_stdout: bool,
    #[serde(default = "default_max_crash_retries")]
    pub max_crash_retries: u32,
    /// Seconds connected before earlier crashes are forgotten.
    #[serde(default = "default_healthy_run_secs")]
    pub healthy_run_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            path: default_protocol_path(),
            environment: default_environment(),
            extra_args: Vec::new(),
            log_dir: None,
            mirror_stdout: false,
            max_crash_retries: default_max_crash_retries(),
            healthy_run_secs: default_healthy_run_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_protocol_path() -> PathBuf {
    ProtocolConfig::default().path
}
fn default_environment() -> String {
    "prod".into()
}
fn default_max_crash_retries() -> u32 {
    3
}
fn default_healthy_run_secs() -> u64 {
    ProtocolConfig::default().healthy_run.as_secs()
}
fn default_shutdown_grace_secs() -> u64 {
    5
}

/// Cached credentials in plaintext. Prefer the keyring or env vars.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct CredentialSection {
    pub user_email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub config_token: Option<String>,
    /// `base64(nonce || ciphertext)`, unlocked with the account password.
    pub encrypted_config_token: Option<String>,
}

impl std::fmt::Debug for CredentialSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "[REDACTED]" } else { "None" };
        f.debug_struct("CredentialSection")
            .field("user_email", &self.user_email)
            .field("access_token", &set(&self.access_token))
            .field("refresh_token", &set(&self.refresh_token))
            .field("config_token", &set(&self.config_token))
            .field("encrypted_config_token", &set(&self.encrypted_config_token))
            .finish()
    }
}

impl Config {
    /// A copy safe to print: every cached secret replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "<redacted>".to_owned());
        let creds = &self.credentials;
        Self {
            credentials: CredentialSection {
                user_email: creds.user_email.clone(),
                access_token: mask(&creds.access_token),
                refresh_token: mask(&creds.refresh_token),
                config_token: mask(&creds.config_token),
                encrypted_config_token: mask(&creds.encrypted_config_token),
            },
            ..self.clone()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "whist", "mandelbox").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("mandelbox");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then `path`, then `MANDELBOX_*` variables. Nested keys use a
/// double underscore: `MANDELBOX_PROTOCOL__LOG_DIR`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist or is invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring unreadable config");
        Config::default()
    })
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(&path, cfg)?;
    Ok(path)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// A cached secret and where it is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CachedSecret {
    AccessToken,
    RefreshToken,
    ConfigToken,
}

impl CachedSecret {
    fn env_var(self) -> &'static str {
        match self {
            Self::AccessToken => "MANDELBOX_ACCESS_TOKEN",
            Self::RefreshToken => "MANDELBOX_REFRESH_TOKEN",
            Self::ConfigToken => "MANDELBOX_CONFIG_TOKEN",
        }
    }

    fn keyring_account(self) -> &'static str {
        match self {
            Self::AccessToken => "access-token",
            Self::RefreshToken => "refresh-token",
            Self::ConfigToken => "config-token",
        }
    }

    fn plaintext(self, creds: &CredentialSection) -> Option<&String> {
        match self {
            Self::AccessToken => creds.access_token.as_ref(),
            Self::RefreshToken => creds.refresh_token.as_ref(),
            Self::ConfigToken => creds.config_token.as_ref(),
        }
    }
}

fn keyring_entry(account: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(KEYRING_SERVICE, account)?)
}

fn keyring_lookup(account: &str) -> Option<String> {
    keyring_entry(account).ok()?.get_password().ok()
}

/// Build the auth flow's input from whatever credentials are cached.
///
/// Each token is looked up in the environment, then the system keyring,
/// then the plaintext `[credentials]` table. An encrypted config token is
/// only usable when `password` is given; a plain one always wins.
pub fn resolve_credentials(cfg: &Config, password: Option<SecretString>) -> AuthRequest {
    resolve_with(
        cfg,
        password,
        |name| std::env::var(name).ok(),
        keyring_lookup,
    )
}

fn resolve_with(
    cfg: &Config,
    password: Option<SecretString>,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> AuthRequest {
    let creds = &cfg.credentials;
    let lookup = |secret: CachedSecret| {
        env(secret.env_var())
            .or_else(|| keyring(secret.keyring_account()))
            .or_else(|| secret.plaintext(creds).cloned())
            .filter(|v| !v.is_empty())
            .map(SecretString::from)
    };

    let config_token = lookup(CachedSecret::ConfigToken)
        .map(StoredConfigToken::Plain)
        .or_else(|| {
            let ciphertext = creds.encrypted_config_token.clone()?;
            Some(StoredConfigToken::Encrypted {
                ciphertext,
                password: password?,
            })
        });

    AuthRequest {
        user_email: env("MANDELBOX_USER_EMAIL").or_else(|| creds.user_email.clone()),
        access_token: lookup(CachedSecret::AccessToken),
        refresh_token: lookup(CachedSecret::RefreshToken),
        config_token,
    }
}

/// Write a signed-in user's tokens to the keyring.
///
/// The plaintext table is left alone; callers persist the email with
/// `save_config` if they want it remembered.
pub fn store_tokens(state: &AuthState) -> Result<(), ConfigError> {
    let secrets = [
        (CachedSecret::AccessToken, &state.access_token),
        (CachedSecret::RefreshToken, &state.refresh_token),
        (CachedSecret::ConfigToken, &state.config_token),
    ];
    for (secret, value) in secrets {
        keyring_entry(secret.keyring_account())?.set_password(value.expose_secret())?;
    }
    tracing::debug!("stored refreshed tokens in keyring");
    Ok(())
}

/// Cache freshly exchanged login tokens, before any config token exists.
pub fn store_login(request: &AuthRequest) -> Result<(), ConfigError> {
    let secrets = [
        (CachedSecret::AccessToken, request.access_token.as_ref()),
        (CachedSecret::RefreshToken, request.refresh_token.as_ref()),
    ];
    for (secret, value) in secrets {
        if let Some(value) = value {
            keyring_entry(secret.keyring_account())?.set_password(value.expose_secret())?;
        }
    }
    Ok(())
}

// ── LauncherConfig translation ──────────────────────────────────────

fn parse_region(field: &str, name: &str) -> Result<Region, ConfigError> {
    Region::from_str(name).map_err(|_| invalid(field, format!("unknown region '{name}'")))
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse()
        .map_err(|_| invalid(field, format!("invalid URL: {raw}")))
}

/// Base URL of the identity provider. A bare domain means https.
fn auth_base_url(domain: &str) -> Result<Url, ConfigError> {
    if domain.contains("://") {
        parse_url("auth.domain", domain)
    } else {
        parse_url("auth.domain", &format!("https://{domain}/"))
    }
}

/// Build the runtime config the launcher runs with.
pub fn to_launcher_config(cfg: &Config) -> Result<LauncherConfig, ConfigError> {
    let oauth = OAuthSettings {
        base_url: auth_base_url(&cfg.auth.domain)?,
        client_id: cfg.auth.client_id.clone(),
        callback_url: parse_url("auth.callback_url", &cfg.auth.callback_url)?,
        audience: cfg.auth.audience.clone(),
    };
    let webserver_url = parse_url("webserver.url", &cfg.webserver.url)?;

    let allowed = cfg
        .regions
        .allowed
        .iter()
        .map(|name| parse_region("regions.allowed", name))
        .collect::<Result<Vec<_>, _>>()?;
    if allowed.is_empty() {
        return Err(invalid("regions.allowed", "at least one region is required"));
    }
    let pinned = cfg
        .regions
        .pinned
        .as_deref()
        .map(|name| parse_region("regions.pinned", name))
        .transpose()?;
    if cfg.poll.interval_ms == 0 {
        return Err(invalid("poll.interval_ms", "must be positive"));
    }

    let mut launcher = LauncherConfig::new(webserver_url, oauth);
    launcher.transport =
        TransportConfig::default().with_timeout(Duration::from_secs(cfg.webserver.timeout));
    launcher.host_service_port = cfg.webserver.host_service_port;
    launcher.regions = RegionPolicy {
        allowed,
        pinned,
        attempts: cfg.regions.attempts.max(1),
        retry_delay: Duration::from_millis(cfg.regions.retry_delay_ms),
    };
    launcher.poll = PollPolicy {
        interval: Duration::from_millis(cfg.poll.interval_ms),
        timeout: Duration::from_secs(cfg.poll.timeout_secs),
    };
    launcher.protocol = ProtocolConfig {
        path: cfg.protocol.path.clone(),
        environment: cfg.protocol.environment.clone(),
        extra_args: cfg.protocol.extra_args.clone(),
        log_dir: cfg.protocol.log_dir.clone(),
        mirror_stdout: cfg.protocol.mirror_stdout,
        max_crash_retries: cfg.protocol.max_crash_retries,
        healthy_run: Duration::from_secs(cfg.protocol.healthy_run_secs),
        shutdown_grace: Duration::from_secs(cfg.protocol.shutdown_grace_secs),
    };
    launcher.client_commit_hash = cfg
        .commit_hash
        .clone()
        .unwrap_or_else(|| LOCAL_COMMIT_HASH.into());
    Ok(launcher)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(cfg.webserver.host_service_port, 4678);
        assert_eq!(cfg.regions.attempts, 20);
        assert_eq!(cfg.regions.retry_delay_ms, 500);
        assert_eq!(cfg.poll.timeout_secs, 180);
        assert_eq!(cfg.protocol.max_crash_retries, 3);
        assert_eq!(cfg.regions.allowed.len(), Region::DEFAULT_ALLOWED.len());
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let (_dir, path) = write_config(
            r#"
            commit_hash = "abc123"

            [webserver]
            url = "http://127.0.0.1:7730"

            [regions]
            allowed = ["us-east-1", "eu-west-1"]
            pinned = "eu-west-1"

            [protocol]
            path = "/opt/whist/WhistClient"
            extra_args = ["--width", "1280"]
            healthy_run_secs = 120
            "#,
        );
        let cfg = load_config_from(&path).unwrap();
        let launcher = to_launcher_config(&cfg).unwrap();

        assert_eq!(launcher.webserver_url.as_str(), "http://127.0.0.1:7730/");
        assert_eq!(launcher.regions.allowed, vec![Region::UsEast1, Region::EuWest1]);
        assert_eq!(launcher.regions.pinned, Some(Region::EuWest1));
        assert_eq!(launcher.regions.attempts, 20);
        assert_eq!(launcher.protocol.path, PathBuf::from("/opt/whist/WhistClient"));
        assert_eq!(launcher.protocol.extra_args, vec!["--width", "1280"]);
        assert_eq!(launcher.protocol.shutdown_grace, Duration::from_secs(5));
        assert_eq!(launcher.protocol.healthy_run, Duration::from_secs(120));
        assert_eq!(launcher.client_commit_hash, "abc123");
        assert_eq!(launcher.oauth.base_url.as_str(), "https://auth.fractal.co/");
        assert_eq!(launcher.oauth.callback_url.as_str(), "http://localhost/callback");
    }

    #[test]
    fn unset_commit_hash_reports_a_local_build() {
        let launcher = to_launcher_config(&Config::default()).unwrap();
        assert_eq!(launcher.client_commit_hash, "local_dev");
        assert_eq!(launcher.poll.interval, Duration::from_secs(1));
    }

    #[test]
    fn unknown_region_is_rejected() {
        let mut cfg = Config::default();
        cfg.regions.allowed = vec!["mars-north-1".into()];
        let err = to_launcher_config(&cfg).unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "regions.allowed"),
            "{err}"
        );
    }

    #[test]
    fn bad_url_is_rejected() {
        let mut cfg = Config::default();
        cfg.webserver.url = "not a url".into();
        assert!(matches!(
            to_launcher_config(&cfg),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn save_then_load_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.protocol.log_dir = Some(dir.path().join("logs"));
        cfg.credentials.user_email = Some("user@example.com".into());

        save_config_to(&path, &cfg).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.protocol.log_dir, cfg.protocol.log_dir);
        assert_eq!(loaded.credentials.user_email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn redacted_config_hides_tokens() {
        let mut cfg = Config::default();
        cfg.credentials.access_token = Some("secret-access".into());
        let shown = toml::to_string_pretty(&cfg.redacted()).unwrap();
        assert!(!shown.contains("secret-access"));
        assert!(!format!("{:?}", cfg.credentials).contains("secret-access"));
    }

    #[test]
    fn credentials_resolve_env_then_keyring_then_plaintext() {
        let mut cfg = Config::default();
        cfg.credentials.user_email = Some("user@example.com".into());
        cfg.credentials.access_token = Some("plain-access".into());
        cfg.credentials.refresh_token = Some("plain-refresh".into());
        cfg.credentials.config_token = Some("plain-config".into());

        let env: HashMap<&str, &str> = HashMap::from([("MANDELBOX_ACCESS_TOKEN", "env-access")]);
        let keyring: HashMap<&str, &str> =
            HashMap::from([("access-token", "ring-access"), ("refresh-token", "ring-refresh")]);

        let request = resolve_with(
            &cfg,
            None,
            |k| env.get(k).map(ToString::to_string),
            |k| keyring.get(k).map(ToString::to_string),
        );

        assert_eq!(request.user_email.as_deref(), Some("user@example.com"));
        assert_eq!(request.access_token.unwrap().expose_secret(), "env-access");
        assert_eq!(request.refresh_token.unwrap().expose_secret(), "ring-refresh");
        match request.config_token {
            Some(StoredConfigToken::Plain(token)) => {
                assert_eq!(token.expose_secret(), "plain-config");
            }
            other => panic!("expected plain config token, got {other:?}"),
        }
    }

    #[test]
    fn encrypted_config_token_needs_a_password() {
        let mut cfg = Config::default();
        cfg.credentials.encrypted_config_token = Some("bm9uY2U=".into());
        let none = |_: &str| None;

        let locked = resolve_with(&cfg, None, none, none);
        assert!(locked.config_token.is_none());
        assert!(locked.access_token.is_none());

        let unlocked = resolve_with(&cfg, Some(SecretString::from("hunter2")), none, none);
        assert!(matches!(
            unlocked.config_token,
            Some(StoredConfigToken::Encrypted { ref ciphertext, .. }) if ciphertext == "bm9uY2U="
        ));
    }

    #[test]
    fn empty_values_count_as_missing() {
        let mut cfg = Config::default();
        cfg.credentials.access_token = Some(String::new());
        let request = resolve_with(&cfg, None, |_| None, |_| None);
        assert!(request.access_token.is_none());
    }
}
