// ── Runtime launcher configuration ──
//
// These types describe where the control plane lives and how patiently to
// talk to it. They never touch disk: the binary builds a `LauncherConfig`
// from its config file and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use mandelbox_api::{DEFAULT_HOST_SERVICE_PORT, OAuthSettings, Region, TransportConfig};

use crate::model::ImportPayload;

/// Commit hash reported by builds that carry none.
pub const LOCAL_COMMIT_HASH: &str = "local_dev";

/// Region discovery policy.
#[derive(Debug, Clone)]
pub struct RegionPolicy {
    /// Regions the user may be placed in.
    pub allowed: Vec<Region>,
    /// Skip probing and always ask for this region.
    pub pinned: Option<Region>,
    /// Probing rounds before giving up on an empty result.
    pub attempts: u32,
    /// Pause between probing rounds.
    pub retry_delay: Duration,
}

impl Default for RegionPolicy {
    fn default() -> Self {
        Self {
            allowed: Region::DEFAULT_ALLOWED.to_vec(),
            pinned: None,
            attempts: 20,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Host readiness polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Wall-clock bound on the whole poll, independent of tick count.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(180),
        }
    }
}

/// How to run the local streaming protocol.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub path: PathBuf,
    /// Passed as `--environment`.
    pub environment: String,
    pub extra_args: Vec<String>,
    /// Directory for the daily-rotated `protocol.log`. `None` disables it.
    pub log_dir: Option<PathBuf>,
    /// Echo raw protocol output on this process's stdout.
    pub mirror_stdout: bool,
    /// Relaunches allowed after unexpected exits.
    pub max_crash_retries: u32,
    /// Uptime after connecting that clears the crash count.
    pub healthy_run: Duration,
    /// How long a graceful shutdown may take before the process is killed.
    pub shutdown_grace: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("WhistClient"),
            environment: "local".into(),
            extra_args: Vec::new(),
            log_dir: None,
            mirror_stdout: false,
            max_crash_retries: 3,
            healthy_run: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Everything the launcher needs to know.
///
/// Built by the binary, passed to `Launcher`; core never reads config files.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub webserver_url: Url,
    pub oauth: OAuthSettings,
    pub transport: TransportConfig,
    /// Port the host service listens on for the config push.
    pub host_service_port: u16,
    pub regions: RegionPolicy,
    pub poll: PollPolicy,
    pub protocol: ProtocolConfig,
    pub client_commit_hash: String,
    /// Identifies this process run to the webserver.
    pub session_id: i64,
    /// Browser data pushed to the host along with the config token.
    pub import: ImportPayload,
}

impl LauncherConfig {
    /// A config with default tunables for the given endpoints. The session
    /// id is the current time in milliseconds.
    pub fn new(webserver_url: Url, oauth: OAuthSettings) -> Self {
        Self {
            webserver_url,
            oauth,
            transport: TransportConfig::default(),
            host_service_port: DEFAULT_HOST_SERVICE_PORT,
            regions: RegionPolicy::default(),
            poll: PollPolicy::default(),
            protocol: ProtocolConfig::default(),
            client_commit_hash: LOCAL_COMMIT_HASH.into(),
            session_id: chrono::Utc::now().timestamp_millis(),
            import: ImportPayload::default(),
        }
    }
}
