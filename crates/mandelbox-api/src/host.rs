// Host service client
//
// Talks directly to the host service running next to an assigned mandelbox.
// Host services terminate TLS with self-signed certificates, so the default
// constructor builds its client with certificate verification disabled.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::response::ApiResponse;
use crate::transport::TransportConfig;

/// Port the host service listens on when the webserver does not report one.
pub const DEFAULT_HOST_SERVICE_PORT: u16 = 4678;

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Body of `PUT /set_config_encryption_token`.
#[derive(Debug, Clone, Serialize)]
pub struct HostConfigRequest {
    /// User identity the mandelbox belongs to.
    pub sub: String,
    #[serde(serialize_with = "expose")]
    pub client_app_auth_secret: SecretString,
    pub host_port: u16,
    #[serde(serialize_with = "expose")]
    pub config_encryption_token: SecretString,
    #[serde(serialize_with = "expose")]
    pub jwt_access_token: SecretString,
    pub mandelbox_id: String,
    pub is_new_config_encryption_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmarks: Option<String>,
}

/// Connection details returned once the host has accepted the config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawHostConfigResult")]
pub struct HostConfigResult {
    pub port_32262: Option<u16>,
    pub port_32263: Option<u16>,
    pub port_32273: Option<u16>,
    pub aes_key: Option<SecretString>,
}

#[derive(Deserialize)]
struct RawHostConfigResult {
    #[serde(default)]
    port_32262: Option<u16>,
    #[serde(default)]
    port_32263: Option<u16>,
    #[serde(default)]
    port_32273: Option<u16>,
    #[serde(default)]
    aes_key: Option<String>,
}

impl From<RawHostConfigResult> for HostConfigResult {
    fn from(raw: RawHostConfigResult) -> Self {
        Self {
            port_32262: raw.port_32262,
            port_32263: raw.port_32263,
            port_32273: raw.port_32273,
            aes_key: raw.aes_key.map(SecretString::from),
        }
    }
}

/// Envelope of a host service response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfigResponse {
    #[serde(default)]
    pub result: Option<HostConfigResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// HTTP client for per-host services.
#[derive(Clone)]
pub struct HostServiceClient {
    http: reqwest::Client,
    scheme: &'static str,
}

impl HostServiceClient {
    /// Create a host client that accepts self-signed certificates.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.accepting_invalid_certs().build_client()?;
        Ok(Self {
            http,
            scheme: "https",
        })
    }

    /// Create a host client with a pre-built `reqwest::Client` over plain HTTP.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            scheme: "http",
        }
    }

    fn host_url(&self, ip: &str, port: u16, path: &str) -> Result<Url, Error> {
        Ok(Url::parse(&format!("{}://{ip}:{port}/{path}", self.scheme))?)
    }

    /// Push the config-encryption token and import payload to a host.
    pub async fn set_config_encryption_token(
        &self,
        ip: &str,
        port: u16,
        request: &HostConfigRequest,
    ) -> Result<ApiResponse<HostConfigResponse>, Error> {
        let url = self.host_url(ip, port, "set_config_encryption_token")?;
        debug!(mandelbox_id = %request.mandelbox_id, "PUT {}", url);

        let resp = self
            .http
            .put(url)
            .json(request)
            .send()
            .await
            .map_err(Error::Transport)?;

        ApiResponse::read(resp).await
    }
}
