// Webserver HTTP client
//
// Bearer-authenticated calls against the control-plane webserver: mandelbox
// assignment and host-service discovery. Responses are returned as-is with
// their status so the caller's classifier sees every outcome.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::response::ApiResponse;
use crate::transport::TransportConfig;

/// Body of `POST /mandelbox/assign`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AssignRequest {
    /// Candidate regions, nearest first.
    pub regions: Vec<String>,
    pub client_commit_hash: String,
    pub session_id: i64,
    pub user_email: String,
}

/// Body of a mandelbox assignment response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AssignResponse {
    #[serde(default, alias = "ID")]
    pub mandelbox_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Scheduler rejection code, e.g. `NO_INSTANCE_AVAILABLE`.
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `GET /host_service`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawHostServiceInfo")]
pub struct HostServiceInfo {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub client_app_auth_secret: Option<SecretString>,
}

#[derive(Deserialize)]
struct RawHostServiceInfo {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    client_app_auth_secret: Option<String>,
}

impl From<RawHostServiceInfo> for HostServiceInfo {
    fn from(raw: RawHostServiceInfo) -> Self {
        Self {
            ip: raw.ip,
            port: raw.port,
            client_app_auth_secret: raw.client_app_auth_secret.map(SecretString::from),
        }
    }
}

/// HTTP client for the mandelbox webserver.
#[derive(Clone)]
pub struct WebserverClient {
    http: reqwest::Client,
    base_url: Url,
}

impl WebserverClient {
    /// Create a new webserver client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a webserver client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Ask the webserver to assign a mandelbox in one of `request.regions`.
    pub async fn assign_mandelbox(
        &self,
        access_token: &SecretString,
        request: &AssignRequest,
    ) -> Result<ApiResponse<AssignResponse>, Error> {
        let url = self.base_url.join("mandelbox/assign")?;
        debug!(regions = ?request.regions, "POST {}", url);

        let resp = self
            .http
            .post(url)
            .bearer_auth(access_token.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(Error::Transport)?;

        ApiResponse::read(resp).await
    }

    /// Look up the host service assigned to `username`.
    pub async fn host_service_info(
        &self,
        access_token: &SecretString,
        username: &str,
    ) -> Result<ApiResponse<HostServiceInfo>, Error> {
        let mut url = self.base_url.join("host_service")?;
        url.query_pairs_mut().append_pair("username", username);
        debug!("GET {}", url.path());

        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        ApiResponse::read(resp).await
    }
}
