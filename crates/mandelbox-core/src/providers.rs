// ── Remote collaborators ──
//
// The flows talk to the outside world only through these traits, so the
// pipeline can run against the real HTTP clients or against in-memory
// fakes. Transport errors come back as `CoreError`; non-2xx statuses are
// ordinary responses for the flow's classifier to route.

use async_trait::async_trait;
use secrecy::SecretString;
use url::Url;

use mandelbox_api::{
    ApiResponse, AssignRequest, AssignResponse, AuthClient, HostConfigRequest,
    HostConfigResponse, HostServiceClient, HostServiceInfo, Region, RegionProber, TokenResponse,
    WebserverClient,
};

use crate::error::CoreError;

/// OAuth token endpoint.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn exchange_code(&self, callback: &Url)
    -> Result<ApiResponse<TokenResponse>, CoreError>;

    async fn refresh(
        &self,
        refresh_token: &SecretString,
    ) -> Result<ApiResponse<TokenResponse>, CoreError>;
}

/// Mandelbox assignment on the webserver.
#[async_trait]
pub trait MandelboxProvider: Send + Sync {
    async fn assign(
        &self,
        access_token: &SecretString,
        request: &AssignRequest,
    ) -> Result<ApiResponse<AssignResponse>, CoreError>;
}

/// Host-service discovery and configuration.
#[async_trait]
pub trait HostProvider: Send + Sync {
    async fn host_info(
        &self,
        access_token: &SecretString,
        username: &str,
    ) -> Result<ApiResponse<HostServiceInfo>, CoreError>;

    async fn push_config(
        &self,
        ip: &str,
        port: u16,
        request: &HostConfigRequest,
    ) -> Result<ApiResponse<HostConfigResponse>, CoreError>;
}

/// Candidate regions, nearest first. An empty list means nothing was
/// reachable this round.
#[async_trait]
pub trait RegionSource: Send + Sync {
    async fn sorted_regions(&self, allowed: &[Region]) -> Vec<Region>;
}

// ── HTTP-backed implementations ──────────────────────────────────

#[async_trait]
impl AuthProvider for AuthClient {
    async fn exchange_code(
        &self,
        callback: &Url,
    ) -> Result<ApiResponse<TokenResponse>, CoreError> {
        Ok(AuthClient::exchange_code(self, callback).await?)
    }

    async fn refresh(
        &self,
        refresh_token: &SecretString,
    ) -> Result<ApiResponse<TokenResponse>, CoreError> {
        Ok(AuthClient::refresh(self, refresh_token).await?)
    }
}

#[async_trait]
impl MandelboxProvider for WebserverClient {
    async fn assign(
        &self,
        access_token: &SecretString,
        request: &AssignRequest,
    ) -> Result<ApiResponse<AssignResponse>, CoreError> {
        Ok(self.assign_mandelbox(access_token, request).await?)
    }
}

#[async_trait]
impl RegionSource for RegionProber {
    async fn sorted_regions(&self, allowed: &[Region]) -> Vec<Region> {
        self.sort_by_proximity(allowed)
            .await
            .into_iter()
            .map(|ping| ping.region)
            .collect()
    }
}

/// A region list that never changes, for pinned regions and tests.
#[derive(Debug, Clone)]
pub struct FixedRegions(pub Vec<Region>);

#[async_trait]
impl RegionSource for FixedRegions {
    async fn sorted_regions(&self, allowed: &[Region]) -> Vec<Region> {
        self.0
            .iter()
            .filter(|region| allowed.is_empty() || allowed.contains(region))
            .copied()
            .collect()
    }
}

/// Host discovery goes through the webserver, the config push straight to
/// the host.
pub struct RemoteHost {
    webserver: WebserverClient,
    host: HostServiceClient,
}

impl RemoteHost {
    pub fn new(webserver: WebserverClient, host: HostServiceClient) -> Self {
        Self { webserver, host }
    }
}

#[async_trait]
impl HostProvider for RemoteHost {
    async fn host_info(
        &self,
        access_token: &SecretString,
        username: &str,
    ) -> Result<ApiResponse<HostServiceInfo>, CoreError> {
        Ok(self.webserver.host_service_info(access_token, username).await?)
    }

    async fn push_config(
        &self,
        ip: &str,
        port: u16,
        request: &HostConfigRequest,
    ) -> Result<ApiResponse<HostConfigResponse>, CoreError> {
        Ok(self
            .host
            .set_config_encryption_token(ip, port, request)
            .await?)
    }
}
