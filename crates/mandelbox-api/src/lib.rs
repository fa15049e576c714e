// mandelbox-api: Async Rust clients for the mandelbox control plane
// (webserver, OAuth provider, host service, region probing)

pub mod auth;
pub mod error;
pub mod host;
pub mod region;
pub mod response;
pub mod transport;
pub mod webserver;

pub use auth::{AuthClient, OAuthSettings, TokenResponse};
pub use error::Error;
pub use host::{
    DEFAULT_HOST_SERVICE_PORT, HostConfigRequest, HostConfigResponse, HostConfigResult,
    HostServiceClient,
};
pub use region::{Region, RegionPing, RegionProber};
pub use response::ApiResponse;
pub use transport::{TlsMode, TransportConfig};
pub use webserver::{AssignRequest, AssignResponse, HostServiceInfo, WebserverClient};
