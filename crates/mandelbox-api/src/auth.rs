// OAuth client for the identity provider.
//
// Handles the authorization-code exchange that follows a browser login and
// refresh-token grants. Token strings are wrapped in `SecretString` as soon
// as they leave the wire so they never show up in `Debug` output or logs.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::response::ApiResponse;
use crate::transport::TransportConfig;

const SCOPES: &str = "openid profile offline_access email admin";

/// Static settings describing the OAuth application.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    /// Identity provider root, e.g. `https://auth.example.com`.
    pub base_url: Url,
    pub client_id: String,
    /// Redirect target registered with the provider.
    pub callback_url: Url,
    /// API audience the access token is issued for.
    pub audience: String,
}

/// Tokens returned by `/oauth/token`. Every field is optional on the wire.
#[derive(Debug, Clone, Default)]
pub struct TokenResponse {
    pub access_token: Option<SecretString>,
    pub id_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl From<RawTokenResponse> for TokenResponse {
    fn from(raw: RawTokenResponse) -> Self {
        Self {
            access_token: raw.access_token.map(SecretString::from),
            id_token: raw.id_token.map(SecretString::from),
            refresh_token: raw.refresh_token.map(SecretString::from),
            expires_in: raw.expires_in,
        }
    }
}

/// HTTP client for the identity provider's token endpoint.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    settings: OAuthSettings,
}

impl AuthClient {
    /// Create a new auth client from a `TransportConfig`.
    pub fn new(settings: OAuthSettings, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, settings })
    }

    /// Create an auth client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, settings: OAuthSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// The browser URL that starts an interactive login.
    pub fn authorize_url(&self) -> Result<Url, Error> {
        let mut url = self.settings.base_url.join("authorize")?;
        url.query_pairs_mut()
            .append_pair("audience", &self.settings.audience)
            .append_pair("scope", SCOPES)
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", self.settings.callback_url.as_str());
        Ok(url)
    }

    /// Exchange the `code` carried by a login callback URL for tokens.
    ///
    /// A callback without a `code` parameter is still sent; the provider's
    /// rejection comes back as a non-200 response.
    pub async fn exchange_code(
        &self,
        callback: &Url,
    ) -> Result<ApiResponse<TokenResponse>, Error> {
        let code = callback
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned());

        let body = json!({
            "grant_type": "authorization_code",
            "client_id": self.settings.client_id,
            "code": code,
            "redirect_uri": self.settings.callback_url.as_str(),
        });
        self.token_request(&body).await
    }

    /// Trade a refresh token for a fresh access token.
    pub async fn refresh(
        &self,
        refresh_token: &SecretString,
    ) -> Result<ApiResponse<TokenResponse>, Error> {
        let body = json!({
            "grant_type": "refresh_token",
            "client_id": self.settings.client_id,
            "refresh_token": refresh_token.expose_secret(),
        });
        self.token_request(&body).await
    }

    async fn token_request(
        &self,
        body: &serde_json::Value,
    ) -> Result<ApiResponse<TokenResponse>, Error> {
        let url = self.settings.base_url.join("oauth/token")?;
        debug!(grant = %body["grant_type"], "POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        Ok(ApiResponse::<RawTokenResponse>::read(resp)
            .await?
            .map(TokenResponse::from))
    }
}
