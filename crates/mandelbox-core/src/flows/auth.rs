// Auth, refresh and login flows.
//
// Access tokens are checked locally; only an expired one costs a round
// trip to the token endpoint. The config token is resolved alongside and
// never regenerated once it exists.

use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::crypto::resolve_config_token;
use crate::flow::{Flow, FlowStreamExt, Outcome};
use crate::model::{AuthFailure, AuthFailureKind, AuthRequest, AuthState, StoredConfigToken};
use crate::providers::AuthProvider;
use crate::token::{self, decode_claims, parse_token_response, redact_email};

/// Trade the refresh token of `state` for fresh credentials.
///
/// The refresh token in the response replaces the old one when present;
/// otherwise the old one is kept. Email and config token carry over.
pub fn auth_refresh_flow(provider: Arc<dyn AuthProvider>) -> Flow<AuthState, AuthState, AuthFailure> {
    Flow::from_fn("authRefresh", move |state: AuthState| {
        let provider = Arc::clone(&provider);
        async move {
            let resp = match provider.refresh(&state.refresh_token).await {
                Ok(resp) => resp,
                Err(e) => return Outcome::Failure(network_failure(&e)),
            };
            match parse_token_response(&resp, Some(&state.user_email)) {
                Ok(parsed) => Outcome::Success(AuthState {
                    user_email: parsed.user_email,
                    access_token: parsed.access_token,
                    refresh_token: parsed.refresh_token.unwrap_or(state.refresh_token),
                    subscription_status: parsed.subscription_status,
                    ..state
                }),
                Err(failure) => Outcome::Failure(failure),
            }
        }
    })
}

/// Validate stored credentials, refreshing them when expired.
pub fn auth_flow(provider: Arc<dyn AuthProvider>) -> Flow<AuthRequest, AuthState, AuthFailure> {
    let refresh = auth_refresh_flow(provider);
    Flow::new("auth", move |input| {
        let refresh = refresh.clone();
        input
            .flat_map(move |request: AuthRequest| match prepare(request) {
                Err(failure) => stream::iter([Outcome::Failure(failure)]).boxed(),
                Ok(state) if token::is_token_expired(&state.access_token, Utc::now()) => {
                    debug!(user = %redact_email(&state.user_email), "access token expired, refreshing");
                    refresh.run_once(state).until_terminal()
                }
                Ok(state) => stream::iter([Outcome::Success(state)]).boxed(),
            })
            .boxed()
    })
}

/// Exchange the code in a login callback URL for credentials.
pub fn login_flow(provider: Arc<dyn AuthProvider>) -> Flow<Url, AuthRequest, AuthFailure> {
    Flow::from_fn("login", move |callback: Url| {
        let provider = Arc::clone(&provider);
        async move {
            let resp = match provider.exchange_code(&callback).await {
                Ok(resp) => resp,
                Err(e) => return Outcome::Failure(network_failure(&e)),
            };
            let parsed = match parse_token_response(&resp, None) {
                Ok(parsed) => parsed,
                Err(failure) => return Outcome::Failure(failure),
            };
            let Some(refresh_token) = parsed.refresh_token else {
                return Outcome::Failure(
                    AuthFailure::new(
                        AuthFailureKind::MalformedToken,
                        "response does not have a refresh token",
                    )
                    .with_status(resp.status),
                );
            };
            Outcome::Success(AuthRequest {
                user_email: Some(parsed.user_email),
                access_token: Some(parsed.access_token),
                refresh_token: Some(refresh_token),
                config_token: None,
            })
        }
    })
}

/// The request for re-validating an already signed-in state.
pub fn request_from_state(state: &AuthState) -> AuthRequest {
    AuthRequest {
        user_email: Some(state.user_email.clone()),
        access_token: Some(state.access_token.clone()),
        refresh_token: Some(state.refresh_token.clone()),
        config_token: Some(StoredConfigToken::Plain(state.config_token.clone())),
    }
}

/// Check presence of credentials and resolve the email and config token.
fn prepare(request: AuthRequest) -> Result<AuthState, AuthFailure> {
    let (Some(access_token), Some(refresh_token)) = (request.access_token, request.refresh_token)
    else {
        return Err(AuthFailure::new(
            AuthFailureKind::MissingCredentials,
            "access and refresh token are both required",
        ));
    };

    let user_email = match request.user_email.filter(|email| !email.is_empty()) {
        Some(email) => email,
        None => email_claim(&access_token).ok_or_else(|| {
            AuthFailure::new(AuthFailureKind::MalformedToken, "no email for stored credentials")
        })?,
    };

    let (config_token, is_new_config_token) =
        resolve_config_token(request.config_token.as_ref())
            .map_err(|e| AuthFailure::new(AuthFailureKind::ConfigToken, e.to_string()))?;

    Ok(AuthState {
        user_email,
        subscription_status: token::subscription_status(&access_token),
        access_token,
        refresh_token,
        config_token,
        is_new_config_token,
    })
}

fn email_claim(access_token: &SecretString) -> Option<String> {
    decode_claims(access_token.expose_secret())
        .ok()?
        .get("email")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn network_failure(err: &crate::error::CoreError) -> AuthFailure {
    let kind = if err.is_connectivity() {
        AuthFailureKind::Network
    } else {
        AuthFailureKind::Rejected
    };
    AuthFailure::new(kind, err.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use mandelbox_api::{ApiResponse, TokenResponse};

    use super::*;
    use crate::crypto::encrypt_config_token;
    use crate::fakes::FakeAuth;
    use crate::model::SubscriptionStatus;
    use crate::token::SUBSCRIPTION_CLAIM;
    use crate::token::tests::mint;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn token_expiring_in(secs: i64) -> SecretString {
        mint(&json!({
            "exp": Utc::now().timestamp() + secs,
            SUBSCRIPTION_CLAIM: "active",
        }))
    }

    fn request(access_token: SecretString) -> AuthRequest {
        AuthRequest {
            user_email: Some("user@example.com".into()),
            access_token: Some(access_token),
            refresh_token: Some(secret("refresh-1")),
            config_token: Some(StoredConfigToken::Plain(secret("cfg"))),
        }
    }

    fn refreshed(refresh_token: Option<&str>) -> ApiResponse<TokenResponse> {
        ApiResponse::new(
            200,
            Some(TokenResponse {
                access_token: Some(token_expiring_in(3600)),
                id_token: None,
                refresh_token: refresh_token.map(secret),
                expires_in: Some(3600),
            }),
        )
    }

    async fn run(flow: &Flow<AuthRequest, AuthState, AuthFailure>, req: AuthRequest) -> Vec<Outcome<AuthState, AuthFailure>> {
        flow.run_once(req).collect().await
    }

    #[tokio::test]
    async fn valid_token_passes_through_without_a_refresh() {
        let auth = FakeAuth::new(vec![]);
        let flow = auth_flow(auth.clone());

        let outcomes = run(&flow, request(token_expiring_in(3600))).await;
        assert_eq!(outcomes.len(), 1);
        let state = outcomes.into_iter().next().unwrap().success().unwrap();
        assert_eq!(state.user_email, "user@example.com");
        assert_eq!(state.refresh_token.expose_secret(), "refresh-1");
        assert_eq!(state.config_token.expose_secret(), "cfg");
        assert!(!state.is_new_config_token);
        assert_eq!(state.subscription_status, Some(SubscriptionStatus::Active));
        assert_eq!(auth.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_refresh_token_carried_forward() {
        let auth = FakeAuth::new(vec![refreshed(None)]);
        let flow = auth_flow(auth.clone());

        let outcomes = run(&flow, request(token_expiring_in(-1))).await;
        let state = outcomes.into_iter().next().unwrap().success().unwrap();
        assert_eq!(auth.refresh_calls(), 1);
        assert_eq!(auth.refreshed_with(), vec!["refresh-1".to_string()]);
        assert_eq!(state.refresh_token.expose_secret(), "refresh-1");
        assert_eq!(state.user_email, "user@example.com");
        assert!(!token::is_token_expired(&state.access_token, Utc::now()));
    }

    #[tokio::test]
    async fn rotated_refresh_token_replaces_the_old_one() {
        let auth = FakeAuth::new(vec![refreshed(Some("refresh-2"))]);
        let outcomes = run(&auth_flow(auth), request(token_expiring_in(5))).await;
        let state = outcomes.into_iter().next().unwrap().success().unwrap();
        assert_eq!(state.refresh_token.expose_secret(), "refresh-2");
    }

    #[tokio::test]
    async fn rejected_refresh_is_a_single_failure() {
        let auth = FakeAuth::new(vec![ApiResponse::new(403, None)]);
        let outcomes = run(&auth_flow(auth.clone()), request(token_expiring_in(-60))).await;

        assert_eq!(outcomes.len(), 1);
        let failure = outcomes.into_iter().next().unwrap().failure().unwrap();
        assert_eq!(failure.kind, AuthFailureKind::Rejected);
        assert_eq!(failure.status, Some(403));
        assert_eq!(auth.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn missing_tokens_fail_without_network() {
        let auth = FakeAuth::new(vec![]);
        let mut req = request(token_expiring_in(3600));
        req.refresh_token = None;

        let outcomes = run(&auth_flow(auth.clone()), req).await;
        let failure = outcomes.into_iter().next().unwrap().failure().unwrap();
        assert_eq!(failure.kind, AuthFailureKind::MissingCredentials);
        assert_eq!(auth.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn config_token_is_generated_only_when_absent() {
        let auth = FakeAuth::new(vec![]);
        let flow = auth_flow(auth);

        let mut fresh = request(token_expiring_in(3600));
        fresh.config_token = None;
        let state = run(&flow, fresh).await.remove(0).success().unwrap();
        assert!(state.is_new_config_token);
        assert!(!state.config_token.expose_secret().is_empty());

        let sealed = encrypt_config_token(&secret("existing"), &secret("pw")).unwrap();
        let mut stored = request(token_expiring_in(3600));
        stored.config_token = Some(StoredConfigToken::Encrypted {
            ciphertext: sealed,
            password: secret("pw"),
        });
        let state = run(&flow, stored).await.remove(0).success().unwrap();
        assert!(!state.is_new_config_token);
        assert_eq!(state.config_token.expose_secret(), "existing");
    }

    #[tokio::test]
    async fn wrong_password_is_a_config_token_failure() {
        let sealed = encrypt_config_token(&secret("existing"), &secret("pw")).unwrap();
        let mut req = request(token_expiring_in(3600));
        req.config_token = Some(StoredConfigToken::Encrypted {
            ciphertext: sealed,
            password: secret("nope"),
        });

        let failure = run(&auth_flow(FakeAuth::new(vec![])), req)
            .await
            .remove(0)
            .failure()
            .unwrap();
        assert_eq!(failure.kind, AuthFailureKind::ConfigToken);
        assert_eq!(failure.error_window(), crate::model::ErrorWindow::AuthError);
    }

    #[tokio::test]
    async fn email_falls_back_to_the_access_token_claim() {
        let access = mint(&json!({
            "exp": Utc::now().timestamp() + 3600,
            "email": "claimed@example.com",
        }));
        let mut req = request(access);
        req.user_email = None;

        let state = run(&auth_flow(FakeAuth::new(vec![])), req)
            .await
            .remove(0)
            .success()
            .unwrap();
        assert_eq!(state.user_email, "claimed@example.com");
    }

    #[tokio::test]
    async fn login_exchanges_the_callback_code() {
        let auth = FakeAuth::new(vec![ApiResponse::new(
            200,
            Some(TokenResponse {
                access_token: Some(token_expiring_in(3600)),
                id_token: Some(mint(&json!({ "email": "new@example.com" }))),
                refresh_token: Some(secret("refresh-9")),
                expires_in: None,
            }),
        )]);
        let callback = Url::parse("mandelbox://callback?code=abc").unwrap();

        let outcomes: Vec<_> = login_flow(auth.clone()).run_once(callback).collect().await;
        let req = outcomes.into_iter().next().unwrap().success().unwrap();
        assert_eq!(req.user_email.as_deref(), Some("new@example.com"));
        assert_eq!(req.refresh_token.unwrap().expose_secret(), "refresh-9");
        assert_eq!(auth.exchanged_codes(), vec!["abc".to_string()]);
    }
}
