// ── JWT inspection ──
//
// Access and id tokens are decoded locally without signature verification:
// the client only reads claims the webserver re-validates anyway. Any
// decoding problem is turned into a value (`None`, `true`, or an
// `AuthFailure`) at this boundary and never propagates as a panic.

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use mandelbox_api::{ApiResponse, TokenResponse};

use crate::error::CoreError;
use crate::model::{AuthFailure, AuthFailureKind, SubscriptionStatus};

/// Custom claim carrying the billing state.
pub const SUBSCRIPTION_CLAIM: &str = "https://api.fractal.co/subscription_status";

/// Tokens this close to expiry are treated as already expired.
pub const EXPIRY_BUFFER_SECS: i64 = 10;

fn insecure_validation() -> Validation {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Decode the claim set of a JWT without verifying its signature.
pub fn decode_claims(token: &str) -> Result<Map<String, Value>, CoreError> {
    decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &insecure_validation())
        .map(|data| data.claims)
        .map_err(|e| CoreError::InvalidToken {
            message: e.to_string(),
        })
}

/// The `exp` claim in seconds since the epoch.
pub fn expiry(token: &SecretString) -> Result<i64, CoreError> {
    let claims = decode_claims(token.expose_secret())?;
    claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| CoreError::InvalidToken {
            message: "token has no numeric exp claim".into(),
        })
}

/// A token is expired once `now + 10s >= exp`. Undecodable tokens count
/// as expired so they get refreshed rather than sent.
pub fn is_token_expired(token: &SecretString, now: DateTime<Utc>) -> bool {
    match expiry(token) {
        Ok(exp) => now.timestamp() + EXPIRY_BUFFER_SECS >= exp,
        Err(e) => {
            warn!(error = %e, "failed to decode access token");
            true
        }
    }
}

/// Subscription status embedded in an access token, if any.
pub fn subscription_status(access_token: &SecretString) -> Option<SubscriptionStatus> {
    let claims = decode_claims(access_token.expose_secret()).ok()?;
    let status = claims.get(SUBSCRIPTION_CLAIM)?.clone();
    serde_json::from_value(status).ok()
}

/// Claims pulled out of a successful token response.
#[derive(Debug, Clone)]
pub struct ParsedTokens {
    pub user_email: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub subscription_status: Option<SubscriptionStatus>,
}

/// Turn an `/oauth/token` response into usable credentials.
///
/// `fallback_email` is used when the response carries no id token, which
/// happens on some refresh grants.
pub fn parse_token_response(
    resp: &ApiResponse<TokenResponse>,
    fallback_email: Option<&str>,
) -> Result<ParsedTokens, AuthFailure> {
    let tokens = resp.json.as_ref();
    let Some(access_token) = tokens.and_then(|t| t.access_token.clone()) else {
        let failure = if resp.is_ok() {
            AuthFailure::new(
                AuthFailureKind::MalformedToken,
                "response does not have an access token",
            )
        } else {
            AuthFailure::new(AuthFailureKind::Rejected, "token request was rejected")
        };
        return Err(failure.with_status(resp.status));
    };

    let access_claims = decode_claims(access_token.expose_secret()).map_err(|e| {
        AuthFailure::new(
            AuthFailureKind::MalformedToken,
            format!("error while decoding access token: {e}"),
        )
    })?;

    let user_email = match tokens.and_then(|t| t.id_token.as_ref()) {
        Some(id_token) => {
            let id_claims = decode_claims(id_token.expose_secret()).map_err(|e| {
                AuthFailure::new(
                    AuthFailureKind::MalformedToken,
                    format!("error while decoding id token: {e}"),
                )
            })?;
            id_claims
                .get("email")
                .and_then(Value::as_str)
                .map(str::to_owned)
        }
        None => fallback_email.map(str::to_owned),
    };
    let Some(user_email) = user_email else {
        return Err(AuthFailure::new(
            AuthFailureKind::MalformedToken,
            "decoded id token does not have an email",
        ));
    };

    let subscription_status = access_claims
        .get(SUBSCRIPTION_CLAIM)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());
    debug!(?subscription_status, "parsed token response");

    Ok(ParsedTokens {
        user_email,
        access_token,
        refresh_token: tokens.and_then(|t| t.refresh_token.clone()),
        subscription_status,
    })
}

/// Mask the local part of an email for logs: `jo***@example.com`.
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let visible: String = local.chars().take(2).collect();
            format!("{visible}***@{domain}")
        }
        None => "***".into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    use super::*;

    pub(crate) fn mint(claims: &Value) -> SecretString {
        let token = encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(b"test-only"),
        )
        .unwrap();
        SecretString::from(token)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let token = mint(&json!({ "exp": 1_000 }));
        assert!(is_token_expired(&token, at(990)), "now + 10 == exp is expired");
        assert!(!is_token_expired(&token, at(989)), "now + 10 == exp - 1 is valid");
        assert!(is_token_expired(&token, at(2_000)));
    }

    #[test]
    fn undecodable_tokens_count_as_expired() {
        let garbage = SecretString::from("not.a.jwt".to_string());
        assert!(is_token_expired(&garbage, at(0)));

        let no_exp = mint(&json!({ "sub": "abc" }));
        assert!(is_token_expired(&no_exp, at(0)));
    }

    #[test]
    fn subscription_claim_is_read_from_access_token() {
        let token = mint(&json!({ "exp": 1, SUBSCRIPTION_CLAIM: "trialing" }));
        assert_eq!(
            subscription_status(&token),
            Some(SubscriptionStatus::Trialing)
        );

        let without = mint(&json!({ "exp": 1 }));
        assert_eq!(subscription_status(&without), None);
    }

    #[test]
    fn parse_token_response_reads_email_from_id_token() {
        let resp = ApiResponse::new(
            200,
            Some(TokenResponse {
                access_token: Some(mint(&json!({ "exp": 5, SUBSCRIPTION_CLAIM: "active" }))),
                id_token: Some(mint(&json!({ "email": "user@example.com" }))),
                refresh_token: Some(SecretString::from("r1".to_string())),
                expires_in: None,
            }),
        );

        let parsed = parse_token_response(&resp, None).unwrap();
        assert_eq!(parsed.user_email, "user@example.com");
        assert_eq!(parsed.subscription_status, Some(SubscriptionStatus::Active));
        assert_eq!(parsed.refresh_token.unwrap().expose_secret(), "r1");
    }

    #[test]
    fn parse_token_response_returns_sentinels_instead_of_panicking() {
        let rejected: ApiResponse<TokenResponse> = ApiResponse::new(403, None);
        let failure = parse_token_response(&rejected, None).unwrap_err();
        assert_eq!(failure.kind, AuthFailureKind::Rejected);
        assert_eq!(failure.status, Some(403));

        let malformed = ApiResponse::new(
            200,
            Some(TokenResponse {
                access_token: Some(SecretString::from("garbage".to_string())),
                ..TokenResponse::default()
            }),
        );
        let failure = parse_token_response(&malformed, None).unwrap_err();
        assert_eq!(failure.kind, AuthFailureKind::MalformedToken);

        let no_email = ApiResponse::new(
            200,
            Some(TokenResponse {
                access_token: Some(mint(&json!({ "exp": 5 }))),
                id_token: Some(mint(&json!({ "sub": "x" }))),
                ..TokenResponse::default()
            }),
        );
        let failure = parse_token_response(&no_email, None).unwrap_err();
        assert!(failure.message.contains("email"));
    }

    #[test]
    fn missing_id_token_falls_back_to_known_email() {
        let resp = ApiResponse::new(
            200,
            Some(TokenResponse {
                access_token: Some(mint(&json!({ "exp": 5 }))),
                ..TokenResponse::default()
            }),
        );
        let parsed = parse_token_response(&resp, Some("known@example.com")).unwrap();
        assert_eq!(parsed.user_email, "known@example.com");
        assert!(parsed.refresh_token.is_none());
    }

    #[test]
    fn redact_email_keeps_domain() {
        assert_eq!(redact_email("jonathan@example.com"), "jo***@example.com");
        assert_eq!(redact_email("nobody"), "***");
    }
}
