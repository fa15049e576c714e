//! `mandelbox auth-url` and `mandelbox login`.

use std::sync::Arc;

use futures_util::StreamExt;
use secrecy::ExposeSecret;
use url::Url;

use mandelbox_api::AuthClient;
use mandelbox_config::{self as config, Config};
use mandelbox_core::flows::auth::login_flow;
use mandelbox_core::token::redact_email;
use mandelbox_core::{AuthRequest, Outcome};

use crate::cli::{GlobalOpts, LoginArgs};
use crate::error::CliError;
use crate::output;

fn auth_client(cfg: &Config) -> Result<AuthClient, CliError> {
    let launcher = config::to_launcher_config(cfg)?;
    Ok(AuthClient::new(launcher.oauth, &launcher.transport)?)
}

pub fn auth_url(global: &GlobalOpts) -> Result<(), CliError> {
    let (cfg, _) = super::load(global)?;
    let url = auth_client(&cfg)?.authorize_url()?;
    println!("{url}");
    Ok(())
}

pub async fn login(args: LoginArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (mut cfg, path) = super::load(global)?;
    let callback: Url = args
        .callback_url
        .parse()
        .map_err(|_| CliError::Validation {
            field: "callback-url".into(),
            reason: format!("invalid URL: {}", args.callback_url),
        })?;

    let bar = output::spinner(global.quiet);
    bar.set_message("Exchanging login code");
    let provider = Arc::new(auth_client(&cfg)?);
    let outcome = login_flow(provider)
        .run_once(callback)
        .filter(|outcome| std::future::ready(outcome.is_terminal()))
        .next()
        .await;
    bar.finish_and_clear();

    let request = match outcome {
        Some(Outcome::Success(request)) => request,
        Some(Outcome::Failure(failure)) => {
            return Err(CliError::LoginFailed {
                reason: failure.message,
            });
        }
        Some(Outcome::Pending(never)) => match never {},
        None => {
            return Err(CliError::LoginFailed {
                reason: "no response from the identity provider".into(),
            });
        }
    };

    persist_login(&mut cfg, &request);
    config::save_config_to(&path, &cfg)?;

    if !global.quiet {
        let email = request.user_email.as_deref().map_or_else(|| "***".into(), redact_email);
        eprintln!("Signed in as {email}");
    }
    Ok(())
}

/// Cache the tokens in the keyring, or in the config file when no keyring
/// is available.
fn persist_login(cfg: &mut Config, request: &AuthRequest) {
    cfg.credentials.user_email.clone_from(&request.user_email);
    if let Err(e) = config::store_login(request) {
        tracing::warn!(error = %e, "keyring unavailable, caching tokens in the config file");
        cfg.credentials.access_token = request
            .access_token
            .as_ref()
            .map(|t| t.expose_secret().to_owned());
        cfg.credentials.refresh_token = request
            .refresh_token
            .as_ref()
            .map(|t| t.expose_secret().to_owned());
        return;
    }
    // Superseded by the keyring.
    cfg.credentials.access_token = None;
    cfg.credentials.refresh_token = None;
}
