//! `mandelbox launch`: run the whole pipeline until the protocol closes.

use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use futures_util::{StreamExt, stream};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use mandelbox_api::Region;
use mandelbox_config::{self as config, Config};
use mandelbox_core::crypto::encrypt_config_token;
use mandelbox_core::{
    AuthState, LaunchStage, Launcher, ProtocolManager, Providers, SignalBus, triggers,
};

use crate::cli::{GlobalOpts, LaunchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: LaunchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (mut cfg, path) = super::load(global)?;
    let mut launcher_cfg = config::to_launcher_config(&cfg)?;
    if let Some(name) = args.region.as_deref() {
        let region = Region::from_str(name).map_err(|_| CliError::Validation {
            field: "region".into(),
            reason: format!("unknown region '{name}'"),
        })?;
        launcher_cfg.regions.pinned = Some(region);
    }

    let password = read_password(&args)?;
    let request = config::resolve_credentials(&cfg, password.clone());
    if request.access_token.is_none() || request.refresh_token.is_none() {
        return Err(CliError::NoCredentials);
    }

    let bus = SignalBus::new();
    let protocol = ProtocolManager::spawn(&bus, launcher_cfg.protocol.clone())?;
    let providers = Providers::remote(&launcher_cfg)?;
    let launcher = Launcher::new(&bus, launcher_cfg, providers)?;

    let auth_info = bus.claim::<triggers::AuthInfo>()?;
    let quit = bus.claim::<triggers::QuitAction>()?;
    let open_url = bus.claim::<triggers::OpenUrl>()?;

    let mut windows = bus.subscribe_live::<triggers::ErrorWindow>();
    let mut closed = bus.subscribe_live::<triggers::ProtocolClosed>();
    let mut connection = bus.subscribe_live::<triggers::ProtocolConnection>();
    let mut unstable = bus.subscribe_live::<triggers::NetworkUnstable>();
    let mut signed_in = stream::select(
        bus.subscribe_live::<triggers::AuthFlowSuccess>(),
        bus.subscribe_live::<triggers::AuthRefreshSuccess>(),
    );
    let mut stage = launcher.watch_stage();

    let bar = output::spinner(global.quiet);
    auth_info.publish(request);
    launcher.start().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                info!("interrupted, closing the session");
                quit.publish(());
                break Ok(());
            }
            Some(window) = windows.next() => {
                break Err(CliError::window(window));
            }
            Some(event) = closed.next() => {
                if !event.crashed {
                    info!(exit_code = ?event.exit_code, "protocol closed");
                    break Ok(());
                }
                warn!(crash_count = event.crash_count, "protocol crashed");
            }
            Some(state) = signed_in.next() => {
                persist_tokens(&mut cfg, &path, &state, password.as_ref());
            }
            Some(connected) = connection.next() => {
                if connected {
                    bar.finish_with_message("Connected");
                    for url in &args.open_urls {
                        open_url.publish(url.clone());
                    }
                } else {
                    debug!("protocol disconnected");
                }
            }
            Some(flag) = unstable.next() => {
                if flag {
                    warn!("network looks unstable");
                } else {
                    info!("network recovered");
                }
            }
            Ok(()) = stage.changed() => {
                let current = stage.borrow_and_update().clone();
                if !bar.is_finished() {
                    bar.set_message(output::stage_message(&current));
                }
                if current == LaunchStage::Stopped {
                    break Ok(());
                }
            }
            else => break Ok(()),
        }
    };

    bar.finish_and_clear();
    protocol.shutdown().await;
    launcher.shutdown().await;
    result
}

/// The account password, when the user offered one.
fn read_password(args: &LaunchArgs) -> Result<Option<SecretString>, CliError> {
    if args.password_stdin {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let password = line.trim_end_matches(['\r', '\n']);
        if password.is_empty() {
            return Err(CliError::Validation {
                field: "password-stdin".into(),
                reason: "stdin did not contain a password".into(),
            });
        }
        return Ok(Some(SecretString::from(password.to_owned())));
    }
    if args.ask_password {
        let password = rpassword::prompt_password("Password: ")?;
        return Ok(Some(SecretString::from(password)));
    }
    Ok(None)
}

/// Keep the freshest tokens for the next run. Failures only warn: the
/// session itself is unaffected.
fn persist_tokens(
    cfg: &mut Config,
    path: &Path,
    state: &AuthState,
    password: Option<&SecretString>,
) {
    let mut changed = false;

    if let Err(e) = config::store_tokens(state) {
        warn!(error = %e, "keyring unavailable, caching tokens in the config file");
        let creds = &mut cfg.credentials;
        creds.access_token = Some(state.access_token.expose_secret().to_owned());
        creds.refresh_token = Some(state.refresh_token.expose_secret().to_owned());
        creds.config_token = Some(state.config_token.expose_secret().to_owned());
        changed = true;
    }

    if cfg.credentials.user_email.as_deref() != Some(state.user_email.as_str()) {
        cfg.credentials.user_email = Some(state.user_email.clone());
        changed = true;
    }

    if state.is_new_config_token {
        if let Some(password) = password {
            match encrypt_config_token(&state.config_token, password) {
                Ok(sealed) => {
                    cfg.credentials.encrypted_config_token = Some(sealed);
                    changed = true;
                }
                Err(e) => warn!(error = %e, "could not seal the new config token"),
            }
        }
    }

    if changed {
        if let Err(e) = config::save_config_to(path, cfg) {
            warn!(error = %e, path = %path.display(), "could not save config");
        }
    }
}
