// Host spin-up: poll the host service until it reports connection details,
// then push the config token to it.
//
// The poll ticks at a fixed interval and stops at the first success or
// failure. A wall-clock deadline races the whole poll so a host that stays
// pending forever still ends in a failure. The config push is a single
// request classified by status.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout_at};
use tracing::debug;

use mandelbox_api::{ApiResponse, HostConfigRequest, HostConfigResponse, HostServiceInfo};

use crate::config::PollPolicy;
use crate::flow::{Flow, FlowStream, FlowStreamExt, Fork, Outcome};
use crate::model::{
    HostFailure, HostInfo, HostSpinUpResult, ImportPayload, MandelboxAssignment, MandelboxPorts,
};
use crate::providers::HostProvider;

/// Input of the host spin-up flow.
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub user_email: String,
    pub access_token: SecretString,
    pub config_token: SecretString,
    pub is_new_config_token: bool,
    pub assignment: MandelboxAssignment,
    pub import: ImportPayload,
}

/// Pending payload: how many status requests have been answered so far.
pub type PollCount = u32;

fn info_valid(resp: &ApiResponse<HostServiceInfo>) -> bool {
    resp.is_ok()
        && resp.json.as_ref().is_some_and(|info| {
            info.ip.as_deref().is_some_and(|ip| !ip.is_empty())
                && info.port.is_some()
                && info
                    .client_app_auth_secret
                    .as_ref()
                    .is_some_and(|secret| !secret.expose_secret().is_empty())
        })
}

fn info_pending(resp: &ApiResponse<HostServiceInfo>) -> bool {
    resp.is_ok()
}

/// Poll the host service for `HostInfo`.
pub fn host_info_flow(
    provider: Arc<dyn HostProvider>,
    policy: PollPolicy,
) -> Flow<HostRequest, HostInfo, HostFailure, PollCount> {
    Flow::new("hostInfo", move |input| {
        let provider = Arc::clone(&provider);
        input
            .flat_map(move |request: HostRequest| poll(Arc::clone(&provider), policy, request))
            .boxed()
    })
}

fn poll(
    provider: Arc<dyn HostProvider>,
    policy: PollPolicy,
    request: HostRequest,
) -> FlowStream<HostInfo, HostFailure, PollCount> {
    async_stream::stream! {
        let fork = Fork::new(info_valid).with_pending(info_pending);
        let deadline = Instant::now() + policy.timeout;
        let mut ticks = interval_at(Instant::now() + policy.interval, policy.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: PollCount = 0;

        loop {
            if timeout_at(deadline, ticks.tick()).await.is_err() {
                yield Outcome::Failure(HostFailure::Timeout { after: policy.timeout });
                break;
            }
            let resp = match timeout_at(
                deadline,
                provider.host_info(&request.access_token, &request.user_email),
            )
            .await
            {
                Err(_) => {
                    yield Outcome::Failure(HostFailure::Timeout { after: policy.timeout });
                    break;
                }
                Ok(Err(e)) => {
                    yield Outcome::Failure(HostFailure::Network { reason: e.to_string() });
                    break;
                }
                Ok(Ok(resp)) => resp,
            };
            polls += 1;

            match fork.classify(resp) {
                Outcome::Pending(_) => {
                    debug!(polls, "host not ready yet");
                    yield Outcome::Pending(polls);
                }
                Outcome::Success(resp) => {
                    match resp.json.and_then(host_info) {
                        Some(info) => yield Outcome::Success(info),
                        None => yield Outcome::Failure(HostFailure::MalformedDescriptor),
                    }
                    break;
                }
                Outcome::Failure(resp) => {
                    yield Outcome::Failure(HostFailure::InfoRejected { status: resp.status });
                    break;
                }
            }
        }
    }
    .boxed()
}

fn host_info(info: HostServiceInfo) -> Option<HostInfo> {
    Some(HostInfo {
        ip: info.ip?,
        port: info.port?,
        client_app_auth_secret: info.client_app_auth_secret?,
    })
}

/// Push the config token to a ready host.
pub fn host_config_flow(
    provider: Arc<dyn HostProvider>,
    host_service_port: u16,
) -> Flow<(HostRequest, HostInfo), HostSpinUpResult, HostFailure> {
    Flow::from_fn("hostConfig", move |(request, info): (HostRequest, HostInfo)| {
        let provider = Arc::clone(&provider);
        async move {
            let body = HostConfigRequest {
                sub: request.user_email,
                client_app_auth_secret: info.client_app_auth_secret,
                host_port: info.port,
                config_encryption_token: request.config_token,
                jwt_access_token: request.access_token,
                mandelbox_id: request.assignment.mandelbox_id,
                is_new_config_encryption_token: request.is_new_config_token,
                json_data: request.import.json_data,
                cookies: request.import.cookies,
                bookmarks: request.import.bookmarks,
            };
            match provider.push_config(&info.ip, host_service_port, &body).await {
                Ok(resp) => {
                    let mandelbox_ip = request.assignment.ip.unwrap_or(info.ip);
                    route_config(resp, mandelbox_ip)
                }
                Err(e) => Outcome::Failure(HostFailure::Network {
                    reason: e.to_string(),
                }),
            }
        }
    })
}

fn route_config(
    resp: ApiResponse<HostConfigResponse>,
    mandelbox_ip: String,
) -> Outcome<HostSpinUpResult, HostFailure> {
    match Fork::new(ApiResponse::is_ok).classify(resp) {
        Outcome::Success(resp) => resp
            .json
            .and_then(|body| body.result)
            .and_then(|result| {
                Some(HostSpinUpResult {
                    mandelbox_ip,
                    mandelbox_secret: result.aes_key?,
                    mandelbox_ports: MandelboxPorts {
                        port_32262: result.port_32262?,
                        port_32263: result.port_32263?,
                        port_32273: result.port_32273?,
                    },
                })
            })
            .map_or(
                Outcome::Failure(HostFailure::MalformedDescriptor),
                Outcome::Success,
            ),
        Outcome::Pending(resp) | Outcome::Failure(resp) => {
            Outcome::Failure(HostFailure::ConfigRejected {
                status: resp.status,
            })
        }
    }
}

/// Poll for the host, then configure it.
pub fn host_spin_up_flow(
    provider: Arc<dyn HostProvider>,
    policy: PollPolicy,
    host_service_port: u16,
) -> Flow<HostRequest, HostSpinUpResult, HostFailure, PollCount> {
    let info = host_info_flow(Arc::clone(&provider), policy);
    let config = host_config_flow(provider, host_service_port);
    Flow::new("hostSpinUp", move |input| {
        let info = info.clone();
        let config = config.clone();
        input
            .flat_map(move |request: HostRequest| {
                let polled = info.run_once(request.clone()).until_terminal();
                let config = config.clone();
                polled
                    .flat_map(move |outcome| match outcome {
                        Outcome::Success(found) => config
                            .run_once((request.clone(), found))
                            .map(Outcome::with_pending)
                            .boxed(),
                        Outcome::Pending(polls) => {
                            stream::iter([Outcome::Pending(polls)]).boxed()
                        }
                        Outcome::Failure(failure) => {
                            stream::iter([Outcome::Failure(failure)]).boxed()
                        }
                    })
                    .boxed()
            })
            .boxed()
    })
}
