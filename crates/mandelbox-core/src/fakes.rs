// In-memory providers for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use mandelbox_api::{
    ApiResponse, AssignRequest, AssignResponse, HostConfigRequest, HostConfigResponse,
    HostServiceInfo, Region, TokenResponse,
};

use crate::error::CoreError;
use crate::providers::{AuthProvider, HostProvider, MandelboxProvider, RegionSource};

/// Pops scripted responses; the last one repeats once the script runs dry.
struct Script<T> {
    queue: VecDeque<T>,
    last: Option<T>,
}

impl<T: Clone> Script<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            queue: items.into(),
            last: None,
        }
    }

    fn next(&mut self) -> Option<T> {
        if let Some(item) = self.queue.pop_front() {
            self.last = Some(item.clone());
            return Some(item);
        }
        self.last.clone()
    }
}

pub(crate) struct FakeAuth {
    responses: Mutex<Script<ApiResponse<TokenResponse>>>,
    refreshed_with: Mutex<Vec<String>>,
    codes: Mutex<Vec<String>>,
}

impl FakeAuth {
    pub(crate) fn new(responses: Vec<ApiResponse<TokenResponse>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(Script::new(responses)),
            refreshed_with: Mutex::new(Vec::new()),
            codes: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refreshed_with.lock().unwrap().len()
    }

    pub(crate) fn refreshed_with(&self) -> Vec<String> {
        self.refreshed_with.lock().unwrap().clone()
    }

    pub(crate) fn exchanged_codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }

    fn respond(&self) -> Result<ApiResponse<TokenResponse>, CoreError> {
        self.responses
            .lock()
            .unwrap()
            .next()
            .ok_or_else(|| CoreError::ConnectionFailed {
                url: "fake://auth".into(),
                reason: "no scripted response".into(),
            })
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn exchange_code(
        &self,
        callback: &Url,
    ) -> Result<ApiResponse<TokenResponse>, CoreError> {
        let code = callback
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        self.codes.lock().unwrap().push(code);
        self.respond()
    }

    async fn refresh(
        &self,
        refresh_token: &SecretString,
    ) -> Result<ApiResponse<TokenResponse>, CoreError> {
        self.refreshed_with
            .lock()
            .unwrap()
            .push(refresh_token.expose_secret().to_owned());
        self.respond()
    }
}

pub(crate) struct FakeWebserver {
    responses: Mutex<Script<ApiResponse<AssignResponse>>>,
    requests: Mutex<Vec<AssignRequest>>,
}

impl FakeWebserver {
    pub(crate) fn new(responses: Vec<ApiResponse<AssignResponse>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(Script::new(responses)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn assigned(id: &str, ip: &str) -> ApiResponse<AssignResponse> {
        ApiResponse::new(
            200,
            Some(AssignResponse {
                mandelbox_id: Some(id.into()),
                ip: Some(ip.into()),
                error: None,
            }),
        )
    }

    pub(crate) fn requests(&self) -> Vec<AssignRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MandelboxProvider for FakeWebserver {
    async fn assign(
        &self,
        _access_token: &SecretString,
        request: &AssignRequest,
    ) -> Result<ApiResponse<AssignResponse>, CoreError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .next()
            .ok_or_else(|| CoreError::ConnectionFailed {
                url: "fake://webserver".into(),
                reason: "no scripted response".into(),
            })
    }
}

#[derive(Clone)]
pub(crate) enum InfoReply {
    Ready,
    Pending,
    Status(u16),
}

pub(crate) struct FakeHost {
    info: Mutex<Script<InfoReply>>,
    push_status: u16,
    push_result: bool,
    info_calls: Mutex<usize>,
    pushes: Mutex<Vec<(String, u16, u16)>>,
}

impl FakeHost {
    pub(crate) fn new(info: Vec<InfoReply>) -> Self {
        Self {
            info: Mutex::new(Script::new(info)),
            push_status: 200,
            push_result: true,
            info_calls: Mutex::new(0),
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_status(mut self, status: u16) -> Self {
        self.push_status = status;
        self
    }

    pub(crate) fn without_descriptor(mut self) -> Self {
        self.push_result = false;
        self
    }

    pub(crate) fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub(crate) fn info_calls(&self) -> usize {
        *self.info_calls.lock().unwrap()
    }

    /// `(ip, port, host_port)` of every config push.
    pub(crate) fn pushes(&self) -> Vec<(String, u16, u16)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostProvider for FakeHost {
    async fn host_info(
        &self,
        _access_token: &SecretString,
        _username: &str,
    ) -> Result<ApiResponse<HostServiceInfo>, CoreError> {
        *self.info_calls.lock().unwrap() += 1;
        let reply = self.info.lock().unwrap().next().unwrap_or(InfoReply::Pending);
        Ok(match reply {
            InfoReply::Ready => ApiResponse::new(
                200,
                Some(HostServiceInfo {
                    ip: Some("10.0.0.7".into()),
                    port: Some(4100),
                    client_app_auth_secret: Some(SecretString::from("app-secret".to_string())),
                }),
            ),
            InfoReply::Pending => ApiResponse::new(200, Some(HostServiceInfo::default())),
            InfoReply::Status(status) => ApiResponse::new(status, None),
        })
    }

    async fn push_config(
        &self,
        ip: &str,
        port: u16,
        request: &HostConfigRequest,
    ) -> Result<ApiResponse<HostConfigResponse>, CoreError> {
        self.pushes
            .lock()
            .unwrap()
            .push((ip.to_owned(), port, request.host_port));
        let body: HostConfigResponse = if self.push_result {
            serde_json::from_value(serde_json::json!({
                "result": {
                    "port_32262": 40001,
                    "port_32263": 40002,
                    "port_32273": 40003,
                    "aes_key": "s3cr3t",
                }
            }))
            .unwrap()
        } else {
            serde_json::from_value(serde_json::json!({})).unwrap()
        };
        Ok(ApiResponse::new(self.push_status, Some(body)))
    }
}

pub(crate) struct FakeRegions {
    rounds: Mutex<Script<Vec<Region>>>,
    calls: Mutex<usize>,
}

impl FakeRegions {
    pub(crate) fn new(rounds: Vec<Vec<Region>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(Script::new(rounds)),
            calls: Mutex::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl RegionSource for FakeRegions {
    async fn sorted_regions(&self, _allowed: &[Region]) -> Vec<Region> {
        *self.calls.lock().unwrap() += 1;
        self.rounds.lock().unwrap().next().unwrap_or_default()
    }
}
