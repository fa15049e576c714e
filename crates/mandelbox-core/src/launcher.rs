// ── Launcher ──
//
// Top-level composition of the launch pipeline. A supervisor task owns the
// attempt lifecycle: it starts an attempt once the app is ready and
// credentials are known, cancels it on relaunch, sign-out, quit or a
// pending update, and keeps the freshest credentials for the next attempt.
// Each stage publishes its result on the bus; a failure also raises an
// error window and ends the attempt.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use mandelbox_api::{AuthClient, HostServiceClient, Region, RegionProber, WebserverClient};

use crate::bus::triggers;
use crate::bus::{Publisher, SignalBus, Subscription};
use crate::config::LauncherConfig;
use crate::error::CoreError;
use crate::flow::{Flow, FlowStream, FlowStreamExt, Outcome};
use crate::flows::{
    ClientIdentity, CreateRequest, HostRequest, PollCount, auth_flow, auth_refresh_flow,
    create_flow, host_spin_up_flow, payment_flow, region_flow, request_from_state,
};
use crate::model::{
    AuthFailure, AuthRequest, AuthState, CreateFailure, ErrorWindow, HostFailure,
    HostSpinUpResult, ImportPayload, MandelboxAssignment, MandelboxFailure, PaymentFailure,
};
use crate::providers::{
    AuthProvider, HostProvider, MandelboxProvider, RegionSource, RemoteHost,
};

// ── LaunchStage ──────────────────────────────────────────────────

/// Where the current launch attempt is, observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStage {
    /// Waiting for the app to be ready or for credentials.
    Idle,
    Authenticating,
    CheckingPayment,
    /// The subscription is not valid; waiting for `StripeAuthRefresh`.
    AwaitingPayment,
    FindingRegions,
    CreatingMandelbox,
    SpinningUpHost,
    /// Connection details were handed to the protocol.
    Ready,
    Failed(ErrorWindow),
    /// An update is available; no attempt runs until it is dismissed.
    UpdatePending,
    SignedOut,
    Stopped,
}

// ── Providers ────────────────────────────────────────────────────

/// The remote collaborators every stage talks to.
#[derive(Clone)]
pub struct Providers {
    pub auth: Arc<dyn AuthProvider>,
    pub mandelbox: Arc<dyn MandelboxProvider>,
    pub host: Arc<dyn HostProvider>,
    pub regions: Arc<dyn RegionSource>,
}

impl Providers {
    /// HTTP-backed providers for `config`.
    pub fn remote(config: &LauncherConfig) -> Result<Self, CoreError> {
        let auth = AuthClient::new(config.oauth.clone(), &config.transport)?;
        let webserver = WebserverClient::new(config.webserver_url.clone(), &config.transport)?;
        let host = HostServiceClient::new(&config.transport)?;
        let prober = RegionProber::new(&config.transport)?;

        Ok(Self {
            auth: Arc::new(auth),
            mandelbox: Arc::new(webserver.clone()),
            host: Arc::new(RemoteHost::new(webserver, host)),
            regions: Arc::new(prober),
        })
    }
}

struct Stages {
    auth: Flow<AuthRequest, AuthState, AuthFailure>,
    refresh: Flow<AuthState, AuthState, AuthFailure>,
    payment: Flow<AuthState, AuthState, PaymentFailure>,
    regions: Flow<(), Vec<Region>, CreateFailure, u32>,
    create: Flow<CreateRequest, MandelboxAssignment, CreateFailure>,
    host: Flow<HostRequest, HostSpinUpResult, HostFailure, PollCount>,
}

impl Stages {
    fn new(config: &LauncherConfig, providers: Providers) -> Self {
        let identity = ClientIdentity {
            commit_hash: config.client_commit_hash.clone(),
            session_id: config.session_id,
        };
        Self {
            auth: auth_flow(Arc::clone(&providers.auth)),
            refresh: auth_refresh_flow(providers.auth),
            payment: payment_flow(),
            regions: region_flow(providers.regions, config.regions.clone()),
            create: create_flow(providers.mandelbox, identity),
            host: host_spin_up_flow(providers.host, config.poll, config.host_service_port),
        }
    }
}

struct Publishers {
    app_ready: Publisher<triggers::AppReady>,
    auth_success: Publisher<triggers::AuthFlowSuccess>,
    auth_failure: Publisher<triggers::AuthFlowFailure>,
    auth_refresh: Publisher<triggers::AuthRefreshSuccess>,
    payment_success: Publisher<triggers::CheckPaymentFlowSuccess>,
    payment_failure: Publisher<triggers::CheckPaymentFlowFailure>,
    config_success: Publisher<triggers::ConfigFlowSuccess>,
    flow_start: Publisher<triggers::MandelboxFlowStart>,
    create_success: Publisher<triggers::MandelboxCreateSuccess>,
    create_failure: Publisher<triggers::MandelboxCreateFailure>,
    host_success: Publisher<triggers::HostSpinUpSuccess>,
    host_failure: Publisher<triggers::HostSpinUpFailure>,
    flow_success: Publisher<triggers::MandelboxFlowSuccess>,
    flow_failure: Publisher<triggers::MandelboxFlowFailure>,
    error_window: Publisher<triggers::ErrorWindow>,
}

impl Publishers {
    fn claim(bus: &SignalBus) -> Result<Self, CoreError> {
        Ok(Self {
            app_ready: bus.claim()?,
            auth_success: bus.claim()?,
            auth_failure: bus.claim()?,
            auth_refresh: bus.claim()?,
            payment_success: bus.claim()?,
            payment_failure: bus.claim()?,
            config_success: bus.claim()?,
            flow_start: bus.claim()?,
            create_success: bus.claim()?,
            create_failure: bus.claim()?,
            host_success: bus.claim()?,
            host_failure: bus.claim()?,
            flow_success: bus.claim()?,
            flow_failure: bus.claim()?,
            error_window: bus.claim()?,
        })
    }
}

/// State shared by the supervisor and its attempts.
struct Shared {
    bus: SignalBus,
    stages: Stages,
    publish: Publishers,
    stage: watch::Sender<LaunchStage>,
    loading: watch::Sender<bool>,
    /// Regions from the last successful probe; reused across attempts.
    regions: StdMutex<Vec<Region>>,
    import: ImportPayload,
}

impl Shared {
    fn set_stage(&self, stage: LaunchStage) {
        debug!(?stage, "launch stage");
        self.stage.send_replace(stage);
    }

    fn raise(&self, window: ErrorWindow) {
        warn!(%window, "raising error window");
        self.publish.error_window.publish(window);
        self.set_stage(LaunchStage::Failed(window));
    }

    fn cached_regions(&self) -> Vec<Region> {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_regions(&self, regions: Vec<Region>) {
        *self.regions.lock().unwrap_or_else(PoisonError::into_inner) = regions;
    }
}

// ── Launcher ─────────────────────────────────────────────────────

/// Drives launch attempts from bus triggers. Cheap to clone.
///
/// `new` claims the pipeline's triggers; `start` spawns the supervisor and
/// publishes `AppReady`. Credentials arrive on `AuthInfo`, published by
/// whoever loads or obtains them.
#[derive(Clone)]
pub struct Launcher {
    inner: Arc<LauncherInner>,
}

struct LauncherInner {
    shared: Arc<Shared>,
    inputs: Mutex<Option<BoxStream<'static, Input>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything the supervisor reacts to.
enum Input {
    AppReady,
    Credentials(AuthRequest),
    Authenticated(AuthState),
    Relaunch,
    Signout,
    Quit,
    UpdateAvailable,
    UpdateNotAvailable,
    PingRefresh,
    ProtocolError,
}

impl Launcher {
    pub fn new(
        bus: &SignalBus,
        config: LauncherConfig,
        providers: Providers,
    ) -> Result<Self, CoreError> {
        let publish = Publishers::claim(bus)?;

        // Subscribe before anything can be published. Credentials replay,
        // so a login that happened before the launcher existed still counts.
        let inputs = stream::select_all([
            bus.subscribe_live::<triggers::AppReady>()
                .map(|()| Input::AppReady)
                .boxed(),
            bus.subscribe::<triggers::AuthInfo>()
                .map(Input::Credentials)
                .boxed(),
            bus.subscribe_live::<triggers::AuthFlowSuccess>()
                .map(Input::Authenticated)
                .boxed(),
            bus.subscribe_live::<triggers::AuthRefreshSuccess>()
                .map(Input::Authenticated)
                .boxed(),
            bus.subscribe_live::<triggers::RelaunchAction>()
                .map(|()| Input::Relaunch)
                .boxed(),
            bus.subscribe_live::<triggers::SignoutAction>()
                .map(|()| Input::Signout)
                .boxed(),
            bus.subscribe_live::<triggers::QuitAction>()
                .map(|()| Input::Quit)
                .boxed(),
            bus.subscribe_live::<triggers::UpdateAvailable>()
                .map(|()| Input::UpdateAvailable)
                .boxed(),
            bus.subscribe_live::<triggers::UpdateNotAvailable>()
                .map(|()| Input::UpdateNotAvailable)
                .boxed(),
            bus.subscribe_live::<triggers::AwsPingRefresh>()
                .map(|()| Input::PingRefresh)
                .boxed(),
            bus.subscribe_live::<triggers::ProtocolError>()
                .map(|()| Input::ProtocolError)
                .boxed(),
        ])
        .boxed();

        let (stage, _) = watch::channel(LaunchStage::Idle);
        let (loading, _) = watch::channel(false);
        let import = config.import.clone();
        let shared = Arc::new(Shared {
            bus: bus.clone(),
            stages: Stages::new(&config, providers),
            publish,
            stage,
            loading,
            regions: StdMutex::new(Vec::new()),
            import,
        });

        Ok(Self {
            inner: Arc::new(LauncherInner {
                shared,
                inputs: Mutex::new(Some(inputs)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn bus(&self) -> &SignalBus {
        &self.inner.shared.bus
    }

    pub fn stage(&self) -> LaunchStage {
        self.inner.shared.stage.borrow().clone()
    }

    pub fn watch_stage(&self) -> watch::Receiver<LaunchStage> {
        self.inner.shared.stage.subscribe()
    }

    /// `true` while the host is being polled.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.inner.shared.loading.subscribe()
    }

    /// Spawn the supervisor and announce `AppReady`. Calling it again has
    /// no effect.
    pub async fn start(&self) {
        let Some(inputs) = self.inner.inputs.lock().await.take() else {
            warn!("launcher already started");
            return;
        };
        let supervisor = Supervisor {
            shared: Arc::clone(&self.inner.shared),
            cancel: self.inner.cancel.clone(),
            ready: false,
            update_pending: false,
            request: None,
            attempt: None,
            attempts: 0,
        };
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(supervisor.run(inputs)));

        info!("launcher started");
        self.inner.shared.publish.app_ready.publish(());
    }

    /// Cancel the running attempt and stop the supervisor.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("launcher stopped");
    }
}

// ── Supervisor ───────────────────────────────────────────────────

struct Attempt {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Supervisor {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    ready: bool,
    update_pending: bool,
    /// Credentials for the next attempt.
    request: Option<AuthRequest>,
    attempt: Option<Attempt>,
    attempts: u32,
}

impl Supervisor {
    async fn run(mut self, mut inputs: BoxStream<'static, Input>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                input = inputs.next() => match input {
                    Some(Input::Quit) | None => break,
                    Some(input) => self.handle(input),
                },
            }
        }

        if let Some(attempt) = self.attempt.take() {
            attempt.cancel.cancel();
            let _ = attempt.handle.await;
        }
        self.shared.loading.send_replace(false);
        self.shared.set_stage(LaunchStage::Stopped);
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::AppReady => {
                self.ready = true;
                self.restart();
            }
            Input::Credentials(request) => {
                self.request = Some(request);
                self.restart();
            }
            Input::Authenticated(state) => self.request = Some(request_from_state(&state)),
            Input::Relaunch => {
                info!("relaunch requested");
                self.restart();
            }
            Input::Signout => {
                info!("signed out");
                self.cancel_attempt();
                self.request = None;
                self.shared.set_stage(LaunchStage::SignedOut);
            }
            Input::UpdateAvailable => {
                info!("update available, holding launches");
                self.update_pending = true;
                self.cancel_attempt();
                self.shared.set_stage(LaunchStage::UpdatePending);
            }
            Input::UpdateNotAvailable => {
                if std::mem::take(&mut self.update_pending) {
                    self.restart();
                }
            }
            Input::PingRefresh => self.refresh_regions(),
            Input::ProtocolError => self.shared.raise(ErrorWindow::ProtocolError),
            Input::Quit => self.cancel_attempt(),
        }
    }

    /// Cancel the running attempt and start over from auth, if possible.
    fn restart(&mut self) {
        self.cancel_attempt();
        if !self.ready || self.update_pending {
            return;
        }
        let Some(request) = self.request.clone() else {
            self.shared.set_stage(LaunchStage::Idle);
            return;
        };

        self.attempts += 1;
        let cancel = self.cancel.child_token();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(
            async move {
                tokio::select! {
                    biased;
                    () = token.cancelled() => debug!("attempt cancelled"),
                    () = run_attempt(shared, request) => {}
                }
            }
            .instrument(info_span!("attempt", n = self.attempts)),
        );
        self.attempt = Some(Attempt { cancel, handle });
    }

    fn cancel_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.cancel.cancel();
            self.shared.loading.send_replace(false);
        }
    }

    /// Drop cached regions and probe again in the background.
    fn refresh_regions(&self) {
        self.shared.store_regions(Vec::new());
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                probed = settle(shared.stages.regions.run_once(())) => {
                    if let Some(Ok(regions)) = probed {
                        debug!(?regions, "region cache refreshed");
                        shared.store_regions(regions);
                    }
                }
            }
        });
    }
}

// ── Attempt ──────────────────────────────────────────────────────

/// First terminal outcome of a run, or `None` if the run ended silently.
async fn settle<S, F, P>(outcomes: FlowStream<S, F, P>) -> Option<Result<S, F>>
where
    S: Send + 'static,
    F: Send + 'static,
    P: Send + 'static,
{
    let mut outcomes = outcomes.until_terminal();
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            Outcome::Success(value) => return Some(Ok(value)),
            Outcome::Failure(failure) => return Some(Err(failure)),
            Outcome::Pending(_) => {}
        }
    }
    None
}

async fn run_attempt(shared: Arc<Shared>, request: AuthRequest) {
    let mut paid = shared.bus.subscribe_live::<triggers::StripeAuthRefresh>();

    let Some(state) = authenticate(&shared, request).await else {
        return;
    };
    let Some(state) = check_payment(&shared, state, &mut paid).await else {
        return;
    };
    if launch_mandelbox(&shared, &state).await {
        refresh_in_background(&shared, state).await;
    }
}

async fn authenticate(shared: &Shared, request: AuthRequest) -> Option<AuthState> {
    shared.set_stage(LaunchStage::Authenticating);
    match settle(shared.stages.auth.run_once(request)).await? {
        Ok(state) => {
            shared.publish.auth_success.publish(state.clone());
            // The config token is resolved as part of auth.
            shared.publish.config_success.publish(state.clone());
            Some(state)
        }
        Err(failure) => {
            shared.publish.auth_failure.publish(failure.clone());
            shared.raise(failure.error_window());
            None
        }
    }
}

async fn check_payment(
    shared: &Shared,
    mut state: AuthState,
    paid: &mut Subscription<AuthState>,
) -> Option<AuthState> {
    loop {
        shared.set_stage(LaunchStage::CheckingPayment);
        match settle(shared.stages.payment.run_once(state)).await? {
            Ok(valid) => {
                shared.publish.payment_success.publish(valid.clone());
                return Some(valid);
            }
            Err(failure) => {
                info!(status = ?failure.status, "subscription does not allow a launch");
                let window = failure.error_window();
                shared.publish.payment_failure.publish(failure);
                shared.publish.error_window.publish(window);
                shared.set_stage(LaunchStage::AwaitingPayment);

                let after_payment = paid.next().await?;
                state = refresh(shared, after_payment).await?;
            }
        }
    }
}

async fn refresh(shared: &Shared, state: AuthState) -> Option<AuthState> {
    match settle(shared.stages.refresh.run_once(state)).await? {
        Ok(state) => {
            shared.publish.auth_refresh.publish(state.clone());
            Some(state)
        }
        Err(failure) => {
            shared.publish.auth_failure.publish(failure.clone());
            shared.raise(failure.error_window());
            None
        }
    }
}

/// Keep tokens fresh once the session is up. Failures are logged only.
async fn refresh_in_background(shared: &Shared, state: AuthState) {
    match settle(shared.stages.refresh.run_once(state)).await {
        Some(Ok(state)) => shared.publish.auth_refresh.publish(state),
        Some(Err(failure)) => warn!(%failure, "background token refresh failed"),
        None => {}
    }
}

async fn find_regions(shared: &Shared) -> Option<Result<Vec<Region>, CreateFailure>> {
    let cached = shared.cached_regions();
    if !cached.is_empty() {
        debug!(regions = ?cached, "using cached regions");
        return Some(Ok(cached));
    }
    let probed = settle(shared.stages.regions.run_once(())).await?;
    if let Ok(regions) = &probed {
        shared.store_regions(regions.clone());
    }
    Some(probed)
}

fn fail_create(shared: &Shared, failure: CreateFailure) {
    shared.publish.create_failure.publish(failure.clone());
    let failure = MandelboxFailure::Create(failure);
    shared.publish.flow_failure.publish(failure.clone());
    shared.raise(failure.error_window());
}

/// Regions, assignment and host spin-up. Returns whether the mandelbox is
/// ready.
async fn launch_mandelbox(shared: &Shared, state: &AuthState) -> bool {
    shared.publish.flow_start.publish(());

    shared.set_stage(LaunchStage::FindingRegions);
    let regions = match find_regions(shared).await {
        Some(Ok(regions)) => regions,
        Some(Err(failure)) => {
            fail_create(shared, failure);
            return false;
        }
        None => return false,
    };

    shared.set_stage(LaunchStage::CreatingMandelbox);
    let create = CreateRequest {
        access_token: state.access_token.clone(),
        user_email: state.user_email.clone(),
        regions,
    };
    let assignment = match settle(shared.stages.create.run_once(create)).await {
        Some(Ok(assignment)) => assignment,
        Some(Err(failure)) => {
            fail_create(shared, failure);
            return false;
        }
        None => return false,
    };
    info!(mandelbox_id = %assignment.mandelbox_id, "mandelbox assigned");
    shared.publish.create_success.publish(assignment.clone());

    shared.set_stage(LaunchStage::SpinningUpHost);
    let request = HostRequest {
        user_email: state.user_email.clone(),
        access_token: state.access_token.clone(),
        config_token: state.config_token.clone(),
        is_new_config_token: state.is_new_config_token,
        assignment,
        import: shared.import.clone(),
    };
    let polled = shared
        .stages
        .host
        .run_once(request)
        .track_loading(shared.loading.clone());
    match settle(polled).await {
        Some(Ok(result)) => {
            shared.publish.host_success.publish(result.clone());
            shared.publish.flow_success.publish(result);
            shared.set_stage(LaunchStage::Ready);
            true
        }
        Some(Err(failure)) => {
            shared.publish.host_failure.publish(failure.clone());
            let failure = MandelboxFailure::Host(failure);
            shared.publish.flow_failure.publish(failure.clone());
            shared.raise(failure.error_window());
            false
        }
        None => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use secrecy::{ExposeSecret, SecretString};
    use serde_json::json;
    use url::Url;

    use mandelbox_api::{ApiResponse, OAuthSettings, TokenResponse};

    use super::*;
    use crate::fakes::{FakeAuth, FakeHost, FakeRegions, FakeWebserver, InfoReply};
    use crate::model::{StoredConfigToken, SubscriptionStatus};
    use crate::token::SUBSCRIPTION_CLAIM;
    use crate::token::tests::mint;

    const WAIT: Duration = Duration::from_secs(600);

    fn config() -> LauncherConfig {
        let oauth = OAuthSettings {
            base_url: Url::parse("https://auth.example.com/").unwrap(),
            client_id: "id".into(),
            callback_url: Url::parse("mandelbox://callback").unwrap(),
            audience: "https://api.example.com".into(),
        };
        let mut config = LauncherConfig::new(Url::parse("https://web.example.com/").unwrap(), oauth);
        config.client_commit_hash = "abc123".into();
        config
    }

    fn token(status: &str) -> SecretString {
        mint(&json!({
            "exp": Utc::now().timestamp() + 3600,
            SUBSCRIPTION_CLAIM: status,
        }))
    }

    fn credentials(status: &str) -> AuthRequest {
        AuthRequest {
            user_email: Some("user@example.com".into()),
            access_token: Some(token(status)),
            refresh_token: Some(SecretString::from("refresh-1".to_string())),
            config_token: Some(StoredConfigToken::Plain(SecretString::from(
                "cfg".to_string(),
            ))),
        }
    }

    fn refreshed(status: &str) -> ApiResponse<TokenResponse> {
        ApiResponse::new(
            200,
            Some(TokenResponse {
                access_token: Some(token(status)),
                id_token: None,
                refresh_token: None,
                expires_in: Some(3600),
            }),
        )
    }

    struct Harness {
        bus: SignalBus,
        launcher: Launcher,
        auth: Arc<FakeAuth>,
        web: Arc<FakeWebserver>,
        host: Arc<FakeHost>,
        regions: Arc<FakeRegions>,
        credentials: Publisher<triggers::AuthInfo>,
    }

    fn harness(
        auth: Arc<FakeAuth>,
        web: Arc<FakeWebserver>,
        host: Arc<FakeHost>,
        regions: Arc<FakeRegions>,
    ) -> Harness {
        let bus = SignalBus::new();
        let providers = Providers {
            auth: auth.clone(),
            mandelbox: web.clone(),
            host: host.clone(),
            regions: regions.clone(),
        };
        let launcher = Launcher::new(&bus, config(), providers).unwrap();
        let credentials = bus.claim().unwrap();
        Harness {
            bus,
            launcher,
            auth,
            web,
            host,
            regions,
            credentials,
        }
    }

    fn happy() -> Harness {
        harness(
            FakeAuth::new(vec![]),
            FakeWebserver::new(vec![FakeWebserver::assigned("abc", "1.2.3.4")]),
            FakeHost::new(vec![InfoReply::Pending, InfoReply::Ready]).shared(),
            FakeRegions::new(vec![vec![Region::UsEast1, Region::UsWest1]]),
        )
    }

    async fn next<T>(sub: &mut Subscription<T>) -> T {
        tokio::time::timeout(WAIT, sub.next()).await.unwrap().unwrap()
    }

    async fn wait_stage(launcher: &Launcher, stage: LaunchStage) {
        let mut rx = launcher.watch_stage();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == stage))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_hands_connection_details_downstream() {
        let h = happy();
        let mut success = h.bus.subscribe_live::<triggers::MandelboxFlowSuccess>();

        h.credentials.publish(credentials("active"));
        h.launcher.start().await;

        let result = next(&mut success).await;
        assert_eq!(result.mandelbox_ip, "1.2.3.4");
        assert_eq!(result.mandelbox_secret.expose_secret(), "s3cr3t");
        assert_eq!(result.mandelbox_ports.port_32262, 40001);
        assert_eq!(h.launcher.stage(), LaunchStage::Ready);
        assert!(!*h.launcher.loading().borrow());

        let requests = h.web.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].regions, vec!["us-east-1", "us-west-1"]);
        assert_eq!(requests[0].client_commit_hash, "abc123");
        assert_eq!(requests[0].user_email, "user@example.com");
        assert_eq!(
            h.bus.latest::<triggers::MandelboxCreateSuccess>(),
            Some(MandelboxAssignment {
                mandelbox_id: "abc".into(),
                ip: Some("1.2.3.4".into()),
            })
        );
        assert_eq!(h.host.info_calls(), 2);
        assert!(h.bus.latest::<triggers::ConfigFlowSuccess>().is_some());
        assert!(h.bus.latest::<triggers::ErrorWindow>().is_none());
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unpaid_account_waits_for_payment_then_continues() {
        let h = harness(
            FakeAuth::new(vec![refreshed("active")]),
            FakeWebserver::new(vec![FakeWebserver::assigned("abc", "1.2.3.4")]),
            FakeHost::new(vec![InfoReply::Ready]).shared(),
            FakeRegions::new(vec![vec![Region::UsEast1]]),
        );
        let mut failures = h.bus.subscribe_live::<triggers::CheckPaymentFlowFailure>();
        let mut windows = h.bus.subscribe_live::<triggers::ErrorWindow>();
        let mut success = h.bus.subscribe_live::<triggers::MandelboxFlowSuccess>();

        h.credentials.publish(credentials("past_due"));
        h.launcher.start().await;

        let failure = next(&mut failures).await;
        assert_eq!(failure.status, Some(SubscriptionStatus::PastDue));
        assert_eq!(next(&mut windows).await, ErrorWindow::NoPaymentError);
        assert_eq!(h.launcher.stage(), LaunchStage::AwaitingPayment);
        assert!(h.web.requests().is_empty());

        let stripe = h.bus.claim::<triggers::StripeAuthRefresh>().unwrap();
        stripe.publish(failure.state);

        next(&mut success).await;
        assert_eq!(h.auth.refreshed_with()[0], "refresh-1");
        let paid = h.bus.latest::<triggers::CheckPaymentFlowSuccess>().unwrap();
        assert_eq!(paid.subscription_status, Some(SubscriptionStatus::Active));
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_raises_its_window_and_skips_the_host() {
        let h = harness(
            FakeAuth::new(vec![]),
            FakeWebserver::new(vec![ApiResponse::new(402, None)]),
            FakeHost::new(vec![InfoReply::Ready]).shared(),
            FakeRegions::new(vec![vec![Region::UsEast1]]),
        );
        let mut windows = h.bus.subscribe_live::<triggers::ErrorWindow>();

        h.credentials.publish(credentials("active"));
        h.launcher.start().await;

        assert_eq!(next(&mut windows).await, ErrorWindow::NoPaymentError);
        assert_eq!(
            h.bus.latest::<triggers::MandelboxCreateFailure>(),
            Some(CreateFailure::NoAccess)
        );
        assert_eq!(
            h.bus.latest::<triggers::MandelboxFlowFailure>(),
            Some(MandelboxFailure::Create(CreateFailure::NoAccess))
        );
        assert_eq!(
            h.launcher.stage(),
            LaunchStage::Failed(ErrorWindow::NoPaymentError)
        );
        assert_eq!(h.host.info_calls(), 0);
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_region_probes_fail_once_with_the_internet_window() {
        let h = harness(
            FakeAuth::new(vec![]),
            FakeWebserver::new(vec![FakeWebserver::assigned("abc", "1.2.3.4")]),
            FakeHost::new(vec![InfoReply::Ready]).shared(),
            FakeRegions::new(vec![vec![]]),
        );
        let mut failures = h.bus.subscribe_live::<triggers::MandelboxFlowFailure>();
        let mut windows = h.bus.subscribe_live::<triggers::ErrorWindow>();

        h.credentials.publish(credentials("active"));
        h.launcher.start().await;

        assert_eq!(
            next(&mut failures).await,
            MandelboxFailure::Create(CreateFailure::NoRegions { attempts: 20 })
        );
        assert_eq!(next(&mut windows).await, ErrorWindow::InternetError);
        assert!(
            tokio::time::timeout(Duration::from_secs(5), failures.next())
                .await
                .is_err(),
            "a single failure per attempt"
        );
        assert_eq!(h.regions.calls(), 20);
        assert!(h.web.requests().is_empty());
        assert_eq!(h.host.info_calls(), 0);
        assert_eq!(
            h.launcher.stage(),
            LaunchStage::Failed(ErrorWindow::InternetError)
        );
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn host_failure_is_a_mandelbox_failure() {
        let h = harness(
            FakeAuth::new(vec![]),
            FakeWebserver::new(vec![FakeWebserver::assigned("abc", "1.2.3.4")]),
            FakeHost::new(vec![InfoReply::Status(500)]).shared(),
            FakeRegions::new(vec![vec![Region::UsEast1]]),
        );
        let mut windows = h.bus.subscribe_live::<triggers::ErrorWindow>();

        h.credentials.publish(credentials("active"));
        h.launcher.start().await;

        assert_eq!(next(&mut windows).await, ErrorWindow::MandelboxInternalError);
        assert_eq!(
            h.bus.latest::<triggers::HostSpinUpFailure>(),
            Some(HostFailure::InfoRejected { status: 500 })
        );
        assert!(h.bus.latest::<triggers::MandelboxFlowSuccess>().is_none());
        assert!(!*h.launcher.loading().borrow());
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_stop_at_auth() {
        let h = happy();
        let mut windows = h.bus.subscribe_live::<triggers::ErrorWindow>();

        h.credentials.publish(AuthRequest {
            user_email: None,
            access_token: None,
            refresh_token: None,
            config_token: None,
        });
        h.launcher.start().await;

        assert_eq!(next(&mut windows).await, ErrorWindow::AuthError);
        assert!(h.bus.latest::<triggers::AuthFlowFailure>().is_some());
        assert!(h.bus.latest::<triggers::MandelboxFlowStart>().is_none());
        assert_eq!(h.regions.calls(), 0);
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pending_update_holds_the_launch() {
        let h = happy();
        let update = h.bus.claim::<triggers::UpdateAvailable>().unwrap();
        let no_update = h.bus.claim::<triggers::UpdateNotAvailable>().unwrap();
        let mut success = h.bus.subscribe_live::<triggers::MandelboxFlowSuccess>();

        h.launcher.start().await;
        update.publish(());
        wait_stage(&h.launcher, LaunchStage::UpdatePending).await;

        h.credentials.publish(credentials("active"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.web.requests().is_empty());
        assert_eq!(h.launcher.stage(), LaunchStage::UpdatePending);

        no_update.publish(());
        next(&mut success).await;
        assert_eq!(h.web.requests().len(), 1);
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn relaunch_starts_over_and_reuses_regions() {
        let h = happy();
        let relaunch = h.bus.claim::<triggers::RelaunchAction>().unwrap();
        let mut success = h.bus.subscribe_live::<triggers::MandelboxFlowSuccess>();

        h.credentials.publish(credentials("active"));
        h.launcher.start().await;
        next(&mut success).await;

        relaunch.publish(());
        next(&mut success).await;

        assert_eq!(h.regions.calls(), 1);
        assert_eq!(h.web.requests().len(), 2);
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ping_refresh_reprobes_regions() {
        let h = happy();
        let ping = h.bus.claim::<triggers::AwsPingRefresh>().unwrap();
        let mut success = h.bus.subscribe_live::<triggers::MandelboxFlowSuccess>();

        h.credentials.publish(credentials("active"));
        h.launcher.start().await;
        next(&mut success).await;

        ping.publish(());
        for _ in 0..10 {
            if h.regions.calls() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(h.regions.calls(), 2);
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn signout_waits_for_new_credentials() {
        let h = happy();
        let signout = h.bus.claim::<triggers::SignoutAction>().unwrap();
        let mut success = h.bus.subscribe_live::<triggers::MandelboxFlowSuccess>();

        h.credentials.publish(credentials("active"));
        h.launcher.start().await;
        next(&mut success).await;

        signout.publish(());
        wait_stage(&h.launcher, LaunchStage::SignedOut).await;

        h.credentials.publish(credentials("trialing"));
        next(&mut success).await;
        assert_eq!(h.web.requests().len(), 2);
        h.launcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_error_raises_its_window() {
        let h = happy();
        let protocol_error = h.bus.claim::<triggers::ProtocolError>().unwrap();
        let mut windows = h.bus.subscribe_live::<triggers::ErrorWindow>();

        h.launcher.start().await;
        protocol_error.publish(());

        assert_eq!(next(&mut windows).await, ErrorWindow::ProtocolError);
        h.launcher.shutdown().await;
    }

    #[tokio::test]
    async fn quit_stops_the_supervisor() {
        let h = happy();
        let quit = h.bus.claim::<triggers::QuitAction>().unwrap();
        h.launcher.start().await;

        quit.publish(());
        wait_stage(&h.launcher, LaunchStage::Stopped).await;
        h.launcher.shutdown().await;
    }

    #[test]
    fn a_bus_hosts_one_launcher() {
        let h = happy();
        let providers = Providers {
            auth: FakeAuth::new(vec![]),
            mandelbox: FakeWebserver::new(vec![]),
            host: FakeHost::new(vec![]).shared(),
            regions: FakeRegions::new(vec![]),
        };
        assert!(matches!(
            Launcher::new(&h.bus, config(), providers),
            Err(CoreError::PublisherClaimed { .. })
        ));
    }
}
