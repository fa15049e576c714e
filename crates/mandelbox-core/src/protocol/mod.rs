// ── Protocol process manager ──
//
// Sole owner of the local streaming-protocol subprocess. The process is
// spawned as soon as a launch starts and receives its connection details
// over stdin once the mandelbox is ready. Unexpected exits are relaunched
// up to a bound; past it the manager goes terminal and raises
// `ProtocolError`. Everything else in the app only sees the process
// through its lifecycle triggers.

pub mod logs;
pub mod wire;

pub use logs::{LineBuffer, NackDetector, ProtocolLevel, parse_level};
pub use wire::{ControlMessage, connection_messages};

use std::io::{self, Write};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::bus::{Publisher, SignalBus};
use crate::bus::triggers::{
    MandelboxFlowStart, MandelboxFlowSuccess, NetworkUnstable, OpenUrl, PowerSuspend,
    ProtocolClosed, ProtocolConnection, ProtocolError, ProtocolLaunched, QuitAction,
    RelaunchAction, SignoutAction, UpdateAvailable,
};
use crate::config::ProtocolConfig;
use crate::error::CoreError;
use crate::model::{self, HostSpinUpResult};

use self::logs::forward_line;

const COMMAND_CHANNEL_SIZE: usize = 32;
const READ_CHUNK: usize = 4096;
/// How long an exited process's stdout may take to reach EOF.
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

// ── ProtocolState ────────────────────────────────────────────────

/// Lifecycle of the subprocess, observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolState {
    NotLaunched,
    Launching,
    Running { pid: Option<u32> },
    ClosedGracefully,
    ClosedCrashed { crash_count: u32 },
    /// Crashed past the relaunch bound; waits for an explicit new launch.
    Terminal,
}

#[derive(Debug)]
enum ManagerCommand {
    Launch,
    Connect(HostSpinUpResult),
    OpenUrl(String),
    Close,
}

// ── ProtocolManager ──────────────────────────────────────────────

/// Handle to the manager task. Cheap to clone.
#[derive(Clone)]
pub struct ProtocolManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    state: watch::Receiver<ProtocolState>,
    commands: mpsc::Sender<ManagerCommand>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Publishers {
    launched: Publisher<ProtocolLaunched>,
    closed: Publisher<ProtocolClosed>,
    connection: Publisher<ProtocolConnection>,
    error: Publisher<ProtocolError>,
    network_unstable: Publisher<NetworkUnstable>,
}

impl ProtocolManager {
    /// Claim the protocol triggers on `bus` and start the manager task.
    ///
    /// The manager launches on `MandelboxFlowStart`, connects on
    /// `MandelboxFlowSuccess`, forwards `OpenUrl`, and closes gracefully on
    /// sign-out, relaunch, quit, suspend or a pending update.
    pub fn spawn(bus: &SignalBus, config: ProtocolConfig) -> Result<Self, CoreError> {
        let publishers = Publishers {
            launched: bus.claim::<ProtocolLaunched>()?,
            closed: bus.claim::<ProtocolClosed>()?,
            connection: bus.claim::<ProtocolConnection>()?,
            error: bus.claim::<ProtocolError>()?,
            network_unstable: bus.claim::<NetworkUnstable>()?,
        };

        let events: BoxStream<'static, ManagerCommand> = stream::select_all([
            bus.subscribe_live::<MandelboxFlowStart>()
                .map(|()| ManagerCommand::Launch)
                .boxed(),
            bus.subscribe_live::<MandelboxFlowSuccess>()
                .map(ManagerCommand::Connect)
                .boxed(),
            bus.subscribe_live::<OpenUrl>()
                .map(ManagerCommand::OpenUrl)
                .boxed(),
            bus.subscribe_live::<SignoutAction>()
                .map(|()| ManagerCommand::Close)
                .boxed(),
            bus.subscribe_live::<RelaunchAction>()
                .map(|()| ManagerCommand::Close)
                .boxed(),
            bus.subscribe_live::<QuitAction>()
                .map(|()| ManagerCommand::Close)
                .boxed(),
            bus.subscribe_live::<PowerSuspend>()
                .map(|()| ManagerCommand::Close)
                .boxed(),
            bus.subscribe_live::<UpdateAvailable>()
                .map(|()| ManagerCommand::Close)
                .boxed(),
        ])
        .boxed();

        let (state_tx, state_rx) = watch::channel(ProtocolState::NotLaunched);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let log = open_log(&config);
        let actor = Actor {
            config,
            publishers,
            state: state_tx,
            log,
            output: output_tx,
            running: None,
            generation: 0,
            last_info: None,
            connected: false,
            connected_at: None,
            queued_urls: Vec::new(),
            crash_count: 0,
            nacks: NackDetector::new(),
            unstable: false,
            closing: false,
            relaunch_pending: false,
        };
        let task = tokio::spawn(actor.run(command_rx, output_rx, events, cancel.clone()));

        Ok(Self {
            inner: Arc::new(ManagerInner {
                state: state_rx,
                commands: command_tx,
                cancel,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProtocolState {
        self.inner.state.borrow().clone()
    }

    /// Watch lifecycle transitions.
    pub fn watch(&self) -> watch::Receiver<ProtocolState> {
        self.inner.state.clone()
    }

    /// Spawn the process if it is not already running. Resets the crash
    /// budget.
    pub async fn launch(&self) -> Result<(), CoreError> {
        self.send(ManagerCommand::Launch).await
    }

    /// Hand connection details to the process, launching it first if
    /// needed.
    pub async fn connect(&self, info: HostSpinUpResult) -> Result<(), CoreError> {
        self.send(ManagerCommand::Connect(info)).await
    }

    /// Ask the connected process to open `url`. Queued until connected.
    pub async fn open_url(&self, url: impl Into<String>) -> Result<(), CoreError> {
        self.send(ManagerCommand::OpenUrl(url.into())).await
    }

    /// Close the process gracefully, without relaunch.
    pub async fn close(&self) -> Result<(), CoreError> {
        self.send(ManagerCommand::Close).await
    }

    /// Close the process and stop the manager task.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(task) = self.inner.task.lock().await.take() {
            let _ = task.await;
        }
    }

    async fn send(&self, command: ManagerCommand) -> Result<(), CoreError> {
        self.inner
            .commands
            .send(command)
            .await
            .map_err(|_| CoreError::ProtocolNotRunning)
    }
}

fn open_log(config: &ProtocolConfig) -> Option<(NonBlocking, WorkerGuard)> {
    let dir = config.log_dir.as_ref()?;
    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("protocol")
        .filename_suffix("log")
        .build(dir)
    {
        Ok(appender) => Some(tracing_appender::non_blocking(appender)),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot open protocol log");
            None
        }
    }
}

// ── Actor ────────────────────────────────────────────────────────

struct Running {
    generation: u64,
    pid: Option<u32>,
    stdin: ChildStdin,
    kill: Option<oneshot::Sender<()>>,
}

struct Exit {
    generation: u64,
    status: io::Result<ExitStatus>,
}

struct OutputLine {
    generation: u64,
    line: String,
}

struct Actor {
    config: ProtocolConfig,
    publishers: Publishers,
    state: watch::Sender<ProtocolState>,
    log: Option<(NonBlocking, WorkerGuard)>,
    output: mpsc::UnboundedSender<OutputLine>,
    running: Option<Running>,
    generation: u64,
    last_info: Option<HostSpinUpResult>,
    connected: bool,
    connected_at: Option<Instant>,
    queued_urls: Vec<String>,
    crash_count: u32,
    /// NACK state of the current process; cleared when it goes away.
    nacks: NackDetector,
    unstable: bool,
    /// Set while a requested shutdown is in progress.
    closing: bool,
    /// A launch arrived while closing; start again once the old process exits.
    relaunch_pending: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ManagerCommand>,
        mut output: mpsc::UnboundedReceiver<OutputLine>,
        mut events: BoxStream<'static, ManagerCommand>,
        cancel: CancellationToken,
    ) {
        let (exit_tx, mut exits) = mpsc::unbounded_channel::<Exit>();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                // Ahead of exits: lines printed before an exit belong to it.
                Some(line) = output.recv() => self.on_output(line),
                Some(exit) = exits.recv() => self.on_exit(exit, &exit_tx).await,
                Some(command) = commands.recv() => self.handle(command, &exit_tx).await,
                Some(command) = events.next() => self.handle(command, &exit_tx).await,
                else => break,
            }
        }

        // Close and give the process twice the grace period to exit.
        if let Some(current) = self.running.as_ref().map(|r| r.generation) {
            self.close().await;
            let exited = tokio::time::timeout(self.config.shutdown_grace * 2, async {
                while let Some(exit) = exits.recv().await {
                    if exit.generation == current {
                        return exit.status.ok();
                    }
                }
                None
            })
            .await;
            match exited {
                Ok(status) => self.finish_closed(status),
                Err(_) => warn!("protocol did not exit during shutdown"),
            }
        }
        debug!("protocol manager stopped");
    }

    async fn handle(&mut self, command: ManagerCommand, exits: &mpsc::UnboundedSender<Exit>) {
        match command {
            ManagerCommand::Launch => {
                self.crash_count = 0;
                if self.closing {
                    self.relaunch_pending = true;
                } else if self.running.is_none() {
                    self.launch(exits);
                }
            }
            ManagerCommand::Connect(info) => {
                self.last_info = Some(info);
                if self.closing {
                    self.relaunch_pending = true;
                    return;
                }
                if self.running.is_none() {
                    self.launch(exits);
                }
                self.stream_info().await;
            }
            ManagerCommand::OpenUrl(url) => {
                if self.connected {
                    self.write(&ControlMessage::OpenUrl(url)).await;
                } else {
                    debug!("queueing url until the protocol is connected");
                    self.queued_urls.push(url);
                }
            }
            ManagerCommand::Close => {
                self.relaunch_pending = false;
                self.last_info = None;
                self.queued_urls.clear();
                self.close().await;
            }
        }
    }

    fn launch(&mut self, exits: &mpsc::UnboundedSender<Exit>) {
        self.state.send_replace(ProtocolState::Launching);
        self.generation += 1;

        let mut command = Command::new(&self.config.path);
        command
            .args(&self.config.extra_args)
            .arg("--environment")
            .arg(&self.config.environment)
            .arg("--read-pipe")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = CoreError::ProtocolSpawn {
                    path: self.config.path.display().to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "protocol launch failed");
                self.state.send_replace(ProtocolState::Terminal);
                self.publishers.error.publish(());
                return;
            }
        };

        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            warn!("protocol spawned without pipes");
            let _ = child.start_kill();
            self.state.send_replace(ProtocolState::Terminal);
            self.publishers.error.publish(());
            return;
        };

        let reader = tokio::spawn(read_output(
            stdout,
            self.generation,
            self.log.as_ref().map(|(writer, _)| writer.clone()),
            self.config.mirror_stdout,
            self.output.clone(),
        ));
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(wait_child(
            child,
            self.generation,
            reader,
            kill_rx,
            exits.clone(),
        ));

        info!(?pid, generation = self.generation, "protocol launched");
        self.running = Some(Running {
            generation: self.generation,
            pid,
            stdin,
            kill: Some(kill_tx),
        });
        self.connected = false;
        self.state.send_replace(ProtocolState::Running { pid });
        self.publishers.launched.publish(pid);
    }

    async fn stream_info(&mut self) {
        let Some(info) = self.last_info.clone() else {
            return;
        };
        for message in connection_messages(&info) {
            if !self.write(&message).await {
                return;
            }
        }
        self.connected = true;
        self.connected_at = Some(Instant::now());
        self.publishers.connection.publish(true);

        for url in std::mem::take(&mut self.queued_urls) {
            self.write(&ControlMessage::OpenUrl(url)).await;
        }
    }

    async fn write(&mut self, message: &ControlMessage) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        let line = message.encode();
        let result = async {
            running.stdin.write_all(line.as_bytes()).await?;
            running.stdin.flush().await
        }
        .await;
        match result {
            Ok(()) => {
                debug!(key = message.key(), "sent control message");
                true
            }
            Err(e) => {
                warn!(key = message.key(), error = %e, "failed to write to protocol");
                false
            }
        }
    }

    /// `kill?0`, then SIGINT, then a hard kill once the grace period ends.
    async fn close(&mut self) {
        if self.running.is_none() || self.closing {
            return;
        }
        self.closing = true;
        self.write(&ControlMessage::Kill).await;

        let Some(running) = self.running.as_mut() else {
            return;
        };
        interrupt(running.pid);
        if let Some(kill) = running.kill.take() {
            let grace = self.config.shutdown_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = kill.send(());
            });
        }
    }

    async fn on_exit(&mut self, exit: Exit, exits: &mpsc::UnboundedSender<Exit>) {
        if self.running.as_ref().map(|r| r.generation) != Some(exit.generation) {
            return;
        }
        let status = exit.status.ok();
        let crashed = !self.closing && !status.is_some_and(|s| s.success());
        if !crashed {
            self.finish_closed(status);
            if std::mem::take(&mut self.relaunch_pending) {
                self.launch(exits);
                self.stream_info().await;
            }
            return;
        }

        let healthy = self
            .connected_at
            .is_some_and(|at| at.elapsed() >= self.config.healthy_run);
        self.release();
        if healthy {
            debug!(previous = self.crash_count, "protocol ran healthily, crash count reset");
            self.crash_count = 0;
        }
        self.crash_count += 1;
        let exit_code = status.and_then(|s| s.code());
        warn!(
            exit_code,
            crash_count = self.crash_count,
            "protocol exited unexpectedly"
        );
        self.publishers.closed.publish(model::ProtocolClosed {
            crashed: true,
            exit_code,
            crash_count: self.crash_count,
        });

        if self.crash_count > self.config.max_crash_retries {
            self.state.send_replace(ProtocolState::Terminal);
            self.publishers.error.publish(());
            return;
        }

        self.state.send_replace(ProtocolState::ClosedCrashed {
            crash_count: self.crash_count,
        });
        self.launch(exits);
        self.stream_info().await;
    }

    fn finish_closed(&mut self, status: Option<ExitStatus>) {
        self.release();
        self.closing = false;
        info!(code = status.and_then(|s| s.code()), "protocol closed");
        self.state.send_replace(ProtocolState::ClosedGracefully);
        self.publishers.closed.publish(model::ProtocolClosed {
            crashed: false,
            exit_code: status.and_then(|s| s.code()),
            crash_count: self.crash_count,
        });
    }

    fn on_output(&mut self, output: OutputLine) {
        if self.running.as_ref().map(|r| r.generation) != Some(output.generation) {
            return;
        }
        let now_unstable = self.nacks.observe(&output.line, Instant::now());
        if now_unstable != self.unstable {
            self.unstable = now_unstable;
            self.publishers.network_unstable.publish(now_unstable);
        }
    }

    fn release(&mut self) {
        self.running = None;
        self.connected_at = None;
        if self.connected {
            self.connected = false;
            self.publishers.connection.publish(false);
        }
        self.nacks = NackDetector::new();
        if std::mem::take(&mut self.unstable) {
            self.publishers.network_unstable.publish(false);
        }
    }
}

async fn wait_child(
    mut child: Child,
    generation: u64,
    reader: JoinHandle<()>,
    kill: oneshot::Receiver<()>,
    exits: mpsc::UnboundedSender<Exit>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill => {
            debug!(generation, "protocol did not exit in time, killing");
            let _ = child.start_kill();
            child.wait().await
        }
    };
    if tokio::time::timeout(OUTPUT_DRAIN, reader).await.is_err() {
        debug!(generation, "protocol stdout still open after exit");
    }
    let _ = exits.send(Exit { generation, status });
}

async fn read_output(
    mut stdout: ChildStdout,
    generation: u64,
    mut log: Option<NonBlocking>,
    mirror: bool,
    output: mpsc::UnboundedSender<OutputLine>,
) {
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0_u8; READ_CHUNK];

    loop {
        let read = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "protocol stdout closed");
                break;
            }
        };
        let bytes = &chunk[..read];
        if let Some(writer) = log.as_mut() {
            let _ = writer.write_all(bytes);
        }
        if mirror {
            let _ = tokio::io::stdout().write_all(bytes).await;
        }

        for line in lines.push(bytes) {
            forward_line(&line);
            let _ = output.send(OutputLine { generation, line });
        }
    }
    if let Some(line) = lines.finish() {
        forward_line(&line);
        let _ = output.send(OutputLine { generation, line });
    }
}

#[cfg(unix)]
fn interrupt(pid: Option<u32>) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGINT) {
        debug!(pid, error = %e, "SIGINT failed");
    }
}

#[cfg(not(unix))]
fn interrupt(_pid: Option<u32>) {}
