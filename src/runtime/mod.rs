//! Runtime facade over one sclang interpreter
//!
//! [`Runtime`] owns the lifecycle state machine
//!
//! ```text
//! Stopped --boot()--> Booting --server ready--> Running
//!    ^                   |                         |
//!    +---- exit / quit / boot timeout -------------+
//! ```
//!
//! and turns the interpreter's free-form output into one result per request.
//! All transitions and settlements happen on a single event-loop thread; the
//! supervisor's reader threads only forward events to it. Events carry the
//! generation of the process that produced them, so output from a process
//! that was already torn down can never settle a newer request.
//!
//! At most one boot and one evaluation are in flight. A second request of
//! the same kind is rejected before any I/O, never queued.

mod pending;

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{find_sclang_path, RuntimeConfig};
use crate::error::{Result, ResultExt, RuntimeError};
use crate::executor::{EventSink, OutputStream, Supervisor, SupervisorEvent, SupervisorOptions};
use crate::logging;
use crate::protocol::{
    log_preview, wrap_code, BOOT_COMMAND, FREE_ALL_COMMAND, REBOOT_COMMAND, STOP_COMMAND,
};
use pending::{OperationKind, PendingOperation};

pub const ALREADY_RUNNING: &str = "SuperCollider is already running";
pub const BOOTED: &str = "SuperCollider booted successfully";
pub const REBOOTED: &str = "Server rebooted";
pub const RUNTIME_READY_MESSAGE: &str = "Runtime ready";

/// Output lines attached to an unexpected-exit error
const CRASH_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    #[default]
    Stopped,
    Booting,
    Running,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Booting => "booting",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications for subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Raw interpreter output as received
    Output { stream: OutputStream, text: String },
    /// The interpreter process ended, for any reason
    Exited { code: Option<i32> },
    /// The interpreter died while Running without being asked to
    Crashed { code: Option<i32> },
}

#[derive(Debug, Clone)]
struct Settings {
    supervisor: SupervisorOptions,
    boot_timeout: Duration,
    exec_timeout: Duration,
    ready_timeout: Duration,
    error_settle: Duration,
}

impl Settings {
    fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            supervisor: SupervisorOptions {
                program: find_sclang_path(config.sclang_path.as_deref()),
                args: config.sclang_args.clone(),
                kill_grace: config.get_kill_grace(),
            },
            boot_timeout: config.get_boot_timeout(),
            exec_timeout: config.get_exec_timeout(),
            ready_timeout: config.get_ready_timeout(),
            error_settle: config.get_error_settle(),
        }
    }
}

enum LoopMessage {
    Supervisor {
        generation: u64,
        event: SupervisorEvent,
    },
    /// Pending operations changed; recompute the next deadline
    Wake,
    Shutdown,
}

#[derive(Default)]
struct Shared {
    state: RuntimeState,
    /// Bumped whenever the current process is abandoned
    generation: u64,
    supervisor: Option<Arc<Supervisor>>,
    boot: Option<PendingOperation>,
    exec: Option<PendingOperation>,
    ready_waiters: Vec<PendingOperation>,
    /// Runtime-ready sentinel seen since the last boot or evaluation request
    runtime_ready_seen: bool,
    next_op_id: u64,
}

impl Shared {
    fn next_id(&mut self) -> u64 {
        self.next_op_id += 1;
        self.next_op_id
    }

    fn transition(&mut self, to: RuntimeState, reason: &str) {
        if self.state != to {
            logging::log_lifecycle(self.state.as_str(), to.as_str(), reason);
            self.state = to;
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        self.boot
            .iter()
            .chain(self.exec.iter())
            .chain(self.ready_waiters.iter())
            .map(PendingOperation::next_wakeup)
            .min()
    }

    /// Settle every pending operation with an error built by `make_error`
    fn fail_all(&mut self, make_error: impl Fn() -> RuntimeError) {
        if let Some(op) = self.boot.take() {
            op.settle(Err(make_error()));
        }
        if let Some(op) = self.exec.take() {
            op.settle(Err(make_error()));
        }
        for op in self.ready_waiters.drain(..) {
            op.settle(Err(make_error()));
        }
    }
}

struct Inner {
    settings: Settings,
    shared: Mutex<Shared>,
    subscribers: Mutex<Vec<async_channel::Sender<RuntimeEvent>>>,
    loop_tx: mpsc::Sender<LoopMessage>,
}

impl Inner {
    fn wake(&self) {
        let _ = self.loop_tx.send(LoopMessage::Wake);
    }

    fn broadcast(&self, event: RuntimeEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    fn event_sink(&self, generation: u64) -> EventSink {
        let tx = self.loop_tx.clone();
        Arc::new(move |event| {
            let _ = tx.send(LoopMessage::Supervisor { generation, event });
        })
    }

    fn handle_event(&self, generation: u64, event: SupervisorEvent) {
        let mut shared = self.shared.lock();
        if generation != shared.generation {
            trace!(generation, current = shared.generation, "Ignoring event from retired process");
            return;
        }

        match event {
            SupervisorEvent::Output { stream, chunk } => {
                drop(shared);
                self.broadcast(RuntimeEvent::Output {
                    stream,
                    text: chunk,
                });
            }
            SupervisorEvent::InterpreterReady => {
                if shared.state != RuntimeState::Booting {
                    return;
                }
                if let Some(supervisor) = shared.supervisor.clone() {
                    drop(shared);
                    info!(pid = supervisor.pid(), "Interpreter ready, booting audio server");
                    supervisor.send(BOOT_COMMAND).log_err();
                }
            }
            SupervisorEvent::ServerReady => {
                if shared.state != RuntimeState::Booting {
                    return;
                }
                shared.transition(RuntimeState::Running, "server ready");
                if let Some(op) = shared.boot.take() {
                    logging::log_perf(
                        "boot",
                        op.started.elapsed().as_millis() as u64,
                        op.timeout_ms(),
                    );
                    op.settle(Ok(BOOTED.to_string()));
                }
            }
            SupervisorEvent::RuntimeReady => {
                let live = shared
                    .supervisor
                    .as_ref()
                    .is_some_and(|supervisor| supervisor.has_runtime_ready());
                if !live {
                    debug!("Ignoring runtime-ready sentinel from a cleared cycle");
                    return;
                }
                shared.runtime_ready_seen = true;
                for op in shared.ready_waiters.drain(..) {
                    op.settle(Ok(RUNTIME_READY_MESSAGE.to_string()));
                }
            }
            SupervisorEvent::Response(text) => {
                let Some(op) = shared.exec.take() else {
                    let (preview, len) = log_preview(&text);
                    warn!(bytes = len, "Discarding response with no pending evaluation: {}", preview);
                    return;
                };
                let Some(supervisor) = shared.supervisor.clone() else {
                    shared.exec = Some(op);
                    return;
                };
                // The event may predate the last clear; only the live buffer counts
                match supervisor.current_response() {
                    None => shared.exec = Some(op),
                    Some(response) => match supervisor.classify_error() {
                        Some(err) => op.settle(Err(err.into())),
                        None => op.settle(Ok(response)),
                    },
                }
            }
            SupervisorEvent::ErrorDetected => {
                let settle_at = Instant::now() + self.settings.error_settle;
                if let Some(op) = shared.exec.as_mut() {
                    op.error_settle_at.get_or_insert(settle_at);
                }
            }
            SupervisorEvent::Exited { code } => {
                let recent_output = shared
                    .supervisor
                    .take()
                    .map(|s| s.recent_output(CRASH_TAIL_LINES))
                    .unwrap_or_default();
                let was = shared.state;
                shared.transition(RuntimeState::Stopped, "process exited");
                shared.runtime_ready_seen = false;
                shared.fail_all(|| RuntimeError::ProcessExited {
                    code,
                    recent_output: recent_output.clone(),
                });
                drop(shared);

                self.broadcast(RuntimeEvent::Exited { code });
                if was == RuntimeState::Running {
                    warn!(exit_code = ?code, "Interpreter exited unexpectedly");
                    self.broadcast(RuntimeEvent::Crashed { code });
                }
            }
        }
    }

    fn expire_deadlines(&self, now: Instant) {
        let mut shared = self.shared.lock();
        let mut teardown = None;

        if shared.boot.as_ref().is_some_and(|op| op.is_expired(now)) {
            if let Some(op) = shared.boot.take() {
                let timeout_ms = op.timeout_ms();
                warn!(timeout_ms, "Boot timed out, tearing down interpreter");
                shared.generation += 1;
                teardown = shared.supervisor.take();
                shared.transition(RuntimeState::Stopped, "boot timeout");
                shared.fail_all(|| RuntimeError::Cancelled);
                op.settle(Err(RuntimeError::BootTimeout { timeout_ms }));
            }
        }

        if shared.exec.as_ref().is_some_and(|op| op.is_expired(now)) {
            if let Some(op) = shared.exec.take() {
                let timeout_ms = op.timeout_ms();
                warn!(timeout_ms, "Evaluation timed out; a late response will be discarded");
                op.settle(Err(RuntimeError::ExecTimeout { timeout_ms }));
            }
        }

        let error_due = shared
            .exec
            .as_ref()
            .and_then(|op| op.error_settle_at)
            .is_some_and(|at| now >= at);
        if error_due {
            let error = shared.supervisor.as_ref().and_then(|s| s.classify_error());
            if let Some(mut op) = shared.exec.take() {
                match error {
                    Some(err) => {
                        debug!(kind = %err.kind, "Evaluation failed in interpreter");
                        op.settle(Err(err.into()));
                    }
                    None => {
                        op.error_settle_at = None;
                        shared.exec = Some(op);
                    }
                }
            }
        }

        if shared.ready_waiters.iter().any(|op| op.is_expired(now)) {
            let (expired, waiting): (Vec<_>, Vec<_>) = shared
                .ready_waiters
                .drain(..)
                .partition(|op| op.is_expired(now));
            shared.ready_waiters = waiting;
            for op in expired {
                let timeout_ms = op.timeout_ms();
                op.settle(Err(RuntimeError::ReadyTimeout { timeout_ms }));
            }
        }

        drop(shared);
        if let Some(supervisor) = teardown {
            thread::spawn(move || supervisor.kill());
        }
    }
}

fn run_event_loop(inner: Arc<Inner>, rx: mpsc::Receiver<LoopMessage>) {
    debug!("Runtime event loop started");
    loop {
        let wakeup = inner.shared.lock().next_wakeup();
        let message = match wakeup {
            Some(at) => match rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            },
        };

        match message {
            Some(LoopMessage::Shutdown) => break,
            Some(LoopMessage::Supervisor { generation, event }) => {
                inner.handle_event(generation, event)
            }
            Some(LoopMessage::Wake) | None => {}
        }
        inner.expire_deadlines(Instant::now());
    }
    debug!("Runtime event loop exiting");
}

/// Request/response access to one sclang interpreter
pub struct Runtime {
    inner: Arc<Inner>,
    event_loop: Option<JoinHandle<()>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let (loop_tx, loop_rx) = mpsc::channel();
        let inner = Arc::new(Inner {
            settings: Settings::from_config(&config),
            shared: Mutex::new(Shared::default()),
            subscribers: Mutex::new(Vec::new()),
            loop_tx,
        });
        let loop_inner = Arc::clone(&inner);
        let event_loop = thread::spawn(move || run_event_loop(loop_inner, loop_rx));

        Self {
            inner,
            event_loop: Some(event_loop),
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.inner.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RuntimeState::Running
    }

    /// PID of the current interpreter process, if any
    pub fn pid(&self) -> Option<u32> {
        self.inner.shared.lock().supervisor.as_ref().map(|s| s.pid())
    }

    /// Default timeout for [`Runtime::wait_for_runtime_ready`]
    pub fn ready_timeout(&self) -> Duration {
        self.inner.settings.ready_timeout
    }

    /// Receive interpreter output and exit notifications from now on
    pub fn subscribe(&self) -> async_channel::Receiver<RuntimeEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Start the interpreter and the audio server.
    ///
    /// Resolves once the server reports ready. Booting an already running
    /// runtime succeeds without doing anything.
    #[instrument(skip_all)]
    pub async fn boot(&self) -> Result<String> {
        let completion = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                RuntimeState::Running => return Ok(ALREADY_RUNNING.to_string()),
                RuntimeState::Booting => return Err(RuntimeError::AlreadyBooting),
                RuntimeState::Stopped => {}
            }

            shared.generation += 1;
            let sink = self.inner.event_sink(shared.generation);
            let supervisor = Supervisor::spawn(&self.inner.settings.supervisor, sink)?;

            shared.transition(RuntimeState::Booting, "boot requested");
            shared.runtime_ready_seen = false;
            shared.supervisor = Some(Arc::new(supervisor));
            let id = shared.next_id();
            let (op, completion) =
                PendingOperation::new(id, OperationKind::Boot, self.inner.settings.boot_timeout);
            shared.boot = Some(op);
            completion
        };
        self.inner.wake();
        pending::wait(completion).await
    }

    /// Evaluate `code` and return what it printed between the markers
    #[instrument(skip_all, fields(code_len = code.len()))]
    pub async fn execute(&self, code: &str) -> Result<String> {
        let (id, supervisor, completion) = {
            let mut shared = self.inner.shared.lock();
            if shared.state != RuntimeState::Running {
                return Err(RuntimeError::NotRunning {
                    state: shared.state,
                });
            }
            if shared.exec.is_some() {
                return Err(RuntimeError::ExecutionPending);
            }
            let Some(supervisor) = shared.supervisor.clone() else {
                return Err(RuntimeError::NotRunning {
                    state: shared.state,
                });
            };

            // Clear before the request becomes visible to the event loop
            supervisor.clear_output();
            shared.runtime_ready_seen = false;
            let id = shared.next_id();
            let (op, completion) =
                PendingOperation::new(id, OperationKind::Exec, self.inner.settings.exec_timeout);
            shared.exec = Some(op);
            (id, supervisor, completion)
        };
        self.inner.wake();

        if let Err(e) = supervisor.send(&wrap_code(code)) {
            let mut shared = self.inner.shared.lock();
            if shared.exec.as_ref().is_some_and(|op| op.id == id) {
                shared.exec.take();
            }
            return Err(e);
        }
        pending::wait(completion).await
    }

    /// Interrupt running sound. Fire-and-forget; state is unchanged.
    pub fn stop(&self) {
        self.send_command(STOP_COMMAND);
    }

    /// Free every node on the server. Fire-and-forget.
    pub fn free_all(&self) {
        self.send_command(FREE_ALL_COMMAND);
    }

    fn send_command(&self, command: &str) {
        let supervisor = self.inner.shared.lock().supervisor.clone();
        match supervisor {
            Some(supervisor) => {
                supervisor.send(command).warn_on_err();
            }
            None => debug!(command, "No interpreter running, command dropped"),
        }
    }

    /// Tear the interpreter down and cancel everything pending. Idempotent.
    #[instrument(skip_all)]
    pub async fn quit(&self) {
        let supervisor = {
            let mut shared = self.inner.shared.lock();
            shared.generation += 1;
            shared.transition(RuntimeState::Stopped, "quit");
            shared.runtime_ready_seen = false;
            shared.fail_all(|| RuntimeError::Cancelled);
            shared.supervisor.take()
        };
        self.inner.wake();

        let Some(supervisor) = supervisor else {
            return;
        };
        let (done_tx, done_rx) = async_channel::bounded(1);
        let killer = Arc::clone(&supervisor);
        thread::spawn(move || {
            killer.kill();
            let _ = done_tx.send_blocking(());
        });
        let _ = done_rx.recv().await;

        if let Some(code) = supervisor.exit_status() {
            self.inner.broadcast(RuntimeEvent::Exited { code });
        }
    }

    /// Boot when stopped, otherwise reboot the audio server in place
    pub async fn restart(&self) -> Result<String> {
        if !self.is_running() {
            return self.boot().await;
        }
        self.execute(REBOOT_COMMAND).await?;
        Ok(REBOOTED.to_string())
    }

    /// Wait for the runtime library's ready sentinel.
    ///
    /// Resolves immediately if it was already printed since the last boot or
    /// evaluation request.
    pub async fn wait_for_runtime_ready(&self, timeout: Duration) -> Result<String> {
        let completion = {
            let mut shared = self.inner.shared.lock();
            if shared.runtime_ready_seen {
                return Ok(RUNTIME_READY_MESSAGE.to_string());
            }
            if shared.state == RuntimeState::Stopped {
                return Err(RuntimeError::NotRunning {
                    state: shared.state,
                });
            }
            let id = shared.next_id();
            let (op, completion) = PendingOperation::new(id, OperationKind::ReadyWait, timeout);
            shared.ready_waiters.push(op);
            completion
        };
        self.inner.wake();
        pending::wait(completion).await
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let _ = self.inner.loop_tx.send(LoopMessage::Shutdown);
        if let Some(handle) = self.event_loop.take() {
            let _ = handle.join();
        }
        let mut shared = self.inner.shared.lock();
        shared.fail_all(|| RuntimeError::Cancelled);
        // Dropping the last handle force-kills a still running process group
        shared.supervisor.take();
    }
}

#[cfg(test)]
#[path = "../runtime_tests.rs"]
mod tests;
