//! External command handling via stdin.
//!
//! `sclang-runtime serve` is driven by JSONL commands on stdin and answers
//! each one with a single JSON line on stdout.
//!
//! # Protocol
//!
//! ```json
//! {"type": "boot"}
//! {"type": "execute", "code": "1 + 1", "requestId": "req-1"}
//! {"type": "stop"}
//! {"type": "freeAll"}
//! {"type": "waitReady", "timeoutMs": 5000}
//! {"type": "restart"}
//! {"type": "status"}
//! {"type": "quit"}
//! ```
//!
//! # Example Usage
//!
//! ```bash
//! printf '%s\n' '{"type":"boot"}' '{"type":"execute","code":"1+1"}' '{"type":"quit"}' \
//!   | sclang-runtime serve
//! ```

use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::RuntimeError;
use crate::runtime::{Runtime, RuntimeState};

/// Commands accepted on stdin
///
/// All commands support an optional `requestId` field for correlation.
/// When absent a fresh id is generated so every response can be matched
/// to its line in the log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExternalCommand {
    /// Start the interpreter and audio server
    Boot {
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    /// Evaluate code and return its printed value
    Execute {
        code: String,
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    /// Stop all sound
    Stop {
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    /// Free every server node
    FreeAll {
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    /// Shut the interpreter down
    Quit {
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    /// Boot if stopped, reboot the server otherwise
    Restart {
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    /// Report the lifecycle state
    Status {
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
    /// Wait for the runtime library's ready sentinel
    WaitReady {
        #[serde(default, rename = "timeoutMs")]
        timeout_ms: Option<u64>,
        #[serde(default, rename = "requestId")]
        request_id: Option<String>,
    },
}

impl ExternalCommand {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Boot { request_id }
            | Self::Execute { request_id, .. }
            | Self::Stop { request_id }
            | Self::FreeAll { request_id }
            | Self::Quit { request_id }
            | Self::Restart { request_id }
            | Self::Status { request_id }
            | Self::WaitReady { request_id, .. } => request_id.as_deref(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Boot { .. } => "boot",
            Self::Execute { .. } => "execute",
            Self::Stop { .. } => "stop",
            Self::FreeAll { .. } => "freeAll",
            Self::Quit { .. } => "quit",
            Self::Restart { .. } => "restart",
            Self::Status { .. } => "status",
            Self::WaitReady { .. } => "waitReady",
        }
    }
}

/// One JSON line written back for every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub request_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error code, see [`RuntimeError::code`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub state: RuntimeState,
}

impl CommandResponse {
    fn from_result(
        request_id: String,
        result: crate::error::Result<String>,
        state: RuntimeState,
    ) -> Self {
        match result {
            Ok(value) => Self {
                request_id,
                ok: true,
                result: Some(value),
                error: None,
                code: None,
                state,
            },
            Err(err) => Self {
                request_id,
                ok: false,
                result: None,
                error: Some(err.user_message()),
                code: Some(err.code()),
                state,
            },
        }
    }

    /// Response for a line that did not parse as a command
    pub fn invalid(line: &str, error: &serde_json::Error, state: RuntimeState) -> Self {
        let request_id = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|v| v.get("requestId")?.as_str().map(str::to_string))
            .unwrap_or_else(new_request_id);
        Self {
            request_id,
            ok: false,
            result: None,
            error: Some(format!("Invalid command: {}", error)),
            code: Some("invalid_command"),
            state,
        }
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Lines read from stdin: parsed commands, or the raw line and why it failed
#[derive(Debug)]
pub enum IncomingLine {
    Command(ExternalCommand),
    Invalid {
        line: String,
        error: serde_json::Error,
    },
}

/// Run `command` against `runtime` and build its response
pub async fn dispatch(runtime: &Runtime, command: ExternalCommand) -> CommandResponse {
    let request_id = command
        .request_id()
        .map(str::to_string)
        .unwrap_or_else(new_request_id);
    info!(request_id = %request_id, command = command.name(), "Handling command");

    let result = match command {
        ExternalCommand::Boot { .. } => runtime.boot().await,
        ExternalCommand::Execute { code, .. } => runtime.execute(&code).await,
        ExternalCommand::Stop { .. } => {
            runtime.stop();
            Ok("Stopped all sounds".to_string())
        }
        ExternalCommand::FreeAll { .. } => {
            runtime.free_all();
            Ok("Freed all nodes".to_string())
        }
        ExternalCommand::Quit { .. } => {
            runtime.quit().await;
            Ok("SuperCollider quit".to_string())
        }
        ExternalCommand::Restart { .. } => runtime.restart().await,
        ExternalCommand::Status { .. } => Ok(runtime.state().to_string()),
        ExternalCommand::WaitReady { timeout_ms, .. } => {
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| runtime.ready_timeout());
            runtime.wait_for_runtime_ready(timeout).await
        }
    };

    if let Err(err) = &result {
        log_failure(&request_id, err);
    }
    CommandResponse::from_result(request_id, result, runtime.state())
}

/// Log a failed command at the level its severity calls for
fn log_failure(request_id: &str, err: &RuntimeError) -> tracing::Level {
    let level = err.severity().log_level();
    let code = err.code();
    match level {
        tracing::Level::ERROR => error!(request_id, code, error = %err, "Command failed"),
        tracing::Level::WARN => warn!(request_id, code, error = %err, "Command failed"),
        _ => debug!(request_id, code, error = %err, "Command rejected"),
    }
    level
}

/// Start a thread that reads JSONL commands from `reader`.
/// Returns an async_channel::Receiver that can be awaited without polling.
///
/// Uses a bounded channel with capacity of 100; the reader blocks while a
/// slow command is in progress. The thread exits at end of input or when
/// the receiver is dropped.
pub fn start_listener<R>(reader: R) -> async_channel::Receiver<IncomingLine>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = async_channel::bounded(100);

    std::thread::spawn(move || {
        debug!("External command listener started");
        for line in reader.lines() {
            let line = match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Error reading stdin");
                    break;
                }
            };
            debug!(line = %line, "Received command line");
            let incoming = match serde_json::from_str::<ExternalCommand>(&line) {
                Ok(cmd) => IncomingLine::Command(cmd),
                Err(error) => {
                    warn!(error = %error, "Failed to parse command");
                    IncomingLine::Invalid { line, error }
                }
            };
            // send_blocking is used since we're in a sync thread
            if tx.send_blocking(incoming).is_err() {
                debug!("Command channel closed, exiting");
                break;
            }
        }
        debug!("External command listener exiting");
    });

    rx
}

/// [`start_listener`] on the process's stdin
pub fn start_stdin_listener() -> async_channel::Receiver<IncomingLine> {
    start_listener(stdin_reader())
}

/// Buffered stdin that can move to the listener thread; `StdinLock` is not `Send`
fn stdin_reader() -> std::io::BufReader<std::io::Stdin> {
    std::io::BufReader::new(std::io::stdin())
}
