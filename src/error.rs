use thiserror::Error;
use tracing::{error, warn};

use crate::protocol::InterpreterError;
use crate::runtime::RuntimeState;

/// Error severity for callers deciding how loudly to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,     // caller sequencing, nothing happened
    Warning,  // recoverable, retry later
    Error,    // operation failed
    Critical, // interpreter process is gone
}

impl ErrorSeverity {
    /// Level a failure of this severity is logged at
    pub fn log_level(self) -> tracing::Level {
        match self {
            Self::Info => tracing::Level::DEBUG,
            Self::Warning => tracing::Level::WARN,
            Self::Error | Self::Critical => tracing::Level::ERROR,
        }
    }
}

/// Errors surfaced by the runtime bridge
///
/// Every pending operation settles with exactly one of these or a success.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("SuperCollider is not running (state: {state}). Call boot() first.")]
    NotRunning { state: RuntimeState },

    #[error("SuperCollider is already booting")]
    AlreadyBooting,

    #[error("Another evaluation is still pending; wait for it before sending more code")]
    ExecutionPending,

    #[error("SuperCollider boot timed out after {timeout_ms}ms")]
    BootTimeout { timeout_ms: u64 },

    #[error("Execution timed out after {timeout_ms}ms")]
    ExecTimeout { timeout_ms: u64 },

    #[error("Timed out after {timeout_ms}ms waiting for the runtime to report ready")]
    ReadyTimeout { timeout_ms: u64 },

    #[error("Failed to start sclang at '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sclang process exited unexpectedly ({}){}", describe_exit(.code), describe_tail(.recent_output))]
    ProcessExited {
        code: Option<i32>,
        /// Last lines the interpreter printed before it died
        recent_output: Vec<String>,
    },

    #[error("Operation cancelled: SuperCollider was shut down")]
    Cancelled,

    #[error("{0}")]
    Interpreter(#[from] InterpreterError),

    #[error("Failed to write to sclang stdin: {0}")]
    Stdin(#[source] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn describe_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("\nLast output:\n{}", lines.join("\n"))
    }
}

impl RuntimeError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotRunning { .. } | Self::AlreadyBooting | Self::ExecutionPending => {
                ErrorSeverity::Info
            }
            Self::BootTimeout { .. } | Self::ExecTimeout { .. } | Self::ReadyTimeout { .. } => {
                ErrorSeverity::Warning
            }
            Self::Cancelled => ErrorSeverity::Warning,
            Self::Interpreter(_) | Self::Stdin(_) => ErrorSeverity::Error,
            Self::Spawn { .. } | Self::ProcessExited { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether the caller may simply try the same operation again.
    ///
    /// The core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyBooting
                | Self::ExecutionPending
                | Self::BootTimeout { .. }
                | Self::ExecTimeout { .. }
                | Self::ReadyTimeout { .. }
        )
    }

    /// Short machine-readable name for responses and logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotRunning { .. } => "not_running",
            Self::AlreadyBooting => "already_booting",
            Self::ExecutionPending => "execution_pending",
            Self::BootTimeout { .. } => "boot_timeout",
            Self::ExecTimeout { .. } => "exec_timeout",
            Self::ReadyTimeout { .. } => "ready_timeout",
            Self::Spawn { .. } => "spawn_failed",
            Self::ProcessExited { .. } => "process_exited",
            Self::Cancelled => "cancelled",
            Self::Interpreter(_) => "interpreter_error",
            Self::Stdin(_) => "stdin_write_failed",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Interpreter(err) => err.describe(),
            Self::Spawn { path, .. } => format!(
                "Could not start sclang at '{}'. Set SCLANG_PATH to your SuperCollider installation.",
                path
            ),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is best-effort and the caller does not need to know.
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}
