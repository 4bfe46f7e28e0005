//! Structured JSONL logging plus human-readable stderr output.
//!
//! This module provides dual-output logging:
//! - **JSONL to file** (~/.sclang-runtime/logs/sclang-runtime.jsonl) - structured for tooling
//! - **Compact to stderr** - human-readable for developers
//!
//! stdout is never written to by the logger; the `serve` command owns it for
//! JSON responses.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sclang_runtime::logging;
//!
//! // Initialize logging - MUST keep guard alive for duration of program
//! let _guard = logging::init();
//!
//! tracing::info!(event_type = "runtime_lifecycle", "Runtime started");
//! ```
//!
//! # JSONL Output Format
//!
//! ```json
//! {"timestamp":"2026-01-12T10:30:45.123Z","level":"INFO","target":"sclang_runtime::runtime","fields":{"event_type":"runtime_lifecycle","from":"booting","to":"running","message":"State changed"}}
//! ```

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::protocol::log_preview;

const LOG_FILE_NAME: &str = "sclang-runtime.jsonl";

/// Guard that must be kept alive for the duration of the program.
/// Dropping this guard will flush and close the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the dual-output logging system.
///
/// Returns a guard that MUST be kept alive for the duration of the program.
/// If the log file cannot be opened, only the stderr layer is installed.
pub fn init() -> LoggingGuard {
    let log_dir = get_log_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("[LOGGING] Failed to create log directory: {}", e);
    }
    let log_path = log_dir.join(LOG_FILE_NAME);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    let file_guard = match file {
        Ok(file) => {
            // Non-blocking so reader threads never stall on disk
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file);
            let json_layer = fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_span_events(FmtSpan::NONE);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .with(stderr_layer())
                .init();
            Some(guard)
        }
        Err(e) => {
            eprintln!("[LOGGING] Failed to open log file: {}", e);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer())
                .init();
            None
        }
    };

    tracing::info!(
        event_type = "app_lifecycle",
        action = "started",
        log_path = %log_path.display(),
        "Logging initialized"
    );

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Compact human-readable layer on stderr
fn stderr_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .compact()
}

/// Get the log directory path (~/.sclang-runtime/logs/)
fn get_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".sclang-runtime").join("logs"))
        .unwrap_or_else(|| std::env::temp_dir().join("sclang-runtime-logs"))
}

/// Get the path to the JSONL log file
pub fn log_path() -> PathBuf {
    get_log_dir().join(LOG_FILE_NAME)
}

// =============================================================================
// STRUCTURED LOGGING HELPERS
// =============================================================================

/// Log a line written to sclang stdin, truncated to a preview
pub fn log_protocol_send(pid: u32, line: &str) {
    let (preview, len) = log_preview(line);
    tracing::debug!(
        event_type = "protocol_send",
        pid = pid,
        bytes = len,
        truncated = len > preview.len(),
        "→sclang {}",
        preview
    );
}

/// Log a chunk of interpreter output, truncated to a preview
pub fn log_interpreter_output(pid: u32, stream: &str, chunk: &str) {
    let (preview, len) = log_preview(chunk);
    tracing::trace!(
        event_type = "interpreter_output",
        pid = pid,
        stream = stream,
        bytes = len,
        "←sclang {}",
        preview.trim_end()
    );
}

/// Log a runtime state transition
pub fn log_lifecycle(from: &str, to: &str, reason: &str) {
    tracing::info!(
        event_type = "runtime_lifecycle",
        from = from,
        to = to,
        reason = reason,
        "State {} -> {} ({})",
        from,
        to,
        reason
    );
}

/// Log how long an operation took, warning past its threshold
pub fn log_perf(operation: &str, duration_ms: u64, threshold_ms: u64) {
    if duration_ms > threshold_ms {
        tracing::warn!(
            event_type = "performance",
            operation = operation,
            duration_ms = duration_ms,
            threshold_ms = threshold_ms,
            is_slow = true,
            "Slow operation: {} took {}ms (threshold: {}ms)",
            operation,
            duration_ms,
            threshold_ms
        );
    } else {
        tracing::debug!(
            event_type = "performance",
            operation = operation,
            duration_ms = duration_ms,
            is_slow = false,
            "Operation {} completed in {}ms",
            operation,
            duration_ms
        );
    }
}
