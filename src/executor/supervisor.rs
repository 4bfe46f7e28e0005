//! Interpreter process supervisor
//!
//! Owns one sclang process: spawns it with piped stdio, feeds every output
//! chunk from both streams into a shared [`OutputParser`], and reports what
//! it sees to an event sink. Detection events fire at most once per
//! clear-cycle of the parser.
//!
//! Threads per process:
//! - one reader per output stream (stdout, stderr)
//! - one waiter that reaps the child, drains the readers and emits `Exited`

use parking_lot::Mutex;
use std::io::{Read, Write};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use super::output_tail::{LineSplitter, OutputTail};
use super::process::ProcessHandle;
use crate::error::{Result, RuntimeError};
use crate::flatten::flatten;
use crate::logging;
use crate::process_manager::PROCESS_MANAGER;
use crate::protocol::{wrap_code, InterpreterError, OutputParser, TERMINATE_COMMAND};

/// How often the waiter polls the child for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long the waiter lets readers drain after the child exits.
/// Grandchildren (scsynth) may inherit the pipes and keep them open.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Upper bound for reaping after SIGKILL
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// What the supervisor observed; detection events follow the chunk that
/// triggered them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Raw output, re-emitted as received
    Output { stream: OutputStream, chunk: String },
    /// Interpreter banner seen
    InterpreterReady,
    /// Audio server ready sentinel seen
    ServerReady,
    /// Runtime library ready sentinel seen
    RuntimeReady,
    /// Complete marker-delimited response
    Response(String),
    /// A complete `ERROR:` line arrived
    ErrorDetected,
    /// Process reaped and output drained; `None` when killed by a signal
    Exited { code: Option<i32> },
}

pub type EventSink = Arc<dyn Fn(SupervisorEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub program: String,
    pub args: Vec<String>,
    pub kill_grace: Duration,
}

/// Which detection events already fired in the current clear-cycle
#[derive(Debug, Default)]
struct CycleFlags {
    interpreter_ready: bool,
    server_ready: bool,
    runtime_ready: bool,
    response: bool,
    error: bool,
}

#[derive(Debug, Default)]
struct OutputState {
    parser: OutputParser,
    fired: CycleFlags,
}

impl OutputState {
    fn clear(&mut self) {
        self.parser.clear();
        self.fired = CycleFlags::default();
    }

    /// Append a chunk and collect the events it newly satisfies
    fn feed(&mut self, chunk: &str) -> Vec<SupervisorEvent> {
        self.parser.append(chunk);
        let mut events = Vec::new();

        if !self.fired.interpreter_ready && self.parser.has_boot_ready() {
            self.fired.interpreter_ready = true;
            events.push(SupervisorEvent::InterpreterReady);
        }
        if !self.fired.server_ready && self.parser.has_server_ready() {
            self.fired.server_ready = true;
            events.push(SupervisorEvent::ServerReady);
        }
        if !self.fired.runtime_ready && self.parser.has_runtime_ready() {
            self.fired.runtime_ready = true;
            events.push(SupervisorEvent::RuntimeReady);
        }
        if !self.fired.error && self.parser.has_complete_error() {
            self.fired.error = true;
            events.push(SupervisorEvent::ErrorDetected);
        }
        if !self.fired.response {
            if let Some(response) = self.parser.extract_response() {
                self.fired.response = true;
                events.push(SupervisorEvent::Response(response));
            }
        }
        events
    }
}

/// A running sclang process
pub struct Supervisor {
    process: ProcessHandle,
    stdin: Mutex<Option<ChildStdin>>,
    output: Arc<Mutex<OutputState>>,
    tail: OutputTail,
    kill_grace: Duration,
}

impl Supervisor {
    /// Spawn the interpreter and start its reader and waiter threads
    #[instrument(skip_all, fields(program = %options.program))]
    pub fn spawn(options: &SupervisorOptions, sink: EventSink) -> Result<Self> {
        let mut command = Command::new(&options.program);
        command
            .args(&options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group: the child's PID becomes the PGID
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
            path: options.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let process = ProcessHandle::new(child);
        let pid = process.pid();
        info!(pid, pgid = pid, "Interpreter spawned");
        PROCESS_MANAGER.register_process(pid, &options.program);

        let output = Arc::new(Mutex::new(OutputState::default()));
        let tail = OutputTail::default();

        let mut readers = Vec::new();
        if let Some(stdout) = stdout {
            readers.push(spawn_reader(
                stdout,
                OutputStream::Stdout,
                pid,
                Arc::clone(&output),
                tail.clone(),
                Arc::clone(&sink),
            ));
        }
        if let Some(stderr) = stderr {
            readers.push(spawn_reader(
                stderr,
                OutputStream::Stderr,
                pid,
                Arc::clone(&output),
                tail.clone(),
                Arc::clone(&sink),
            ));
        }

        spawn_waiter(&process, readers, sink);

        Ok(Self {
            process,
            stdin: Mutex::new(stdin),
            output,
            tail,
            kill_grace: options.kill_grace,
        })
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn has_exited(&self) -> bool {
        self.process.has_exited()
    }

    /// Exit code once reaped; `Some(None)` means killed by a signal
    pub fn exit_status(&self) -> Option<Option<i32>> {
        self.process.exit_status()
    }

    /// Flatten `text` and write it as one line
    pub fn send(&self, text: &str) -> Result<()> {
        let line = flatten(text);
        logging::log_protocol_send(self.pid(), &line);

        let mut stdin = self.stdin.lock();
        let pipe = stdin.as_mut().ok_or_else(|| {
            RuntimeError::Stdin(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdin already closed",
            ))
        })?;
        let write_line = |pipe: &mut ChildStdin| -> std::io::Result<()> {
            pipe.write_all(line.as_bytes())?;
            pipe.write_all(b"\n")?;
            pipe.flush()
        };
        write_line(pipe).map_err(RuntimeError::Stdin)
    }

    /// Start a fresh clear-cycle and send `code` wrapped in response markers
    pub fn send_wrapped(&self, code: &str) -> Result<()> {
        self.clear_output();
        self.send(&wrap_code(code))
    }

    /// Drop accumulated output and re-arm every detection event
    pub fn clear_output(&self) {
        self.output.lock().clear();
    }

    /// Response in the current clear-cycle, if both markers arrived
    pub fn current_response(&self) -> Option<String> {
        self.output.lock().parser.extract_response()
    }

    /// Whether the runtime-ready sentinel is in the current clear-cycle
    pub fn has_runtime_ready(&self) -> bool {
        self.output.lock().parser.has_runtime_ready()
    }

    pub fn classify_error(&self) -> Option<InterpreterError> {
        self.output.lock().parser.classify_error()
    }

    /// Snapshot of the current clear-cycle's output
    pub fn buffered_output(&self) -> String {
        self.output.lock().parser.buffer().to_string()
    }

    pub fn recent_output(&self, lines: usize) -> Vec<String> {
        self.tail.last_lines(lines)
    }

    /// Ask sclang to exit, escalating to SIGKILL after the grace period.
    ///
    /// Returns once the process has been reaped. If the terminate command
    /// cannot be written the grace period is skipped.
    #[instrument(skip_all, fields(pid = self.pid()))]
    pub fn kill(&self) {
        if self.has_exited() {
            self.process.force_kill();
            return;
        }
        let start = Instant::now();

        match self.send(TERMINATE_COMMAND) {
            Ok(()) => {
                // EOF on stdin also ends sclang's read loop
                self.stdin.lock().take();
                if self.process.wait_exit(self.kill_grace).is_some() {
                    // Leader exited; sweep anything left in its group
                    self.process.force_kill();
                    info!(
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Interpreter exited after terminate command"
                    );
                    return;
                }
                warn!(
                    grace_ms = self.kill_grace.as_millis() as u64,
                    "Interpreter ignored terminate command, escalating to SIGKILL"
                );
            }
            Err(e) => {
                warn!(error = %e, "Terminate command not delivered, force killing");
                self.stdin.lock().take();
            }
        }

        self.process.force_kill();
        if self.process.wait_exit(REAP_TIMEOUT).is_none() {
            warn!("Interpreter not reaped after SIGKILL");
        } else {
            debug!(
                duration_ms = start.elapsed().as_millis() as u64,
                "Interpreter killed"
            );
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut stream: R,
    kind: OutputStream,
    pid: u32,
    output: Arc<Mutex<OutputState>>,
    tail: OutputTail,
    sink: EventSink,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        let mut pending: Vec<u8> = Vec::new();
        let mut lines = LineSplitter::default();

        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(pid, stream = kind.as_str(), error = %e, "Output read error");
                    break;
                }
            };
            pending.extend_from_slice(&buf[..n]);
            let chunk = drain_utf8(&mut pending);
            if !chunk.is_empty() {
                deliver(&chunk, kind, pid, &output, &tail, &mut lines, &sink);
            }
        }

        if !pending.is_empty() {
            let rest = String::from_utf8_lossy(&pending).into_owned();
            deliver(&rest, kind, pid, &output, &tail, &mut lines, &sink);
        }
        lines.finish(&tail);
        debug!(pid, stream = kind.as_str(), "Output reader exiting");
    })
}

fn deliver(
    chunk: &str,
    kind: OutputStream,
    pid: u32,
    output: &Mutex<OutputState>,
    tail: &OutputTail,
    lines: &mut LineSplitter,
    sink: &EventSink,
) {
    logging::log_interpreter_output(pid, kind.as_str(), chunk);
    lines.feed(chunk, tail);

    // Emitting under the lock keeps events ordered across both readers
    let mut state = output.lock();
    let events = state.feed(chunk);
    sink(SupervisorEvent::Output {
        stream: kind,
        chunk: chunk.to_string(),
    });
    for event in events {
        sink(event);
    }
}

/// Decode the longest valid UTF-8 prefix, keeping an incomplete trailing
/// sequence for the next read. Invalid bytes become U+FFFD.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + bad);
                    }
                }
            }
        }
    }
}

fn spawn_waiter(process: &ProcessHandle, readers: Vec<JoinHandle<()>>, sink: EventSink) {
    let child = process.child();
    let exit = process.exit_latch();
    let pid = process.pid();

    thread::spawn(move || {
        let code = loop {
            let status = child.lock().try_wait();
            match status {
                Ok(Some(status)) => break status.code(),
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(e) => {
                    warn!(pid, error = %e, "Failed to poll interpreter status");
                    break None;
                }
            }
        };

        exit.set(code);
        PROCESS_MANAGER.unregister_process(pid);
        info!(pid, exit_code = ?code, "Interpreter exited");

        let deadline = Instant::now() + READER_DRAIN_TIMEOUT;
        for reader in &readers {
            while !reader.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
        }
        if readers.iter().any(|r| !r.is_finished()) {
            debug!(pid, "Output pipes still open after exit, not waiting further");
        }

        sink(SupervisorEvent::Exited { code });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_utf8_keeps_incomplete_tail() {
        let bytes = "é".as_bytes();
        let mut pending = vec![b'a', bytes[0]];
        assert_eq!(drain_utf8(&mut pending), "a");
        assert_eq!(pending, vec![bytes[0]]);

        pending.push(bytes[1]);
        assert_eq!(drain_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_drain_utf8_replaces_invalid_bytes() {
        let mut pending = vec![b'o', 0xff, b'k'];
        assert_eq!(drain_utf8(&mut pending), "o\u{FFFD}k");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_events_fire_once_per_cycle() {
        let mut state = OutputState::default();
        assert_eq!(
            state.feed("Welcome to SuperCollider 3.13\n"),
            vec![SupervisorEvent::InterpreterReady]
        );
        assert!(state.feed("Welcome to SuperCollider again\n").is_empty());

        state.clear();
        assert_eq!(
            state.feed("Welcome to SuperCollider\n"),
            vec![SupervisorEvent::InterpreterReady]
        );
    }

    #[test]
    fn test_response_split_across_chunks() {
        let mut state = OutputState::default();
        assert!(state.feed(">>>BEGIN>>>\n2\n<<<EN").is_empty());
        assert_eq!(
            state.feed("D<<<\n"),
            vec![SupervisorEvent::Response("2".to_string())]
        );
        assert!(state.feed(">>>BEGIN>>>\n3\n<<<END<<<\n").is_empty());
    }

    #[test]
    fn test_error_waits_for_complete_line() {
        let mut state = OutputState::default();
        assert!(state.feed("ERROR: Message 'x' not").is_empty());
        assert_eq!(
            state.feed(" understood.\n"),
            vec![SupervisorEvent::ErrorDetected]
        );
    }

    #[test]
    fn test_error_precedes_response_in_same_chunk() {
        let mut state = OutputState::default();
        let events = state.feed(">>>BEGIN>>>\nERROR: boom\n<<<END<<<\n");
        assert_eq!(
            events,
            vec![
                SupervisorEvent::ErrorDetected,
                SupervisorEvent::Response("ERROR: boom".to_string()),
            ]
        );
    }
}
