use super::*;
use crate::error::RuntimeError;
use crate::protocol::InterpreterErrorKind;
use crate::test_support::{FakeInterpreter, STUBBORN_SCLANG};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn spawn_fake(fake: &FakeInterpreter) -> (Supervisor, mpsc::Receiver<SupervisorEvent>) {
    let (tx, rx) = mpsc::channel();
    let sink: EventSink = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    let supervisor = Supervisor::spawn(&fake.supervisor_options(), sink).unwrap();
    (supervisor, rx)
}

/// Skip events until one matches, or give up after `timeout`
fn wait_for(
    rx: &mpsc::Receiver<SupervisorEvent>,
    matches: impl Fn(&SupervisorEvent) -> bool,
    timeout: Duration,
) -> Option<SupervisorEvent> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn wait_ready(rx: &mpsc::Receiver<SupervisorEvent>) {
    assert!(
        wait_for(rx, |e| *e == SupervisorEvent::InterpreterReady, EVENT_TIMEOUT).is_some(),
        "banner should be detected"
    );
}

#[cfg(unix)]
#[test]
fn test_spawn_reports_banner_and_raw_output() {
    let fake = FakeInterpreter::new();
    let (supervisor, rx) = spawn_fake(&fake);

    let output = wait_for(
        &rx,
        |e| matches!(e, SupervisorEvent::Output { stream: OutputStream::Stdout, chunk } if chunk.contains("compiling")),
        EVENT_TIMEOUT,
    );
    assert!(output.is_some(), "raw output should be re-emitted");
    wait_ready(&rx);
    assert!(supervisor.pid() > 0);
    supervisor.kill();
}

#[cfg(unix)]
#[test]
fn test_boot_command_reports_server_ready() {
    let fake = FakeInterpreter::new();
    let (supervisor, rx) = spawn_fake(&fake);
    wait_ready(&rx);

    supervisor.send(crate::protocol::BOOT_COMMAND).unwrap();
    assert!(wait_for(&rx, |e| *e == SupervisorEvent::ServerReady, EVENT_TIMEOUT).is_some());
    supervisor.kill();
}

#[cfg(unix)]
#[test]
fn test_send_wrapped_yields_response() {
    let fake = FakeInterpreter::new();
    let (supervisor, rx) = spawn_fake(&fake);
    wait_ready(&rx);

    // Multi-line source with a trailing comment still goes out as one line
    supervisor.send_wrapped("1 + 1 // sum\n").unwrap();
    let event = wait_for(&rx, |e| matches!(e, SupervisorEvent::Response(_)), EVENT_TIMEOUT);
    assert_eq!(event, Some(SupervisorEvent::Response("2".to_string())));
    assert_eq!(supervisor.current_response().as_deref(), Some("2"));
    supervisor.kill();
}

#[cfg(unix)]
#[test]
fn test_send_wrapped_clears_previous_cycle() {
    let fake = FakeInterpreter::new();
    let (supervisor, rx) = spawn_fake(&fake);
    wait_ready(&rx);
    assert!(supervisor.buffered_output().contains("Welcome"));

    supervisor.send_wrapped("1+1").unwrap();
    assert!(wait_for(&rx, |e| matches!(e, SupervisorEvent::Response(_)), EVENT_TIMEOUT).is_some());
    let first = supervisor.buffered_output();
    assert!(!first.contains("Welcome"), "send_wrapped starts a new cycle");
    assert!(first.contains('2'));

    supervisor.send_wrapped("bogusMethodCall").unwrap();
    assert!(wait_for(&rx, |e| *e == SupervisorEvent::ErrorDetected, EVENT_TIMEOUT).is_some());

    let buffered = supervisor.buffered_output();
    assert!(!buffered.contains("Welcome"), "banner belongs to an earlier cycle");
    assert!(!buffered.contains("<<<END<<<"), "old END marker must be gone");
    assert_eq!(supervisor.current_response(), None);
    assert_eq!(
        supervisor.classify_error().map(|e| e.kind),
        Some(InterpreterErrorKind::NotUnderstood)
    );
    supervisor.kill();
}

#[cfg(unix)]
#[test]
fn test_runtime_ready_is_scoped_to_cycle() {
    let fake = FakeInterpreter::new();
    let (supervisor, rx) = spawn_fake(&fake);
    wait_ready(&rx);

    supervisor.send_wrapped("loadRuntime").unwrap();
    assert!(wait_for(&rx, |e| *e == SupervisorEvent::RuntimeReady, EVENT_TIMEOUT).is_some());
    assert!(supervisor.has_runtime_ready());

    supervisor.clear_output();
    assert!(!supervisor.has_runtime_ready());
    supervisor.kill();
}

#[cfg(unix)]
#[test]
fn test_crash_emits_exited_with_code() {
    let fake = FakeInterpreter::new();
    let (supervisor, rx) = spawn_fake(&fake);
    wait_ready(&rx);

    supervisor.send("crashNow").unwrap();
    let event = wait_for(&rx, |e| matches!(e, SupervisorEvent::Exited { .. }), EVENT_TIMEOUT);
    assert_eq!(event, Some(SupervisorEvent::Exited { code: Some(3) }));
    assert!(supervisor.has_exited());
    assert!(supervisor
        .recent_output(10)
        .iter()
        .any(|line| line == "Segmentation fault"));
}

#[cfg(unix)]
#[test]
fn test_kill_with_terminate_command() {
    let fake = FakeInterpreter::new();
    let (supervisor, rx) = spawn_fake(&fake);
    wait_ready(&rx);

    supervisor.kill();
    assert_eq!(supervisor.exit_status(), Some(Some(0)));
    assert!(wait_for(&rx, |e| matches!(e, SupervisorEvent::Exited { .. }), EVENT_TIMEOUT).is_some());

    // Idempotent, and stdin is gone afterwards
    supervisor.kill();
    assert!(matches!(
        supervisor.send("1+1"),
        Err(RuntimeError::Stdin(_))
    ));
}

#[cfg(unix)]
#[test]
fn test_kill_escalates_after_grace_period() {
    let fake = FakeInterpreter::with_script(STUBBORN_SCLANG);
    let (supervisor, _rx) = spawn_fake(&fake);
    let grace = fake.supervisor_options().kill_grace;

    let start = Instant::now();
    supervisor.kill();
    assert!(start.elapsed() >= grace, "grace period should be honored");
    assert!(supervisor.has_exited());
    // Killed by signal: no exit code
    assert_eq!(supervisor.exit_status(), Some(None));
}

#[test]
fn test_spawn_missing_program_fails() {
    let options = SupervisorOptions {
        program: "/nonexistent/path/to/sclang".to_string(),
        args: vec![],
        kill_grace: Duration::from_millis(10),
    };
    let sink: EventSink = Arc::new(|_| {});
    match Supervisor::spawn(&options, sink) {
        Err(RuntimeError::Spawn { path, .. }) => assert_eq!(path, options.program),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("spawn should fail"),
    }
}

#[cfg(unix)]
#[test]
fn test_dropping_supervisor_kills_process_group() {
    let fake = FakeInterpreter::with_script(STUBBORN_SCLANG);
    let (supervisor, _rx) = spawn_fake(&fake);
    let pid = supervisor.pid();
    assert!(process_group_alive(pid));

    drop(supervisor);
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while process_group_alive(pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!process_group_alive(pid));
}
