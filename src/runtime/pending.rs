//! One-shot completion records for in-flight operations

use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationKind {
    Boot,
    Exec,
    ReadyWait,
}

impl OperationKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Exec => "exec",
            Self::ReadyWait => "ready_wait",
        }
    }
}

pub(crate) type Completion = async_channel::Receiver<Result<String>>;

/// An outstanding boot, evaluation or readiness wait
///
/// Settling consumes the record, so each operation completes exactly once.
/// Whoever removes it from the runtime state owns the settlement.
#[derive(Debug)]
pub(crate) struct PendingOperation {
    pub(crate) id: u64,
    pub(crate) kind: OperationKind,
    pub(crate) started: Instant,
    pub(crate) deadline: Instant,
    pub(crate) timeout: Duration,
    /// Set once an error line is seen; classification waits for this
    pub(crate) error_settle_at: Option<Instant>,
    tx: async_channel::Sender<Result<String>>,
}

impl PendingOperation {
    pub(crate) fn new(id: u64, kind: OperationKind, timeout: Duration) -> (Self, Completion) {
        let (tx, rx) = async_channel::bounded(1);
        let started = Instant::now();
        let op = Self {
            id,
            kind,
            started,
            deadline: started + timeout,
            timeout,
            error_settle_at: None,
            tx,
        };
        (op, rx)
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Earliest instant this operation needs the event loop to look at it
    pub(crate) fn next_wakeup(&self) -> Instant {
        match self.error_settle_at {
            Some(at) => at.min(self.deadline),
            None => self.deadline,
        }
    }

    pub(crate) fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    pub(crate) fn settle(self, result: Result<String>) {
        debug!(
            op_id = self.id,
            kind = self.kind.as_str(),
            ok = result.is_ok(),
            duration_ms = self.started.elapsed().as_millis() as u64,
            "Operation settled"
        );
        // Receiver gone means the caller stopped waiting; nothing to do
        let _ = self.tx.try_send(result);
    }
}

/// Await a completion; a dropped sender reads as cancellation
pub(crate) async fn wait(rx: Completion) -> Result<String> {
    rx.recv().await.unwrap_or(Err(RuntimeError::Cancelled))
}
