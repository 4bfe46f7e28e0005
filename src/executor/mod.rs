//! Interpreter process execution
//!
//! This module handles everything below the runtime state machine:
//! - Spawning sclang in its own process group and tearing it down
//! - Reading both output streams into the protocol parser
//! - Keeping a tail of recent output for crash reports

mod output_tail;
mod process;
mod supervisor;

pub use output_tail::OutputTail;
pub use process::{force_kill_group, process_group_alive, ProcessHandle};
pub use supervisor::{EventSink, OutputStream, Supervisor, SupervisorEvent, SupervisorOptions};

#[cfg(test)]
#[path = "../executor_tests.rs"]
mod tests;
