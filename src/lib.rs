//! sclang-runtime - request/response access to a SuperCollider interpreter
//!
//! Drives an `sclang` subprocess over its stdio pipes: source is flattened to
//! one line, wrapped in response markers, written to stdin, and the printed
//! value is recovered from the interpreter's free-form output.

pub mod config;
pub mod error;
pub mod executor;
pub mod flatten;
pub mod logging;
pub mod process_manager;
pub mod protocol;
pub mod runtime;
pub mod stdin_commands;

#[cfg(test)]
mod test_support;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use protocol::{InterpreterError, InterpreterErrorKind};
pub use runtime::{Runtime, RuntimeEvent, RuntimeState};
