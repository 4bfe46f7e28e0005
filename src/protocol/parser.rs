//! Accumulating parser over interpreter output
//!
//! The parser owns one buffer holding everything sclang printed on stdout and
//! stderr since the last [`OutputParser::clear`]. All queries read the whole
//! buffer and have no side effects, so they can be repeated in any order
//! after every chunk.
//!
//! The buffer is cleared at the start of every boot attempt and every
//! evaluation request. Markers and error lines are only meaningful relative
//! to the current clear-to-now window; a marker left over from an earlier
//! request can never be matched against a later one.

use super::errors::{self, InterpreterError};
use super::markers::{
    BEGIN_MARKER, EMPTY_RESPONSE, END_MARKER, INTERPRETER_BANNER, RUNTIME_READY, SERVER_READY,
};

#[derive(Debug, Default, Clone)]
pub struct OutputParser {
    buffer: String,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// sclang finished compiling its class library and reads stdin
    pub fn has_boot_ready(&self) -> bool {
        self.buffer.contains(INTERPRETER_BANNER)
    }

    /// The audio server finished booting
    pub fn has_server_ready(&self) -> bool {
        self.buffer.contains(SERVER_READY)
    }

    /// The runtime library finished (re)initializing
    pub fn has_runtime_ready(&self) -> bool {
        self.buffer.contains(RUNTIME_READY)
    }

    /// Text between the first BEGIN marker and the next END marker after it.
    ///
    /// Returns `None` until both markers are present; an empty span becomes
    /// `"OK"` so a statement without output still reads as success.
    pub fn extract_response(&self) -> Option<String> {
        let begin = self.buffer.find(BEGIN_MARKER)?;
        let start = begin + BEGIN_MARKER.len();
        let end = start + self.buffer[start..].find(END_MARKER)?;
        let response = self.buffer[start..end].trim();
        if response.is_empty() {
            Some(EMPTY_RESPONSE.to_string())
        } else {
            Some(response.to_string())
        }
    }

    pub fn has_error(&self) -> bool {
        errors::contains_error(&self.buffer)
    }

    /// An error line was seen and its message line is complete
    pub fn has_complete_error(&self) -> bool {
        errors::error_line_complete(&self.buffer)
    }

    pub fn classify_error(&self) -> Option<InterpreterError> {
        errors::classify(&self.buffer)
    }

    pub fn format_error(&self) -> Option<String> {
        self.classify_error().map(|err| err.describe())
    }
}
