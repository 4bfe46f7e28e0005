//! Ring buffer of recent interpreter output
//!
//! Keeps the last lines sclang printed on either stream so an unexpected
//! exit can be reported with context. Bounded by line count and by an
//! approximate byte budget, evicting oldest first.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default maximum number of lines to keep
pub const DEFAULT_MAX_LINES: usize = 200;

/// Default maximum total bytes to keep (16KB)
pub const DEFAULT_MAX_BYTES: usize = 16 * 1024;

#[derive(Debug, Default)]
struct TailState {
    lines: VecDeque<String>,
    bytes: usize,
}

/// Thread-safe tail of output lines; clones share the same buffer
#[derive(Debug, Clone)]
pub struct OutputTail {
    state: Arc<Mutex<TailState>>,
    max_lines: usize,
    max_bytes: usize,
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES, DEFAULT_MAX_BYTES)
    }
}

impl OutputTail {
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(TailState::default())),
            max_lines: max_lines.max(1),
            max_bytes,
        }
    }

    pub fn push_line(&self, line: String) {
        let line_bytes = line.len();
        let mut state = self.state.lock();

        while !state.lines.is_empty()
            && (state.bytes + line_bytes > self.max_bytes || state.lines.len() >= self.max_lines)
        {
            if let Some(old) = state.lines.pop_front() {
                state.bytes = state.bytes.saturating_sub(old.len());
            }
        }

        state.bytes += line_bytes;
        state.lines.push_back(line);
    }

    /// The last `n` lines, oldest first
    pub fn last_lines(&self, n: usize) -> Vec<String> {
        let state = self.state.lock();
        let skip = state.lines.len().saturating_sub(n);
        state.lines.iter().skip(skip).cloned().collect()
    }

    pub fn contents(&self) -> String {
        let state = self.state.lock();
        state.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    pub fn len(&self) -> usize {
        self.state.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().lines.is_empty()
    }
}

/// Splits a chunked stream into lines for an [`OutputTail`]
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    partial: String,
}

impl LineSplitter {
    /// Feed a chunk; completed lines go to the tail
    pub(crate) fn feed(&mut self, chunk: &str, tail: &OutputTail) {
        self.partial.push_str(chunk);
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            tail.push_line(line.trim_end_matches(['\r', '\n']).to_string());
        }
    }

    /// Flush an unterminated last line at end of stream
    pub(crate) fn finish(&mut self, tail: &OutputTail) {
        if !self.partial.is_empty() {
            tail.push_line(std::mem::take(&mut self.partial));
        }
    }
}
