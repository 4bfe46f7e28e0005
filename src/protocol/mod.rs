//! Text protocol spoken with sclang over stdin/stdout
//!
//! - `markers` - sentinels, injected markers and fixed commands
//! - `parser` - `OutputParser`, the accumulating output buffer
//! - `errors` - heuristic classification of `ERROR:` output

mod errors;
mod markers;
mod parser;

pub use errors::{classify, InterpreterError, InterpreterErrorKind};
pub use markers::*;
pub use parser::OutputParser;

/// Maximum length of protocol text in logs
const MAX_LOG_PREVIEW: usize = 200;

/// Truncated preview of protocol text for logging, with the full byte length
pub fn log_preview(raw: &str) -> (&str, usize) {
    let len = raw.len();
    if len > MAX_LOG_PREVIEW {
        let mut cut = MAX_LOG_PREVIEW;
        while !raw.is_char_boundary(cut) {
            cut -= 1;
        }
        (&raw[..cut], len)
    } else {
        (raw, len)
    }
}
