//! Interpreter error detection
//!
//! sclang reports errors as free-form text. A runtime error looks like
//!
//! ```text
//! ERROR: Message 'bogus' not understood.
//! RECEIVER:
//!    nil
//! ```
//!
//! and a parse error carries a position and a caret under the offending
//! token:
//!
//! ```text
//! ERROR: syntax error, unexpected NAME, expecting $end
//!   in interpreted text
//!   line 1 char 5:
//!
//!   foo bar
//!       ^^^
//! ```
//!
//! Classification is heuristic substring matching over the first `ERROR:`
//! line. An unrecognized phrasing falls into [`InterpreterErrorKind::Unknown`];
//! a missing kind never means "no error". Nothing is classified unless an
//! `ERROR:` line is actually present.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use super::markers::ERROR_PREFIX;

static POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"line (\d+) char (\d+)").expect("position regex is valid"));

static CARET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\^+\s*$").expect("caret regex is valid"));

/// Coarse class of an interpreter error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterErrorKind {
    Syntax,
    NotUnderstood,
    PrimitiveFailed,
    Unknown,
}

impl InterpreterErrorKind {
    /// Classify an error message (the text after `ERROR:`)
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("syntax error") || lower.contains("parse failed") {
            Self::Syntax
        } else if lower.contains("not understood") {
            Self::NotUnderstood
        } else if lower.contains("primitive") && lower.contains("failed") {
            Self::PrimitiveFailed
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for InterpreterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Syntax => "syntax error",
            Self::NotUnderstood => "not understood",
            Self::PrimitiveFailed => "primitive failed",
            Self::Unknown => "unknown error",
        };
        f.write_str(label)
    }
}

/// An error reported by sclang while evaluating code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{}", self.describe())]
pub struct InterpreterError {
    pub kind: InterpreterErrorKind,
    /// Text following `ERROR:` on the first error line
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Offending source line followed by its caret line
    pub context: Option<String>,
}

impl InterpreterError {
    /// Human-readable diagnostic: message, position and source context
    pub fn describe(&self) -> String {
        let mut text = format!("{} {}", ERROR_PREFIX, self.message);
        if let (Some(line), Some(column)) = (self.line, self.column) {
            text.push_str(&format!(" (line {}, char {})", line, column));
        }
        if let Some(context) = &self.context {
            text.push('\n');
            text.push_str(context);
        }
        text
    }
}

/// Find the first line starting with `ERROR:`; returns its byte offset and text
fn find_error_line(output: &str) -> Option<(usize, &str)> {
    let mut offset = 0;
    for raw in output.split_inclusive('\n') {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.starts_with(ERROR_PREFIX) {
            return Some((offset, line));
        }
        offset += raw.len();
    }
    None
}

/// Whether the output contains an interpreter error line
pub fn contains_error(output: &str) -> bool {
    find_error_line(output).is_some()
}

/// Whether the first error line has been fully received (newline-terminated)
pub fn error_line_complete(output: &str) -> bool {
    match find_error_line(output) {
        Some((offset, line)) => output[offset + line.len()..].starts_with(['\r', '\n']),
        None => false,
    }
}

/// Build an [`InterpreterError`] from accumulated output, if one was reported
pub fn classify(output: &str) -> Option<InterpreterError> {
    let (offset, error_line) = find_error_line(output)?;
    let message = error_line[ERROR_PREFIX.len()..].trim().to_string();
    let kind = InterpreterErrorKind::from_message(&message);
    let tail = &output[offset..];

    let (line, column) = POSITION_RE
        .captures(tail)
        .map(|caps| (caps[1].parse().ok(), caps[2].parse().ok()))
        .unwrap_or((None, None));

    Some(InterpreterError {
        kind,
        message,
        line,
        column,
        context: caret_context(tail),
    })
}

/// The non-blank line directly above the first caret line, plus the caret
fn caret_context(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let caret_index = lines.iter().position(|line| CARET_RE.is_match(line))?;
    let source = lines[..caret_index]
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty())?;
    Some(format!(
        "{}\n{}",
        source.trim_end(),
        lines[caret_index].trim_end()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNTAX_OUTPUT: &str = "ERROR: syntax error, unexpected NAME, expecting $end\n  in interpreted text\n  line 1 char 5:\n\n  foo bar\n      ^^^\n-----------------------------------\nERROR: Command line parse failed\n";

    #[test]
    fn test_no_error_without_prefix() {
        assert!(classify("-> 2\nsyntax error but not reported\n").is_none());
        assert!(!contains_error("a message not understood"));
    }

    #[test]
    fn test_prefix_must_start_a_line() {
        assert!(!contains_error("posted: ERROR: inside text\n"));
        assert!(contains_error("first\nERROR: real\n"));
    }

    #[test]
    fn test_not_understood() {
        let err = classify("ERROR: Message 'bogusMethodCall' not understood.\nRECEIVER:\n   nil\n")
            .unwrap();
        assert_eq!(err.kind, InterpreterErrorKind::NotUnderstood);
        assert_eq!(err.message, "Message 'bogusMethodCall' not understood.");
        assert_eq!(err.line, None);
        assert_eq!(err.context, None);
    }

    #[test]
    fn test_syntax_error_with_position_and_context() {
        let err = classify(SYNTAX_OUTPUT).unwrap();
        assert_eq!(err.kind, InterpreterErrorKind::Syntax);
        assert_eq!(err.message, "syntax error, unexpected NAME, expecting $end");
        assert_eq!(err.line, Some(1));
        assert_eq!(err.column, Some(5));
        assert_eq!(err.context.as_deref(), Some("  foo bar\n      ^^^"));
    }

    #[test]
    fn test_primitive_failed() {
        let err = classify("ERROR: Primitive '_BasicAt' failed.\nIndex not an Integer\n").unwrap();
        assert_eq!(err.kind, InterpreterErrorKind::PrimitiveFailed);
    }

    #[test]
    fn test_unknown_phrasing() {
        let err = classify("ERROR: something odd happened\n").unwrap();
        assert_eq!(err.kind, InterpreterErrorKind::Unknown);
    }

    #[test]
    fn test_describe_includes_position_and_context() {
        let text = classify(SYNTAX_OUTPUT).unwrap().describe();
        assert!(text.starts_with("ERROR: syntax error"));
        assert!(text.contains("(line 1, char 5)"));
        assert!(text.ends_with("  foo bar\n      ^^^"));
    }

    #[test]
    fn test_error_line_completion() {
        assert!(!error_line_complete("ERROR: Message 'x' not und"));
        assert!(error_line_complete("ERROR: Message 'x' not understood.\n"));
        assert!(error_line_complete("ERROR: Message 'x' not understood.\r\n"));
        assert!(!error_line_complete("no error\n"));
    }
}
