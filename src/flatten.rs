//! Single-line rewriting of sclang source
//!
//! sclang reads its stdin one physical line at a time and evaluates every
//! line on its own. Multi-line code therefore has to be collapsed onto one
//! line before it is written to the interpreter. Doing that naively breaks
//! programs in two ways:
//!
//! - a `//` comment would swallow everything that follows it on the line
//! - collapsing whitespace inside a string literal changes its value
//!
//! This module runs a small lexical scan (no grammar) that drops comments,
//! keeps string/symbol/character literals intact, and folds every run of
//! whitespace between tokens into a single space.
//!
//! ```
//! use sclang_runtime::flatten::flatten;
//!
//! let code = "x = 1; // first\ny = 2;";
//! assert_eq!(flatten(code), "x = 1; y = 2;");
//! ```

use std::borrow::Cow;

/// Lexical class of a span of source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A run of whitespace, newlines included
    Whitespace,
    /// `"..."` with backslash escapes
    String,
    /// `'...'`, no escape processing
    QuotedSymbol,
    /// `\name`
    BarewordSymbol,
    /// `$x` or `$\x`
    CharacterLiteral,
    /// Anything else, copied verbatim
    Code,
}

/// A classified span of source text
///
/// Whitespace tokens carry no text; they always flatten to a single space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: String) -> Self {
        Self { kind, text }
    }

    fn whitespace() -> Self {
        Self {
            kind: TokenKind::Whitespace,
            text: String::new(),
        }
    }

    /// Text this token contributes to the flattened line
    fn emitted(&self) -> Cow<'_, str> {
        match self.kind {
            TokenKind::Whitespace => Cow::Borrowed(" "),
            TokenKind::String | TokenKind::QuotedSymbol if self.text.contains('\n') => {
                Cow::Owned(self.text.replace('\n', "\\n"))
            }
            // `$` + newline and `$\` + newline both denote the newline character
            TokenKind::CharacterLiteral if self.text.ends_with('\n') => Cow::Borrowed("$\\n"),
            _ => Cow::Borrowed(&self.text),
        }
    }
}

fn is_symbol_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn starts_comment(chars: &[char], i: usize) -> bool {
    chars[i] == '/' && matches!(chars.get(i + 1), Some('/') | Some('*'))
}

/// Characters that end a run of plain code
fn is_code_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '"' | '\'' | '$' | '\\')
}

/// Split source into classified tokens. Comments produce no tokens.
///
/// Never fails: unterminated strings, symbols and comments run to the end of
/// input, and a character that fits no other class is kept as code.
pub fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        // Line comment: drop through end of line, keep the newline itself
        if c == '/' && next == Some('/') {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c == '/' && next == Some('*') {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i = (i + 2).min(len);
            continue;
        }

        if c == '"' {
            let mut text = String::from('"');
            i += 1;
            while i < len {
                match chars[i] {
                    '\\' => {
                        text.push('\\');
                        if let Some(&escaped) = chars.get(i + 1) {
                            text.push(escaped);
                        }
                        i += 2;
                    }
                    '"' => {
                        text.push('"');
                        i += 1;
                        break;
                    }
                    other => {
                        text.push(other);
                        i += 1;
                    }
                }
            }
            i = i.min(len);
            tokens.push(Token::new(TokenKind::String, text));
            continue;
        }

        if c == '\'' {
            let mut text = String::from('\'');
            i += 1;
            while i < len && chars[i] != '\'' {
                text.push(chars[i]);
                i += 1;
            }
            if i < len {
                text.push('\'');
                i += 1;
            }
            tokens.push(Token::new(TokenKind::QuotedSymbol, text));
            continue;
        }

        if c == '\\' && next.is_some_and(is_symbol_start) {
            let mut text = String::from('\\');
            i += 1;
            while i < len && is_symbol_char(chars[i]) {
                text.push(chars[i]);
                i += 1;
            }
            tokens.push(Token::new(TokenKind::BarewordSymbol, text));
            continue;
        }

        if c == '$' {
            let mut text = String::from('$');
            i += 1;
            if i < len {
                if chars[i] == '\\' {
                    text.push('\\');
                    if let Some(&escaped) = chars.get(i + 1) {
                        text.push(escaped);
                    }
                    i += 2;
                } else {
                    text.push(chars[i]);
                    i += 1;
                }
            }
            i = i.min(len);
            tokens.push(Token::new(TokenKind::CharacterLiteral, text));
            continue;
        }

        if c.is_whitespace() {
            while i < len && chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(Token::whitespace());
            continue;
        }

        // Plain code. A backslash that did not start a symbol lands here and
        // is taken literally so the scan always advances.
        let mut text = String::new();
        if c == '\\' {
            text.push(c);
            i += 1;
        }
        while i < len && !is_code_boundary(chars[i]) && !starts_comment(&chars, i) {
            text.push(chars[i]);
            i += 1;
        }
        if !text.is_empty() {
            tokens.push(Token::new(TokenKind::Code, text));
        }
    }

    tokens
}

/// Rewrite source as a single physical line.
///
/// Comments are removed, newlines inside string, quoted symbol and character
/// literals become the two characters `\n`, and whitespace between tokens is
/// folded to one space with no leading or trailing space. The result contains no raw newline and
/// `flatten(flatten(x)) == flatten(x)`.
pub fn flatten(source: &str) -> String {
    let mut line = String::with_capacity(source.len());
    let mut pending_space = false;

    for token in tokenize(source) {
        if token.kind == TokenKind::Whitespace {
            pending_space = !line.is_empty();
            continue;
        }
        if pending_space {
            line.push(' ');
            pending_space = false;
        }
        line.push_str(&token.emitted());
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_synthdef_collapses() {
        let input = "SynthDef(\\test, {\n  Out.ar(0, SinOsc.ar(440));\n}).add;";
        assert_eq!(
            flatten(input),
            "SynthDef(\\test, { Out.ar(0, SinOsc.ar(440)); }).add;"
        );
    }

    #[test]
    fn test_line_and_block_comments_removed() {
        let input = "// This is a synth\n\
SynthDef(\\test, { |freq = 440|\n\
  var sig = SinOsc.ar(freq); // oscillator\n\
  /* stereo output */\n\
  Out.ar(0, sig ! 2);\n\
}).add;";
        assert_eq!(
            flatten(input),
            "SynthDef(\\test, { |freq = 440| var sig = SinOsc.ar(freq); Out.ar(0, sig ! 2); }).add;"
        );
    }

    #[test]
    fn test_comment_stripping_keeps_both_statements() {
        let out = flatten("x = 1 // comment\ny = 2");
        assert_eq!(out, "x = 1 y = 2");
        assert!(!out.contains('\n'));
        assert!(!out.contains("comment"));
    }

    #[test]
    fn test_string_newline_escaped() {
        assert_eq!(flatten("\"a\nb\".print"), "\"a\\nb\".print");
        assert_eq!(
            flatten("\"hello\nworld\".postln;"),
            "\"hello\\nworld\".postln;"
        );
    }

    #[test]
    fn test_division_is_not_a_comment() {
        let input = "x = 10 / 2; // division\ny = 4 /* block */ / 2;";
        assert_eq!(flatten(input), "x = 10 / 2; y = 4 / 2;");
    }

    #[test]
    fn test_division_without_spaces() {
        assert_eq!(flatten("a/b"), "a/b");
        assert_eq!(flatten("a//b\nc"), "a c");
    }

    #[test]
    fn test_character_literals() {
        assert_eq!(flatten("$a.postln;\n$\\n.postln;"), "$a.postln; $\\n.postln;");
    }

    #[test]
    fn test_raw_newline_character_literal_is_escaped() {
        let out = flatten("$\n.postln");
        assert_eq!(out, "$\\n.postln");
        assert!(!out.contains('\n'));
    }

    #[test]
    fn test_multiline_quoted_symbol_is_escaped() {
        assert_eq!(flatten("'a\nb'.postln"), "'a\\nb'.postln");
    }

    #[test]
    fn test_escaped_newline_character_literal_is_escaped() {
        assert_eq!(flatten("$\\\n.postln"), "$\\n.postln");
    }

    #[test]
    fn test_mixed_symbols_preserved() {
        let input = "[\\freq, 'symbol', \"string\"]";
        assert_eq!(flatten(input), input);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(flatten(""), "");
        assert_eq!(flatten("   \n\t  "), "");
        assert_eq!(flatten("// only a comment"), "");
    }

    #[test]
    fn test_escaped_quote_in_string() {
        let input = "\"say \\\"hello\\\"\".postln;";
        assert_eq!(flatten(input), input);
    }

    #[test]
    fn test_whitespace_runs_collapse() {
        assert_eq!(flatten("a    =    b;"), "a = b;");
        assert_eq!(flatten("  a /* x */  /* y */ b  "), "a b");
    }

    #[test]
    fn test_spaces_inside_literals_untouched() {
        assert_eq!(flatten("\"a    b\".postln"), "\"a    b\".postln");
        assert_eq!(flatten("'my   symbol'.postln;"), "'my   symbol'.postln;");
    }

    #[test]
    fn test_comment_markers_inside_strings_kept() {
        let input = "\"http://example.com /* not a comment */\".postln";
        assert_eq!(flatten(input), input);
    }

    #[test]
    fn test_unterminated_string_is_best_effort() {
        assert_eq!(flatten("\"abc\ndef"), "\"abc\\ndef");
    }

    #[test]
    fn test_unterminated_block_comment_runs_to_end() {
        assert_eq!(flatten("a = 1; /* never closed\nb = 2;"), "a = 1;");
    }

    #[test]
    fn test_lone_backslash_is_copied() {
        assert_eq!(flatten("a \\ b"), "a \\ b");
        assert_eq!(flatten("x\\"), "x\\");
        assert_eq!(flatten("\\1"), "\\1");
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let samples = [
            "x = 1 // comment\ny = 2",
            "\"a\nb\".print",
            "x = 10 / 2; // division\ny = 4 /* block */ / 2;",
            "$ \n x",
            "$\n.postln",
            "[\\freq, 'sym  bol', \"str  ing\"]\n\n  ;",
            "a \\ b",
            "\"unterminated",
            "Pdef(\\x, Pbind(\\dur, 0.25)).play;\r\n// end",
            "'a\nb'.postln",
            "$\\\n.postln",
        ];
        for sample in samples {
            let once = flatten(sample);
            assert_eq!(flatten(&once), once, "not idempotent for {:?}", sample);
            assert!(!once.contains('\n'));
        }
    }

    #[test]
    fn test_tokenize_classifies_spans() {
        let tokens = tokenize("f(\\sym, 'q', $c, \"s\") // gone");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Code,
                TokenKind::BarewordSymbol,
                TokenKind::Code,
                TokenKind::Whitespace,
                TokenKind::QuotedSymbol,
                TokenKind::Code,
                TokenKind::Whitespace,
                TokenKind::CharacterLiteral,
                TokenKind::Code,
                TokenKind::Whitespace,
                TokenKind::String,
                TokenKind::Code,
                TokenKind::Whitespace,
            ]
        );
        assert_eq!(tokens[1].text, "\\sym");
        assert_eq!(tokens[7].text, "$c");
    }
}
