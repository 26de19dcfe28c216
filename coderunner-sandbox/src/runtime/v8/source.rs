//! Turning a student snippet into the script the isolate runs

use crate::guard::javascript::{self as lex, ERROR_CLASS};
use regex::Regex;
use std::sync::LazyLock;

/// Script name shown in engine errors
pub const SCRIPT_NAME: &str = "[coderunner:main]";

/// Statement keywords that never start an expression statement
const STATEMENT_KEYWORDS: &[&str] = &[
    "break", "case", "class", "const", "continue", "debugger", "default", "do", "else", "export",
    "for", "function", "if", "import", "let", "return", "switch", "throw", "try", "var", "while",
    "with",
];

static CONTROL_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\}\s*)?(if|for|while|else|do|with)\b").expect("control header pattern is valid")
});

/// Build the script for one run: capture the final expression, inject loop
/// guards, and wrap everything in a strict-mode function that only sees the
/// sandboxed console and the guard error class.
///
/// The wrapper opens on the snippet's first line so engine line numbers match
/// the student's.
pub fn prepare(code: &str, max_iterations: u64) -> String {
    let body = capture_final_expression(code).unwrap_or_else(|| code.to_string());
    let guarded = crate::guard::javascript::instrument(&body, max_iterations);
    format!(
        "__runnerInvoke(function (console, {}) {{ \"use strict\"; {}\n}});",
        ERROR_CLASS, guarded.source
    )
}

/// Rewrite a trailing expression statement into `return (expr);`.
///
/// Returns `None` when the last statement is not a plain expression, or when
/// the scan is not confident about where it starts.
pub fn capture_final_expression(code: &str) -> Option<String> {
    let b = code.as_bytes();
    let scan = scan_top_level(b);

    // the statement's own `;` is replaced along with it
    let stmt_end = scan.last_significant;
    let mut end = stmt_end;
    if end > 0 && b[end - 1] == b';' && scan.semicolons.last() == Some(&(end - 1)) {
        end -= 1;
    }

    let (start, after_newline) = scan
        .boundaries
        .iter()
        .rev()
        .find(|boundary| boundary.at <= end)
        .map_or((0, false), |boundary| (boundary.at, boundary.newline));

    let raw = &code[start..end];
    let expr = raw.trim();
    if expr.is_empty() || !is_expression_statement(expr, after_newline) {
        return None;
    }
    if after_newline && continues_previous_line(&code[..start]) {
        return None;
    }

    let lead = &raw[..raw.len() - raw.trim_start().len()];
    Some(format!(
        "{}{}return ({});{}",
        &code[..start],
        lead,
        expr,
        &code[stmt_end..]
    ))
}

#[derive(Debug)]
struct Boundary {
    /// Index where the next statement may start
    at: usize,
    /// Boundary is a bare line break (automatic semicolon insertion)
    newline: bool,
}

#[derive(Debug, Default)]
struct TopLevel {
    boundaries: Vec<Boundary>,
    semicolons: Vec<usize>,
    /// Index just past the last byte that is not whitespace or comment
    last_significant: usize,
}

fn scan_top_level(b: &[u8]) -> TopLevel {
    let mut top = TopLevel::default();
    let mut depth = 0usize;
    let mut i = 0;

    while i < b.len() {
        match b[i] {
            b'/' if matches!(b.get(i + 1), Some(b'/') | Some(b'*')) => {
                i = lex::skip_comment(b, i);
                continue;
            }
            b'\'' | b'"' | b'`' => {
                i = lex::skip_string(b, i);
                top.last_significant = i;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    top.boundaries.push(Boundary {
                        at: i + 1,
                        newline: false,
                    });
                }
            }
            b';' if depth == 0 => {
                top.semicolons.push(i);
                top.boundaries.push(Boundary {
                    at: i + 1,
                    newline: false,
                });
            }
            b'\n' if depth == 0 => top.boundaries.push(Boundary {
                at: i + 1,
                newline: true,
            }),
            _ => {}
        }
        if !b[i].is_ascii_whitespace() {
            top.last_significant = i + 1;
        }
        i += 1;
    }

    top
}

fn is_expression_statement(expr: &str, after_newline: bool) -> bool {
    let b = expr.as_bytes();
    let first = b[0];

    if first == b'{' || first == b'}' {
        return false;
    }
    // a line starting with these continues the previous one
    if after_newline && matches!(first, b'(' | b'[' | b'`') {
        return false;
    }
    if matches!(
        first,
        b'.' | b',' | b'?' | b':' | b'=' | b'*' | b'%' | b'&' | b'|' | b'^' | b'>' | b'<' | b')' | b']'
    ) {
        return false;
    }
    if lex::is_ident_start(first) {
        let word = &expr[..lex::ident_end(b, 0)];
        if STATEMENT_KEYWORDS.contains(&word) {
            return false;
        }
        if word == "async" && expr[5..].trim_start().starts_with("function") {
            return false;
        }
        // labelled statement
        if expr[word.len()..].trim_start().starts_with(':') {
            return false;
        }
    }

    let last = b[b.len() - 1];
    if matches!(
        last,
        b'+' | b'-' | b'*' | b'/' | b'%' | b'=' | b'&' | b'|' | b'^' | b'<' | b'>' | b'!' | b'?'
            | b':' | b',' | b'.'
    ) {
        return false;
    }

    lex::match_close(format!("({})", expr).as_bytes(), 0) == Some(expr.len() + 1)
}

/// Whether the code before a line break leaves a statement open
fn continues_previous_line(before: &str) -> bool {
    let trimmed = before.trim_end();
    let Some(last) = trimmed.bytes().last() else {
        return false;
    };
    if matches!(
        last,
        b'+' | b'-' | b'*' | b'/' | b'%' | b'=' | b'&' | b'|' | b'^' | b'<' | b'>' | b'!' | b'?'
            | b':' | b',' | b'.' | b'('
    ) {
        return true;
    }
    let line = trimmed.rsplit('\n').next().unwrap_or(trimmed).trim();
    CONTROL_HEADER.is_match(line) && !line.ends_with(';') && !line.ends_with('}')
}
