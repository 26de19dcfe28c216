//! Loop guard for Python sources
//!
//! Works line by line. Loop headers are found at the start of logical lines
//! (outside brackets, strings and backslash continuations) and the guard call
//! is placed as the first statement of the body. Inserted lines are recorded
//! in the line map so tracebacks can point at the student's own lines.

use super::InstrumentedSource;
use regex::Regex;
use std::sync::LazyLock;

/// Guard class defined by the worker in every run's globals
pub const GUARD_CLASS: &str = "_LoopGuard";

static LOOP_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent>[ \t]*)(?:async[ \t]+)?(?:while|for)\b")
        .expect("loop header pattern is valid")
});

pub fn instrument(code: &str, max_iterations: u64) -> InstrumentedSource {
    let guard = format!("{}.tick({})", GUARD_CLASS, max_iterations);
    let mut out = Output::default();
    let mut lexer = Lexer::default();

    // header whose logical line is still being read
    let mut header: Option<Header> = None;
    // header whose block body has not started yet
    let mut awaiting: Option<Header> = None;

    for (idx, line) in code.split('\n').enumerate() {
        let line_no = idx + 1;
        let logical_start = lexer.at_logical_start();

        if logical_start {
            if let Some(pending) = &awaiting {
                if !is_blank_or_comment(line) {
                    let indent = leading_indent(line);
                    if indent.len() > pending.indent.len() {
                        out.push(format!("{}{}", indent, guard), pending.line);
                    }
                    awaiting = None;
                }
            }
            if let Some(caps) = LOOP_HEADER.captures(line) {
                let indent = caps.name("indent").map_or("", |m| m.as_str());
                header = Some(Header {
                    line: line_no,
                    indent: indent.to_string(),
                });
            }
        }

        let scan = lexer.scan(line, header.is_some());

        let Some(current) = header.take() else {
            out.push(line.to_string(), line_no);
            continue;
        };

        match scan.colon {
            Some(colon) => {
                let rest = &line[colon + 1..];
                if is_blank_or_comment(rest) {
                    out.push(line.to_string(), line_no);
                    awaiting = Some(current);
                } else {
                    let body_indent = body_indent(&current.indent);
                    out.push(line[..=colon].to_string(), line_no);
                    out.push(format!("{}{}", body_indent, guard), current.line);
                    out.push(format!("{}{}", body_indent, rest.trim_start()), line_no);
                }
            }
            None => {
                out.push(line.to_string(), line_no);
                if !lexer.at_logical_start() {
                    header = Some(current);
                }
            }
        }
    }

    InstrumentedSource {
        source: out.lines.join("\n"),
        line_map: out.line_map,
    }
}

#[derive(Debug)]
struct Header {
    line: usize,
    indent: String,
}

#[derive(Debug, Default)]
struct Output {
    lines: Vec<String>,
    line_map: Vec<usize>,
}

impl Output {
    fn push(&mut self, line: String, original: usize) {
        self.lines.push(line);
        self.line_map.push(original);
    }
}

#[derive(Debug, Default)]
struct LineScan {
    /// Byte offset of the first top-level `:` (only looked for on request)
    colon: Option<usize>,
}

/// Tracks what carries over from one physical line to the next
#[derive(Debug, Default)]
struct Lexer {
    depth: usize,
    /// Quote byte of an open triple-quoted string
    triple: Option<u8>,
    backslash: bool,
}

impl Lexer {
    fn at_logical_start(&self) -> bool {
        self.depth == 0 && self.triple.is_none() && !self.backslash
    }

    fn scan(&mut self, line: &str, want_colon: bool) -> LineScan {
        let b = line.as_bytes();
        let mut scan = LineScan::default();
        let mut i = 0;
        self.backslash = false;

        if let Some(quote) = self.triple {
            match find_triple_end(b, 0, quote) {
                Some(end) => {
                    self.triple = None;
                    i = end;
                }
                None => return scan,
            }
        }

        while i < b.len() {
            match b[i] {
                b'#' => break,
                b'\\' if i + 1 == trimmed_len(b) => {
                    self.backslash = true;
                    break;
                }
                q @ (b'\'' | b'"') => {
                    if b[i..].starts_with(&[q, q, q]) {
                        match find_triple_end(b, i + 3, q) {
                            Some(end) => i = end,
                            None => {
                                self.triple = Some(q);
                                return scan;
                            }
                        }
                    } else {
                        i = skip_short_string(b, i);
                    }
                }
                b'(' | b'[' | b'{' => {
                    self.depth += 1;
                    i += 1;
                }
                b')' | b']' | b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    i += 1;
                }
                b':' if want_colon
                    && scan.colon.is_none()
                    && self.depth == 0
                    && b.get(i + 1) != Some(&b'=') =>
                {
                    scan.colon = Some(i);
                    i += 1;
                }
                _ => i += 1,
            }
        }

        scan
    }
}

fn trimmed_len(b: &[u8]) -> usize {
    b.iter()
        .rposition(|c| !c.is_ascii_whitespace())
        .map_or(0, |p| p + 1)
}

/// Index just past the closing triple quote, searching from `from`
fn find_triple_end(b: &[u8], from: usize, quote: u8) -> Option<usize> {
    let mut j = from;
    while j < b.len() {
        if b[j] == b'\\' {
            j += 2;
            continue;
        }
        if b[j..].starts_with(&[quote, quote, quote]) {
            return Some(j + 3);
        }
        j += 1;
    }
    None
}

/// Index just past a single-quoted string; unterminated strings end the line
fn skip_short_string(b: &[u8], i: usize) -> usize {
    let quote = b[i];
    let mut j = i + 1;
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    b.len()
}

fn is_blank_or_comment(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn leading_indent(line: &str) -> &str {
    let end = line
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(line.len());
    &line[..end]
}

fn body_indent(header_indent: &str) -> String {
    if header_indent.contains('\t') {
        format!("{}\t", header_indent)
    } else {
        format!("{}    ", header_indent)
    }
}
