//! Loop guard for JavaScript sources
//!
//! A light scanner rather than a parser: it understands strings, template
//! literals, comments and bracket nesting, which is enough to find loop
//! headers and their bodies in student code. Injection happens inline, so
//! line numbers in engine errors stay aligned with the original source.

use super::InstrumentedSource;

/// Counter shared by every guarded loop in one run
pub const COUNTER: &str = "__loopGuardCount";

/// Error class the guard throws; bound by the worker when it invokes the snippet
pub const ERROR_CLASS: &str = "__LoopGuardError";

pub fn instrument(code: &str, max_iterations: u64) -> InstrumentedSource {
    let guard = guard_statement(max_iterations);
    let mut edits = find_edits(code, &guard);
    edits.sort_by_key(|edit| edit.start);

    let mut out = String::with_capacity(code.len() + edits.len() * guard.len() + 32);
    out.push_str(&format!("let {} = 0; ", COUNTER));

    let mut last = 0;
    for edit in edits {
        if edit.start >= last {
            out.push_str(&code[last..edit.start]);
        }
        out.push_str(&edit.text);
        last = last.max(edit.end);
    }
    out.push_str(&code[last..]);

    InstrumentedSource::unshifted(out)
}

fn guard_statement(max_iterations: u64) -> String {
    format!(
        "if (++{} > {}) throw new {}({}); ",
        COUNTER, max_iterations, ERROR_CLASS, max_iterations
    )
}

/// Replace `code[start..end]` with `text`
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

impl Edit {
    fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            text: text.into(),
        }
    }
}

fn find_edits(code: &str, guard: &str) -> Vec<Edit> {
    let b = code.as_bytes();
    let mut edits = Vec::new();
    // offsets of `while` keywords that close a do-while and have no body
    let mut do_tails = Vec::new();
    let mut i = 0;

    while i < b.len() {
        match b[i] {
            b'/' if matches!(b.get(i + 1), Some(b'/') | Some(b'*')) => i = skip_comment(b, i),
            b'\'' | b'"' | b'`' => i = skip_string(b, i),
            c if c.is_ascii_digit() => i = ident_end(b, i),
            c if is_ident_start(c) => {
                let end = ident_end(b, i);
                if prev_significant(b, i) == Some(b'.') {
                    i = end;
                    continue;
                }
                match &code[i..end] {
                    "while" if do_tails.contains(&i) => {
                        i = header_end(code, end, false).unwrap_or(end);
                    }
                    "while" | "for" => {
                        let is_for = &code[i..end] == "for";
                        i = guard_loop(code, end, is_for, guard, &mut edits).unwrap_or(end);
                    }
                    "do" => {
                        let body = skip_trivia(b, end);
                        let body_end = guard_body(code, body, guard, &mut edits);
                        let tail = skip_trivia(b, body_end);
                        if word_at(code, tail) == Some("while") {
                            do_tails.push(tail);
                        }
                        i = end;
                    }
                    _ => i = end,
                }
            }
            _ => i += 1,
        }
    }

    edits
}

/// Guard one loop whose keyword ends at `after_keyword`. Returns where
/// scanning should resume (just past the header).
fn guard_loop(
    code: &str,
    after_keyword: usize,
    is_for: bool,
    guard: &str,
    edits: &mut Vec<Edit>,
) -> Option<usize> {
    let header = header_end(code, after_keyword, is_for)?;
    guard_body(code, skip_trivia(code.as_bytes(), header), guard, edits);
    Some(header)
}

/// Put `guard` at the top of the loop body starting at `body`, bracing a
/// single-statement body. Returns the end of the body.
fn guard_body(code: &str, body: usize, guard: &str, edits: &mut Vec<Edit>) -> usize {
    let b = code.as_bytes();
    match b.get(body) {
        Some(b'{') => {
            edits.push(Edit::insert(body + 1, guard));
            match_close(b, body).map_or(b.len(), |close| close + 1)
        }
        Some(b';') => {
            edits.push(Edit {
                start: body,
                end: body + 1,
                text: format!("{{ {}}}", guard),
            });
            body + 1
        }
        Some(_) => {
            let end = statement_extent(code, body);
            edits.push(Edit::insert(body, format!("{{ {}", guard)));
            edits.push(Edit::insert(end, " }"));
            end
        }
        None => body,
    }
}

/// Index just past the parenthesized header of a loop or branch whose
/// keyword ends at `after_keyword`
fn header_end(code: &str, after_keyword: usize, allow_await: bool) -> Option<usize> {
    let b = code.as_bytes();
    let mut open = skip_trivia(b, after_keyword);
    if allow_await && word_at(code, open) == Some("await") {
        open = skip_trivia(b, open + 5);
    }
    if b.get(open) != Some(&b'(') {
        return None;
    }
    match_close(b, open).map(|close| close + 1)
}

fn word_at(code: &str, at: usize) -> Option<&str> {
    let b = code.as_bytes();
    if !b.get(at).copied().is_some_and(is_ident_start) {
        return None;
    }
    Some(&code[at..ident_end(b, at)])
}

fn block_end(b: &[u8], at: usize) -> usize {
    match b.get(at) {
        Some(b'{') => match_close(b, at).map_or(b.len(), |close| close + 1),
        _ => statement_end(b, at),
    }
}

/// End of the statement starting at `start`, following the bodies of
/// compound statements
fn statement_extent(code: &str, start: usize) -> usize {
    let b = code.as_bytes();
    let Some(word) = word_at(code, start) else {
        return match b.get(start) {
            Some(b'{') => block_end(b, start),
            Some(b';') => start + 1,
            _ => statement_end(b, start),
        };
    };
    let after = start + word.len();

    match word {
        "if" => {
            let Some(header) = header_end(code, after, false) else {
                return statement_end(b, start);
            };
            let then_end = statement_extent(code, skip_trivia(b, header));
            let next = skip_trivia(b, then_end);
            if word_at(code, next) == Some("else") {
                statement_extent(code, skip_trivia(b, next + 4))
            } else {
                then_end
            }
        }
        "for" | "while" => match header_end(code, after, word == "for") {
            Some(header) => statement_extent(code, skip_trivia(b, header)),
            None => statement_end(b, start),
        },
        "do" => {
            let body_end = statement_extent(code, skip_trivia(b, after));
            let tail = skip_trivia(b, body_end);
            if word_at(code, tail) != Some("while") {
                return body_end;
            }
            match header_end(code, tail + 5, false) {
                Some(header) => {
                    let semi = skip_trivia(b, header);
                    if b.get(semi) == Some(&b';') {
                        semi + 1
                    } else {
                        header
                    }
                }
                None => body_end,
            }
        }
        "switch" => match header_end(code, after, false) {
            Some(header) => block_end(b, skip_trivia(b, header)),
            None => statement_end(b, start),
        },
        "try" => {
            let mut end = block_end(b, skip_trivia(b, after));
            loop {
                let next = skip_trivia(b, end);
                match word_at(code, next) {
                    Some("catch") => {
                        let mut block = skip_trivia(b, next + 5);
                        if b.get(block) == Some(&b'(') {
                            let Some(close) = match_close(b, block) else {
                                return b.len();
                            };
                            block = skip_trivia(b, close + 1);
                        }
                        end = block_end(b, block);
                    }
                    Some("finally") => end = block_end(b, skip_trivia(b, next + 7)),
                    _ => return end,
                }
            }
        }
        _ => statement_end(b, start),
    }
}

/// End of a simple statement starting at `start`: just past a top-level `;`,
/// or at a top-level newline, an enclosing `}` or the end of input.
fn statement_end(b: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut j = start;
    while j < b.len() {
        match b[j] {
            b'/' if b.get(j + 1) == Some(&b'/') => return j,
            b'/' if b.get(j + 1) == Some(&b'*') => j = skip_comment(b, j),
            b'\'' | b'"' | b'`' => j = skip_string(b, j),
            b'(' | b'[' | b'{' => {
                depth += 1;
                j += 1;
            }
            b')' | b']' | b'}' => {
                if depth == 0 {
                    return j;
                }
                depth -= 1;
                j += 1;
            }
            b';' if depth == 0 => return j + 1,
            b'\n' if depth == 0 => return j,
            _ => j += 1,
        }
    }
    b.len()
}

pub(crate) fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c >= 0x80
}

pub(crate) fn is_ident_char(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

pub(crate) fn ident_end(b: &[u8], start: usize) -> usize {
    let mut j = start;
    while j < b.len() && is_ident_char(b[j]) {
        j += 1;
    }
    j
}

/// Last non-whitespace byte before `at`
pub(crate) fn prev_significant(b: &[u8], at: usize) -> Option<u8> {
    b[..at].iter().rev().copied().find(|c| !c.is_ascii_whitespace())
}

/// Index just past a `//` or `/* */` comment starting at `i`. Line comments
/// stop before their newline.
pub(crate) fn skip_comment(b: &[u8], i: usize) -> usize {
    if b.get(i + 1) == Some(&b'/') {
        b[i..]
            .iter()
            .position(|&c| c == b'\n')
            .map_or(b.len(), |p| i + p)
    } else {
        let mut j = i + 2;
        while j + 1 < b.len() {
            if b[j] == b'*' && b[j + 1] == b'/' {
                return j + 2;
            }
            j += 1;
        }
        b.len()
    }
}

/// Index just past the string or template literal opening at `i`
pub(crate) fn skip_string(b: &[u8], i: usize) -> usize {
    let quote = b[i];
    let mut j = i + 1;
    while j < b.len() {
        match b[j] {
            b'\\' => j += 2,
            c if c == quote => return j + 1,
            b'$' if quote == b'`' && b.get(j + 1) == Some(&b'{') => {
                j = match_close(b, j + 1).map_or(b.len(), |close| close + 1);
            }
            // plain strings cannot span lines
            b'\n' if quote != b'`' => return j + 1,
            _ => j += 1,
        }
    }
    b.len()
}

pub(crate) fn skip_trivia(b: &[u8], mut i: usize) -> usize {
    loop {
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        if b.get(i) == Some(&b'/') && matches!(b.get(i + 1), Some(b'/') | Some(b'*')) {
            i = skip_comment(b, i);
        } else {
            return i;
        }
    }
}

/// Index of the bracket closing the one at `open`
pub(crate) fn match_close(b: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut j = open;
    while j < b.len() {
        match b[j] {
            b'/' if matches!(b.get(j + 1), Some(b'/') | Some(b'*')) => {
                j = skip_comment(b, j);
                continue;
            }
            b'\'' | b'"' | b'`' => {
                j = skip_string(b, j);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
        j += 1;
    }
    None
}
