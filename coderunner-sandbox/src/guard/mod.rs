//! Loop-guard injection
//!
//! Rewrites guest source so that every entry into a `while`/`for` body ticks
//! one shared counter. Once the counter passes the configured ceiling the
//! program raises a recoverable "infinite loop" error instead of spinning the
//! worker forever. The budget is global to the run, not per loop.

pub mod javascript;
pub mod python;

use crate::language::Language;
use coderunner_common::INFINITE_LOOP_PREFIX;

/// Guest source after guard injection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedSource {
    /// Rewritten program text
    pub source: String,
    /// `line_map[i]` is the original 1-based line of rewritten line `i + 1`
    pub line_map: Vec<usize>,
}

impl InstrumentedSource {
    /// Wrap text whose lines correspond one-to-one with the original
    pub(crate) fn unshifted(source: String) -> Self {
        let line_map = (1..=source.split('\n').count()).collect();
        Self { source, line_map }
    }

    /// Map a rewritten line number back to the student's line number
    pub fn original_line(&self, line: usize) -> usize {
        if line == 0 {
            return 0;
        }
        self.line_map
            .get(line - 1)
            .copied()
            .unwrap_or_else(|| line.saturating_sub(self.shift_at_end()))
    }

    fn shift_at_end(&self) -> usize {
        match self.line_map.last() {
            Some(&last) => self.line_map.len().saturating_sub(last),
            None => 0,
        }
    }
}

/// Inject loop guards for the given language
pub fn instrument(language: Language, code: &str, max_iterations: u64) -> InstrumentedSource {
    match language {
        Language::JavaScript => javascript::instrument(code, max_iterations),
        Language::Python => python::instrument(code, max_iterations),
    }
}

/// Message carried by the guard error in every language
pub fn limit_message(max_iterations: u64) -> String {
    format!(
        "{}: exceeded {} iterations",
        INFINITE_LOOP_PREFIX, max_iterations
    )
}
