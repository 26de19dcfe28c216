//! Student-facing Python error text

use crate::guard::InstrumentedSource;
use regex::Regex;
use std::sync::LazyLock;

/// Filename guest code is compiled under
pub const GUEST_FILE: &str = "<exec>";

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

static FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?P<indent>\s*)File "(?P<file>[^"]*)", line (?P<line>\d+)(?P<rest>.*)$"#)
        .expect("frame pattern is valid")
});

/// Strip worker frames from a formatted traceback and map guest line
/// numbers back to the student's source.
pub fn clean(raw: &str, source: &InstrumentedSource) -> String {
    let mut kept: Vec<String> = Vec::new();
    // (index in `kept`, saw a guest frame)
    let mut headers: Vec<(usize, bool)> = Vec::new();
    let mut skipping_frame = false;

    for line in raw.trim_end().lines() {
        if line.trim_end() == TRACEBACK_HEADER {
            headers.push((kept.len(), false));
            kept.push(line.to_string());
            skipping_frame = false;
            continue;
        }

        if let Some(caps) = FRAME.captures(line) {
            if &caps["file"] == GUEST_FILE {
                let line_no = caps["line"].parse::<usize>().unwrap_or(0);
                kept.push(format!(
                    "{}File \"{}\", line {}{}",
                    &caps["indent"],
                    GUEST_FILE,
                    source.original_line(line_no),
                    &caps["rest"]
                ));
                if let Some(header) = headers.last_mut() {
                    header.1 = true;
                }
                skipping_frame = false;
            } else {
                skipping_frame = true;
            }
            continue;
        }

        // source excerpt and caret lines belong to the frame above them
        if skipping_frame && line.starts_with("    ") {
            continue;
        }
        skipping_frame = false;

        kept.push(match line.strip_prefix('_') {
            Some(rest) if rest.starts_with("InfiniteLoopError") => rest.to_string(),
            _ => line.to_string(),
        });
    }

    let drop: Vec<usize> = headers
        .into_iter()
        .filter(|(_, guest)| !guest)
        .map(|(index, _)| index)
        .collect();

    kept.into_iter()
        .enumerate()
        .filter(|(index, _)| !drop.contains(index))
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n")
}
