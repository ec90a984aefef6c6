//! Shell command parsing for policy checks.
//!
//! Splits chained commands on `;`, `&&`, `||`, and `|` while respecting
//! single/double quotes and backslash escapes, and extracts each segment's
//! base program for allowlist/denylist matching.

/// Split a command line into chained segments.
///
/// Separators (`;`, `&&`, `||`, `|`) are only recognized outside quotes.
/// A backslash escapes the next character outside single quotes.
pub fn split_segments(cmd: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = cmd.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if !in_single => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            ';' if !in_single && !in_double => {
                push_segment(&mut segments, &mut current);
            }
            '&' if !in_single && !in_double && chars.peek() == Some(&'&') => {
                chars.next();
                push_segment(&mut segments, &mut current);
            }
            '|' if !in_single && !in_double => {
                // `||` and `|` both end a segment.
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                push_segment(&mut segments, &mut current);
            }
            _ => current.push(c),
        }
    }
    push_segment(&mut segments, &mut current);
    segments
}

fn push_segment(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    current.clear();
}

/// Extract the base program of a command segment: the first
/// whitespace-bounded token, stripped of surrounding quotes and of any
/// directory prefix (`/usr/bin/git` → `git`).
pub fn base_program(segment: &str) -> Option<String> {
    let first = segment.split_whitespace().next()?;
    let unquoted = first
        .trim_matches('\'')
        .trim_matches('"');
    let base = unquoted.rsplit('/').next().unwrap_or(unquoted);
    if base.is_empty() {
        None
    } else {
        Some(base.to_string())
    }
}
