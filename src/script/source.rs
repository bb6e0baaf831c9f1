//! Source vetting and fault formatting.
//!
//! Scripts are arbitrary code, so before running one we check for the opt-in
//! safety marker and warn about loops with no reachable exit. After a fault
//! we compact the interpreter's traceback down to the script's own frames.

use regex::Regex;
use std::sync::OnceLock;

/// Chunk name every script is loaded under; traceback frames from the script
/// itself carry it.
pub const CHUNK_NAME: &str = "macro";

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(macro|script)\b").expect("static pattern"))
}

/// True if the first line carries the safety marker: the word `macro` or
/// `script`, any case. Running unmarked sources requires an explicit
/// override, so pasting the wrong buffer does not execute it.
pub fn has_safety_marker(source: &str) -> bool {
    let first_line = source.lines().next().unwrap_or("");
    marker_re().is_match(first_line)
}

fn loop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bwhile\s+(true|1)\s+do\b|\buntil\s+(false|nil)\b").expect("static pattern")
    })
}

/// Heuristic check for a loop with a constant-true condition. String and
/// comment contents are ignored. Advisory only: the condition may still be
/// broken out of, so callers warn rather than refuse.
pub fn contains_unbounded_loop(source: &str) -> bool {
    loop_re().is_match(&strip_strings_and_comments(source))
}

/// Replace string literals and comments with spaces, preserving length and
/// line structure so keyword scans cannot match inside them.
fn strip_strings_and_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            out.push_str("  ");
            i += 2;
            if let Some(level) = long_bracket_level(&chars, i) {
                i = blank_long_bracket(&chars, i, level, &mut out);
            } else {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
        } else if c == '"' || c == '\'' {
            out.push(' ');
            i += 1;
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    out.push_str("  ");
                    i += 2;
                } else {
                    out.push(if chars[i] == '\n' { '\n' } else { ' ' });
                    i += 1;
                }
            }
            if i < chars.len() {
                out.push(' ');
                i += 1;
            }
        } else if c == '[' && long_bracket_level(&chars, i).is_some() {
            let level = long_bracket_level(&chars, i).expect("checked above");
            i = blank_long_bracket(&chars, i, level, &mut out);
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

/// Level of a long-bracket opener `[`, `[=[`, `[==[`... at `i`, if present.
fn long_bracket_level(chars: &[char], i: usize) -> Option<usize> {
    if chars.get(i) != Some(&'[') {
        return None;
    }
    let mut level = 0;
    while chars.get(i + 1 + level) == Some(&'=') {
        level += 1;
    }
    (chars.get(i + 1 + level) == Some(&'[')).then_some(level)
}

/// Blank out a long-bracket region starting at its opener; returns the index
/// one past the closer (or the end of input if unterminated).
fn blank_long_bracket(chars: &[char], start: usize, level: usize, out: &mut String) -> usize {
    let closer: String = format!("]{}]", "=".repeat(level));
    let closer: Vec<char> = closer.chars().collect();
    let mut i = start;
    while i < chars.len() {
        if chars[i..].starts_with(&closer) {
            for _ in 0..closer.len() {
                out.push(' ');
            }
            return i + closer.len();
        }
        out.push(if chars[i] == '\n' { '\n' } else { ' ' });
        i += 1;
    }
    i
}

/// Split a raw interpreter fault into `(message, trace)`, keeping only
/// traceback frames that belong to the script chunk. Runner-internal frames
/// are noise to the script author and are dropped.
pub fn split_fault(raw: &str) -> (String, Vec<String>) {
    match raw.split_once("stack traceback:") {
        None => (raw.trim().to_string(), Vec::new()),
        Some((message, traceback)) => {
            let frame_tag = format!("[string \"{}\"]", CHUNK_NAME);
            let trace = traceback
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && line.contains(&frame_tag))
                .map(str::to_string)
                .collect();
            (message.trim().trim_end_matches('\n').to_string(), trace)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_on_first_line_only() {
        assert!(has_safety_marker("-- macro: renumber headings\nx = 1"));
        assert!(has_safety_marker("-- This SCRIPT renames fields"));
        assert!(!has_safety_marker("x = 1\n-- macro"));
        assert!(!has_safety_marker(""));
    }

    #[test]
    fn test_marker_requires_word_boundary() {
        assert!(!has_safety_marker("-- macros are fun"));
        assert!(!has_safety_marker("-- descriptive"));
        assert!(has_safety_marker("-- macro"));
    }

    #[test]
    fn test_unbounded_loop_detected() {
        assert!(contains_unbounded_loop("while true do end"));
        assert!(contains_unbounded_loop("while 1 do x() end"));
        assert!(contains_unbounded_loop("repeat x() until false"));
        assert!(contains_unbounded_loop("repeat x() until nil"));
    }

    #[test]
    fn test_bounded_loops_pass() {
        assert!(!contains_unbounded_loop("while i < 10 do i = i + 1 end"));
        assert!(!contains_unbounded_loop("for i = 1, 10 do end"));
        assert!(!contains_unbounded_loop("repeat i = i + 1 until i > 3"));
    }

    #[test]
    fn test_loop_keywords_in_strings_and_comments_ignored() {
        assert!(!contains_unbounded_loop("x = 'while true do'"));
        assert!(!contains_unbounded_loop("-- while true do\nx = 1"));
        assert!(!contains_unbounded_loop("x = [[\nwhile true do\n]]"));
        assert!(!contains_unbounded_loop("--[==[ until false ]==]\nx = 1"));
    }

    #[test]
    fn test_strip_preserves_code_outside_literals() {
        let stripped = strip_strings_and_comments("a = \"b\" -- c\nwhile true do end");
        assert!(stripped.contains("while true do end"));
        assert!(!stripped.contains('b'));
        assert!(!stripped.contains('c'));
    }

    #[test]
    fn test_split_fault_keeps_script_frames_only() {
        let raw = "[string \"macro\"]:3: attempt to index a nil value\n\
                   stack traceback:\n\
                   \t[C]: in function 'error'\n\
                   \t[string \"macro\"]:3: in function 'helper'\n\
                   \t[string \"macro\"]:7: in main chunk\n\
                   \t[C]: in ?";
        let (message, trace) = split_fault(raw);
        assert_eq!(message, "[string \"macro\"]:3: attempt to index a nil value");
        assert_eq!(trace.len(), 2);
        assert!(trace[0].contains("in function 'helper'"));
        assert!(trace[1].contains("in main chunk"));
    }

    #[test]
    fn test_split_fault_without_traceback() {
        let (message, trace) = split_fault("plain failure");
        assert_eq!(message, "plain failure");
        assert!(trace.is_empty());
    }
}
