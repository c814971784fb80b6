//! Text clean-up applied before classification
//!
//! Generated text often arrives with escaped line breaks and with headings
//! or list items glued to the preceding paragraph. These passes are
//! line-based and leave fenced code blocks untouched.

use regex::Regex;
use std::sync::OnceLock;

static HEADING: OnceLock<Regex> = OnceLock::new();
static LIST_ITEM: OnceLock<Regex> = OnceLock::new();
static RULE: OnceLock<Regex> = OnceLock::new();

fn heading() -> &'static Regex {
    HEADING.get_or_init(|| Regex::new(r"^ {0,3}#{1,6}(\s|$)").expect("Invalid heading pattern"))
}

fn list_item() -> &'static Regex {
    LIST_ITEM
        .get_or_init(|| Regex::new(r"^\s*([-*+]|\d{1,3}[.)])\s+\S").expect("Invalid list pattern"))
}

fn rule() -> &'static Regex {
    RULE.get_or_init(|| {
        Regex::new(r"^ {0,3}(?:(?:-[ \t]*){3,}|(?:\*[ \t]*){3,}|(?:_[ \t]*){3,})$")
            .expect("Invalid rule pattern")
    })
}

pub fn is_heading(line: &str) -> bool {
    heading().is_match(line)
}

pub fn is_list_item(line: &str) -> bool {
    list_item().is_match(line)
}

pub fn is_rule(line: &str) -> bool {
    rule().is_match(line.trim_end())
}

pub fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Replace literal `\n` sequences with line breaks.
///
/// Idempotent: the output never contains a backslash followed by `n` that
/// the input did not already turn into a line break.
pub fn normalize_escapes(text: &str) -> String {
    text.replace("\\n", "\n")
}

/// Insert a blank line before headings and list items that directly follow
/// text, then collapse runs of three or more blank lines into one.
///
/// A line following a table row (ending in `|`) is left alone.
pub fn repair_markdown(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
            out.push(line);
            continue;
        }

        if !in_fence && (is_heading(line) || is_list_item(line)) {
            if let Some(prev) = out.last() {
                let prev_blank = prev.trim().is_empty();
                let after_table = prev.trim_end().ends_with('|');
                if !prev_blank && !after_table {
                    out.push("");
                }
            }
        }
        out.push(line);
    }

    collapse_blank_runs(&out)
}

fn collapse_blank_runs(lines: &[&str]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if !lines[i].trim().is_empty() {
            out.push(lines[i]);
            i += 1;
            continue;
        }

        let run = lines[i..]
            .iter()
            .take_while(|line| line.trim().is_empty())
            .count();
        if run >= 3 {
            out.push("");
        } else {
            out.extend(std::iter::repeat("").take(run));
        }
        i += run;
    }

    out.join("\n")
}

/// Markers that rule out structured parsing outright: a leading heading or
/// quote marker, or any table pipe.
pub fn has_hard_prose_markers(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('#') || trimmed.starts_with('>') || text.contains('|')
}

/// Markers checked only after strict and fenced parsing failed: any code
/// fence or horizontal rule.
pub fn has_soft_prose_markers(text: &str) -> bool {
    text.contains("```") || text.lines().any(is_rule)
}
