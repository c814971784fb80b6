//! Adaptive content interpreter
//!
//! Turns the raw text of one step into either structured JSON or prose.
//! Classification is a fixed, ordered chain; the first rule that decides
//! wins:
//!
//! 1. escape normalization, then markdown repair
//! 2. hard prose markers (leading `#` or `>`, any `|`) decide prose
//! 3. strict parse of the whole text, when it starts with `{` or `[`
//! 4. parse of the first fenced json block
//! 5. soft prose markers (other code fences, horizontal rules) decide prose
//! 6. parse of the slice from the first `{` to the last `}`
//! 7. prose
//!
//! Failing to parse is never an error; it only moves on to the next rule.

pub mod markdown;

use serde::Serialize;
use serde_json::Value;

pub use markdown::{normalize_escapes, repair_markdown};

/// Interpreted step content
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpreted {
    /// A JSON object or array
    Structured(Value),
    /// Normalized, repaired text for direct display
    Prose(String),
}

impl Interpreted {
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Interpreted::Structured(value) => Some(value),
            Interpreted::Prose(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Interpreted::Structured(_))
    }
}

/// The rule of the chain that decided a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    HardProse,
    Strict,
    Fenced,
    SoftProse,
    Sliced,
    Fallback,
}

/// Interpret one step's raw text
pub fn interpret(raw: &str) -> Interpreted {
    interpret_traced(raw).0
}

/// Interpret and report which rule decided
pub fn interpret_traced(raw: &str) -> (Interpreted, Rule) {
    let normalized = normalize_escapes(raw);
    let repaired = repair_markdown(&normalized);
    let prose = || Interpreted::Prose(repaired.clone());

    if markdown::has_hard_prose_markers(&normalized) {
        return (prose(), Rule::HardProse);
    }

    let trimmed = raw.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(value) = parse_structured(trimmed) {
            return (Interpreted::Structured(value), Rule::Strict);
        }
    }

    if let Some(value) = extract_fenced_json(&normalized).and_then(parse_structured) {
        return (Interpreted::Structured(value), Rule::Fenced);
    }

    if markdown::has_soft_prose_markers(&normalized) {
        return (prose(), Rule::SoftProse);
    }

    if let Some(value) = slice_outer_braces(trimmed).and_then(parse_structured) {
        return (Interpreted::Structured(value), Rule::Sliced);
    }

    (prose(), Rule::Fallback)
}

/// Parse `candidate` as a JSON object or array.
///
/// Generated JSON sometimes carries escaped line breaks between tokens, so a
/// failed parse is retried once on the escape-normalized text.
fn parse_structured(candidate: &str) -> Option<Value> {
    let parse = |text: &str| {
        serde_json::from_str::<Value>(text.trim())
            .ok()
            .filter(|value| value.is_object() || value.is_array())
    };

    parse(candidate).or_else(|| {
        if candidate.contains("\\n") {
            parse(&normalize_escapes(candidate))
        } else {
            None
        }
    })
}

/// Body of the first code fence tagged `json`.
///
/// Trailing prose after the closing fence is ignored.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let mut search_from = 0;

    while let Some(rel) = content[search_from..].find("```") {
        let fence_start = search_from + rel;
        let after_opening = &content[fence_start + 3..];

        let line_end = after_opening.find('\n')?;
        let tag = after_opening[..line_end].trim();
        let body_start = fence_start + 3 + line_end + 1;

        let closing = content[body_start..].find("```")?;
        let body_end = body_start + closing;

        if tag.eq_ignore_ascii_case("json") && body_start < body_end {
            return Some(&content[body_start..body_end]);
        }
        search_from = body_end + 3;
    }
    None
}

/// Slice from the first `{` to the last `}`
fn slice_outer_braces(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if start < end {
        Some(&content[start..=end])
    } else {
        None
    }
}
