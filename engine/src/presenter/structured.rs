//! Structured payload normalization
//!
//! Generated JSON uses many spellings for the same concept. Payloads are
//! read through alias tables into `Proposals`, so the dispatcher only deals
//! with one shape.

use serde_json::{Map, Value};

pub const SUMMARY_KEYS: &[&str] = &[
    "summary",
    "core_idea",
    "core_concept",
    "concept_summary",
    "摘要",
    "核心摘要",
    "conclusion",
];

pub const CONTENT_KEYS: &[&str] = &["content", "report", "analysis", "内容", "报告"];

pub const LIST_KEYS: &[&str] = &["prompts", "visuals", "proposals", "schemes", "items", "images"];

/// Keys under which a list may be nested inside a list key
pub const NESTED_LIST_KEYS: &[&str] = &["list", "items", "data", "values", "details"];

pub const TITLE_KEYS: &[&str] = &["title", "name", "scheme", "concept", "方案"];

pub const PROMPT_KEYS: &[&str] = &["prompt", "image_prompt", "generation_prompt"];

pub const IMAGE_KEYS: &[&str] = &["image", "image_path", "image_url"];

/// One proposal item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalItem {
    pub title: Option<String>,
    pub image: Option<String>,
    pub prompt: Option<String>,
    /// Remaining string fields in key order
    pub fields: Vec<(String, String)>,
}

/// A structured payload read through the alias tables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposals {
    pub summary: Option<String>,
    pub content: Option<String>,
    pub items: Vec<ProposalItem>,
}

impl Proposals {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(list) => Self {
                items: list.iter().filter_map(item_from).collect(),
                ..Default::default()
            },
            Value::Object(obj) => Self {
                summary: first_string(obj, SUMMARY_KEYS),
                content: first_string(obj, CONTENT_KEYS),
                items: item_list(obj)
                    .map(|list| list.iter().filter_map(item_from).collect())
                    .unwrap_or_default(),
            },
            _ => Self::default(),
        }
    }

    /// Prompt of the item whose image matches `path` after normalization
    pub fn prompt_for_image(&self, path: &str) -> Option<&str> {
        let wanted = normalize_path(path);
        self.items
            .iter()
            .filter(|item| {
                item.image
                    .as_deref()
                    .is_some_and(|image| normalize_path(image) == wanted)
            })
            .find_map(|item| item.prompt.as_deref())
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(non_empty_string))
}

fn item_list(obj: &Map<String, Value>) -> Option<&Vec<Value>> {
    LIST_KEYS.iter().find_map(|key| match obj.get(*key)? {
        Value::Array(list) => Some(list),
        Value::Object(nested) => NESTED_LIST_KEYS
            .iter()
            .find_map(|inner| nested.get(*inner).and_then(Value::as_array)),
        _ => None,
    })
}

fn item_from(value: &Value) -> Option<ProposalItem> {
    match value {
        Value::Object(obj) => {
            let fields = obj
                .iter()
                .filter(|(key, _)| {
                    let key = key.as_str();
                    !TITLE_KEYS.contains(&key)
                        && !PROMPT_KEYS.contains(&key)
                        && !IMAGE_KEYS.contains(&key)
                })
                .filter_map(|(key, value)| Some((key.clone(), non_empty_string(value)?)))
                .collect();

            Some(ProposalItem {
                title: first_string(obj, TITLE_KEYS),
                image: first_string(obj, IMAGE_KEYS),
                prompt: first_string(obj, PROMPT_KEYS),
                fields,
            })
        }
        // A bare string item is a prompt on its own
        Value::String(_) => Some(ProposalItem {
            prompt: non_empty_string(value),
            ..Default::default()
        }),
        _ => None,
    }
}

/// Canonical form used to compare image paths: forward slashes, no host,
/// no `./`, exactly one leading slash.
pub fn normalize_path(path: &str) -> String {
    let mut path = path.trim().replace('\\', "/");

    for scheme in ["http://", "https://"] {
        if let Some(rest) = path.strip_prefix(scheme) {
            path = match rest.find('/') {
                Some(slash) => rest[slash..].to_string(),
                None => String::new(),
            };
            break;
        }
    }

    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    format!("/{}", trimmed)
}

/// URL an image can be fetched from.
///
/// Absolute http(s) URLs pass through. Paths with a leading slash are
/// server-relative; bare file names live under the project's asset
/// directory.
pub fn resolve_asset_url(base_url: &str, asset_prefix: &str, project: &str, path: &str) -> String {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }

    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        return format!("{}{}", base, path);
    }

    let prefix = asset_prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}/{}", base, project, path)
    } else {
        format!("{}/{}/{}/{}", base, prefix, project, path)
    }
}
