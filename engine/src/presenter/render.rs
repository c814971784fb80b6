//! Terminal text renderer
//!
//! Splits prose into markdown blocks and lays views out as plain text.

use super::{Card, GalleryEntry, ImageSlot, Section, View};
use crate::interpreter::markdown;
use std::fmt::Write;

/// One block of prose
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: usize, text: String },
    Paragraph(String),
    ListItem { marker: String, text: String },
    Quote(String),
    Code { lang: String, body: String },
    TableRow(Vec<String>),
    Rule,
}

/// Split prose into blocks. Consecutive text lines join into one paragraph.
pub fn parse_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut code: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if markdown::is_fence(line) {
            match code.take() {
                Some((lang, body)) => blocks.push(Block::Code {
                    lang,
                    body: body.join("\n"),
                }),
                None => {
                    flush(&mut paragraph, &mut blocks);
                    let lang = line.trim_start().trim_start_matches('`').trim().to_string();
                    code = Some((lang, Vec::new()));
                }
            }
            continue;
        }
        if let Some((_, body)) = code.as_mut() {
            body.push(line);
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut paragraph, &mut blocks);
        } else if markdown::is_heading(line) {
            flush(&mut paragraph, &mut blocks);
            let level = trimmed.chars().take_while(|c| *c == '#').count();
            blocks.push(Block::Heading {
                level,
                text: super::heading_title(trimmed),
            });
        } else if markdown::is_rule(line) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Rule);
        } else if markdown::is_list_item(line) {
            flush(&mut paragraph, &mut blocks);
            let (marker, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
            blocks.push(Block::ListItem {
                marker: marker.to_string(),
                text: rest.trim().to_string(),
            });
        } else if let Some(quoted) = trimmed.strip_prefix('>') {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Quote(quoted.trim().to_string()));
        } else if trimmed.starts_with('|') {
            flush(&mut paragraph, &mut blocks);
            if !is_table_separator(trimmed) {
                blocks.push(Block::TableRow(
                    trimmed
                        .trim_matches('|')
                        .split('|')
                        .map(|cell| cell.trim().to_string())
                        .collect(),
                ));
            }
        } else {
            paragraph.push(trimmed);
        }
    }

    // An unterminated fence still shows its body
    if let Some((lang, body)) = code {
        blocks.push(Block::Code {
            lang,
            body: body.join("\n"),
        });
    }
    flush(&mut paragraph, &mut blocks);
    blocks
}

fn flush(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if !paragraph.is_empty() {
        blocks.push(Block::Paragraph(paragraph.join(" ")));
        paragraph.clear();
    }
}

fn is_table_separator(row: &str) -> bool {
    row.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Render prose blocks as terminal text
pub fn render_blocks(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Heading { level, text } => {
                let underline = if *level <= 1 { '=' } else { '-' };
                let _ = writeln!(out, "{}", text);
                let _ = writeln!(
                    out,
                    "{}\n",
                    underline.to_string().repeat(text.chars().count().max(3))
                );
            }
            Block::Paragraph(text) => {
                let _ = writeln!(out, "{}\n", text);
            }
            Block::ListItem { marker, text } => {
                let bullet = if marker.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ')') {
                    marker.as_str()
                } else {
                    "•"
                };
                let _ = writeln!(out, "  {} {}", bullet, text);
            }
            Block::Quote(text) => {
                let _ = writeln!(out, "  │ {}", text);
            }
            Block::Code { body, .. } => {
                for line in body.lines() {
                    let _ = writeln!(out, "    {}", line);
                }
                out.push('\n');
            }
            Block::TableRow(cells) => {
                let _ = writeln!(out, "  {}", cells.join(" │ "));
            }
            Block::Rule => {
                let _ = writeln!(out, "{}\n", "─".repeat(40));
            }
        }
    }
    out
}

fn render_prose(text: &str) -> String {
    render_blocks(&parse_blocks(text))
}

fn render_card(out: &mut String, index: usize, card: &Card) {
    let title = card.title.as_deref().unwrap_or("Untitled");
    let _ = writeln!(out, "[{}] {}", index + 1, title);
    match &card.image {
        ImageSlot::Ready(url) => {
            let _ = writeln!(out, "    image: {}", url);
        }
        ImageSlot::Awaiting => {
            let _ = writeln!(out, "    image: (awaiting image)");
        }
    }
    for (key, value) in &card.fields {
        let _ = writeln!(out, "    {}: {}", key, value);
    }
    if let Some(prompt) = &card.prompt {
        let _ = writeln!(out, "    prompt: {}", prompt);
    }
    out.push('\n');
}

fn render_section(out: &mut String, section: &Section) {
    let _ = writeln!(out, "┌ {}", section.title);
    for line in render_prose(&section.body).lines() {
        let _ = writeln!(out, "│ {}", line);
    }
    let _ = writeln!(out, "└\n");
}

fn render_entry(out: &mut String, entry: &GalleryEntry) {
    let _ = writeln!(out, "{}", entry.url);
    if let Some(concept) = &entry.concept {
        let _ = writeln!(out, "    concept: {}", concept);
    }
    let _ = writeln!(out, "    prompt: {}", entry.prompt.as_deref().unwrap_or(""));
}

/// Render a view as terminal text
pub fn render_view(view: &View) -> String {
    let mut out = String::new();
    match view {
        View::ProposalBoard { hero, cards } => {
            if let Some(hero) = hero {
                out.push_str(&render_prose(hero));
            }
            for (i, card) in cards.iter().enumerate() {
                render_card(&mut out, i, card);
            }
        }
        View::ContentWithPrompts { content, prompts } => {
            out.push_str(&render_prose(content));
            if !prompts.is_empty() {
                let _ = writeln!(out, "Prompts\n-------\n");
                for (i, card) in prompts.iter().enumerate() {
                    render_card(&mut out, i, card);
                }
            }
        }
        View::SectionedProse { intro, sections } => {
            if !intro.is_empty() {
                out.push_str(&render_prose(intro));
            }
            for section in sections {
                render_section(&mut out, section);
            }
        }
        View::Prose { text } => out.push_str(&render_prose(text)),
        View::Gallery { entries } => {
            if entries.is_empty() {
                out.push_str("No images yet.\n");
            }
            for entry in entries {
                render_entry(&mut out, entry);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_then_paragraph() {
        assert_eq!(
            parse_blocks("# Market\n\nGrowing niche."),
            vec![
                Block::Heading {
                    level: 1,
                    text: "Market".into()
                },
                Block::Paragraph("Growing niche.".into()),
            ]
        );
    }

    #[test]
    fn test_mixed_blocks() {
        let text = "Intro line\ncontinues\n\n- one\n2. two\n> said\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\n---\n```json\n{}\n```";
        let blocks = parse_blocks(text);
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph("Intro line continues".into()),
                Block::ListItem {
                    marker: "-".into(),
                    text: "one".into()
                },
                Block::ListItem {
                    marker: "2.".into(),
                    text: "two".into()
                },
                Block::Quote("said".into()),
                Block::TableRow(vec!["a".into(), "b".into()]),
                Block::TableRow(vec!["1".into(), "2".into()]),
                Block::Rule,
                Block::Code {
                    lang: "json".into(),
                    body: "{}".into()
                },
            ]
        );
    }

    #[test]
    fn test_board_shows_placeholder() {
        let view = View::ProposalBoard {
            hero: Some("bold minimal".into()),
            cards: vec![Card {
                title: Some("A".into()),
                image: ImageSlot::Awaiting,
                fields: vec![],
                prompt: Some("p1".into()),
            }],
        };
        let text = render_view(&view);
        assert!(text.contains("bold minimal"));
        assert!(text.contains("[1] A"));
        assert!(text.contains("(awaiting image)"));
        assert!(text.contains("prompt: p1"));
    }
}
