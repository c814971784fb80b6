//! Presentation dispatcher
//!
//! Picks a view template from the shape of interpreted content. The same
//! step can render differently across projects: a design step that
//! produced prose renders as prose, not as an empty proposal board.

pub mod render;
pub mod structured;

use crate::interpreter::{self, markdown, Interpreted};
use crate::store::ProjectState;
use sdk::types::{ImageRecord, StepId};
use serde::Serialize;

pub use render::{parse_blocks, render_view, Block};
pub use structured::{normalize_path, resolve_asset_url, ProposalItem, Proposals};

/// Image area of a proposal card
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSlot {
    Ready(String),
    Awaiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Card {
    pub title: Option<String>,
    pub image: ImageSlot,
    pub fields: Vec<(String, String)>,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryEntry {
    pub path: String,
    pub url: String,
    pub concept: Option<String>,
    /// Empty slot when no proposal prompt matches the image
    pub prompt: Option<String>,
}

/// A renderable view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    /// Hero summary plus one card per proposal item
    ProposalBoard { hero: Option<String>, cards: Vec<Card> },
    /// Content as prose, followed by a grid of prompt cards
    ContentWithPrompts { content: String, prompts: Vec<Card> },
    /// Research prose split on level-2/3 headings
    SectionedProse { intro: String, sections: Vec<Section> },
    Prose { text: String },
    Gallery { entries: Vec<GalleryEntry> },
}

/// Where image assets are served from
#[derive(Debug, Clone)]
pub struct AssetResolver {
    pub base_url: String,
    pub asset_prefix: String,
}

impl AssetResolver {
    pub fn new(base_url: impl Into<String>, asset_prefix: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            asset_prefix: asset_prefix.into(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.backend.base_url.clone(),
            config.backend.asset_prefix.clone(),
        )
    }

    pub fn url(&self, project: &str, path: &str) -> String {
        resolve_asset_url(&self.base_url, &self.asset_prefix, project, path)
    }
}

/// Inputs the dispatcher needs beyond the step's own text
pub struct DispatchContext<'a> {
    pub project: &'a str,
    pub assets: &'a AssetResolver,
    /// Raw design proposal text, for prompt correlation
    pub design_proposals: &'a str,
    pub images: &'a [ImageRecord],
}

/// Build the view of one step of a project
pub fn present(state: &ProjectState, step: StepId, assets: &AssetResolver) -> View {
    let ctx = DispatchContext {
        project: &state.name,
        assets,
        design_proposals: &state.contents.design_proposals,
        images: &state.images,
    };
    dispatch(step, state.content(step), &ctx)
}

/// Choose a template for `raw` produced by `step`
pub fn dispatch(step: StepId, raw: &str, ctx: &DispatchContext<'_>) -> View {
    if step == StepId::ImageGeneration {
        return gallery(ctx);
    }

    match interpreter::interpret(raw) {
        Interpreted::Structured(value) => structured_view(&Proposals::from_value(&value), ctx, &value),
        Interpreted::Prose(text) => prose_view(step, text),
    }
}

fn structured_view(
    proposals: &Proposals,
    ctx: &DispatchContext<'_>,
    value: &serde_json::Value,
) -> View {
    let cards = || {
        proposals
            .items
            .iter()
            .map(|item| card(item, ctx))
            .collect::<Vec<_>>()
    };

    match (&proposals.summary, &proposals.content) {
        (Some(summary), _) if !proposals.items.is_empty() => View::ProposalBoard {
            hero: Some(summary.clone()),
            cards: cards(),
        },
        (None, None) if !proposals.items.is_empty() => View::ProposalBoard {
            hero: None,
            cards: cards(),
        },
        (_, Some(content)) => View::ContentWithPrompts {
            content: interpreter::repair_markdown(&interpreter::normalize_escapes(content)),
            prompts: cards(),
        },
        (Some(summary), None) => View::Prose {
            text: summary.clone(),
        },
        // Unrecognized shape: show the payload itself
        (None, None) => View::Prose {
            text: serde_json::to_string_pretty(value).unwrap_or_default(),
        },
    }
}

fn card(item: &ProposalItem, ctx: &DispatchContext<'_>) -> Card {
    let image = item
        .image
        .clone()
        .or_else(|| matching_record(item, ctx.images).map(|record| record.path.clone()));

    Card {
        title: item.title.clone(),
        image: match image {
            Some(path) => ImageSlot::Ready(ctx.assets.url(ctx.project, &path)),
            None => ImageSlot::Awaiting,
        },
        fields: item.fields.clone(),
        prompt: item.prompt.clone(),
    }
}

/// An image record produced for this item, matched by prompt or concept
fn matching_record<'a>(item: &ProposalItem, images: &'a [ImageRecord]) -> Option<&'a ImageRecord> {
    images.iter().find(|record| {
        let by_prompt = item.prompt.is_some() && record.prompt == item.prompt;
        let by_concept = item.title.is_some() && record.concept == item.title;
        by_prompt || by_concept
    })
}

fn prose_view(step: StepId, text: String) -> View {
    if step.is_research() {
        if let Some((intro, sections)) = split_sections(&text) {
            return View::SectionedProse { intro, sections };
        }
    }
    View::Prose { text }
}

fn is_section_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    (trimmed.starts_with("## ") || trimmed.starts_with("### ")) && markdown::is_heading(line)
}

/// Split prose on level-2/3 headings. `None` when there are none.
pub fn split_sections(text: &str) -> Option<(String, Vec<Section>)> {
    let mut intro = Vec::new();
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if markdown::is_fence(line) {
            in_fence = !in_fence;
        }
        if !in_fence && is_section_heading(line) {
            sections.push((heading_title(line), Vec::new()));
            continue;
        }
        match sections.last_mut() {
            Some((_, body)) => body.push(line),
            None => intro.push(line),
        }
    }

    if sections.is_empty() {
        return None;
    }

    Some((
        intro.join("\n").trim().to_string(),
        sections
            .into_iter()
            .map(|(title, body)| Section {
                title,
                body: body.join("\n").trim().to_string(),
            })
            .collect(),
    ))
}

/// Heading text with its markers and inline emphasis removed
pub fn heading_title(line: &str) -> String {
    line.trim()
        .trim_start_matches('#')
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn gallery(ctx: &DispatchContext<'_>) -> View {
    let proposals = match interpreter::interpret(ctx.design_proposals) {
        Interpreted::Structured(value) => Proposals::from_value(&value),
        Interpreted::Prose(_) => Proposals::default(),
    };

    let entries = ctx
        .images
        .iter()
        .map(|record| GalleryEntry {
            path: record.path.clone(),
            url: ctx.assets.url(ctx.project, &record.path),
            concept: record.concept.clone(),
            prompt: proposals
                .prompt_for_image(&record.path)
                .map(str::to_string),
        })
        .collect();

    View::Gallery { entries }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets() -> AssetResolver {
        AssetResolver::new("http://localhost:8000", "/projects")
    }

    fn ctx<'a>(assets: &'a AssetResolver, proposals: &'a str, images: &'a [ImageRecord]) -> DispatchContext<'a> {
        DispatchContext {
            project: "bag",
            assets,
            design_proposals: proposals,
            images,
        }
    }

    #[test]
    fn test_summary_and_items_render_board() {
        let assets = assets();
        let raw = r#"{"summary":"bold minimal","prompts":[{"scheme":"A","prompt":"p1"},{"title":"B","image":"b.png"}]}"#;
        let view = dispatch(StepId::DesignGeneration, raw, &ctx(&assets, "", &[]));

        match view {
            View::ProposalBoard { hero, cards } => {
                assert_eq!(hero.as_deref(), Some("bold minimal"));
                assert_eq!(cards.len(), 2);
                assert_eq!(cards[0].title.as_deref(), Some("A"));
                assert_eq!(cards[0].image, ImageSlot::Awaiting);
                assert_eq!(cards[0].prompt.as_deref(), Some("p1"));
                assert_eq!(
                    cards[1].image,
                    ImageSlot::Ready("http://localhost:8000/projects/bag/b.png".into())
                );
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn test_card_image_from_generated_record() {
        let assets = assets();
        let images = vec![ImageRecord {
            path: "/projects/bag/1.png".into(),
            concept: Some("A".into()),
            prompt: None,
        }];
        let raw = r#"{"summary":"s","proposals":[{"title":"A"}]}"#;
        let view = dispatch(StepId::DesignGeneration, raw, &ctx(&assets, "", &images));

        let View::ProposalBoard { cards, .. } = view else {
            panic!("expected a board");
        };
        assert_eq!(
            cards[0].image,
            ImageSlot::Ready("http://localhost:8000/projects/bag/1.png".into())
        );
    }

    #[test]
    fn test_content_with_prompts() {
        let assets = assets();
        let raw = r#"{"content":"Intro\\n## Part","prompts":["p1"]}"#;
        let view = dispatch(StepId::FullReport, raw, &ctx(&assets, "", &[]));

        assert_eq!(
            view,
            View::ContentWithPrompts {
                content: "Intro\n\n## Part".into(),
                prompts: vec![Card {
                    title: None,
                    image: ImageSlot::Awaiting,
                    fields: vec![],
                    prompt: Some("p1".into()),
                }],
            }
        );
    }

    #[test]
    fn test_research_prose_is_sectioned() {
        let assets = assets();
        let raw = "Overview first.\n## **Trends**\nUp.\n### Risks\nDown.";
        let view = dispatch(StepId::MarketAnalysis, raw, &ctx(&assets, "", &[]));

        assert_eq!(
            view,
            View::SectionedProse {
                intro: "Overview first.".into(),
                sections: vec![
                    Section {
                        title: "Trends".into(),
                        body: "Up.".into()
                    },
                    Section {
                        title: "Risks".into(),
                        body: "Down.".into()
                    },
                ],
            }
        );
    }

    #[test]
    fn test_report_prose_not_sectioned() {
        let assets = assets();
        let raw = "## Final\nDone.";
        let view = dispatch(StepId::FullReport, raw, &ctx(&assets, "", &[]));
        assert!(matches!(view, View::Prose { .. }));
    }

    #[test]
    fn test_research_without_subheadings_is_prose() {
        let assets = assets();
        let view = dispatch(
            StepId::VisualResearch,
            "# Market\n\nGrowing niche.",
            &ctx(&assets, "", &[]),
        );
        assert_eq!(
            view,
            View::Prose {
                text: "# Market\n\nGrowing niche.".into()
            }
        );
    }

    #[test]
    fn test_gallery_correlates_prompts_by_path() {
        let assets = assets();
        let proposals = r#"{"summary":"s","prompts":[{"title":"A","image":"out/a.png","prompt":"p-a"}]}"#;
        let images = vec![ImageRecord::new("/out/a.png"), ImageRecord::new("/out/z.png")];
        let view = dispatch(StepId::ImageGeneration, "", &ctx(&assets, proposals, &images));

        let View::Gallery { entries } = view else {
            panic!("expected a gallery");
        };
        assert_eq!(entries[0].prompt.as_deref(), Some("p-a"));
        assert_eq!(entries[0].url, "http://localhost:8000/out/a.png");
        assert_eq!(entries[1].prompt, None);
    }

    #[test]
    fn test_gallery_ignores_prompt_stored_on_unmatched_record() {
        let assets = assets();
        let proposals = r#"{"summary":"s","prompts":[{"title":"A","image":"out/a.png","prompt":"p-a"}]}"#;
        let images = vec![ImageRecord {
            path: "/out/z.png".to_string(),
            concept: Some("Z".to_string()),
            prompt: Some("stored".to_string()),
        }];
        let view = dispatch(StepId::ImageGeneration, "", &ctx(&assets, proposals, &images));

        let View::Gallery { entries } = view else {
            panic!("expected a gallery");
        };
        assert_eq!(entries[0].prompt, None);
        assert_eq!(entries[0].concept.as_deref(), Some("Z"));
    }

    #[test]
    fn test_heading_title_strips_markup() {
        assert_eq!(heading_title("### `Price` _bands_ "), "Price bands");
    }
}
