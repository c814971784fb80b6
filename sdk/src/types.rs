//! Wire and domain types shared by the engine and its tests
//!
//! These mirror the JSON bodies exchanged with the generation backend.
//! Content, tag, image and status fields are always present: a missing or
//! `null` field on the wire deserializes to its empty default.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ProjectStatus {
    /// Completed and failed are terminal: polling stops and no automatic
    /// transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether an automatic transition from `self` to `next` is allowed.
    ///
    /// Staying in the same non-terminal state is allowed so that a running
    /// sequence can advance its current step.
    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Pending) => true,
            (Self::Pending, Self::InProgress) => true,
            (Self::InProgress, Self::InProgress) => true,
            (Self::InProgress, Self::Completed) => true,
            (Self::InProgress, Self::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage of the generation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    MarketAnalysis,
    VisualResearch,
    DesignGeneration,
    ImageGeneration,
    FullReport,
}

impl StepId {
    /// Fixed pipeline order
    pub const ALL: [StepId; 5] = [
        StepId::MarketAnalysis,
        StepId::VisualResearch,
        StepId::DesignGeneration,
        StepId::ImageGeneration,
        StepId::FullReport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketAnalysis => "market_analysis",
            Self::VisualResearch => "visual_research",
            Self::DesignGeneration => "design_generation",
            Self::ImageGeneration => "image_generation",
            Self::FullReport => "full_report",
        }
    }

    /// Position in the pipeline, starting at 0
    pub fn index(self) -> usize {
        match self {
            Self::MarketAnalysis => 0,
            Self::VisualResearch => 1,
            Self::DesignGeneration => 2,
            Self::ImageGeneration => 3,
            Self::FullReport => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::MarketAnalysis => "Market Analysis",
            Self::VisualResearch => "Visual Research",
            Self::DesignGeneration => "Design Proposals",
            Self::ImageGeneration => "Image Gallery",
            Self::FullReport => "Full Report",
        }
    }

    /// Where the stage's text output lives. Image generation produces
    /// image records instead of text.
    pub fn content_slot(self) -> Option<ContentSlot> {
        match self {
            Self::MarketAnalysis => Some(ContentSlot::MarketAnalysis),
            Self::VisualResearch => Some(ContentSlot::VisualResearch),
            Self::DesignGeneration => Some(ContentSlot::DesignProposals),
            Self::ImageGeneration => None,
            Self::FullReport => Some(ContentSlot::FullReport),
        }
    }

    /// Research stages get sectioned prose rendering
    pub fn is_research(self) -> bool {
        matches!(self, Self::MarketAnalysis | Self::VisualResearch)
    }

    pub fn is_last(self) -> bool {
        self == Self::FullReport
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepId::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown step '{}'. Must be one of: {}",
                    s,
                    StepId::ALL.map(StepId::as_str).join(", ")
                )
            })
    }
}

/// Text content fields of a project snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentSlot {
    MarketAnalysis,
    VisualResearch,
    DesignProposals,
    FullReport,
}

impl ContentSlot {
    pub fn key(self) -> &'static str {
        match self {
            Self::MarketAnalysis => "market_analysis",
            Self::VisualResearch => "visual_research",
            Self::DesignProposals => "design_proposals",
            Self::FullReport => "full_report",
        }
    }
}

/// Per-stage text content. Every field defaults to empty, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContents {
    #[serde(default, deserialize_with = "null_as_default")]
    pub market_analysis: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub visual_research: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub design_proposals: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_report: String,
}

impl StepContents {
    pub fn get(&self, slot: ContentSlot) -> &str {
        match slot {
            ContentSlot::MarketAnalysis => &self.market_analysis,
            ContentSlot::VisualResearch => &self.visual_research,
            ContentSlot::DesignProposals => &self.design_proposals,
            ContentSlot::FullReport => &self.full_report,
        }
    }

    pub fn get_mut(&mut self, slot: ContentSlot) -> &mut String {
        match slot {
            ContentSlot::MarketAnalysis => &mut self.market_analysis,
            ContentSlot::VisualResearch => &mut self.visual_research,
            ContentSlot::DesignProposals => &mut self.design_proposals,
            ContentSlot::FullReport => &mut self.full_report,
        }
    }
}

/// An image produced by the pipeline.
///
/// The backend reports images either as bare server-relative paths or as
/// objects carrying the path plus optional concept and prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    #[serde(rename = "image_path")]
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ImageRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            concept: None,
            prompt: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawImage {
    Path(String),
    Record {
        #[serde(alias = "path")]
        image_path: String,
        #[serde(default)]
        concept: Option<String>,
        #[serde(default)]
        prompt: Option<String>,
    },
}

impl<'de> Deserialize<'de> for ImageRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawImage::deserialize(deserializer)? {
            RawImage::Path(path) => ImageRecord::new(path),
            RawImage::Record {
                image_path,
                concept,
                prompt,
            } => ImageRecord {
                path: image_path,
                concept,
                prompt,
            },
        })
    }
}

/// Entry of `GET /api/projects`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub brief: String,
    /// Unix seconds
    #[serde(default, deserialize_with = "null_as_default")]
    pub creation_time: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ProjectStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

/// `metadata` block of `GET /api/project/{name}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub brief: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: ProjectStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_step: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

impl ProjectMetadata {
    /// The current step, when the backend reports a known one
    pub fn current_step(&self) -> Option<StepId> {
        self.current_step.parse().ok()
    }
}

/// Canonical snapshot returned by `GET /api/project/{name}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub metadata: ProjectMetadata,
    #[serde(flatten)]
    pub contents: StepContents,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<ImageRecord>,
}

/// Generation parameters forwarded with every step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub image_count: u32,
    pub persona: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_credential: Option<String>,
}

/// Upstream context for a step, keyed by prior step output names.
///
/// The design proposal text is sent twice: the image generation stage
/// reads it as `design_prompts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    pub market_analysis: String,
    pub visual_research: String,
    pub design_proposals: String,
    pub design_prompts: String,
}

impl StepContext {
    pub fn from_contents(contents: &StepContents) -> Self {
        Self {
            market_analysis: contents.market_analysis.clone(),
            visual_research: contents.visual_research.clone(),
            design_proposals: contents.design_proposals.clone(),
            design_prompts: contents.design_proposals.clone(),
        }
    }
}

/// Body of `POST /api/workflow/step` and `/api/workflow/step/stream`
#[derive(Debug, Clone, Serialize)]
pub struct StepRequest {
    pub project_name: String,
    pub step: StepId,
    pub brief: String,
    pub model_name: String,
    pub context: StepContext,
    pub settings: GenerationSettings,
}

/// Buffered reply of a step request
#[derive(Debug, Clone, Deserialize)]
pub struct StepEnvelope {
    pub status: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl StepEnvelope {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// The result payload as text. Non-string payloads are re-serialized
    /// so the interpreter can still recover their structure.
    pub fn result_text(&self) -> String {
        match &self.result {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Body of `POST /api/workflow/run_all`
#[derive(Debug, Clone, Serialize)]
pub struct RunAllRequest {
    pub project_name: String,
    pub brief: String,
    pub model_name: String,
    pub settings: GenerationSettings,
}

/// Body of `POST /api/workflow/generate-images`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateImagesRequest {
    pub project_name: String,
    pub count: u32,
    pub model_name: String,
    pub settings: GenerationSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateImagesResponse {
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<ImageRecord>,
}

/// Body of the auxiliary single-field helpers
#[derive(Debug, Clone, Serialize)]
pub struct BriefRequest {
    pub brief: String,
    pub model_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

/// Reads an explicit `null` the same as a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
