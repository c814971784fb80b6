//! Backend abstraction layer
//!
//! The generation service is an external collaborator. The `Backend` trait
//! is the seam every component talks through: the HTTP implementation lives
//! in `http`, and tests substitute scripted doubles.

use async_trait::async_trait;
use futures::stream::BoxStream;
use sdk::errors::{ClientError, Result};
use sdk::types::{
    BriefRequest, GenerateImagesRequest, GenerateImagesResponse, ProjectSnapshot,
    ProjectSummary, RunAllRequest, StepEnvelope, StepRequest, TagsResponse,
};
use std::time::Duration;
use tracing::warn;

pub mod decode;
pub mod http;

#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpBackend;

/// Text chunks of a streamed response, in arrival order
pub type TextStream = BoxStream<'static, Result<String>>;

/// Interface exposed by the generation service
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /api/projects`
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>>;

    /// `GET /api/project/{name}`
    async fn get_project(&self, name: &str) -> Result<ProjectSnapshot>;

    /// `POST /api/workflow/step`
    async fn run_step(&self, request: &StepRequest) -> Result<StepEnvelope>;

    /// `POST /api/workflow/step/stream`
    async fn stream_step(&self, request: &StepRequest) -> Result<TextStream>;

    /// `POST /api/workflow/run_all`. Returns once the run is accepted.
    async fn run_all(&self, request: &RunAllRequest) -> Result<()>;

    /// `POST /api/workflow/generate-images`
    async fn generate_images(
        &self,
        request: &GenerateImagesRequest,
    ) -> Result<GenerateImagesResponse>;

    /// `POST /api/ai/autocomplete/stream`
    async fn autocomplete(&self, request: &BriefRequest) -> Result<TextStream>;

    /// `POST /api/ai/tags`
    async fn tags(&self, request: &BriefRequest) -> Result<TagsResponse>;

    /// `GET /api/project/{name}/export`
    async fn export(&self, name: &str) -> Result<Vec<u8>>;
}

/// Fetch the project list, retrying transport failures with exponential
/// backoff (`base_delay`, then doubling) between attempts.
pub async fn list_projects_with_retry(
    backend: &dyn Backend,
    attempts: u32,
    base_delay: Duration,
) -> Result<Vec<ProjectSummary>> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match backend.list_projects().await {
            Ok(projects) => return Ok(projects),
            Err(e) if !e.is_transport() => return Err(e),
            Err(e) => {
                warn!(
                    "Project list fetch failed (attempt {}/{}): {}",
                    attempt + 1,
                    attempts,
                    e
                );
                last_error = Some(e);
            }
        }

        if attempt + 1 < attempts {
            tokio::time::sleep(base_delay * 2u32.pow(attempt)).await;
        }
    }

    Err(last_error.unwrap_or_else(|| ClientError::Network("project list unavailable".into())))
}
