//! HTTP backend
//!
//! Implements the `Backend` trait over reqwest. Every request is bounded by
//! the configured timeout, streamed bodies included, so a hung backend
//! surfaces as `ClientError::Timeout` instead of leaving a step running
//! forever.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode, Url};
use sdk::errors::{ClientError, Result};
use sdk::types::{
    BriefRequest, GenerateImagesRequest, GenerateImagesResponse, ProjectSnapshot,
    ProjectSummary, RunAllRequest, StepEnvelope, StepRequest, TagsResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::decode::Utf8Decoder;
use super::{Backend, TextStream};
use crate::config::Config;

/// Backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackend {
    /// Base URL without trailing slash (e.g. http://localhost:8000)
    base_url: String,

    /// HTTP client for API requests
    client: Client,
}

impl HttpBackend {
    /// Create a new HTTP backend
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the generation service
    /// * `timeout` - Upper bound for each request
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.backend.base_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build an endpoint URL, percent-encoding each path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("Invalid base_url: {}", e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::Config("base_url cannot carry a path".to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn transport_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_connect() {
            ClientError::Network(format!(
                "Cannot connect to backend at {}. Is the server running?",
                self.base_url
            ))
        } else {
            ClientError::Network(e.to_string())
        }
    }

    /// Reject non-2xx replies, keeping the body for diagnostics
    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = self.check(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    async fn post(&self, segments: &[&str], body: &impl Serialize) -> Result<Response> {
        let url = self.endpoint(segments)?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.check(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &impl Serialize,
    ) -> Result<T> {
        self.post(segments, body)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    async fn post_stream(&self, segments: &[&str], body: &impl Serialize) -> Result<TextStream> {
        let response = self.post(segments, body).await?;
        Ok(text_stream(response, self.base_url.clone()))
    }
}

/// Turn a chunked body into decoded text chunks.
///
/// Empty decoded pieces (a chunk ending mid-character) are skipped, so
/// every yielded item carries at least one character.
fn text_stream(response: Response, base_url: String) -> TextStream {
    let bytes = Box::pin(response.bytes_stream());

    futures::stream::unfold(
        (bytes, Utf8Decoder::new(), false),
        move |(mut bytes, mut decoder, done)| {
            let base_url = base_url.clone();
            async move {
                if done {
                    return None;
                }
                loop {
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            let text = decoder.push(&chunk);
                            if !text.is_empty() {
                                return Some((Ok(text), (bytes, decoder, false)));
                            }
                        }
                        Some(Err(e)) => {
                            let err = if e.is_timeout() {
                                ClientError::Timeout
                            } else {
                                ClientError::Network(format!(
                                    "Stream from {} interrupted: {}",
                                    base_url, e
                                ))
                            };
                            return Some((Err(err), (bytes, decoder, true)));
                        }
                        None => {
                            let tail = decoder.finish();
                            if tail.is_empty() {
                                return None;
                            }
                            return Some((Ok(tail), (bytes, decoder, true)));
                        }
                    }
                }
            }
        },
    )
    .boxed()
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        self.get_json(&["api", "projects"]).await
    }

    async fn get_project(&self, name: &str) -> Result<ProjectSnapshot> {
        match self.get_json(&["api", "project", name]).await {
            Err(ClientError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(ClientError::ProjectNotFound(name.to_string()))
            }
            other => other,
        }
    }

    async fn run_step(&self, request: &StepRequest) -> Result<StepEnvelope> {
        let start = Instant::now();
        let envelope: StepEnvelope = self
            .post_json(&["api", "workflow", "step"], request)
            .await?;

        info!(
            "Step {} for '{}' answered in {:.1}s",
            request.step,
            request.project_name,
            start.elapsed().as_secs_f64()
        );
        Ok(envelope)
    }

    async fn stream_step(&self, request: &StepRequest) -> Result<TextStream> {
        self.post_stream(&["api", "workflow", "step", "stream"], request)
            .await
    }

    async fn run_all(&self, request: &RunAllRequest) -> Result<()> {
        self.post(&["api", "workflow", "run_all"], request).await?;
        info!("Background run accepted for '{}'", request.project_name);
        Ok(())
    }

    async fn generate_images(
        &self,
        request: &GenerateImagesRequest,
    ) -> Result<GenerateImagesResponse> {
        self.post_json(&["api", "workflow", "generate-images"], request)
            .await
    }

    async fn autocomplete(&self, request: &BriefRequest) -> Result<TextStream> {
        self.post_stream(&["api", "ai", "autocomplete", "stream"], request)
            .await
    }

    async fn tags(&self, request: &BriefRequest) -> Result<TagsResponse> {
        self.post_json(&["api", "ai", "tags"], request).await
    }

    async fn export(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&["api", "project", name, "export"])?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check(response).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(bytes.to_vec())
    }
}
