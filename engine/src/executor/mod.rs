//! Step execution client
//!
//! Issues one pipeline step against the backend, either buffered (one
//! envelope) or streamed (chunks appended to the store as they arrive), and
//! records the outcome in the project store.
//!
//! A transport failure marks the project failed and keeps whatever partial
//! text was already written. A `StaleView` error means the viewing context
//! changed mid-request: nothing is written and the status is left alone.

use crate::backend::{Backend, TextStream};
use crate::config::Config;
use crate::message_bus::{Event, MessageBus, NoticeLevel};
use crate::store::{ProjectStore, ViewSession};
use futures::StreamExt;
use sdk::errors::{ClientError, Result};
use sdk::types::{
    BriefRequest, ContentSlot, GenerateImagesRequest, GenerationSettings, ImageRecord,
    ProjectStatus, StepContext, StepId, StepRequest,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How a step request is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Buffered,
    Streamed,
}

impl ExecutionMode {
    pub fn from_flag(stream: bool) -> Self {
        if stream {
            Self::Streamed
        } else {
            Self::Buffered
        }
    }
}

/// Executes single steps and the auxiliary generation helpers
#[derive(Clone)]
pub struct StepExecutor {
    backend: Arc<dyn Backend>,
    store: ProjectStore,
    bus: MessageBus,
    model_name: String,
    settings: GenerationSettings,
}

impl StepExecutor {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: ProjectStore,
        bus: MessageBus,
        model_name: impl Into<String>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            backend,
            store,
            bus,
            model_name: model_name.into(),
            settings,
        }
    }

    pub fn from_config(
        backend: Arc<dyn Backend>,
        store: ProjectStore,
        bus: MessageBus,
        config: &Config,
    ) -> Self {
        Self::new(
            backend,
            store,
            bus,
            config.generation.model_name.clone(),
            config.generation_settings(),
        )
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Run a step on user request.
    ///
    /// A terminal project is reopened first. On success the project ends
    /// completed.
    pub async fn run_step(
        &self,
        session: &ViewSession,
        step: StepId,
        mode: ExecutionMode,
    ) -> Result<String> {
        self.reopen_if_terminal(session).await?;
        let text = self.execute(session, step, mode).await?;
        self.store
            .finish(session, ProjectStatus::Completed)
            .await?;
        self.bus
            .publish(Event::notice(
                NoticeLevel::Success,
                format!("{} finished", step.label()),
            ))
            .await;
        Ok(text)
    }

    pub(crate) async fn reopen_if_terminal(&self, session: &ViewSession) -> Result<()> {
        let terminal = self
            .store
            .snapshot()
            .await
            .map(|state| state.status.is_terminal())
            .unwrap_or(false);
        if terminal {
            self.store.reopen(session).await?;
        }
        Ok(())
    }

    /// Execute one step and store its output.
    ///
    /// The project moves to in_progress with `step` current. On failure it
    /// is marked failed; the caller decides what success means for status.
    pub async fn execute(
        &self,
        session: &ViewSession,
        step: StepId,
        mode: ExecutionMode,
    ) -> Result<String> {
        let request = self.request(session, step).await?;
        self.store.begin_step(session, step).await?;
        self.bus
            .publish(Event::StepStarted {
                project: request.project_name.clone(),
                step,
            })
            .await;

        let start = Instant::now();
        let result = match (step.content_slot(), mode) {
            (None, _) => self.execute_images(session, &request).await,
            (Some(slot), ExecutionMode::Buffered) => {
                self.execute_buffered(session, slot, &request).await
            }
            (Some(slot), ExecutionMode::Streamed) => {
                self.execute_streamed(session, slot, &request).await
            }
        };

        match result {
            Ok(text) => {
                info!(
                    "Step {} for '{}' completed in {:.1}s ({} chars)",
                    step,
                    request.project_name,
                    start.elapsed().as_secs_f64(),
                    text.chars().count()
                );
                self.bus
                    .publish(Event::StepCompleted {
                        project: request.project_name,
                        step,
                    })
                    .await;
                Ok(text)
            }
            Err(ClientError::StaleView(project)) => {
                debug!("Dropping result of {} for stale view '{}'", step, project);
                Err(ClientError::StaleView(project))
            }
            Err(e) => {
                error!("Step {} for '{}' failed: {}", step, request.project_name, e);
                if let Err(mark) = self.store.finish(session, ProjectStatus::Failed).await {
                    warn!("Could not mark '{}' failed: {}", request.project_name, mark);
                }
                self.bus
                    .publish(Event::StepFailed {
                        project: request.project_name.clone(),
                        step,
                        error: e.to_string(),
                    })
                    .await;
                self.bus
                    .publish(Event::notice(
                        NoticeLevel::Error,
                        format!("{} failed: {}", step.label(), e),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn request(&self, session: &ViewSession, step: StepId) -> Result<StepRequest> {
        let state = self
            .store
            .snapshot()
            .await
            .filter(|state| state.name == session.project())
            .ok_or_else(|| ClientError::StaleView(session.project().to_string()))?;

        Ok(StepRequest {
            project_name: state.name,
            step,
            brief: state.brief,
            model_name: self.model_name.clone(),
            context: StepContext::from_contents(&state.contents),
            settings: self.settings.clone(),
        })
    }

    async fn execute_buffered(
        &self,
        session: &ViewSession,
        slot: ContentSlot,
        request: &StepRequest,
    ) -> Result<String> {
        let envelope = tokio::select! {
            _ = session.token().cancelled() => {
                return Err(ClientError::StaleView(session.project().to_string()));
            }
            envelope = self.backend.run_step(request) => envelope?,
        };

        if !envelope.is_success() {
            let detail = envelope.result_text();
            return Err(ClientError::StepRejected(if detail.is_empty() {
                envelope.status
            } else {
                detail
            }));
        }

        let text = envelope.result_text();
        self.store
            .set_step_content(session, slot, text.clone())
            .await?;
        Ok(text)
    }

    async fn execute_streamed(
        &self,
        session: &ViewSession,
        slot: ContentSlot,
        request: &StepRequest,
    ) -> Result<String> {
        let stream = tokio::select! {
            _ = session.token().cancelled() => {
                return Err(ClientError::StaleView(session.project().to_string()));
            }
            stream = self.backend.stream_step(request) => stream?,
        };

        self.store.clear_step(session, slot).await?;
        self.consume(session, slot, request, stream).await
    }

    /// Drain a step stream in arrival order. A stream that ends without
    /// any text is an `EmptyStream` failure.
    async fn consume(
        &self,
        session: &ViewSession,
        slot: ContentSlot,
        request: &StepRequest,
        mut stream: TextStream,
    ) -> Result<String> {
        let mut received = String::new();
        loop {
            let next = tokio::select! {
                _ = session.token().cancelled() => {
                    return Err(ClientError::StaleView(session.project().to_string()));
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            self.store.append_chunk(session, slot, &chunk).await?;
            received.push_str(&chunk);
            self.bus
                .publish(Event::StepChunk {
                    project: request.project_name.clone(),
                    step: request.step,
                    chunk,
                })
                .await;
        }

        if received.is_empty() {
            return Err(ClientError::EmptyStream);
        }
        Ok(received)
    }

    /// The image stage answers with a buffered envelope; the produced
    /// records are read back from the canonical snapshot.
    async fn execute_images(&self, session: &ViewSession, request: &StepRequest) -> Result<String> {
        let envelope = tokio::select! {
            _ = session.token().cancelled() => {
                return Err(ClientError::StaleView(session.project().to_string()));
            }
            envelope = self.backend.run_step(request) => envelope?,
        };
        if !envelope.is_success() {
            return Err(ClientError::StepRejected(envelope.result_text()));
        }

        match self.backend.get_project(session.project()).await {
            Ok(snapshot) => {
                self.store.set_images(session, snapshot.images).await?;
            }
            Err(e) => warn!(
                "Could not refresh images for '{}': {}",
                session.project(),
                e
            ),
        }
        Ok(envelope.result_text())
    }

    /// Regenerate images outside the pipeline and append them
    pub async fn generate_images(
        &self,
        session: &ViewSession,
        count: u32,
    ) -> Result<Vec<ImageRecord>> {
        let request = GenerateImagesRequest {
            project_name: session.project().to_string(),
            count,
            model_name: self.model_name.clone(),
            settings: self.settings.clone(),
        };

        let response = tokio::select! {
            _ = session.token().cancelled() => {
                return Err(ClientError::StaleView(session.project().to_string()));
            }
            response = self.backend.generate_images(&request) => response?,
        };
        if response.status != "success" {
            return Err(ClientError::StepRejected(response.status));
        }

        info!(
            "Generated {} images for '{}'",
            response.images.len(),
            session.project()
        );
        self.store
            .append_images(session, response.images.clone())
            .await?;
        Ok(response.images)
    }

    /// Generate tags from the project's brief and replace its tag list
    pub async fn generate_tags(&self, session: &ViewSession) -> Result<Vec<String>> {
        let brief = self
            .store
            .snapshot()
            .await
            .map(|state| state.brief)
            .unwrap_or_default();
        let tags = self.suggest_tags(&brief).await?;
        self.store.set_tags(session, tags.clone()).await?;
        Ok(tags)
    }

    /// Tags for a brief, without touching the store
    pub async fn suggest_tags(&self, brief: &str) -> Result<Vec<String>> {
        let response = self
            .backend
            .tags(&BriefRequest {
                brief: brief.to_string(),
                model_name: self.model_name.clone(),
            })
            .await?;
        Ok(response.tags)
    }

    /// Stream a completion of `brief` to `sink`, returning the full text
    pub async fn autocomplete<F>(&self, brief: &str, mut sink: F) -> Result<String>
    where
        F: FnMut(&str),
    {
        let mut stream = self
            .backend
            .autocomplete(&BriefRequest {
                brief: brief.to_string(),
                model_name: self.model_name.clone(),
            })
            .await?;

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            sink(&chunk);
            text.push_str(&chunk);
        }
        if text.is_empty() {
            return Err(ClientError::EmptyStream);
        }
        Ok(text)
    }
}
