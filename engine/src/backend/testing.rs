//! Scripted backend double for unit tests
//!
//! Each operation pops its next reply from a queue. An exhausted queue
//! answers with a network error so a test that over-fetches fails loudly.

use super::{Backend, TextStream};
use async_trait::async_trait;
use futures::StreamExt;
use sdk::errors::{ClientError, Result};
use sdk::types::{
    BriefRequest, GenerateImagesRequest, GenerateImagesResponse, ProjectMetadata,
    ProjectSnapshot, ProjectStatus, ProjectSummary, RunAllRequest, StepContents, StepEnvelope,
    StepRequest, TagsResponse,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Script {
    lists: VecDeque<Result<Vec<ProjectSummary>>>,
    projects: VecDeque<Result<ProjectSnapshot>>,
    steps: VecDeque<Result<StepEnvelope>>,
    streams: VecDeque<Result<Vec<Result<String>>>>,
    run_all: VecDeque<Result<()>>,
    images: VecDeque<Result<GenerateImagesResponse>>,
    tags: VecDeque<Result<TagsResponse>>,

    list_calls: usize,
    get_calls: usize,
    step_requests: Vec<StepRequest>,
    run_all_requests: Vec<RunAllRequest>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
    get_delay: Mutex<Option<Duration>>,
}

fn exhausted<T>(what: &str) -> Result<T> {
    Err(ClientError::Network(format!("script exhausted: {}", what)))
}

pub fn snapshot(name: &str, status: ProjectStatus) -> ProjectSnapshot {
    ProjectSnapshot {
        metadata: ProjectMetadata {
            project_name: name.to_string(),
            brief: "brief".to_string(),
            status,
            current_step: String::new(),
            tags: vec![],
        },
        contents: StepContents::default(),
        images: vec![],
    }
}

pub fn envelope(result: &str) -> StepEnvelope {
    StepEnvelope {
        status: "success".to_string(),
        result: serde_json::Value::String(result.to_string()),
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_list(&self, reply: Result<Vec<ProjectSummary>>) {
        self.script.lock().unwrap().lists.push_back(reply);
    }

    pub fn push_project(&self, reply: Result<ProjectSnapshot>) {
        self.script.lock().unwrap().projects.push_back(reply);
    }

    pub fn push_step(&self, reply: Result<StepEnvelope>) {
        self.script.lock().unwrap().steps.push_back(reply);
    }

    pub fn push_stream(&self, reply: Result<Vec<Result<String>>>) {
        self.script.lock().unwrap().streams.push_back(reply);
    }

    pub fn push_run_all(&self, reply: Result<()>) {
        self.script.lock().unwrap().run_all.push_back(reply);
    }

    pub fn push_images(&self, reply: Result<GenerateImagesResponse>) {
        self.script.lock().unwrap().images.push_back(reply);
    }

    pub fn push_tags(&self, reply: Result<TagsResponse>) {
        self.script.lock().unwrap().tags.push_back(reply);
    }

    /// Delay every `get_project` reply, to exercise cancellation mid-fetch
    pub fn delay_gets(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    pub fn list_calls(&self) -> usize {
        self.script.lock().unwrap().list_calls
    }

    pub fn get_calls(&self) -> usize {
        self.script.lock().unwrap().get_calls
    }

    pub fn step_requests(&self) -> Vec<StepRequest> {
        self.script.lock().unwrap().step_requests.clone()
    }

    pub fn run_all_requests(&self) -> Vec<RunAllRequest> {
        self.script.lock().unwrap().run_all_requests.clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let mut script = self.script.lock().unwrap();
        script.list_calls += 1;
        script.lists.pop_front().unwrap_or_else(|| exhausted("list"))
    }

    async fn get_project(&self, _name: &str) -> Result<ProjectSnapshot> {
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock().unwrap();
        script.get_calls += 1;
        script
            .projects
            .pop_front()
            .unwrap_or_else(|| exhausted("project"))
    }

    async fn run_step(&self, request: &StepRequest) -> Result<StepEnvelope> {
        let mut script = self.script.lock().unwrap();
        script.step_requests.push(request.clone());
        script.steps.pop_front().unwrap_or_else(|| exhausted("step"))
    }

    async fn stream_step(&self, request: &StepRequest) -> Result<TextStream> {
        let chunks = {
            let mut script = self.script.lock().unwrap();
            script.step_requests.push(request.clone());
            script
                .streams
                .pop_front()
                .unwrap_or_else(|| exhausted("stream"))?
        };
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn run_all(&self, request: &RunAllRequest) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        script.run_all_requests.push(request.clone());
        script.run_all.pop_front().unwrap_or(Ok(()))
    }

    async fn generate_images(
        &self,
        _request: &GenerateImagesRequest,
    ) -> Result<GenerateImagesResponse> {
        let mut script = self.script.lock().unwrap();
        script
            .images
            .pop_front()
            .unwrap_or_else(|| exhausted("images"))
    }

    async fn autocomplete(&self, _request: &BriefRequest) -> Result<TextStream> {
        let chunks = self
            .script
            .lock()
            .unwrap()
            .streams
            .pop_front()
            .unwrap_or_else(|| exhausted("autocomplete"))?;
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn tags(&self, _request: &BriefRequest) -> Result<TagsResponse> {
        let mut script = self.script.lock().unwrap();
        script.tags.pop_front().unwrap_or_else(|| exhausted("tags"))
    }

    async fn export(&self, _name: &str) -> Result<Vec<u8>> {
        Ok(b"PK".to_vec())
    }
}
