//! Project state store
//!
//! The store holds the single viewed project. Every asynchronous writer
//! carries the `ViewSession` it was started under; a write whose session is
//! no longer the current one is rejected with `ClientError::StaleView`, so a
//! late reply can never land in another project's state.
//!
//! The project list used by the home view lives in `ProjectList`.

use sdk::errors::{ClientError, Result};
use sdk::types::{
    ContentSlot, ImageRecord, ProjectSnapshot, ProjectStatus, ProjectSummary, StepContents,
    StepId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Local view of one project
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectState {
    pub name: String,
    pub brief: String,
    pub status: ProjectStatus,
    pub current_step: Option<StepId>,
    pub tags: Vec<String>,
    pub contents: StepContents,
    pub images: Vec<ImageRecord>,
}

impl ProjectState {
    pub fn new(name: impl Into<String>, brief: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            brief: brief.into(),
            status: ProjectStatus::Pending,
            current_step: None,
            tags: Vec::new(),
            contents: StepContents::default(),
            images: Vec::new(),
        }
    }

    /// Content of a step, empty when not produced yet
    pub fn content(&self, step: StepId) -> &str {
        step.content_slot()
            .map(|slot| self.contents.get(slot))
            .unwrap_or("")
    }

    /// Number of text stages with content, counted in pipeline order
    pub fn completed_steps(&self) -> usize {
        StepId::ALL
            .iter()
            .take_while(|step| match step.content_slot() {
                Some(slot) => !self.contents.get(slot).is_empty(),
                None => !self.images.is_empty(),
            })
            .count()
    }
}

/// Handle identifying one viewing context.
///
/// Opening another project, or closing the view, cancels the token and
/// invalidates the session.
#[derive(Debug, Clone)]
pub struct ViewSession {
    project: String,
    epoch: u64,
    token: CancellationToken,
}

impl ViewSession {
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    epoch: u64,
    token: Option<CancellationToken>,
    project: Option<ProjectState>,
}

impl StoreInner {
    fn guard(&mut self, session: &ViewSession) -> Result<&mut ProjectState> {
        if session.epoch != self.epoch || session.is_cancelled() {
            return Err(ClientError::StaleView(session.project.clone()));
        }
        self.project
            .as_mut()
            .ok_or_else(|| ClientError::StaleView(session.project.clone()))
    }

    /// Cancel the current session and advance the epoch
    fn rotate(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.epoch += 1;
    }
}

/// Authoritative in-memory state of the viewed project
#[derive(Debug, Clone, Default)]
pub struct ProjectStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start viewing a project, invalidating any previous session
    pub async fn open(&self, name: &str, brief: &str) -> ViewSession {
        let mut inner = self.inner.write().await;
        debug!("Opening view for project '{}'", name);
        inner.rotate();

        let token = CancellationToken::new();
        inner.token = Some(token.clone());
        inner.project = Some(ProjectState::new(name, brief));

        ViewSession {
            project: name.to_string(),
            epoch: inner.epoch,
            token,
        }
    }

    /// Leave the view. Every outstanding session becomes stale.
    pub async fn close(&self) {
        let mut inner = self.inner.write().await;
        inner.rotate();
        inner.project = None;
    }

    pub async fn is_current(&self, session: &ViewSession) -> bool {
        let inner = self.inner.read().await;
        session.epoch == inner.epoch && !session.is_cancelled()
    }

    /// Copy of the viewed project, if any
    pub async fn snapshot(&self) -> Option<ProjectState> {
        self.inner.read().await.project.clone()
    }

    /// Overwrite local state with a canonical snapshot.
    ///
    /// The backend is authoritative, so its status is taken as-is. An empty
    /// `current_step` while in progress keeps the locally known step.
    pub async fn apply_snapshot(
        &self,
        session: &ViewSession,
        snapshot: ProjectSnapshot,
    ) -> Result<ProjectStatus> {
        let mut inner = self.inner.write().await;
        let state = inner.guard(session)?;

        let status = snapshot.metadata.status;
        let step = snapshot.metadata.current_step();

        state.status = status;
        state.current_step = match (status, step) {
            (_, Some(step)) => Some(step),
            (ProjectStatus::InProgress, None) => state.current_step,
            (_, None) => None,
        };
        if !snapshot.metadata.brief.is_empty() {
            state.brief = snapshot.metadata.brief;
        }
        state.tags = snapshot.metadata.tags;
        state.contents = snapshot.contents;
        state.images = snapshot.images;

        Ok(status)
    }

    /// Mark `step` as running. The project moves to in_progress.
    pub async fn begin_step(&self, session: &ViewSession, step: StepId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner.guard(session)?;
        transition(state, ProjectStatus::InProgress)?;
        state.current_step = Some(step);
        Ok(())
    }

    pub async fn clear_step(&self, session: &ViewSession, slot: ContentSlot) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.guard(session)?.contents.get_mut(slot).clear();
        Ok(())
    }

    /// Append a streamed chunk. Content only grows.
    pub async fn append_chunk(
        &self,
        session: &ViewSession,
        slot: ContentSlot,
        chunk: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.guard(session)?.contents.get_mut(slot).push_str(chunk);
        Ok(())
    }

    pub async fn set_step_content(
        &self,
        session: &ViewSession,
        slot: ContentSlot,
        text: String,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        *inner.guard(session)?.contents.get_mut(slot) = text;
        Ok(())
    }

    pub async fn set_images(&self, session: &ViewSession, images: Vec<ImageRecord>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.guard(session)?.images = images;
        Ok(())
    }

    pub async fn append_images(
        &self,
        session: &ViewSession,
        images: Vec<ImageRecord>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.guard(session)?.images.extend(images);
        Ok(())
    }

    pub async fn set_tags(&self, session: &ViewSession, tags: Vec<String>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.guard(session)?.tags = tags;
        Ok(())
    }

    pub async fn set_brief(&self, session: &ViewSession, brief: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.guard(session)?.brief = brief.to_string();
        Ok(())
    }

    /// Apply an automatic status transition, rejecting illegal ones
    pub async fn finish(&self, session: &ViewSession, status: ProjectStatus) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner.guard(session)?;
        transition(state, status)
    }

    /// Explicit user action returning a project to an editable pending
    /// state. Content, name and brief are kept.
    pub async fn reopen(&self, session: &ViewSession) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner.guard(session)?;
        debug!("Reopening project '{}' from {}", state.name, state.status);
        state.status = ProjectStatus::Pending;
        state.current_step = None;
        Ok(())
    }
}

fn transition(state: &mut ProjectState, next: ProjectStatus) -> Result<()> {
    if state.status == next || state.status.can_transition_to(next) {
        state.status = next;
        Ok(())
    } else {
        Err(ClientError::InvalidTransition {
            from: state.status,
            to: next,
        })
    }
}

/// Project list shown on the home view, newest first
#[derive(Debug, Clone, Default)]
pub struct ProjectList {
    projects: Arc<RwLock<Vec<ProjectSummary>>>,
}

impl ProjectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, mut projects: Vec<ProjectSummary>) {
        projects.sort_by(|a, b| b.creation_time.total_cmp(&a.creation_time));
        *self.projects.write().await = projects;
    }

    pub async fn snapshot(&self) -> Vec<ProjectSummary> {
        self.projects.read().await.clone()
    }

    /// Whether any listed project still needs background refresh
    pub async fn any_active(&self) -> bool {
        self.projects
            .read()
            .await
            .iter()
            .any(|p| !p.status.is_terminal())
    }
}
