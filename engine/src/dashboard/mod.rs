//! Dashboard controller
//!
//! Owns the store, the poll registry and the executors for one application
//! instance, and derives the view mode from the viewed project's status:
//!
//! - `Home`: no project, or a pending one with an editable name and brief
//! - `Running`: in progress, with stage-index progress
//! - `Results`: completed
//! - `Failed`: failed, offering return-home and retry

use crate::backend::{self, Backend};
use crate::config::{Config, RunAllPolicy};
use crate::executor::{ExecutionMode, StepExecutor};
use crate::message_bus::MessageBus;
use crate::poller::{PollHandle, PollScope, PollSettings, Poller};
use crate::presenter::{self, AssetResolver, View};
use crate::sequencer::{progress_percent, RunOutcome, StepSequencer};
use crate::store::{ProjectList, ProjectState, ProjectStore, ViewSession};
use sdk::errors::{ClientError, Result};
use sdk::types::{ProjectStatus, ProjectSummary, StepId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Attempts for the project list fetch
const LIST_ATTEMPTS: u32 = 3;

/// First backoff delay of the project list fetch; doubles per attempt
const LIST_BASE_DELAY: Duration = Duration::from_millis(500);

/// What the user is looking at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ViewMode {
    Home { name: String, brief: String },
    Running { progress: u8, current_step: Option<StepId> },
    Results,
    Failed,
}

/// A freshly selected project
#[derive(Debug)]
pub struct Selection {
    pub session: ViewSession,
    /// Detail poll loop, started when the fetched status is non-terminal
    pub poll: Option<PollHandle>,
}

/// Stage-index progress: 100 when completed, otherwise the progress of
/// the stage currently running.
pub fn progress_for(state: &ProjectState) -> u8 {
    match state.status {
        ProjectStatus::Completed => 100,
        _ => progress_percent(state.current_step.map(StepId::index).unwrap_or(0)),
    }
}

pub struct Dashboard {
    backend: Arc<dyn Backend>,
    store: ProjectStore,
    list: ProjectList,
    bus: MessageBus,
    poller: Poller,
    executor: StepExecutor,
    sequencer: StepSequencer,
    assets: AssetResolver,
    policy: RunAllPolicy,
}

impl Dashboard {
    pub fn new(backend: Arc<dyn Backend>, config: &Config, bus: MessageBus) -> Self {
        let store = ProjectStore::new();
        let list = ProjectList::new();

        let poller = Poller::new(
            Arc::clone(&backend),
            store.clone(),
            list.clone(),
            bus.clone(),
            PollSettings::from_config(config),
        );
        let executor =
            StepExecutor::from_config(Arc::clone(&backend), store.clone(), bus.clone(), config);
        let sequencer = StepSequencer::new(
            Arc::clone(&backend),
            executor.clone(),
            poller.clone(),
            store.clone(),
            bus.clone(),
        )
        .with_mode(ExecutionMode::from_flag(config.workflow.stream_steps));

        Self {
            backend,
            store,
            list,
            bus,
            poller,
            executor,
            sequencer,
            assets: AssetResolver::from_config(config),
            policy: config.workflow.run_all_policy,
        }
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn assets(&self) -> &AssetResolver {
        &self.assets
    }

    pub fn policy(&self) -> RunAllPolicy {
        self.policy
    }

    /// Fetch the project list with retry. Starts the background list
    /// refresh while any project is still running.
    pub async fn refresh_projects(&self) -> Result<(Vec<ProjectSummary>, Option<PollHandle>)> {
        let projects =
            backend::list_projects_with_retry(self.backend.as_ref(), LIST_ATTEMPTS, LIST_BASE_DELAY)
                .await?;
        self.list.replace(projects).await;

        let poll = if self.list.any_active().await {
            Some(self.poller.watch_list().await)
        } else {
            None
        };
        Ok((self.list.snapshot().await, poll))
    }

    pub async fn projects(&self) -> Vec<ProjectSummary> {
        self.list.snapshot().await
    }

    /// Start a new, not-yet-existing project. The backend creates it on the
    /// first step or run request.
    pub async fn new_project(&self, name: &str, brief: &str) -> ViewSession {
        self.poller.cancel(PollScope::Detail).await;
        info!("New project '{}'", name);
        self.store.open(name, brief).await
    }

    /// View an existing project: one full fetch, then a detail poll loop
    /// if its status is non-terminal.
    pub async fn select_project(&self, name: &str) -> Result<Selection> {
        self.poller.cancel(PollScope::Detail).await;
        let session = self.store.open(name, "").await;

        let snapshot = self.backend.get_project(name).await?;
        let status = self.store.apply_snapshot(&session, snapshot).await?;
        debug!("Selected '{}' with status {}", name, status);

        let poll = if status.is_terminal() {
            None
        } else {
            Some(self.poller.watch_project(&session).await)
        };
        Ok(Selection { session, poll })
    }

    /// Select `name`, or start it as a new project when the backend does
    /// not know it yet
    pub async fn open_or_create(&self, name: &str, brief: &str) -> Result<Selection> {
        match self.select_project(name).await {
            Ok(selection) => {
                if !brief.is_empty() {
                    self.store.set_brief(&selection.session, brief).await?;
                }
                Ok(selection)
            }
            Err(ClientError::ProjectNotFound(_)) => Ok(Selection {
                session: self.new_project(name, brief).await,
                poll: None,
            }),
            Err(e) => Err(e),
        }
    }

    /// Leave the project view. Its poll loop stops and late replies are
    /// discarded.
    pub async fn leave_view(&self) {
        self.poller.cancel(PollScope::Detail).await;
        self.store.close().await;
    }

    /// Full reset back to an empty home view
    pub async fn return_home(&self) {
        self.poller.cancel_all().await;
        self.store.close().await;
    }

    /// Back to an editable pending state, keeping name and brief
    pub async fn retry(&self, session: &ViewSession) -> Result<ViewMode> {
        self.poller.cancel(PollScope::Detail).await;
        self.store.reopen(session).await?;
        Ok(self.mode().await)
    }

    pub async fn mode(&self) -> ViewMode {
        match self.store.snapshot().await {
            None => ViewMode::Home {
                name: String::new(),
                brief: String::new(),
            },
            Some(state) => match state.status {
                ProjectStatus::Pending => ViewMode::Home {
                    name: state.name,
                    brief: state.brief,
                },
                ProjectStatus::InProgress => ViewMode::Running {
                    progress: progress_for(&state),
                    current_step: state.current_step,
                },
                ProjectStatus::Completed => ViewMode::Results,
                ProjectStatus::Failed => ViewMode::Failed,
            },
        }
    }

    pub async fn run_step(
        &self,
        session: &ViewSession,
        step: StepId,
        mode: ExecutionMode,
    ) -> Result<String> {
        self.executor.run_step(session, step, mode).await
    }

    /// Run every stage under `policy`, or the configured one
    pub async fn run_all(
        &self,
        session: &ViewSession,
        policy: Option<RunAllPolicy>,
    ) -> Result<RunOutcome> {
        self.poller.cancel(PollScope::Detail).await;
        self.sequencer
            .run_all(session, policy.unwrap_or(self.policy))
            .await
    }

    /// View of one step of the viewed project
    pub async fn view(&self, step: StepId) -> Option<View> {
        let state = self.store.snapshot().await?;
        Some(presenter::present(&state, step, &self.assets))
    }
}
