//! Step sequencing
//!
//! Drives the fixed pipeline order under one of two run-all policies:
//!
//! - **Sequential**: each stage runs through the executor and must settle
//!   before the next one starts. Progress is a pure function of the number
//!   of completed stages.
//! - **Delegated**: a single run-all request is accepted by the backend and
//!   executed there; progress and content arrive only through polling.
//!
//! A failing stage aborts the remaining ones. Outputs of stages that already
//! completed stay in the store.

use crate::backend::Backend;
use crate::config::RunAllPolicy;
use crate::executor::{ExecutionMode, StepExecutor};
use crate::message_bus::{Event, MessageBus, NoticeLevel};
use crate::poller::{PollHandle, Poller};
use crate::store::{ProjectStore, ViewSession};
use sdk::errors::{ClientError, Result};
use sdk::types::{ProjectStatus, RunAllRequest, StepId};
use std::sync::Arc;
use tracing::{error, info};

/// Progress before stage 1
const PROGRESS_START: usize = 10;

/// Progress added by each completed stage
const PROGRESS_PER_STAGE: usize = 20;

/// Progress after `completed` stages: 10 before the first, +20 per stage,
/// capped at 100.
pub fn progress_percent(completed: usize) -> u8 {
    (PROGRESS_START + PROGRESS_PER_STAGE * completed).min(100) as u8
}

/// Result of a sequential run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Vec<StepId>,
    /// The stage that aborted the run and its error message
    pub failed: Option<(StepId, String)>,
    pub status: ProjectStatus,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }

    pub fn progress(&self) -> u8 {
        if self.is_success() {
            100
        } else {
            progress_percent(self.completed.len())
        }
    }
}

/// How a run-all request ended locally
#[derive(Debug)]
pub enum RunOutcome {
    /// Every stage ran here
    Finished(RunReport),
    /// The backend owns the run; the handle tracks its poll loop
    Delegated(PollHandle),
}

pub struct StepSequencer {
    backend: Arc<dyn Backend>,
    executor: StepExecutor,
    poller: Poller,
    store: ProjectStore,
    bus: MessageBus,
    mode: ExecutionMode,
}

impl StepSequencer {
    pub fn new(
        backend: Arc<dyn Backend>,
        executor: StepExecutor,
        poller: Poller,
        store: ProjectStore,
        bus: MessageBus,
    ) -> Self {
        Self {
            backend,
            executor,
            poller,
            store,
            bus,
            mode: ExecutionMode::Buffered,
        }
    }

    /// Execution mode for text stages of sequential runs
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub async fn run_all(&self, session: &ViewSession, policy: RunAllPolicy) -> Result<RunOutcome> {
        match policy {
            RunAllPolicy::Sequential => Ok(RunOutcome::Finished(
                self.run_sequential(session).await?,
            )),
            RunAllPolicy::Delegated => Ok(RunOutcome::Delegated(
                self.run_delegated(session).await?,
            )),
        }
    }

    /// Run every stage in order, awaiting each before the next.
    ///
    /// Stage failures are reported in the `RunReport`. Only a stale view or
    /// an illegal status transition is returned as an error.
    pub async fn run_sequential(&self, session: &ViewSession) -> Result<RunReport> {
        self.executor.reopen_if_terminal(session).await?;
        let project = session.project().to_string();
        info!("Running all stages for '{}' sequentially", project);

        self.publish_progress(&project, 0, Some(StepId::ALL[0]))
            .await;

        let mut completed = Vec::with_capacity(StepId::ALL.len());
        for step in StepId::ALL {
            match self.executor.execute(session, step, self.mode).await {
                Ok(_) => {
                    completed.push(step);
                    let next = StepId::ALL.get(step.index() + 1).copied();
                    self.publish_progress(&project, completed.len(), next)
                        .await;
                }
                Err(ClientError::StaleView(name)) => return Err(ClientError::StaleView(name)),
                Err(e) => {
                    error!(
                        "Run for '{}' halted at {} after {} stages",
                        project,
                        step,
                        completed.len()
                    );
                    return Ok(RunReport {
                        completed,
                        failed: Some((step, e.to_string())),
                        status: ProjectStatus::Failed,
                    });
                }
            }
        }

        self.store
            .finish(session, ProjectStatus::Completed)
            .await?;
        self.bus
            .publish(Event::notice(
                NoticeLevel::Success,
                format!("All stages finished for '{}'", project),
            ))
            .await;

        Ok(RunReport {
            completed,
            failed: None,
            status: ProjectStatus::Completed,
        })
    }

    /// Hand the whole run to the backend and start polling for it
    pub async fn run_delegated(&self, session: &ViewSession) -> Result<PollHandle> {
        self.executor.reopen_if_terminal(session).await?;

        let state = self
            .store
            .snapshot()
            .await
            .filter(|state| state.name == session.project())
            .ok_or_else(|| ClientError::StaleView(session.project().to_string()))?;

        let request = RunAllRequest {
            project_name: state.name.clone(),
            brief: state.brief,
            model_name: self.executor.model_name().to_string(),
            settings: self.executor.settings().clone(),
        };

        self.store.begin_step(session, StepId::ALL[0]).await?;
        if let Err(e) = self.backend.run_all(&request).await {
            error!("Run-all request for '{}' failed: {}", state.name, e);
            self.store.finish(session, ProjectStatus::Failed).await?;
            self.bus
                .publish(Event::notice(
                    NoticeLevel::Error,
                    format!("Could not start run for '{}': {}", state.name, e),
                ))
                .await;
            return Err(e);
        }

        info!("Run for '{}' delegated to backend", state.name);
        self.publish_progress(&state.name, 0, Some(StepId::ALL[0]))
            .await;
        Ok(self.poller.watch_project(session).await)
    }

    async fn publish_progress(&self, project: &str, completed: usize, step: Option<StepId>) {
        self.bus
            .publish(Event::Progress {
                project: project.to_string(),
                percent: progress_percent(completed),
                step,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{envelope, snapshot, ScriptedBackend};
    use crate::message_bus::EventType;
    use crate::poller::{PollSettings, StopReason};
    use crate::store::ProjectList;
    use sdk::types::GenerationSettings;
    use std::time::Duration;

    struct Fixture {
        backend: Arc<ScriptedBackend>,
        store: ProjectStore,
        bus: MessageBus,
        sequencer: StepSequencer,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(ScriptedBackend::new());
        let dyn_backend: Arc<dyn Backend> = Arc::clone(&backend) as Arc<dyn Backend>;
        let store = ProjectStore::new();
        let bus = MessageBus::new();
        let executor = StepExecutor::new(
            Arc::clone(&dyn_backend),
            store.clone(),
            bus.clone(),
            "models/test",
            GenerationSettings {
                image_count: 1,
                persona: String::new(),
                session_credential: None,
            },
        );
        let poller = Poller::new(
            Arc::clone(&dyn_backend),
            store.clone(),
            ProjectList::new(),
            bus.clone(),
            PollSettings {
                detail_interval: Duration::from_millis(1),
                list_interval: Duration::from_millis(1),
                max_consecutive_errors: 3,
            },
        );
        let sequencer = StepSequencer::new(dyn_backend, executor, poller, store.clone(), bus.clone());
        Fixture {
            backend,
            store,
            bus,
            sequencer,
        }
    }

    #[test]
    fn test_progress_formula() {
        let values: Vec<u8> = (0..=6).map(progress_percent).collect();
        assert_eq!(values, vec![10, 30, 50, 70, 90, 100, 100]);
    }

    #[tokio::test]
    async fn test_sequential_runs_every_stage_in_order() {
        let f = fixture();
        for step in StepId::ALL {
            f.backend.push_step(Ok(envelope(step.as_str())));
        }
        f.backend
            .push_project(Ok(snapshot("bag", ProjectStatus::InProgress)));
        let mut progress = f.bus.subscribe(EventType::Progress).await;
        let session = f.store.open("bag", "X").await;

        let report = f.sequencer.run_sequential(&session).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.completed, StepId::ALL.to_vec());
        assert_eq!(report.progress(), 100);

        let sent: Vec<StepId> = f.backend.step_requests().iter().map(|r| r.step).collect();
        assert_eq!(sent, StepId::ALL.to_vec());

        let state = f.store.snapshot().await.unwrap();
        assert_eq!(state.status, ProjectStatus::Completed);
        assert_eq!(state.contents.full_report, "full_report");

        let mut percents = Vec::new();
        while let Ok(Event::Progress { percent, .. }) = progress.try_recv() {
            percents.push(percent);
        }
        assert_eq!(percents, vec![10, 30, 50, 70, 90, 100]);
    }

    #[tokio::test]
    async fn test_sequential_halts_and_keeps_outputs() {
        let f = fixture();
        f.backend.push_step(Ok(envelope("# Market")));
        f.backend
            .push_step(Err(ClientError::Network("connection reset".into())));
        let session = f.store.open("bag", "X").await;

        let report = f.sequencer.run_sequential(&session).await.unwrap();

        assert_eq!(report.completed, vec![StepId::MarketAnalysis]);
        assert_eq!(report.failed.as_ref().map(|(s, _)| *s), Some(StepId::VisualResearch));
        assert_eq!(report.progress(), 30);
        assert_eq!(f.backend.step_requests().len(), 2);

        let state = f.store.snapshot().await.unwrap();
        assert_eq!(state.status, ProjectStatus::Failed);
        assert_eq!(state.contents.market_analysis, "# Market");
    }

    #[tokio::test]
    async fn test_delegated_observes_through_polling() {
        let f = fixture();
        f.backend
            .push_project(Ok(snapshot("bag", ProjectStatus::InProgress)));
        f.backend
            .push_project(Ok(snapshot("bag", ProjectStatus::Completed)));
        let session = f.store.open("bag", "X").await;

        let outcome = f
            .sequencer
            .run_all(&session, RunAllPolicy::Delegated)
            .await
            .unwrap();

        let handle = match outcome {
            RunOutcome::Delegated(handle) => handle,
            RunOutcome::Finished(_) => panic!("expected a delegated run"),
        };
        let polled = handle.wait().await;
        assert_eq!(polled.stop, StopReason::Terminal);
        assert_eq!(f.backend.run_all_requests().len(), 1);
        assert!(f.backend.step_requests().is_empty());
        assert_eq!(
            f.store.snapshot().await.unwrap().status,
            ProjectStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_delegated_rejection_fails_project() {
        let f = fixture();
        f.backend.push_run_all(Err(ClientError::Http {
            status: 503,
            body: String::new(),
        }));
        let session = f.store.open("bag", "X").await;

        let result = f.sequencer.run_delegated(&session).await;
        assert!(result.is_err());
        assert_eq!(
            f.store.snapshot().await.unwrap().status,
            ProjectStatus::Failed
        );
    }
}
