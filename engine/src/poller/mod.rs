//! Poll-based reconciliation
//!
//! A poll loop re-fetches canonical state on a fixed interval and merges it
//! into the store until the fetched status is terminal. There is at most
//! one live loop per scope: starting a loop cancels the previous one for
//! the same scope before it is registered.
//!
//! Detail loops run under a child of the view session's token, so leaving
//! or switching the view stops them without any extra bookkeeping.

use crate::backend::Backend;
use crate::message_bus::{Event, MessageBus};
use crate::store::{ProjectList, ProjectStore, ViewSession};
use sdk::errors::{ClientError, ErrorExt};
use sdk::types::ProjectStatus;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll scope. One live loop per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollScope {
    /// The actively viewed project
    Detail,
    /// Background refresh of the project list
    List,
}

impl fmt::Display for PollScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollScope::Detail => f.write_str("detail"),
            PollScope::List => f.write_str("list"),
        }
    }
}

/// Why a poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A fetched status left {pending, in_progress}
    Terminal,
    /// The loop's token was cancelled
    Cancelled,
    /// The view session changed under the loop
    StaleView,
    /// Too many consecutive fetch failures
    TooManyErrors,
    /// A fetch failed in a way retrying cannot fix
    Unrecoverable,
    /// Every listed project is terminal
    Settled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Terminal => "terminal status",
            StopReason::Cancelled => "cancelled",
            StopReason::StaleView => "view changed",
            StopReason::TooManyErrors => "too many errors",
            StopReason::Unrecoverable => "unrecoverable error",
            StopReason::Settled => "all projects settled",
        };
        f.write_str(s)
    }
}

/// Summary of a finished poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Fetches issued, failed ones included
    pub fetches: usize,
    /// Merges of a non-terminal snapshot
    pub intermediate_merges: usize,
    /// Status of the last merged snapshot
    pub final_status: Option<ProjectStatus>,
    pub stop: StopReason,
}

impl PollOutcome {
    fn new() -> Self {
        Self {
            fetches: 0,
            intermediate_merges: 0,
            final_status: None,
            stop: StopReason::Cancelled,
        }
    }
}

/// Handle to a running poll loop
#[derive(Debug)]
pub struct PollHandle {
    scope: PollScope,
    token: CancellationToken,
    join: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn scope(&self) -> PollScope {
        self.scope
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to end
    pub async fn wait(self) -> PollOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{} poll task ended abnormally: {}", self.scope, e);
                PollOutcome::new()
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub detail_interval: Duration,
    pub list_interval: Duration,
    pub max_consecutive_errors: u32,
}

impl PollSettings {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            detail_interval: config.detail_poll_interval(),
            list_interval: config.list_poll_interval(),
            max_consecutive_errors: config.polling.max_consecutive_errors,
        }
    }
}

type Registry = Arc<Mutex<HashMap<PollScope, (u64, CancellationToken)>>>;

/// Starts and tracks poll loops
#[derive(Clone)]
pub struct Poller {
    backend: Arc<dyn Backend>,
    store: ProjectStore,
    list: ProjectList,
    bus: MessageBus,
    settings: PollSettings,
    registry: Registry,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl Poller {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: ProjectStore,
        list: ProjectList,
        bus: MessageBus,
        settings: PollSettings,
    ) -> Self {
        Self {
            backend,
            store,
            list,
            bus,
            settings,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
        }
    }

    /// Register `token` for `scope`, cancelling whatever was there before
    async fn register(&self, scope: PollScope, token: &CancellationToken) -> u64 {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut registry = self.registry.lock().await;
        if let Some((_, previous)) = registry.insert(scope, (id, token.clone())) {
            debug!("Replacing live {} poll loop", scope);
            previous.cancel();
        }
        id
    }

    /// Cancel the live loop for `scope`, if any
    pub async fn cancel(&self, scope: PollScope) {
        if let Some((_, token)) = self.registry.lock().await.remove(&scope) {
            token.cancel();
        }
    }

    pub async fn cancel_all(&self) {
        let mut registry = self.registry.lock().await;
        for (_, (_, token)) in registry.drain() {
            token.cancel();
        }
    }

    /// Whether a loop is registered for `scope`
    pub async fn is_active(&self, scope: PollScope) -> bool {
        self.registry.lock().await.contains_key(&scope)
    }

    /// Start the detail loop for the viewed project
    pub async fn watch_project(&self, session: &ViewSession) -> PollHandle {
        let token = session.token().child_token();
        let id = self.register(PollScope::Detail, &token).await;

        let poller = self.clone();
        let session = session.clone();
        let loop_token = token.clone();
        let join = tokio::spawn(async move {
            let outcome = poller.run_detail(&session, &loop_token).await;
            poller.finish(PollScope::Detail, id, &outcome).await;
            outcome
        });

        PollHandle {
            scope: PollScope::Detail,
            token,
            join,
        }
    }

    /// Start the background list refresh
    pub async fn watch_list(&self) -> PollHandle {
        let token = CancellationToken::new();
        let id = self.register(PollScope::List, &token).await;

        let poller = self.clone();
        let loop_token = token.clone();
        let join = tokio::spawn(async move {
            let outcome = poller.run_list(&loop_token).await;
            poller.finish(PollScope::List, id, &outcome).await;
            outcome
        });

        PollHandle {
            scope: PollScope::List,
            token,
            join,
        }
    }

    async fn run_detail(&self, session: &ViewSession, token: &CancellationToken) -> PollOutcome {
        let mut outcome = PollOutcome::new();
        let mut errors = 0u32;
        let name = session.project().to_string();

        loop {
            tokio::select! {
                _ = token.cancelled() => return outcome,
                _ = tokio::time::sleep(self.settings.detail_interval) => {}
            }

            let fetched = tokio::select! {
                _ = token.cancelled() => return outcome,
                fetched = self.backend.get_project(&name) => fetched,
            };
            outcome.fetches += 1;

            let snapshot = match fetched {
                Ok(snapshot) => snapshot,
                Err(e) if !e.is_recoverable() => {
                    warn!("Polling '{}' stopped: {}", name, e);
                    outcome.stop = StopReason::Unrecoverable;
                    return outcome;
                }
                Err(e) => {
                    errors += 1;
                    warn!(
                        "Poll fetch for '{}' failed ({}/{}): {}",
                        name, errors, self.settings.max_consecutive_errors, e
                    );
                    if errors >= self.settings.max_consecutive_errors {
                        outcome.stop = StopReason::TooManyErrors;
                        return outcome;
                    }
                    continue;
                }
            };
            errors = 0;

            let status = match self.store.apply_snapshot(session, snapshot).await {
                Ok(status) => status,
                Err(ClientError::StaleView(_)) => {
                    outcome.stop = StopReason::StaleView;
                    return outcome;
                }
                Err(e) => {
                    warn!("Dropping snapshot for '{}': {}", name, e);
                    continue;
                }
            };

            outcome.final_status = Some(status);
            self.bus
                .publish(Event::ProjectMerged {
                    project: name.clone(),
                    status,
                })
                .await;

            if status.is_terminal() {
                info!("Project '{}' reached {}, polling stopped", name, status);
                outcome.stop = StopReason::Terminal;
                return outcome;
            }
            outcome.intermediate_merges += 1;
        }
    }

    async fn run_list(&self, token: &CancellationToken) -> PollOutcome {
        let mut outcome = PollOutcome::new();
        let mut errors = 0u32;

        loop {
            if !self.list.any_active().await {
                outcome.stop = StopReason::Settled;
                return outcome;
            }

            tokio::select! {
                _ = token.cancelled() => return outcome,
                _ = tokio::time::sleep(self.settings.list_interval) => {}
            }

            let fetched = tokio::select! {
                _ = token.cancelled() => return outcome,
                fetched = self.backend.list_projects() => fetched,
            };
            outcome.fetches += 1;

            match fetched {
                Ok(projects) => {
                    errors = 0;
                    debug!("List refresh returned {} projects", projects.len());
                    self.list.replace(projects).await;
                    outcome.intermediate_merges += 1;
                }
                Err(e) => {
                    errors += 1;
                    warn!("Project list refresh failed: {}", e);
                    if errors >= self.settings.max_consecutive_errors {
                        outcome.stop = StopReason::TooManyErrors;
                        return outcome;
                    }
                }
            }
        }
    }

    /// Drop the registry entry if it still belongs to this loop
    async fn finish(&self, scope: PollScope, id: u64, outcome: &PollOutcome) {
        {
            let mut registry = self.registry.lock().await;
            if matches!(registry.get(&scope), Some((current, _)) if *current == id) {
                registry.remove(&scope);
            }
        }

        debug!(
            "{} poll loop stopped after {} fetches: {}",
            scope, outcome.fetches, outcome.stop
        );
        self.bus
            .publish(Event::PollStopped {
                scope: scope.to_string(),
                reason: outcome.stop.to_string(),
            })
            .await;
    }
}
