//! Controller behind the tenant's workflow list.
//!
//! State lives behind a lock that is released before every remote call, so
//! concurrent operations interleave but only one continuation mutates the list
//! at a time. Every failure ends up in [`WorkflowListState::error`].
//!
//! `loading`, `creating` and busy markers are owned by [`FlagGuard`]s and are
//! released when an operation finishes or its future is dropped.

use std::{
    collections::HashSet,
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::Utc;
use shared::domain::{TenantId, Workflow, WorkflowId, WorkflowStatus};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{store::WorkflowStore, ClientError};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListError {
    #[error("Bitte einen Titel eingeben.")]
    EmptyTitle,
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("{0}")]
    Store(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl ListError {
    fn from_store(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<ClientError>().and_then(ClientError::status) {
            Some(401) => Self::Unauthenticated,
            _ => Self::Store(format!("{err:#}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowListState {
    pub workflows: Vec<Workflow>,
    pub error: Option<ListError>,
    pub busy: HashSet<WorkflowId>,
    pub creating: bool,
    pub draft_title: String,
    pub show_done: bool,
    loads_in_flight: usize,
}

impl Default for WorkflowListState {
    fn default() -> Self {
        Self {
            workflows: Vec::new(),
            error: None,
            busy: HashSet::new(),
            creating: false,
            draft_title: String::new(),
            show_done: true,
            loads_in_flight: 0,
        }
    }
}

impl WorkflowListState {
    /// True while any load is outstanding.
    pub fn is_loading(&self) -> bool {
        self.loads_in_flight > 0
    }

    pub fn in_work(&self) -> Vec<&Workflow> {
        self.workflows
            .iter()
            .filter(|workflow| !workflow.status.is_done())
            .collect()
    }

    pub fn done(&self) -> Vec<&Workflow> {
        self.workflows
            .iter()
            .filter(|workflow| workflow.status.is_done())
            .collect()
    }

    /// The done view as displayed; empty while `show_done` is off.
    pub fn visible_done(&self) -> Vec<&Workflow> {
        if self.show_done {
            self.done()
        } else {
            Vec::new()
        }
    }

    pub fn is_busy(&self, workflow_id: WorkflowId) -> bool {
        self.busy.contains(&workflow_id)
    }
}

fn lock(state: &Mutex<WorkflowListState>) -> MutexGuard<'_, WorkflowListState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    Loading,
    Creating,
    Busy(WorkflowId),
}

/// Releases one flag on drop. Must not be dropped while the state lock is held.
struct FlagGuard<'a> {
    state: &'a Mutex<WorkflowListState>,
    flag: Flag,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        match self.flag {
            Flag::Loading => state.loads_in_flight = state.loads_in_flight.saturating_sub(1),
            Flag::Creating => state.creating = false,
            Flag::Busy(workflow_id) => {
                state.busy.remove(&workflow_id);
            }
        }
    }
}

pub struct WorkflowList<S> {
    store: S,
    tenant_id: Option<TenantId>,
    call_timeout: Duration,
    state: Mutex<WorkflowListState>,
}

impl<S: WorkflowStore> WorkflowList<S> {
    /// Without a tenant every operation is a no-op.
    pub fn new(store: S, tenant_id: Option<TenantId>) -> Self {
        Self {
            store,
            tenant_id,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            state: Mutex::new(WorkflowListState::default()),
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn snapshot(&self) -> WorkflowListState {
        lock(&self.state).clone()
    }

    pub fn set_draft_title(&self, title: impl Into<String>) {
        lock(&self.state).draft_title = title.into();
    }

    pub fn set_show_done(&self, show_done: bool) {
        lock(&self.state).show_done = show_done;
    }

    pub async fn load(&self) {
        let Some(tenant_id) = self.tenant_id else {
            return;
        };
        let _loading = {
            let mut state = lock(&self.state);
            state.loads_in_flight += 1;
            state.error = None;
            self.guard(Flag::Loading)
        };

        let result = self.bounded(self.store.list(tenant_id)).await;

        let mut state = lock(&self.state);
        match result {
            Ok(workflows) => {
                debug!(%tenant_id, count = workflows.len(), "workflows loaded");
                state.workflows = workflows;
            }
            Err(err) => {
                warn!(%tenant_id, error = %err, "loading workflows failed");
                state.workflows.clear();
                state.error = Some(err);
            }
        }
        drop(state);
    }

    /// Creates an `in_arbeit` workflow and puts it at the top of the list.
    pub async fn create(&self, title: &str) {
        self.insert_trimmed(title).await;
    }

    /// Submits the draft title and clears it once the workflow exists, unless
    /// it was edited in the meantime.
    pub async fn create_from_draft(&self) {
        let draft = lock(&self.state).draft_title.clone();
        if self.insert_trimmed(&draft).await {
            let mut state = lock(&self.state);
            if state.draft_title == draft {
                state.draft_title.clear();
            }
        }
    }

    /// Flips `in_arbeit` and `erledigt`. Ignored while the same id is busy.
    pub async fn toggle_status(&self, workflow: &Workflow) {
        if self.tenant_id.is_none() {
            return;
        }
        let _busy = {
            let mut state = lock(&self.state);
            if !state.busy.insert(workflow.id) {
                return;
            }
            state.error = None;
            self.guard(Flag::Busy(workflow.id))
        };

        let next = workflow.status.toggled();
        let result = self
            .bounded(self.store.update_status(workflow.id, next, Utc::now()))
            .await;

        let mut state = lock(&self.state);
        match result {
            Ok(updated) => match state.workflows.iter_mut().find(|w| w.id == updated.id) {
                Some(slot) => *slot = updated,
                None => debug!(workflow_id = %updated.id, "dropping update for unlisted workflow"),
            },
            Err(err) => {
                warn!(workflow_id = %workflow.id, error = %err, "status change failed");
                state.error = Some(err);
            }
        }
        drop(state);
    }

    /// Returns whether a row was inserted.
    async fn insert_trimmed(&self, title: &str) -> bool {
        let Some(tenant_id) = self.tenant_id else {
            return false;
        };
        let title = title.trim();
        let _creating = {
            let mut state = lock(&self.state);
            if title.is_empty() {
                state.error = Some(ListError::EmptyTitle);
                return false;
            }
            if state.creating {
                return false;
            }
            state.creating = true;
            state.error = None;
            self.guard(Flag::Creating)
        };

        let result = self
            .bounded(self.store.insert(tenant_id, title, WorkflowStatus::InArbeit))
            .await;

        let mut state = lock(&self.state);
        let inserted = match result {
            Ok(workflow) => {
                debug!(%tenant_id, workflow_id = %workflow.id, "workflow created");
                state.workflows.insert(0, workflow);
                true
            }
            Err(err) => {
                warn!(%tenant_id, error = %err, "creating workflow failed");
                state.error = Some(err);
                false
            }
        };
        drop(state);
        inserted
    }

    fn guard(&self, flag: Flag) -> FlagGuard<'_> {
        FlagGuard {
            state: &self.state,
            flag,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ListError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ListError::from_store(&err)),
            Err(_) => Err(ListError::Timeout(self.call_timeout)),
        }
    }
}

#[cfg(test)]
#[path = "tests/workflow_list_tests.rs"]
mod tests;
