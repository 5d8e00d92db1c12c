//! Removal job lifecycle: `Draft -> Queued -> Running -> Completed | Error | Cancelled`.
//!
//! Each tick replaces the whole job record with the backend's; items are never built
//! locally. History is a separate one-shot read, refreshed once the job is terminal.

use super::poller::{JobPoller, PollEvent, PollHandle};
use super::Shared;
use crate::backend::BrokerApi;
use crate::error::{Error, Result, ValidationError};
use crate::model::{HandoffPayload, JobStatus, RemovalJob};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPhase {
    Draft,
    Queued,
    Running,
    Completed,
    Error,
    Cancelled,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemovalView {
    pub job: Option<RemovalJob>,
    pub polling: bool,
    pub last_error: Option<String>,
    pub history: Vec<RemovalJob>,
    pub history_loading: bool,
    pub history_error: Option<String>,
}

impl RemovalView {
    pub fn phase(&self) -> RemovalPhase {
        match self.job.as_ref().map(|j| &j.status) {
            None => RemovalPhase::Draft,
            Some(JobStatus::Queued) => RemovalPhase::Queued,
            Some(JobStatus::Running) => RemovalPhase::Running,
            Some(JobStatus::Completed) => RemovalPhase::Completed,
            Some(JobStatus::Error) => RemovalPhase::Error,
            Some(JobStatus::Cancelled) => RemovalPhase::Cancelled,
            Some(JobStatus::Unknown(_)) => RemovalPhase::Unknown,
        }
    }

    fn is_for(&self, job_id: &str) -> bool {
        self.job.as_ref().map(|j| j.id.as_str()) == Some(job_id)
    }

    /// Replace the mirror with a polled record, keeping progress monotonic while running.
    fn apply(&mut self, mut next: RemovalJob) {
        let Some(current) = self.job.as_mut() else {
            return;
        };
        next.progress = next.progress.min(100);
        if !next.status.is_terminal() {
            next.progress = next.progress.max(current.progress);
        }
        if next.created_at.0 <= 0.0 {
            next.created_at = current.created_at;
        }
        if next.profile_id.is_empty() {
            next.profile_id = std::mem::take(&mut current.profile_id);
        }
        if next.broker_ids.is_empty() {
            next.broker_ids = std::mem::take(&mut current.broker_ids);
        }
        next.id = std::mem::take(&mut current.id);
        *current = next;
    }

    fn apply_history(&mut self, fetched: Result<Vec<RemovalJob>>) {
        self.history_loading = false;
        match fetched {
            Ok(jobs) => {
                self.history = jobs;
                self.history_error = None;
            }
            Err(e) => self.history_error = Some(e.to_string()),
        }
    }
}

/// Reject a record whose item count exceeds the brokers it was started for.
fn check_item_bound(job: RemovalJob, requested: usize) -> Result<RemovalJob> {
    let limit = if job.broker_ids.is_empty() {
        requested
    } else {
        job.broker_ids.len()
    };
    if job.items.len() > limit {
        return Err(Error::Protocol(format!(
            "removal job {} reports {} items for {} brokers",
            job.id,
            job.items.len(),
            limit
        )));
    }
    Ok(job)
}

fn spawn_history_refresh(api: Arc<dyn BrokerApi>, view: Shared<RemovalView>) {
    tokio::spawn(async move {
        let fetched = api.list_removals().await;
        if let Err(e) = &fetched {
            tracing::warn!(error = %e, "removal history refresh failed");
        }
        view.send_modify(|v| v.apply_history(fetched));
    });
}

pub struct RemovalController {
    api: Arc<dyn BrokerApi>,
    poller: JobPoller,
    view: Shared<RemovalView>,
    interval: Duration,
    active: Option<PollHandle>,
}

impl RemovalController {
    pub fn new(
        api: Arc<dyn BrokerApi>,
        poller: JobPoller,
        view: Shared<RemovalView>,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            poller,
            view,
            interval,
            active: None,
        }
    }

    pub fn snapshot(&self) -> RemovalView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RemovalView> {
        self.view.subscribe()
    }

    /// Start a removal job from a handoff payload and follow it.
    pub async fn start(&mut self, payload: HandoffPayload) -> Result<String> {
        if payload.broker_ids.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }
        if payload.profile_id.trim().is_empty() {
            return Err(ValidationError::InvalidProfile.into());
        }

        let job_id = self.api.start_removal(&payload).await?;
        tracing::info!(
            job_id = %job_id,
            profile_id = %payload.profile_id,
            brokers = payload.broker_ids.len(),
            "removal started"
        );

        self.stop_polling();
        let requested = payload.broker_ids.len();
        self.view.send_modify(|v| {
            v.job = Some(RemovalJob::queued(job_id.clone(), &payload));
            v.polling = true;
            v.last_error = None;
        });
        self.active = Some(self.track(&job_id, requested));
        Ok(job_id)
    }

    /// One-shot read of every removal job, newest first.
    pub async fn load_history(&self) -> Result<Vec<RemovalJob>> {
        self.view.send_modify(|v| v.history_loading = true);
        let fetched = self.api.list_removals().await;
        let result = fetched.clone();
        self.view.send_modify(|v| v.apply_history(fetched));
        result
    }

    /// One-shot read of a single job, outside of any polling loop.
    pub async fn inspect(&self, job_id: &str) -> Result<RemovalJob> {
        let job = self.api.removal_status(job_id).await?;
        check_item_bound(job, usize::MAX)
    }

    /// Wait until polling and the follow-up history refresh are both done.
    pub async fn settled(&self) -> RemovalView {
        let mut rx = self.view.subscribe();
        let settled = rx
            .wait_for(|v| !v.polling && !v.history_loading)
            .await
            .map(|v| v.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }

    /// Stop following the job. The backend keeps processing it.
    pub fn stop(&mut self) {
        self.stop_polling();
        self.view.send_if_modified(|v| std::mem::replace(&mut v.polling, false));
    }

    fn stop_polling(&mut self) {
        if let Some(handle) = self.active.take() {
            tracing::debug!(job_id = handle.job_id(), "detaching removal job");
            handle.cancel();
        }
    }

    fn track(&self, job_id: &str, requested: usize) -> PollHandle {
        let api = self.api.clone();
        let fetch_id = job_id.to_string();
        let fetch = move || {
            let api = api.clone();
            let id = fetch_id.clone();
            async move {
                let job = api.removal_status(&id).await?;
                check_item_bound(job, requested)
            }
        };

        let api = self.api.clone();
        let view = self.view.clone();
        let owner = job_id.to_string();
        let on_update = move |event: PollEvent<RemovalJob>| {
            let mut refresh_history = false;
            view.send_if_modified(|v| {
                if !v.is_for(&owner) {
                    return false;
                }
                match event {
                    PollEvent::Update(job) => {
                        tracing::debug!(
                            job_id = %owner,
                            status = %job.status,
                            progress = job.progress,
                            items = job.items.len(),
                            "removal tick"
                        );
                        if job.status.is_terminal() {
                            tracing::info!(job_id = %owner, status = %job.status, "removal finished");
                            v.polling = false;
                            v.history_loading = true;
                            refresh_history = true;
                        }
                        v.apply(job);
                    }
                    PollEvent::Failed(e) => {
                        v.polling = false;
                        v.last_error = Some(e.to_string());
                    }
                }
                true
            });
            if refresh_history {
                spawn_history_refresh(api.clone(), view.clone());
            }
        };

        self.poller.track(job_id, fetch, on_update, self.interval)
    }
}

impl Drop for RemovalController {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
