//! Discovery job lifecycle: `Idle -> Starting -> Polling -> Completed | Failed`.
//!
//! Telemetry (progress, current broker) is applied on every tick. Findings are only
//! replaced, as a whole, once the backend reports the job completed.

use super::poller::{JobPoller, PollEvent, PollHandle};
use super::Shared;
use crate::backend::BrokerApi;
use crate::error::{Result, ValidationError};
use crate::model::{BrokerId, DiscoveryJob, Finding, JobStatus, DEFAULT_BROKER_SET};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
    #[default]
    Idle,
    Starting,
    Polling,
    Completed,
    /// The job reported an error, or polling stopped on a failed fetch.
    Failed,
    /// Polling was stopped locally before the job finished.
    Detached,
}

impl DiscoveryPhase {
    pub fn is_active(self) -> bool {
        matches!(self, DiscoveryPhase::Starting | DiscoveryPhase::Polling)
    }
}

/// Local mirror of the discovery job, as presented to the user.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryView {
    pub phase: DiscoveryPhase,
    pub job_id: Option<String>,
    pub profile_id: Option<String>,
    pub broker_set: Option<String>,
    pub status: Option<JobStatus>,
    pub progress: u32,
    pub current_broker_index: u32,
    pub total_brokers: u32,
    pub current_broker_name: Option<String>,
    pub findings: Vec<Finding>,
    pub last_error: Option<String>,
}

impl DiscoveryView {
    fn fresh(job_id: &str, profile_id: Option<&str>, broker_set: Option<&str>) -> Self {
        DiscoveryView {
            phase: DiscoveryPhase::Polling,
            job_id: Some(job_id.to_string()),
            profile_id: profile_id.map(str::to_string),
            broker_set: broker_set.map(str::to_string),
            ..Default::default()
        }
    }

    fn is_for(&self, job_id: &str) -> bool {
        self.job_id.as_deref() == Some(job_id)
    }

    /// Fold one status snapshot into the view.
    fn apply(&mut self, job: DiscoveryJob) {
        self.progress = self.progress.max(job.progress.min(100));
        self.current_broker_index = job.current_broker_index;
        self.total_brokers = job.total_brokers;
        self.current_broker_name = job.current_broker_name;

        match &job.status {
            JobStatus::Completed => {
                let mut findings = job.findings;
                findings.iter_mut().for_each(Finding::normalize);
                self.findings = findings;
                self.phase = DiscoveryPhase::Completed;
            }
            JobStatus::Error | JobStatus::Cancelled => {
                self.phase = DiscoveryPhase::Failed;
                self.last_error = Some(
                    job.error
                        .unwrap_or_else(|| format!("discovery job {}", job.status)),
                );
            }
            JobStatus::Queued | JobStatus::Running | JobStatus::Unknown(_) => {
                self.phase = DiscoveryPhase::Polling;
            }
        }
        if self.broker_set.is_none() {
            self.broker_set = job.broker_profile;
        }
        self.status = Some(job.status);
    }

    pub fn finding(&self, broker_id: BrokerId) -> Option<&Finding> {
        self.findings.iter().find(|f| f.broker_id == broker_id)
    }

    pub fn selectable(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_selectable())
    }
}

pub struct DiscoveryController {
    api: Arc<dyn BrokerApi>,
    poller: JobPoller,
    view: Shared<DiscoveryView>,
    interval: Duration,
    active: Option<PollHandle>,
}

impl DiscoveryController {
    pub fn new(
        api: Arc<dyn BrokerApi>,
        poller: JobPoller,
        view: Shared<DiscoveryView>,
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

    pub fn snapshot(&self) -> DiscoveryView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DiscoveryView> {
        self.view.subscribe()
    }

    /// Start a discovery job for `profile_id` against the named broker set.
    pub async fn start(&mut self, profile_id: &str, broker_set: &str) -> Result<String> {
        let profile_id = profile_id.trim();
        if profile_id.is_empty() {
            return Err(ValidationError::NoProfileSelected.into());
        }
        let broker_set = match broker_set.trim() {
            "" => DEFAULT_BROKER_SET,
            s => s,
        };

        // A new start supersedes whatever job was being followed.
        let superseded = self.stop_polling();
        let prior_phase = self.view.borrow().phase;
        self.view.send_modify(|v| v.phase = DiscoveryPhase::Starting);

        let job_id = match self.api.start_discovery(profile_id, broker_set).await {
            Ok(id) => id,
            Err(e) => {
                self.view.send_modify(|v| {
                    v.phase = if superseded && prior_phase.is_active() {
                        DiscoveryPhase::Detached
                    } else {
                        prior_phase
                    };
                });
                return Err(e);
            }
        };

        tracing::info!(job_id = %job_id, profile_id, broker_set, "discovery started");
        self.view.send_replace(DiscoveryView::fresh(
            &job_id,
            Some(profile_id),
            Some(broker_set),
        ));
        self.active = Some(self.track(&job_id));
        Ok(job_id)
    }

    /// Follow an existing job: fetch it once and keep polling if it is still running.
    pub async fn attach(&mut self, job_id: &str, profile_id: Option<&str>) -> Result<()> {
        let job = self.api.discovery_status(job_id).await?;
        self.stop_polling();

        let terminal = job.status.is_terminal();
        let mut view = DiscoveryView::fresh(job_id, profile_id, None);
        view.apply(job);
        self.view.send_replace(view);

        if !terminal {
            self.active = Some(self.track(job_id));
        }
        Ok(())
    }

    pub async fn mark_false_positive(&self, broker_id: BrokerId) -> Result<()> {
        let job_id = self.current_job()?;
        self.api.mark_false_positive(&job_id, broker_id).await?;
        tracing::info!(job_id = %job_id, %broker_id, "marked false positive");
        self.reload(&job_id).await
    }

    pub async fn verify_positive(&self, broker_id: BrokerId) -> Result<()> {
        let job_id = self.current_job()?;
        self.api.verify_positive(&job_id, broker_id).await?;
        tracing::info!(job_id = %job_id, %broker_id, "verified positive");
        self.reload(&job_id).await
    }

    /// Wait until the job is no longer starting or polling, and return the view.
    pub async fn settled(&self) -> DiscoveryView {
        let mut rx = self.view.subscribe();
        let settled = rx
            .wait_for(|v| !v.phase.is_active())
            .await
            .map(|v| v.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }

    /// Stop following the job. Server-side execution is unaffected.
    pub fn stop(&mut self) {
        if self.stop_polling() {
            self.view.send_if_modified(|v| {
                if v.phase.is_active() {
                    v.phase = DiscoveryPhase::Detached;
                    true
                } else {
                    false
                }
            });
        }
    }

    fn stop_polling(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                tracing::debug!(job_id = handle.job_id(), was_running, "detaching discovery job");
                handle.cancel();
                was_running
            }
            None => false,
        }
    }

    fn current_job(&self) -> Result<String> {
        self.view
            .borrow()
            .job_id
            .clone()
            .ok_or_else(|| ValidationError::NoActiveJob.into())
    }

    /// Replace the mirror with the backend's canonical record of the job.
    async fn reload(&self, job_id: &str) -> Result<()> {
        let job = self.api.discovery_status(job_id).await?;
        self.view.send_if_modified(|v| {
            if v.is_for(job_id) {
                v.apply(job);
                true
            } else {
                false
            }
        });
        Ok(())
    }

    fn track(&self, job_id: &str) -> PollHandle {
        let api = self.api.clone();
        let fetch_id = job_id.to_string();
        let fetch = move || {
            let api = api.clone();
            let id = fetch_id.clone();
            async move { api.discovery_status(&id).await }
        };

        let view = self.view.clone();
        let owner = job_id.to_string();
        let on_update = move |event: PollEvent<DiscoveryJob>| {
            view.send_if_modified(|v| {
                if !v.is_for(&owner) {
                    return false;
                }
                match event {
                    PollEvent::Update(job) => {
                        tracing::debug!(job_id = %owner, status = %job.status, progress = job.progress, "discovery tick");
                        v.apply(job);
                    }
                    PollEvent::Failed(e) => {
                        v.phase = DiscoveryPhase::Failed;
                        v.last_error = Some(e.to_string());
                    }
                }
                true
            });
        };

        self.poller.track(job_id, fetch, on_update, self.interval)
    }
}

impl Drop for DiscoveryController {
    fn drop(&mut self) {
        self.stop_polling();
    }
}
