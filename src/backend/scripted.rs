//! In-memory `BrokerApi` that replays queued responses and records every call.

use super::BrokerApi;
use crate::error::{Error, Result};
use crate::model::{
    BrokerId, BrokerSet, DiscoveryJob, HandoffPayload, NewProfile, RemovalJob, SubjectProfile,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct Script {
    pub profiles: Vec<SubjectProfile>,
    pub broker_sets: Vec<BrokerSet>,
    pub discovery_starts: VecDeque<Result<String>>,
    pub discovery_polls: VecDeque<Result<DiscoveryJob>>,
    pub reviews: VecDeque<Result<()>>,
    pub removal_starts: VecDeque<Result<String>>,
    pub removal_polls: VecDeque<Result<RemovalJob>>,
    /// Per-job status responses, consulted before the shared queues.
    pub discovery_polls_by_job: HashMap<String, VecDeque<Result<DiscoveryJob>>>,
    pub removal_polls_by_job: HashMap<String, VecDeque<Result<RemovalJob>>>,
    pub history: VecDeque<Result<Vec<RemovalJob>>>,
    /// Simulated latency of every status fetch.
    pub poll_delay: Duration,
    pub calls: Vec<String>,
}

impl Script {
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    script: Mutex<Script>,
}

fn exhausted(what: &str) -> Error {
    Error::Network(format!("no scripted response for {what}"))
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.script().calls.push(call);
    }

    fn poll_delay(&self) -> Duration {
        self.script().poll_delay
    }
}

#[async_trait]
impl BrokerApi for ScriptedBackend {
    async fn health(&self) -> Result<()> {
        self.record("health".into());
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<SubjectProfile>> {
        self.record("list_profiles".into());
        Ok(self.script().profiles.clone())
    }

    async fn create_profile(&self, profile: &NewProfile) -> Result<String> {
        self.record(format!("create_profile {}", profile.label));
        Ok(format!("profile-{}", profile.label))
    }

    async fn list_broker_sets(&self) -> Result<Vec<BrokerSet>> {
        self.record("list_broker_sets".into());
        Ok(self.script().broker_sets.clone())
    }

    async fn start_discovery(&self, profile_id: &str, broker_set: &str) -> Result<String> {
        self.record(format!("start_discovery {profile_id} {broker_set}"));
        self.script()
            .discovery_starts
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("start_discovery")))
    }

    async fn discovery_status(&self, job_id: &str) -> Result<DiscoveryJob> {
        self.record(format!("discovery_status {job_id}"));
        tokio::time::sleep(self.poll_delay()).await;
        let next = {
            let mut script = self.script();
            let keyed = script
                .discovery_polls_by_job
                .get_mut(job_id)
                .and_then(VecDeque::pop_front);
            match keyed {
                Some(next) => next,
                None => script
                    .discovery_polls
                    .pop_front()
                    .unwrap_or_else(|| Err(exhausted("discovery_status"))),
            }
        };
        next.map(|mut job| {
            job.id = job_id.to_string();
            job
        })
    }

    async fn mark_false_positive(&self, job_id: &str, broker_id: BrokerId) -> Result<()> {
        self.record(format!("mark_false_positive {job_id} {broker_id}"));
        self.script()
            .reviews
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("mark_false_positive")))
    }

    async fn verify_positive(&self, job_id: &str, broker_id: BrokerId) -> Result<()> {
        self.record(format!("verify_positive {job_id} {broker_id}"));
        self.script()
            .reviews
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("verify_positive")))
    }

    async fn start_removal(&self, payload: &HandoffPayload) -> Result<String> {
        let ids: Vec<String> = payload.broker_ids.iter().map(|b| b.to_string()).collect();
        self.record(format!(
            "start_removal {} [{}]",
            payload.profile_id,
            ids.join(",")
        ));
        self.script()
            .removal_starts
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("start_removal")))
    }

    async fn list_removals(&self) -> Result<Vec<RemovalJob>> {
        self.record("list_removals".into());
        self.script()
            .history
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("list_removals")))
    }

    async fn removal_status(&self, job_id: &str) -> Result<RemovalJob> {
        self.record(format!("removal_status {job_id}"));
        tokio::time::sleep(self.poll_delay()).await;
        let next = {
            let mut script = self.script();
            let keyed = script
                .removal_polls_by_job
                .get_mut(job_id)
                .and_then(VecDeque::pop_front);
            match keyed {
                Some(next) => next,
                None => script
                    .removal_polls
                    .pop_front()
                    .unwrap_or_else(|| Err(exhausted("removal_status"))),
            }
        };
        next.map(|mut job| {
            job.id = job_id.to_string();
            job
        })
    }
}
