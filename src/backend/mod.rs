//! Contract with the local discovery/removal service.
//!
//! Controllers only ever talk to `BrokerApi`; `HttpBackend` is the production implementation.

mod http;
#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpBackend;

use crate::error::Result;
use crate::model::{
    BrokerId, BrokerSet, DiscoveryJob, HandoffPayload, NewProfile, RemovalJob, SubjectProfile,
};
use async_trait::async_trait;

#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// `GET /health`
    async fn health(&self) -> Result<()>;

    /// `GET /pii-profiles`
    async fn list_profiles(&self) -> Result<Vec<SubjectProfile>>;

    /// `POST /pii-profiles`, returns the new profile id.
    async fn create_profile(&self, profile: &NewProfile) -> Result<String>;

    /// `GET /broker-profiles`, ordered by priority (highest first), then key.
    async fn list_broker_sets(&self) -> Result<Vec<BrokerSet>>;

    /// `POST /discovery?profile_id=&broker_profile=`, returns the job id.
    async fn start_discovery(&self, profile_id: &str, broker_set: &str) -> Result<String>;

    /// `GET /discovery/{id}`
    async fn discovery_status(&self, job_id: &str) -> Result<DiscoveryJob>;

    /// `POST /discovery/{id}/mark-false-positive`
    async fn mark_false_positive(&self, job_id: &str, broker_id: BrokerId) -> Result<()>;

    /// `POST /discovery/{id}/verify-positive`
    async fn verify_positive(&self, job_id: &str, broker_id: BrokerId) -> Result<()>;

    /// `POST /removals`, returns the job id.
    async fn start_removal(&self, payload: &HandoffPayload) -> Result<String>;

    /// `GET /removals`, newest first.
    async fn list_removals(&self) -> Result<Vec<RemovalJob>>;

    /// `GET /removals/{id}`
    async fn removal_status(&self, job_id: &str) -> Result<RemovalJob>;
}

/// Sort broker sets the way they are offered to the user.
pub(crate) fn order_broker_sets(sets: &mut [BrokerSet]) {
    sets.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.key.cmp(&b.key)));
}

/// Sort removal history newest first.
pub(crate) fn order_history(jobs: &mut [RemovalJob]) {
    jobs.sort_by(|a, b| {
        b.created_at
            .0
            .total_cmp(&a.created_at.0)
            .then_with(|| a.id.cmp(&b.id))
    });
}
