use super::{order_broker_sets, order_history, BrokerApi};
use crate::error::{Error, Result};
use crate::model::{
    BrokerId, BrokerSet, ClientConfig, CreatedProfile, DiscoveryJob, HandoffPayload, NewProfile,
    RemovalJob, RemovalRequest, ReviewAck, ReviewRequest, StartedJob, SubjectProfile,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use reqwest::Url;
use std::collections::BTreeMap;

/// reqwest-backed client for the local backend service.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| Error::Network(format!("invalid base URL {:?}: {e}", cfg.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Network(format!(
                "base URL {:?} cannot carry a path",
                cfg.base_url
            )));
        }
        Ok(Self { http, base_url })
    }

    /// Append `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments);
        tracing::debug!(path = url.path(), "GET");
        let resp = self.http.get(url).send().await?;
        decode(resp).await
    }

    async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(segments);
        tracing::debug!(path = url.path(), "POST");
        let resp = self.http.post(url).json(body).send().await?;
        decode(resp).await
    }

    async fn review(&self, action: &str, job_id: &str, broker_id: BrokerId) -> Result<()> {
        let ack: ReviewAck = self
            .post_json(&["discovery", job_id, action], &ReviewRequest { broker_id })
            .await?;
        if ack.success {
            Ok(())
        } else {
            Err(Error::Rejected(
                ack.error
                    .unwrap_or_else(|| format!("{action} for broker {broker_id} was not applied")),
            ))
        }
    }
}

/// Map a response onto the error taxonomy: non-2xx is a network failure, a body that does
/// not match the expected shape is a protocol failure.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(Error::Status {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| Error::Protocol(format!("{e} in {body:.120}")))
}

#[async_trait]
impl BrokerApi for HttpBackend {
    async fn health(&self) -> Result<()> {
        let _: serde_json::Value = self.get_json(&["health"]).await?;
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<SubjectProfile>> {
        self.get_json(&["pii-profiles"]).await
    }

    async fn create_profile(&self, profile: &NewProfile) -> Result<String> {
        let created: CreatedProfile = self.post_json(&["pii-profiles"], profile).await?;
        Ok(created.id)
    }

    async fn list_broker_sets(&self) -> Result<Vec<BrokerSet>> {
        let raw: BTreeMap<String, BrokerSet> = self.get_json(&["broker-profiles"]).await?;
        let mut sets: Vec<BrokerSet> = raw
            .into_iter()
            .map(|(key, mut set)| {
                set.key = key;
                set
            })
            .collect();
        order_broker_sets(&mut sets);
        Ok(sets)
    }

    async fn start_discovery(&self, profile_id: &str, broker_set: &str) -> Result<String> {
        tracing::debug!(profile_id, broker_set, "POST /discovery");
        let resp = self
            .http
            .post(self.url(&["discovery"]))
            .query(&[("profile_id", profile_id), ("broker_profile", broker_set)])
            .send()
            .await?;
        let started: StartedJob = decode(resp).await?;
        Ok(started.job_id)
    }

    async fn discovery_status(&self, job_id: &str) -> Result<DiscoveryJob> {
        let mut job: DiscoveryJob = self.get_json(&["discovery", job_id]).await?;
        job.id = job_id.to_string();
        Ok(job)
    }

    async fn mark_false_positive(&self, job_id: &str, broker_id: BrokerId) -> Result<()> {
        self.review("mark-false-positive", job_id, broker_id).await
    }

    async fn verify_positive(&self, job_id: &str, broker_id: BrokerId) -> Result<()> {
        self.review("verify-positive", job_id, broker_id).await
    }

    async fn start_removal(&self, payload: &HandoffPayload) -> Result<String> {
        let body = RemovalRequest {
            profile_id: payload.profile_id.clone(),
            brokers: payload.broker_ids.clone(),
        };
        let started: StartedJob = self.post_json(&["removals"], &body).await?;
        Ok(started.job_id)
    }

    async fn list_removals(&self) -> Result<Vec<RemovalJob>> {
        let raw: BTreeMap<String, RemovalJob> = self.get_json(&["removals"]).await?;
        let mut jobs: Vec<RemovalJob> = raw
            .into_iter()
            .map(|(id, mut job)| {
                job.id = id;
                job
            })
            .collect();
        order_history(&mut jobs);
        Ok(jobs)
    }

    async fn removal_status(&self, job_id: &str) -> Result<RemovalJob> {
        let mut job: RemovalJob = self.get_json(&["removals", job_id]).await?;
        job.id = job_id.to_string();
        Ok(job)
    }
}
