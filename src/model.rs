use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Everything the backend client and controllers need, folded from CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

/// Treat an explicit JSON `null` the same as an absent field.
fn nullable<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// Empty strings from the backend mean "not set".
fn non_empty<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(d)?.filter(|s| !s.trim().is_empty()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerId(pub u32);

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BrokerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(BrokerId)
    }
}

/// A subject profile as listed by the backend. Only `id` is threaded through jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub label: String,
    #[serde(default, deserialize_with = "nullable")]
    pub names: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub emails: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub phones: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Address {
    fn is_blank(&self) -> bool {
        [
            &self.street,
            &self.city,
            &self.state,
            &self.zip,
            &self.country,
        ]
        .iter()
        .all(|v| v.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

/// Parses `street,city,state,zip,country`. Trailing fields may be left off and empty
/// fields stay unset.
impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() > 5 {
            return Err(format!(
                "expected street,city,state,zip,country but got {} fields",
                parts.len()
            ));
        }
        let field = |i: usize| {
            parts
                .get(i)
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string())
        };
        Ok(Address {
            street: field(0),
            city: field(1),
            state: field(2),
            zip: field(3),
            country: field(4),
        })
    }
}

/// Body of `POST /pii-profiles`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProfile {
    pub label: String,
    pub names: Vec<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub addresses: Vec<Address>,
}

impl NewProfile {
    /// Strip blank entries and check the required fields.
    pub fn validated(mut self) -> Result<Self, crate::error::ValidationError> {
        use crate::error::ValidationError;

        self.label = self.label.trim().to_string();
        if self.label.is_empty() {
            return Err(ValidationError::MissingLabel);
        }
        for list in [&mut self.names, &mut self.emails, &mut self.phones] {
            list.retain(|v| !v.trim().is_empty());
            for v in list.iter_mut() {
                *v = v.trim().to_string();
            }
        }
        self.addresses.retain(|a| !a.is_blank());

        if self.names.is_empty()
            && self.emails.is_empty()
            && self.phones.is_empty()
            && self.addresses.is_empty()
        {
            return Err(ValidationError::EmptyProfile);
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedProfile {
    pub id: String,
}

/// A named, curated group of brokers. The key is what discovery is started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSet {
    #[serde(default)]
    pub key: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub priority: u8,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub broker_count: Option<u32>,
}

pub const DEFAULT_BROKER_SET: &str = "quick_scan";

/// Lifecycle state reported by the backend for either job kind.
///
/// Unrecognised values land in `Unknown` so a new backend state never breaks rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Error,
    Cancelled,
    Unknown(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "error" => JobStatus::Error,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Unknown(s),
        }
    }
}

impl From<JobStatus> for String {
    fn from(s: JobStatus) -> Self {
        s.as_str().to_string()
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Queued
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Result of checking one broker for the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub broker_id: BrokerId,
    #[serde(default, deserialize_with = "nullable")]
    pub broker_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub domain: String,
    #[serde(default, deserialize_with = "nullable")]
    pub found: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub confidence: f64,
    #[serde(default)]
    pub evidence_url: Option<String>,
    #[serde(default)]
    pub screenshot_path: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub marked_false_positive: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub verified_positive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Per-broker search failure, if the backend could not check this broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Finding {
    pub fn is_selectable(&self) -> bool {
        self.found && !self.marked_false_positive
    }

    /// Clamp confidence and drop a verification flag that no longer applies.
    pub fn normalize(&mut self) {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if !self.is_selectable() {
            self.verified_positive = false;
        }
    }
}

/// Body of `GET /discovery/{id}`. The id is not part of the body; the controller fills it in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryJob {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub status: JobStatus,
    #[serde(default, deserialize_with = "nullable")]
    pub progress: u32,
    #[serde(
        default,
        rename = "current_broker",
        alias = "current_broker_index",
        deserialize_with = "nullable"
    )]
    pub current_broker_index: u32,
    #[serde(default, deserialize_with = "nullable")]
    pub total_brokers: u32,
    #[serde(default, deserialize_with = "non_empty")]
    pub current_broker_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_profile: Option<String>,
    #[serde(
        default,
        rename = "items",
        alias = "findings",
        deserialize_with = "nullable"
    )]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemovalMethod {
    Email,
    Form,
    Manual,
    Unknown(String),
}

impl RemovalMethod {
    pub fn as_str(&self) -> &str {
        match self {
            RemovalMethod::Email => "email",
            RemovalMethod::Form => "form",
            RemovalMethod::Manual => "manual",
            RemovalMethod::Unknown(s) => s,
        }
    }
}

impl From<String> for RemovalMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "email" => RemovalMethod::Email,
            "form" => RemovalMethod::Form,
            "manual" => RemovalMethod::Manual,
            _ => RemovalMethod::Unknown(s),
        }
    }
}

impl From<RemovalMethod> for String {
    fn from(m: RemovalMethod) -> Self {
        m.as_str().to_string()
    }
}

impl Default for RemovalMethod {
    fn default() -> Self {
        RemovalMethod::Unknown(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemStatus {
    Drafted,
    Submitted,
    ManualRequired,
    Completed,
    Error,
    Unknown(String),
}

impl ItemStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ItemStatus::Drafted => "drafted",
            ItemStatus::Submitted => "submitted",
            ItemStatus::ManualRequired => "manual_required",
            ItemStatus::Completed => "completed",
            ItemStatus::Error => "error",
            ItemStatus::Unknown(s) => s,
        }
    }
}

impl From<String> for ItemStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "drafted" => ItemStatus::Drafted,
            "submitted" => ItemStatus::Submitted,
            "manual_required" => ItemStatus::ManualRequired,
            "completed" => ItemStatus::Completed,
            "error" => ItemStatus::Error,
            _ => ItemStatus::Unknown(s),
        }
    }
}

impl From<ItemStatus> for String {
    fn from(s: ItemStatus) -> Self {
        s.as_str().to_string()
    }
}

impl Default for ItemStatus {
    fn default() -> Self {
        ItemStatus::Unknown(String::new())
    }
}

/// Outcome of one removal attempt. Authored entirely by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalItem {
    pub broker_id: BrokerId,
    #[serde(default, deserialize_with = "nullable")]
    pub broker_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub method: RemovalMethod,
    #[serde(default, deserialize_with = "nullable")]
    pub status: ItemStatus,
    #[serde(default, deserialize_with = "nullable")]
    pub transcript: String,
    #[serde(default)]
    pub evidence_path: Option<String>,
}

/// Seconds since the Unix epoch. The backend sends these as strings (`"1712345678.12"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct EpochSeconds(pub f64);

impl EpochSeconds {
    pub fn now() -> Self {
        let now = time::OffsetDateTime::now_utc();
        EpochSeconds(now.unix_timestamp_nanos() as f64 / 1e9)
    }

    pub fn to_datetime(self) -> Option<time::OffsetDateTime> {
        if !self.0.is_finite() {
            return None;
        }
        time::OffsetDateTime::from_unix_timestamp_nanos((self.0 * 1e9) as i128).ok()
    }

    /// RFC 3339 rendering, or `-` if the value is out of range.
    pub fn to_rfc3339(self) -> String {
        self.to_datetime()
            .and_then(|dt| {
                dt.format(&time::format_description::well_known::Rfc3339)
                    .ok()
            })
            .unwrap_or_else(|| "-".into())
    }
}

impl<'de> Deserialize<'de> for EpochSeconds {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Option::<Raw>::deserialize(d)? {
            None => Ok(EpochSeconds::default()),
            Some(Raw::Number(n)) => Ok(EpochSeconds(n)),
            Some(Raw::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(EpochSeconds)
                .map_err(|_| serde::de::Error::custom(format!("invalid created_at: {s:?}"))),
        }
    }
}

/// Body of `GET /removals/{id}` (and each value of `GET /removals`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovalJob {
    #[serde(default, alias = "job_id")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub status: JobStatus,
    #[serde(default, deserialize_with = "nullable")]
    pub profile_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub broker_ids: Vec<BrokerId>,
    #[serde(default, deserialize_with = "nullable")]
    pub progress: u32,
    #[serde(default, deserialize_with = "nullable")]
    pub items: Vec<RemovalItem>,
    #[serde(default)]
    pub created_at: EpochSeconds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemovalJob {
    /// Local mirror for a job the backend has just accepted.
    pub fn queued(id: String, payload: &HandoffPayload) -> Self {
        RemovalJob {
            id,
            status: JobStatus::Queued,
            profile_id: payload.profile_id.clone(),
            broker_ids: payload.broker_ids.clone(),
            progress: 0,
            items: Vec::new(),
            created_at: EpochSeconds::now(),
            error: None,
        }
    }
}

/// Reviewed selection handed from discovery to removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffPayload {
    pub profile_id: String,
    pub broker_ids: Vec<BrokerId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartedJob {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewRequest {
    pub broker_id: BrokerId,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalRequest {
    pub profile_id: String,
    pub brokers: Vec<BrokerId>,
}

/// Acknowledgement returned by the review endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewAck {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}
