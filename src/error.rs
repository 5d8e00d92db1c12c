//! Error taxonomy for the orchestration core.
//!
//! Every failure is scoped to the action or job that produced it. `Error::kind` folds the
//! variants into the three classes callers branch on: validation (nothing was sent),
//! network (request failed or the backend refused it) and protocol (unexpected JSON).

use crate::model::BrokerId;
use thiserror::Error;

/// Failures caught locally before any request is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no subject profile selected")]
    NoProfileSelected,

    #[error("removal request carries an empty profile id")]
    InvalidProfile,

    #[error("selection is empty")]
    EmptySelection,

    #[error("broker {0} is not selectable (not found or marked false positive)")]
    NotSelectable(BrokerId),

    #[error("no discovery job is active")]
    NoActiveJob,

    #[error("profile label is required")]
    MissingLabel,

    #[error("profile must contain at least one name, email, phone or address")]
    EmptyProfile,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport failure: connection refused, timeout, reset.
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx response.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx response whose body reports `"success": false`.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Network,
    Protocol,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
        })
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Network(_) | Error::Status { .. } | Error::Rejected(_) => ErrorKind::Network,
            Error::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Protocol(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
