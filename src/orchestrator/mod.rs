//! Application-level orchestration.
//!
//! This module owns the local mirrors of discovery and removal jobs, the review selection
//! and the handoff between them, plus post-workflow processing (exports, auto-save).
//! CLI layers call into this module and only render the views it publishes.

mod discovery;
mod handoff;
mod poller;
mod post_process;
mod removal;
mod review;
mod workflow;

pub use discovery::{DiscoveryController, DiscoveryPhase, DiscoveryView};
pub use handoff::HandoffContext;
pub use post_process::{process_workflow_completion, ProcessedWorkflow};
pub use removal::{RemovalController, RemovalPhase, RemovalView};
pub use review::SelectionSet;
pub use workflow::{run_workflow, Selection, WorkflowEvent, WorkflowPlan, WorkflowReport};

use crate::backend::BrokerApi;
use poller::JobPoller;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A view written by one controller and observed by any number of readers.
pub(crate) type Shared<T> = Arc<watch::Sender<T>>;

pub(crate) fn shared<T>(value: T) -> Shared<T> {
    Arc::new(watch::Sender::new(value))
}

/// Everything one session of the client holds.
pub struct AppState {
    pub discovery: DiscoveryController,
    pub removal: RemovalController,
    pub selection: SelectionSet,
    pub handoff: HandoffContext,
}

impl AppState {
    pub fn new(api: Arc<dyn BrokerApi>, poll_interval: Duration) -> Self {
        let poller = JobPoller::default();
        Self {
            discovery: DiscoveryController::new(
                api.clone(),
                poller.clone(),
                shared(DiscoveryView::default()),
                poll_interval,
            ),
            removal: RemovalController::new(
                api,
                poller,
                shared(RemovalView::default()),
                poll_interval,
            ),
            selection: SelectionSet::default(),
            handoff: HandoffContext::default(),
        }
    }
}
