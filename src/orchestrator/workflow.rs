//! End-to-end workflow driver.
//!
//! Owns the discovery -> review -> removal sequence for one subject profile and emits
//! view snapshots for presentation layers.

use super::{AppState, DiscoveryPhase, DiscoveryView, RemovalView, SelectionSet};
use crate::error::{Result, ValidationError};
use crate::model::{BrokerId, EpochSeconds, JobStatus, RemovalJob};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio_util::task::AbortOnDropHandle;

/// Which findings go into the selection once review actions are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Only(Vec<BrokerId>),
}

#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    pub profile_id: String,
    pub broker_set: String,
    pub false_positives: Vec<BrokerId>,
    pub verified: Vec<BrokerId>,
    pub selection: Selection,
    /// Hand the selection off and run a removal job.
    pub remove: bool,
}

/// Emitted on every observed view change.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Discovery(DiscoveryView),
    Removal(RemovalView),
    Message(String),
}

/// Final state of one workflow run, as exported and auto-saved.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub generated_at: EpochSeconds,
    pub discovery: DiscoveryView,
    pub selection: SelectionSet,
    pub removal: Option<RemovalJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_error: Option<String>,
    pub history: Vec<RemovalJob>,
}

impl WorkflowReport {
    fn new(discovery: DiscoveryView) -> Self {
        Self {
            generated_at: EpochSeconds::now(),
            discovery,
            selection: SelectionSet::default(),
            removal: None,
            removal_error: None,
            history: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        if self.discovery.phase != DiscoveryPhase::Completed || self.removal_error.is_some() {
            return false;
        }
        match &self.removal {
            Some(job) => job.status == JobStatus::Completed,
            None => true,
        }
    }
}

fn broker_label(view: &DiscoveryView, broker_id: BrokerId) -> String {
    match view.finding(broker_id).map(|f| f.broker_name.as_str()) {
        Some(name) if !name.is_empty() => format!("broker {broker_id} ({name})"),
        _ => format!("broker {broker_id}"),
    }
}

/// Forward every change of `rx` as an event until aborted or the view is dropped.
///
/// The spawned task must not outlive `run_workflow`; it holds an `events` sender.
async fn forward<T>(
    mut rx: watch::Receiver<T>,
    events: UnboundedSender<WorkflowEvent>,
    wrap: fn(T) -> WorkflowEvent,
) where
    T: Clone,
{
    while rx.changed().await.is_ok() {
        let current = rx.borrow_and_update().clone();
        if events.send(wrap(current)).is_err() {
            break;
        }
    }
}

/// Drive one workflow. Job-level failures end up in the report; request and validation
/// failures are returned as errors.
pub async fn run_workflow(
    state: &mut AppState,
    plan: &WorkflowPlan,
    events: &UnboundedSender<WorkflowEvent>,
) -> Result<WorkflowReport> {
    state
        .discovery
        .start(&plan.profile_id, &plan.broker_set)
        .await?;
    let forwarder = AbortOnDropHandle::new(tokio::spawn(forward(
        state.discovery.subscribe(),
        events.clone(),
        WorkflowEvent::Discovery,
    )));
    let discovery = state.discovery.settled().await;
    forwarder.abort();
    let _ = forwarder.await;
    let _ = events.send(WorkflowEvent::Discovery(discovery.clone()));
    let mut report = WorkflowReport::new(discovery);
    if report.discovery.phase != DiscoveryPhase::Completed {
        return Ok(report);
    }

    for broker_id in &plan.false_positives {
        state.discovery.mark_false_positive(*broker_id).await?;
        let _ = events.send(WorkflowEvent::Message(format!(
            "Marked {} as false positive",
            broker_label(&state.discovery.snapshot(), *broker_id)
        )));
    }
    for broker_id in &plan.verified {
        state.discovery.verify_positive(*broker_id).await?;
        let _ = events.send(WorkflowEvent::Message(format!(
            "Verified {}",
            broker_label(&state.discovery.snapshot(), *broker_id)
        )));
    }
    report.discovery = state.discovery.snapshot();

    let findings = &report.discovery.findings;
    match &plan.selection {
        Selection::All => {
            state.selection.select_all(findings);
        }
        Selection::Only(ids) => {
            state.selection.clear();
            for broker_id in ids {
                if !state.selection.contains(*broker_id) {
                    state.selection.toggle(findings, *broker_id)?;
                }
            }
        }
    }
    report.selection = state.selection.clone();
    if !plan.remove {
        return Ok(report);
    }

    state
        .selection
        .proceed(&report.discovery, &mut state.handoff)?;
    tracing::debug!(handoff = ?state.handoff.peek(), "selection handed off");
    report.selection = state.selection.clone();
    let payload = state
        .handoff
        .take()
        .ok_or(ValidationError::EmptySelection)?;
    let _ = events.send(WorkflowEvent::Message(format!(
        "Starting removal for {} broker(s)",
        payload.broker_ids.len()
    )));

    state.removal.start(payload).await?;
    let forwarder = AbortOnDropHandle::new(tokio::spawn(forward(
        state.removal.subscribe(),
        events.clone(),
        WorkflowEvent::Removal,
    )));
    let removal = state.removal.settled().await;
    forwarder.abort();
    let _ = forwarder.await;
    let _ = events.send(WorkflowEvent::Removal(removal.clone()));
    report.removal = removal.job;
    report.removal_error = removal.last_error;
    report.history = removal.history;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::ScriptedBackend;
    use crate::error::Error;
    use crate::model::DiscoveryJob;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn discovery(fp_on_4: bool) -> DiscoveryJob {
        serde_json::from_value(json!({
            "status": "completed",
            "progress": 100,
            "total_brokers": 3,
            "items": [
                {"broker_id": 1, "broker_name": "Spokeo", "found": true, "confidence": 0.9},
                {"broker_id": 2, "broker_name": "Whitepages", "found": false},
                {"broker_id": 4, "broker_name": "Radaris", "found": true,
                 "confidence": 0.5, "marked_false_positive": fp_on_4}
            ]
        }))
        .unwrap()
    }

    fn removal(status: &str, items: serde_json::Value) -> RemovalJob {
        serde_json::from_value(json!({
            "status": status,
            "profile_id": "P1",
            "broker_ids": [1],
            "progress": if status == "completed" { 100 } else { 0 },
            "items": items,
            "created_at": 1712345678.0
        }))
        .unwrap()
    }

    fn plan(selection: Selection, remove: bool) -> WorkflowPlan {
        WorkflowPlan {
            profile_id: "P1".into(),
            broker_set: "quick_scan".into(),
            false_positives: Vec::new(),
            verified: Vec::new(),
            selection,
            remove,
        }
    }

    fn state(api: std::sync::Arc<ScriptedBackend>) -> AppState {
        AppState::new(api, Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn full_workflow_hands_off_reviewed_selection() {
        let api = ScriptedBackend::new();
        {
            let mut s = api.script();
            s.discovery_starts.push_back(Ok("j1".into()));
            s.discovery_polls.push_back(Ok(discovery(false)));
            s.reviews.push_back(Ok(()));
            s.discovery_polls.push_back(Ok(discovery(true)));
            s.removal_starts.push_back(Ok("r1".into()));
            s.removal_polls.push_back(Ok(removal("running", json!([]))));
            s.removal_polls.push_back(Ok(removal(
                "completed",
                json!([{"broker_id": 1, "method": "email", "status": "drafted"}]),
            )));
            s.history.push_back(Ok(vec![removal("completed", json!([]))]));
        }
        let mut state = state(api.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut p = plan(Selection::All, true);
        p.false_positives = vec![BrokerId(4)];

        let report = run_workflow(&mut state, &p, &tx).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.selection.iter().collect::<Vec<_>>(), vec![BrokerId(1)]);
        assert_eq!(report.removal.as_ref().unwrap().items.len(), 1);
        assert_eq!(report.history.len(), 1);
        assert!(state.handoff.peek().is_none(), "handoff is consumed");

        let calls = api.script().calls.clone();
        assert!(calls.contains(&"mark_false_positive j1 4".to_string()));
        assert!(calls.contains(&"start_removal P1 [1]".to_string()));

        drop(tx);
        let mut saw_discovery = false;
        let mut saw_removal = false;
        while let Some(ev) = rx.recv().await {
            match ev {
                WorkflowEvent::Discovery(_) => saw_discovery = true,
                WorkflowEvent::Removal(_) => saw_removal = true,
                WorkflowEvent::Message(_) => {}
            }
        }
        assert!(saw_discovery && saw_removal);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_workflow_releases_event_channel() {
        let api = ScriptedBackend::new();
        {
            let mut s = api.script();
            s.discovery_starts.push_back(Ok("j1".into()));
            let running: DiscoveryJob =
                serde_json::from_value(json!({"status": "running", "progress": 10})).unwrap();
            for _ in 0..200 {
                s.discovery_polls.push_back(Ok(running.clone()));
            }
        }
        let mut state = state(api.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let all_plan = plan(Selection::All, true);
        let outcome = tokio::select! {
            res = run_workflow(&mut state, &all_plan, &tx) => Some(res),
            _ = tokio::time::sleep(Duration::from_secs(1)) => None,
        };
        assert!(outcome.is_none());
        state.discovery.stop();
        drop(tx);

        let drained = tokio::time::timeout(Duration::from_secs(60), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "event channel still held open");
        assert_eq!(state.discovery.snapshot().phase, DiscoveryPhase::Detached);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_discovery_never_starts_removal() {
        let api = ScriptedBackend::new();
        {
            let mut s = api.script();
            s.discovery_starts.push_back(Ok("j1".into()));
            s.discovery_polls.push_back(Ok(serde_json::from_value(json!({
                "status": "error",
                "error": "browser crashed"
            }))
            .unwrap()));
        }
        let mut state = state(api.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        let report = run_workflow(&mut state, &plan(Selection::All, true), &tx)
            .await
            .unwrap();
        assert!(!report.succeeded());
        assert_eq!(report.discovery.phase, DiscoveryPhase::Failed);
        assert_eq!(
            report.discovery.last_error.as_deref(),
            Some("browser crashed")
        );
        assert_eq!(api.script().count("start_removal"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn selecting_a_missing_broker_is_rejected() {
        let api = ScriptedBackend::new();
        {
            let mut s = api.script();
            s.discovery_starts.push_back(Ok("j1".into()));
            s.discovery_polls.push_back(Ok(discovery(false)));
        }
        let mut state = state(api.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = run_workflow(
            &mut state,
            &plan(Selection::Only(vec![BrokerId(1), BrokerId(2)]), true),
            &tx,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::NotSelectable(BrokerId(2)))
        );
        assert_eq!(api.script().count("start_removal"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn review_only_run_keeps_selection_local() {
        let api = ScriptedBackend::new();
        {
            let mut s = api.script();
            s.discovery_starts.push_back(Ok("j1".into()));
            s.discovery_polls.push_back(Ok(discovery(false)));
        }
        let mut state = state(api.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        let report = run_workflow(
            &mut state,
            &plan(Selection::Only(vec![BrokerId(4), BrokerId(4)]), false),
            &tx,
        )
        .await
        .unwrap();
        assert!(report.succeeded());
        assert!(report.removal.is_none());
        assert_eq!(report.selection.len(), 1);
        assert!(state.handoff.peek().is_none());
    }
}
