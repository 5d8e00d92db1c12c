//! Remote job tracking by periodic status fetch.
//!
//! One loop per job id. Ticks never overlap: the next fetch is only issued after the
//! previous one resolved, and ticks missed while a fetch was in flight are skipped.
//! A loop ends on a terminal status, on the first fetch failure, or on cancellation;
//! a response that arrives after cancellation is dropped.

use crate::error::{Error, Result};
use crate::model::{DiscoveryJob, RemovalJob};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A status snapshot that knows whether the job has finished.
pub trait Pollable {
    fn is_terminal(&self) -> bool;
}

impl Pollable for DiscoveryJob {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Pollable for RemovalJob {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What a loop hands to its owner on each tick.
#[derive(Debug, Clone)]
pub enum PollEvent<T> {
    Update(T),
    /// The fetch failed; the loop has stopped.
    Failed(Error),
}

/// Why a loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Terminal,
    Failed(Error),
    Cancelled,
}

struct LoopEntry {
    generation: u64,
    token: CancellationToken,
}

/// Registry of active polling loops, keyed by job id.
#[derive(Clone, Default)]
pub struct JobPoller {
    loops: Arc<Mutex<HashMap<String, LoopEntry>>>,
    generations: Arc<AtomicU64>,
}

/// Cancellation handle for one polling loop.
pub struct PollHandle {
    job_id: String,
    token: CancellationToken,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Stop the loop. Safe to call repeatedly or after the loop has ended.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!(job_id = %self.job_id, "cancelling poll loop");
            self.token.cancel();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    #[cfg(test)]
    pub async fn join(self) -> PollOutcome {
        self.task.await.unwrap_or(PollOutcome::Cancelled)
    }
}

impl JobPoller {
    fn registry(&self) -> MutexGuard<'_, HashMap<String, LoopEntry>> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn is_tracking(&self, job_id: &str) -> bool {
        self.registry().contains_key(job_id)
    }

    /// Begin polling `job_id`, replacing any loop already tracking it.
    pub fn track<T, F, Fut, U>(
        &self,
        job_id: &str,
        fetch: F,
        on_update: U,
        interval: Duration,
    ) -> PollHandle
    where
        T: Pollable + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send,
        U: FnMut(PollEvent<T>) + Send + 'static,
    {
        let token = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        let previous = self.registry().insert(
            job_id.to_string(),
            LoopEntry {
                generation,
                token: token.clone(),
            },
        );
        if let Some(prev) = previous {
            tracing::warn!(job_id, "superseding existing poll loop");
            prev.token.cancel();
        }

        let registry = self.clone();
        let loop_job = job_id.to_string();
        let loop_token = token.clone();
        let task = tokio::spawn(async move {
            let outcome = run_loop(&loop_job, &loop_token, fetch, on_update, interval).await;
            registry.release(&loop_job, generation);
            tracing::debug!(job_id = %loop_job, ?outcome, "poll loop ended");
            outcome
        });

        PollHandle {
            job_id: job_id.to_string(),
            token,
            task,
        }
    }

    /// Drop the registry entry, unless a newer loop has already replaced it.
    fn release(&self, job_id: &str, generation: u64) {
        let mut loops = self.registry();
        if loops.get(job_id).map(|e| e.generation) == Some(generation) {
            loops.remove(job_id);
        }
    }
}

async fn run_loop<T, F, Fut, U>(
    job_id: &str,
    token: &CancellationToken,
    mut fetch: F,
    mut on_update: U,
    interval: Duration,
) -> PollOutcome
where
    T: Pollable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    U: FnMut(PollEvent<T>),
{
    let period = interval.max(Duration::from_millis(1));
    let mut next_due = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep_until(next_due) => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            res = fetch() => res,
        };
        if token.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        // Ticks that came due while the fetch was outstanding are skipped, not queued.
        next_due += period;
        let now = Instant::now();
        let mut skipped = 0u32;
        while next_due <= now {
            next_due += period;
            skipped += 1;
        }
        if skipped > 0 {
            tracing::debug!(job_id, skipped, "status fetch outlasted poll interval");
        }

        match fetched {
            Ok(status) => {
                let terminal = status.is_terminal();
                on_update(PollEvent::Update(status));
                if terminal {
                    return PollOutcome::Terminal;
                }
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "status fetch failed, polling stopped");
                on_update(PollEvent::Failed(e.clone()));
                return PollOutcome::Failed(e);
            }
        }
    }
}
