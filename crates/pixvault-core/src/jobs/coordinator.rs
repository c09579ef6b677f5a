//! Job submission, status and cancellation.
//!
//! Each submitted job gets a driver task that opens the source, pulls items
//! one worker slot at a time, and folds task reports into the job's
//! [`JobRecord`]. The driver is the only writer of a job's counters; readers
//! get the latest published snapshot from a watch channel, or the store once
//! the job has finished.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{PixvaultError, Result};
use crate::source::{ImportRequest, SourceOpener, SourceStream};
use crate::store::{with_retry, JobStore, RetryPolicy};
use crate::types::{JobId, JobSnapshot, JobState, TaskOutcome};

use super::executor::{ExecutorStats, Task, TaskExecutor, TaskReport, WorkerSlot};
use super::record::JobRecord;

/// Handles for a job whose driver is still running.
struct ActiveJob {
    snapshot: watch::Receiver<JobSnapshot>,
    cancel: CancellationToken,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was running; it will reach `Cancelled` shortly.
    Requested,
    /// The job had already finished in this state.
    AlreadyFinished(JobState),
}

struct Shared {
    store: Arc<dyn JobStore>,
    opener: SourceOpener,
    executor: TaskExecutor,
    retry: RetryPolicy,
    active: RwLock<HashMap<JobId, ActiveJob>>,
    shutdown: CancellationToken,
}

/// Accepts import requests and runs them to a terminal state.
#[derive(Clone)]
pub struct JobCoordinator {
    shared: Arc<Shared>,
}

impl JobCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        opener: SourceOpener,
        executor: TaskExecutor,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                opener,
                executor,
                retry,
                active: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a job and start driving it. Returns as soon as the job is
    /// `Pending` in the store.
    pub async fn submit(&self, request: ImportRequest) -> Result<JobId> {
        if self.shared.shutdown.is_cancelled() {
            return Err(PixvaultError::Shutdown);
        }

        let job_id = self
            .shared
            .store
            .create_job(request.kind(), request.total_hint())
            .await?;
        let snapshot = self
            .shared
            .store
            .get_job(job_id)
            .await?
            .ok_or(PixvaultError::JobNotFound(job_id))?;

        let cancel = self.shared.shutdown.child_token();
        let (tx, rx) = watch::channel(snapshot.clone());
        self.shared
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                job_id,
                ActiveJob {
                    snapshot: rx,
                    cancel: cancel.clone(),
                },
            );

        tracing::info!("Submitted {} job {}", request.kind(), job_id);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let driver = JobDriver {
                shared: Arc::clone(&shared),
                record: JobRecord::new(snapshot),
                publish: tx,
                cancel,
            };
            driver.run(request).await;
            shared
                .active
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&job_id);
        });

        Ok(job_id)
    }

    /// Latest snapshot of a job.
    pub async fn status(&self, job_id: JobId) -> Result<JobSnapshot> {
        if let Some(rx) = self.active_receiver(job_id) {
            return Ok(rx.borrow().clone());
        }
        self.shared
            .store
            .get_job(job_id)
            .await?
            .ok_or(PixvaultError::JobNotFound(job_id))
    }

    /// Ask a running job to stop. In-flight tasks finish but no new items
    /// are dispatched.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome> {
        let active = {
            let active = self
                .shared
                .active
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            active
                .get(&job_id)
                .map(|job| (job.cancel.clone(), job.snapshot.borrow().state))
        };
        match active {
            Some((_, state)) if state.is_terminal() => Ok(CancelOutcome::AlreadyFinished(state)),
            Some((token, _)) => {
                tracing::info!("Cancellation requested for job {}", job_id);
                token.cancel();
                Ok(CancelOutcome::Requested)
            }
            None => match self.shared.store.get_job(job_id).await? {
                Some(snapshot) => Ok(CancelOutcome::AlreadyFinished(snapshot.state)),
                None => Err(PixvaultError::JobNotFound(job_id)),
            },
        }
    }

    /// Wait until the job reaches a terminal state and return that snapshot.
    pub async fn wait(&self, job_id: JobId) -> Result<JobSnapshot> {
        if let Some(mut rx) = self.active_receiver(job_id) {
            if let Ok(snapshot) = rx.wait_for(|s| s.state.is_terminal()).await {
                return Ok(snapshot.clone());
            }
        }
        self.status(job_id).await
    }

    /// Watch a running job's snapshots. `None` once the job has finished.
    pub fn subscribe(&self, job_id: JobId) -> Option<watch::Receiver<JobSnapshot>> {
        self.active_receiver(job_id)
    }

    pub async fn list(&self) -> Result<Vec<JobSnapshot>> {
        let mut jobs = self.shared.store.list_jobs().await?;
        let active = self
            .shared
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for job in jobs.iter_mut() {
            if let Some(running) = active.get(&job.id) {
                *job = running.snapshot.borrow().clone();
            }
        }
        Ok(jobs)
    }

    pub fn active_jobs(&self) -> usize {
        self.shared
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.shared.executor.stats()
    }

    /// Cancel every running job and stop the worker pool.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down job coordinator");
        self.shared.shutdown.cancel();
        self.shared.executor.shutdown();
    }

    fn active_receiver(&self, job_id: JobId) -> Option<watch::Receiver<JobSnapshot>> {
        self.shared
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .map(|job| job.snapshot.clone())
    }
}

/// Runs one job from `Pending` to a terminal state.
struct JobDriver {
    shared: Arc<Shared>,
    record: JobRecord,
    publish: watch::Sender<JobSnapshot>,
    cancel: CancellationToken,
}

impl JobDriver {
    fn job_id(&self) -> JobId {
        self.record.snapshot().id
    }

    async fn run(mut self, request: ImportRequest) {
        let job_id = self.job_id();

        if self.cancel.is_cancelled() {
            self.record.observe_cancel();
            self.record.transition(JobState::Cancelled);
            self.finish().await;
            return;
        }

        let stream = match self.shared.opener.open(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Job {} failed to open source: {}", job_id, e);
                self.record.fail_open(e.label());
                self.finish().await;
                return;
            }
        };

        if let Some(total) = stream.total_hint() {
            self.record.set_total_hint(total);
        }
        self.record.transition(JobState::Running);
        self.persist_state(JobState::Running).await;
        self.publish();
        tracing::info!("Job {} running", job_id);

        let internal_error = self.drive(stream).await;

        let final_state = self.record.final_state(internal_error);
        self.record.transition(final_state);
        self.finish().await;
        let snap = self.record.snapshot();
        tracing::info!(
            "Job {} {}: {} succeeded, {} skipped, {} failed of {}",
            job_id,
            snap.state,
            snap.succeeded,
            snap.skipped,
            snap.failed,
            snap.total
        );
    }

    /// Pull, dispatch and collect until the source is drained (or the job
    /// is cancelled) and every dispatched task has reported. Returns true if
    /// the worker pool went away underneath the job.
    async fn drive(&mut self, mut stream: SourceStream) -> bool {
        let job_id = self.job_id();
        let executor = self.shared.executor.clone();
        let (reports_tx, mut reports_rx) = mpsc::channel::<TaskReport>(executor.pool_size().max(1));

        let mut in_flight = 0usize;
        let mut done_pulling = false;
        let mut internal_error = false;
        // Reserved before the pull; held while the adapter produces the next item.
        let mut slot: Option<WorkerSlot> = None;

        loop {
            if done_pulling && in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;

                Some(report) = reports_rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    self.handle_report(report).await;
                }

                _ = self.cancel.cancelled(), if !self.record.cancel_observed() => {
                    slot = None;
                    self.on_cancel();
                    done_pulling = true;
                }

                reserved = executor.reserve_slot(), if !done_pulling && slot.is_none() => {
                    match reserved {
                        Ok(reserved) => slot = Some(reserved),
                        Err(e) => {
                            tracing::error!("Job {} stopped pulling: {}", job_id, e);
                            internal_error = true;
                            done_pulling = true;
                        }
                    }
                }

                next = stream.next(), if !done_pulling && slot.is_some() => match next {
                    Some(Ok(item)) => {
                        if let Some(slot) = slot.take() {
                            self.record.item_pulled();
                            executor.dispatch(slot, Task { job_id, item }, reports_tx.clone());
                            in_flight += 1;
                        }
                    }
                    Some(Err(e)) => {
                        // The adapter could not produce this item's bytes.
                        self.record.item_pulled();
                        tracing::warn!("Job {}: {}", job_id, e);
                        let report = TaskReport {
                            source: e.source_label().to_string(),
                            outcome: TaskOutcome::Failed {
                                kind: e.kind(),
                                message: e.to_string(),
                            },
                        };
                        self.handle_report(report).await;
                    }
                    None => {
                        slot = None;
                        self.record.finalize_total();
                        self.publish();
                        done_pulling = true;
                    }
                },
            }
        }

        internal_error
    }

    fn on_cancel(&mut self) {
        if !self.record.cancel_observed() {
            tracing::info!("Job {} observed cancellation", self.job_id());
            self.record.observe_cancel();
            self.publish();
        }
    }

    async fn handle_report(&mut self, report: TaskReport) {
        let job_id = self.job_id();
        let entry = self.record.record_outcome(report.source, report.outcome);

        let store = &self.shared.store;
        let entry_ref = &entry;
        if let Err(e) = with_retry(self.shared.retry, "append_outcome", move || {
            store.append_outcome(job_id, entry_ref)
        })
        .await
        {
            tracing::error!("Job {}: could not record outcome for {}: {}", job_id, entry.source, e);
        }

        self.save_snapshot().await;
        self.publish();
    }

    async fn save_snapshot(&self) {
        let store = &self.shared.store;
        let snapshot = self.record.snapshot();
        if let Err(e) = with_retry(self.shared.retry, "save_snapshot", move || {
            store.save_snapshot(snapshot)
        })
        .await
        {
            tracing::error!("Job {}: could not save snapshot: {}", snapshot.id, e);
        }
    }

    async fn persist_state(&self, state: JobState) {
        let store = &self.shared.store;
        let job_id = self.job_id();
        let result = with_retry(self.shared.retry, "transition_job", move || {
            store.transition_job(job_id, state)
        })
        .await;
        if let Err(e) = result {
            tracing::error!("Job {}: could not persist state {}: {}", job_id, state, e);
        }
    }

    /// Persist the terminal snapshot, then publish it.
    async fn finish(&self) {
        self.save_snapshot().await;
        self.publish();
    }

    fn publish(&self) {
        // No receivers is fine: nobody is watching this job right now.
        let _ = self.publish.send(self.record.snapshot().clone());
    }
}
