//! Bounded worker pool running the per-item pipeline.
//!
//! A fixed number of permits is shared by every job. A job's driver first
//! reserves a [`WorkerSlot`], then pulls its next item, then dispatches it;
//! so at most `pool_size` raw buffers are alive at once. Blocking work started
//! through [`spawn_blocking_in_slot`] keeps its task's slot until it returns,
//! so a timed-out task cannot leave untracked buffers behind.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::config::Config;
use crate::dedup::{DedupIndex, Lookup};
use crate::error::{PixvaultError, StoreError, TaskError, TaskResult};
use crate::pipeline::{Hasher, ImageProcessor, Validator};
use crate::source::SourceItem;
use crate::store::{with_retry, JobStore, RetryPolicy};
use crate::types::{ErrorKind, JobId, NewImage, TaskOutcome};

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub pool_size: usize,
    /// Budget for one task, from loading bytes to persisting
    pub task_timeout: Duration,
    pub max_bytes: u64,
    pub retry: RetryPolicy,
}

impl From<&Config> for ExecutorOptions {
    fn from(config: &Config) -> Self {
        Self {
            pool_size: config.workers.pool_size,
            task_timeout: Duration::from_millis(config.workers.task_timeout_ms),
            max_bytes: config.limits.max_bytes(),
            retry: RetryPolicy::from(&config.pipeline),
        }
    }
}

/// One item to process on behalf of a job.
#[derive(Debug)]
pub struct Task {
    pub job_id: JobId,
    pub item: SourceItem,
}

/// Outcome of a task, sent back to the job's driver.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub source: String,
    pub outcome: TaskOutcome,
}

/// A reserved worker permit.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

tokio::task_local! {
    static CURRENT_SLOT: Arc<WorkerSlot>;
}

/// Like [`tokio::task::spawn_blocking`], but the closure holds the calling
/// task's worker slot until it returns. Outside a pool task it holds nothing.
pub fn spawn_blocking_in_slot<F, R>(f: F) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let slot = CURRENT_SLOT.try_with(Arc::clone).ok();
    tokio::task::spawn_blocking(move || {
        let result = f();
        drop(slot);
        result
    })
}

/// Point-in-time executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub dispatched: u64,
    pub completed: u64,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    dispatched: AtomicU64,
    completed: AtomicU64,
}

impl Counters {
    fn begin(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

struct Inner {
    processor: Arc<dyn ImageProcessor>,
    dedup: Arc<DedupIndex>,
    store: Arc<dyn JobStore>,
    validator: Validator,
    semaphore: Arc<Semaphore>,
    options: ExecutorOptions,
    counters: Counters,
}

/// Shared worker pool. Cheap to clone.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
}

impl TaskExecutor {
    pub fn new(
        processor: Arc<dyn ImageProcessor>,
        dedup: Arc<DedupIndex>,
        store: Arc<dyn JobStore>,
        validator: Validator,
        options: ExecutorOptions,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.pool_size.max(1)));
        Self {
            inner: Arc::new(Inner {
                processor,
                dedup,
                store,
                validator,
                semaphore,
                options,
                counters: Counters::default(),
            }),
        }
    }

    /// Wait for a free worker. Fails once the pool is shut down.
    pub async fn reserve_slot(&self) -> Result<WorkerSlot, PixvaultError> {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PixvaultError::Shutdown)?;
        Ok(WorkerSlot { _permit: permit })
    }

    /// Run `task` on the pool. Its outcome is sent to `reports` after the
    /// task has let go of its slot; blocking work still running may hold it
    /// a little longer.
    pub fn dispatch(&self, slot: WorkerSlot, task: Task, reports: mpsc::Sender<TaskReport>) {
        let inner = Arc::clone(&self.inner);
        let slot = Arc::new(slot);
        tokio::spawn(async move {
            inner.counters.begin();
            let source = task.item.label.clone();

            // Run in a nested task so a panic surfaces as a JoinError here.
            let runner = Arc::clone(&inner);
            let scoped = CURRENT_SLOT.scope(Arc::clone(&slot), async move {
                runner.run(task).await
            });
            let outcome = match tokio::spawn(scoped).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Task for {} panicked: {}", source, e);
                    TaskOutcome::Failed {
                        kind: ErrorKind::Corrupt,
                        message: format!("processing {} aborted unexpectedly", source),
                    }
                }
            };

            inner.counters.finish();
            drop(slot);
            if reports.send(TaskReport { source, outcome }).await.is_err() {
                tracing::warn!("Job driver went away before its task reported");
            }
        });
    }

    /// Stop handing out slots. Running tasks finish normally.
    pub fn shutdown(&self) {
        self.inner.semaphore.close();
    }

    pub fn stats(&self) -> ExecutorStats {
        let c = &self.inner.counters;
        ExecutorStats {
            in_flight: c.in_flight.load(Ordering::SeqCst),
            peak_in_flight: c.peak_in_flight.load(Ordering::SeqCst),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.inner.options.pool_size
    }
}

impl Inner {
    /// Run one task to an outcome. Never fails.
    async fn run(&self, task: Task) -> TaskOutcome {
        let label = task.item.label.clone();
        let start = Instant::now();

        match timeout(self.options.task_timeout, self.process(&task)).await {
            Ok(Ok(outcome)) => {
                tracing::debug!("Processed {} in {:?}: {:?}", label, start.elapsed(), outcome);
                outcome
            }
            Ok(Err(e)) => {
                tracing::warn!("Task failed: {}", e);
                TaskOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
            Err(_) => {
                let e = TaskError::Timeout {
                    source_label: label,
                    stage: "task".to_string(),
                    timeout_ms: self.options.task_timeout.as_millis() as u64,
                };
                tracing::warn!("Task failed: {}", e);
                TaskOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        }
    }

    /// load → size check → hash → dedup → storage backstop → metadata →
    /// mime check → thumbnail → persist.
    async fn process(&self, task: &Task) -> TaskResult<TaskOutcome> {
        let item = &task.item;
        let label = item.label.as_str();

        let bytes = item.content.load(label, self.options.max_bytes).await?;
        self.validator.check_size(bytes.len() as u64, label)?;
        if bytes.is_empty() {
            return Ok(TaskOutcome::Skipped {
                reason: "empty file".to_string(),
            });
        }

        let fingerprint = Hasher::fingerprint(&bytes);
        let reservation = match self.dedup.lookup_or_reserve(&fingerprint).await {
            Lookup::Existing(id) => {
                tracing::debug!("{} duplicates image {}", label, id);
                return Ok(TaskOutcome::Duplicate {
                    existing_image_id: id,
                });
            }
            Lookup::Reserved(reservation) => reservation,
        };

        let store = &self.store;
        let fp = &fingerprint;
        let stored = with_retry(self.options.retry, "image_by_fingerprint", move || {
            store.image_by_fingerprint(fp)
        })
        .await
        .map_err(|e| storage_error(label, e))?;
        if let Some(existing) = stored {
            reservation.commit(existing.id);
            return Ok(TaskOutcome::Duplicate {
                existing_image_id: existing.id,
            });
        }

        let meta = self.processor.metadata(Arc::clone(&bytes), label).await?;
        let mime_type = self
            .validator
            .ensure_allowed(meta.mime_type, &meta.format, label)?;
        let thumbnail = self.processor.thumbnail(Arc::clone(&bytes), label).await?;

        let new_image = NewImage {
            fingerprint: fingerprint.clone(),
            perceptual_hash: meta.perceptual_hash,
            mime_type,
            width: Some(meta.width),
            height: Some(meta.height),
            title: item.title(),
            thumbnail,
            exif: meta.exif,
            source: item.label.clone(),
            job_id: task.job_id,
            file_size: bytes.len() as u64,
        };
        let created = with_retry(self.options.retry, "create_image", move || {
            store.create_image(new_image.clone())
        })
        .await;

        match created {
            Ok(record) => {
                reservation.commit(record.id);
                Ok(TaskOutcome::Created {
                    image_id: record.id,
                })
            }
            // Another writer got there first; the store is authoritative.
            Err(StoreError::DuplicateFingerprint { existing }) => {
                reservation.commit(existing);
                Ok(TaskOutcome::Duplicate {
                    existing_image_id: existing,
                })
            }
            Err(e) => Err(storage_error(label, e)),
        }
    }
}

fn storage_error(source_label: &str, err: StoreError) -> TaskError {
    tracing::error!("Storage failure for {}: {}", source_label, err);
    TaskError::Storage {
        source_label: source_label.to_string(),
        message: err.to_string(),
    }
}
