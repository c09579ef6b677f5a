//! Job orchestration: the shared worker pool, per-job state, and the
//! coordinator that ties sources, workers and the store together.

pub mod coordinator;
pub mod executor;
pub mod record;

pub use coordinator::{CancelOutcome, JobCoordinator};
pub use executor::{
    spawn_blocking_in_slot, ExecutorOptions, ExecutorStats, Task, TaskExecutor, TaskReport,
    WorkerSlot,
};
pub use record::JobRecord;
