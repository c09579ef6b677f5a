//! Aggregate state of one job, owned by its driver task.

use chrono::Utc;

use crate::types::{
    ErrorKind, ErrorSummary, JobSnapshot, JobState, OutcomeEntry, TaskOutcome,
};

/// Mutable job state. Only the job's driver holds one, so updates are
/// serialized without a lock; readers see published snapshots.
#[derive(Debug, Clone)]
pub struct JobRecord {
    snapshot: JobSnapshot,
    pulled: u64,
    cancel_observed: bool,
}

impl JobRecord {
    pub fn new(snapshot: JobSnapshot) -> Self {
        Self {
            snapshot,
            pulled: 0,
            cancel_observed: false,
        }
    }

    pub fn snapshot(&self) -> &JobSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> JobState {
        self.snapshot.state
    }

    pub fn cancel_observed(&self) -> bool {
        self.cancel_observed
    }

    fn touch(&mut self) {
        self.snapshot.updated_at = Utc::now();
    }

    /// Apply a state change. Returns false, leaving the record untouched,
    /// if the transition is not legal.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.snapshot.state.can_transition_to(next) {
            return false;
        }
        self.snapshot.state = next;
        self.touch();
        true
    }

    /// The adapter reported how many items it will produce.
    pub fn set_total_hint(&mut self, total: u64) {
        if !self.snapshot.total_final {
            self.snapshot.total = self.snapshot.total.max(total);
            self.touch();
        }
    }

    /// One more item was taken from the source.
    pub fn item_pulled(&mut self) {
        self.pulled += 1;
        if self.pulled > self.snapshot.total {
            self.snapshot.total = self.pulled;
        }
        self.touch();
    }

    /// The source is exhausted; the total is now exact.
    pub fn finalize_total(&mut self) {
        self.snapshot.total = self.pulled;
        self.snapshot.total_final = true;
        self.touch();
    }

    pub fn observe_cancel(&mut self) {
        self.cancel_observed = true;
        self.snapshot.cancel_requested = true;
        self.touch();
    }

    /// Record the outcome of one item and return the entry to persist.
    ///
    /// After cancellation has been observed outcomes are still logged but
    /// no longer move the counters.
    pub fn record_outcome(&mut self, source: String, outcome: TaskOutcome) -> OutcomeEntry {
        let counted = !self.cancel_observed;
        if counted {
            match &outcome {
                TaskOutcome::Created { .. } => self.snapshot.succeeded += 1,
                TaskOutcome::Duplicate { .. } | TaskOutcome::Skipped { .. } => {
                    self.snapshot.skipped += 1
                }
                TaskOutcome::Failed { kind, .. } => {
                    self.snapshot.failed += 1;
                    self.snapshot.errors.push(ErrorSummary {
                        kind: *kind,
                        source: source.clone(),
                    });
                }
            }
        }
        self.touch();
        OutcomeEntry {
            source,
            outcome,
            recorded_at: self.snapshot.updated_at,
            counted,
        }
    }

    /// The source could not be opened: one top-level error, job fails.
    pub fn fail_open(&mut self, source: String) {
        self.snapshot.errors.push(ErrorSummary {
            kind: ErrorKind::SourceOpen,
            source,
        });
        self.transition(JobState::Failed);
    }

    /// Terminal state once no more outcomes will arrive.
    ///
    /// `internal_error` means the worker pool went away while the job was
    /// still pulling.
    pub fn final_state(&self, internal_error: bool) -> JobState {
        let snap = &self.snapshot;
        let positive = snap.succeeded + snap.skipped;
        if self.cancel_observed {
            JobState::Cancelled
        } else if internal_error {
            if snap.processed() == 0 {
                JobState::Failed
            } else {
                JobState::CompletedWithErrors
            }
        } else if snap.failed == 0 {
            JobState::Completed
        } else if positive > 0 {
            JobState::CompletedWithErrors
        } else {
            JobState::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageId, JobId, JobKind};

    fn running(kind: JobKind, hint: Option<u64>) -> JobRecord {
        let mut record = JobRecord::new(JobSnapshot::new(JobId::new(), kind, hint));
        assert!(record.transition(JobState::Running));
        record
    }

    fn failed() -> TaskOutcome {
        TaskOutcome::Failed {
            kind: ErrorKind::Unsupported,
            message: "nope".into(),
        }
    }

    #[test]
    fn test_counts_by_outcome() {
        let mut record = running(JobKind::ArchiveImport, Some(4));
        for _ in 0..4 {
            record.item_pulled();
        }
        record.finalize_total();
        record.record_outcome("a.png".into(), TaskOutcome::Created { image_id: ImageId::new() });
        record.record_outcome(
            "b.png".into(),
            TaskOutcome::Duplicate {
                existing_image_id: ImageId::new(),
            },
        );
        record.record_outcome(
            "c.png".into(),
            TaskOutcome::Skipped {
                reason: "empty".into(),
            },
        );
        let entry = record.record_outcome("notes.txt".into(), failed());
        assert!(entry.counted);

        let snap = record.snapshot();
        assert_eq!((snap.succeeded, snap.skipped, snap.failed), (1, 2, 1));
        assert_eq!(snap.processed(), snap.total);
        assert_eq!(
            snap.errors,
            vec![ErrorSummary {
                kind: ErrorKind::Unsupported,
                source: "notes.txt".into()
            }]
        );
        assert_eq!(record.final_state(false), JobState::CompletedWithErrors);
    }

    #[test]
    fn test_outcomes_after_cancel_are_uncounted() {
        let mut record = running(JobKind::ArchiveImport, Some(10));
        record.item_pulled();
        record.observe_cancel();
        let entry = record.record_outcome("a.png".into(), failed());
        assert!(!entry.counted);
        assert_eq!(record.snapshot().failed, 0);
        assert!(record.snapshot().errors.is_empty());
        assert!(record.snapshot().cancel_requested);
        assert_eq!(record.final_state(false), JobState::Cancelled);
    }

    #[test]
    fn test_final_states() {
        let empty = running(JobKind::ArchiveImport, Some(0));
        assert_eq!(empty.final_state(false), JobState::Completed);
        assert_eq!(empty.final_state(true), JobState::Failed);

        let mut all_failed = running(JobKind::SingleUpload, Some(1));
        all_failed.item_pulled();
        all_failed.record_outcome("x.jpg".into(), failed());
        assert_eq!(all_failed.final_state(false), JobState::Failed);
    }

    #[test]
    fn test_crawl_total_grows_then_finalizes() {
        let mut record = running(JobKind::UrlCrawl, None);
        assert_eq!(record.snapshot().total, 0);
        record.item_pulled();
        record.item_pulled();
        assert_eq!(record.snapshot().total, 2);
        assert!(!record.snapshot().total_final);
        record.finalize_total();
        assert!(record.snapshot().total_final);
        assert_eq!(record.snapshot().total, 2);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut record = running(JobKind::SingleUpload, Some(1));
        assert!(record.transition(JobState::Completed));
        assert!(!record.transition(JobState::Running));
        assert_eq!(record.state(), JobState::Completed);
    }

    #[test]
    fn test_fail_open() {
        let mut record = JobRecord::new(JobSnapshot::new(JobId::new(), JobKind::ArchiveImport, None));
        record.fail_open("/tmp/missing.zip".into());
        assert_eq!(record.state(), JobState::Failed);
        assert_eq!(record.snapshot().errors[0].kind, ErrorKind::SourceOpen);
    }
}
