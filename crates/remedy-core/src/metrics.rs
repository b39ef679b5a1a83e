//! Process-wide run outcome counters.
//!
//! Incremented by the orchestrator; [`Metrics::flush`] emits the current
//! values as one `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::run::RunState;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    runs_started: AtomicU64,
    runs_staged: AtomicU64,
    runs_rejected: AtomicU64,
    runs_manual_review: AtomicU64,
    runs_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_staged: AtomicU64::new(0),
            runs_rejected: AtomicU64::new(0),
            runs_manual_review: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    /// Count a run that reached `terminal`. Non-terminal states are ignored.
    pub fn record_outcome(&self, terminal: RunState) {
        let (counter, name) = match terminal {
            RunState::Staged => (&self.runs_staged, "runs_staged"),
            RunState::ValidatedRejected => (&self.runs_rejected, "runs_rejected"),
            RunState::NoTemplateManualReview => (&self.runs_manual_review, "runs_manual_review"),
            RunState::ClassificationFailed
            | RunState::GenerationFailed
            | RunState::StagingFailed => (&self.runs_failed, "runs_failed"),
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_started = self.runs_started(),
            runs_staged = self.runs_staged(),
            runs_rejected = self.runs_rejected(),
            runs_manual_review = self.runs_manual_review(),
            runs_failed = self.runs_failed(),
        );
    }

    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_staged(&self) -> u64 {
        self.runs_staged.load(Ordering::Relaxed)
    }

    pub fn runs_rejected(&self) -> u64 {
        self.runs_rejected.load(Ordering::Relaxed)
    }

    pub fn runs_manual_review(&self) -> u64 {
        self.runs_manual_review.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.runs_staged.store(0, Ordering::Relaxed);
        self.runs_rejected.store(0, Ordering::Relaxed);
        self.runs_manual_review.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_their_buckets() {
        let m = Metrics::new();
        m.inc_started();
        m.inc_started();
        m.record_outcome(RunState::Staged);
        m.record_outcome(RunState::ValidatedRejected);
        m.record_outcome(RunState::GenerationFailed);
        m.record_outcome(RunState::StagingFailed);
        m.record_outcome(RunState::NoTemplateManualReview);
        m.record_outcome(RunState::Rendered);

        assert_eq!(m.runs_started(), 2);
        assert_eq!(m.runs_staged(), 1);
        assert_eq!(m.runs_rejected(), 1);
        assert_eq!(m.runs_failed(), 2);
        assert_eq!(m.runs_manual_review(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_started();
        m.record_outcome(RunState::Staged);
        m.reset();
        assert_eq!(m.runs_started(), 0);
        assert_eq!(m.runs_staged(), 0);
    }
}
