//! Execution statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Statistics for a worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Total number of jobs processed, including panicked ones
    pub jobs_processed: AtomicU64,
    /// Total number of jobs whose body panicked
    pub jobs_panicked: AtomicU64,
    /// Total time spent processing jobs (microseconds)
    pub total_processing_time_us: AtomicU64,
    /// Number of times the worker went to sleep for lack of work
    pub idle_waits: AtomicU64,
}

impl WorkerStats {
    /// Create new worker statistics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, execution: &Execution) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
        if execution.panicked {
            self.jobs_panicked.fetch_add(1, Ordering::Relaxed);
        }
        self.total_processing_time_us
            .fetch_add(execution.elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn increment_idle_waits(&self) {
        self.idle_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total jobs processed
    pub fn get_jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Get total jobs panicked
    pub fn get_jobs_panicked(&self) -> u64 {
        self.jobs_panicked.load(Ordering::Relaxed)
    }

    /// Get number of idle sleeps
    pub fn get_idle_waits(&self) -> u64 {
        self.idle_waits.load(Ordering::Relaxed)
    }

    /// Get average processing time per job in microseconds
    pub fn get_average_processing_time_us(&self) -> f64 {
        let total = self.total_processing_time_us.load(Ordering::Relaxed);
        let count = self.jobs_processed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }
}

/// Outcome of running one job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Execution {
    /// Wall time spent in the job, trigger notification included
    pub elapsed: Duration,
    /// Whether the job body panicked
    pub panicked: bool,
}

/// Snapshot of world-level counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorldStats {
    /// Jobs accepted by `add_job_to_quantum_world`
    pub submitted: u64,
    /// Jobs run to completion, on any thread
    pub executed: u64,
    /// Jobs whose body panicked
    pub panicked: u64,
    /// Jobs run inline because their ready queue was full
    pub overflowed: u64,
    /// Jobs run by threads waiting in `process_while_wait`
    pub helped: u64,
    /// Total time spent running jobs (microseconds)
    pub total_time_us: u64,
    /// Longest single job (microseconds)
    pub max_time_us: u64,
}

impl WorldStats {
    /// Average time per executed job in microseconds
    pub fn average_time_us(&self) -> f64 {
        if self.executed > 0 {
            self.total_time_us as f64 / self.executed as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicWorldStats {
    submitted: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
    overflowed: AtomicU64,
    helped: AtomicU64,
    total_time_us: AtomicU64,
    max_time_us: AtomicU64,
}

impl AtomicWorldStats {
    pub(crate) fn increment_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_overflowed(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_helped(&self) {
        self.helped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, execution: &Execution) {
        let micros = execution.elapsed.as_micros() as u64;
        self.executed.fetch_add(1, Ordering::Relaxed);
        if execution.panicked {
            self.panicked.fetch_add(1, Ordering::Relaxed);
        }
        self.total_time_us.fetch_add(micros, Ordering::Relaxed);
        self.max_time_us.fetch_max(micros, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WorldStats {
        WorldStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            helped: self.helped.load(Ordering::Relaxed),
            total_time_us: self.total_time_us.load(Ordering::Relaxed),
            max_time_us: self.max_time_us.load(Ordering::Relaxed),
        }
    }
}
