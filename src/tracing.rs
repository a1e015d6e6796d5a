//! Tracing integration for observability.
//!
//! This module provides span propagation and metrics events when the
//! `tracing` feature is enabled. Without the feature, [`TracedWork`] is a
//! transparent wrapper and no events are emitted.
//!
//! # Example
//!
//! ```rust,ignore
//! use quantum_jobs::prelude::*;
//! use quantum_jobs::tracing::TracedWork;
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env()
//!         .add_directive("quantum_jobs=debug".parse().unwrap()))
//!     .init();
//!
//! let scheduler = Scheduler::with_workers(4)?;
//! scheduler.start()?;
//!
//! let span = tracing::info_span!("frame", number = 42);
//! let _entered = span.enter();
//! // The job body runs inside "frame" on whichever worker claims it.
//! scheduler.submit(Job::<_, 1>::from_fn(TracedWork::new(|| physics_step())))?;
//! ```

use crate::core::Work;

/// A job body that carries the tracing span current at construction into
/// the thread that runs it.
pub struct TracedWork<W: Work> {
    inner: W,
    #[cfg(feature = "tracing")]
    span: tracing::Span,
}

impl<W: Work> TracedWork<W> {
    /// Wraps `work`, capturing the current span.
    pub fn new(work: W) -> Self {
        Self {
            inner: work,
            #[cfg(feature = "tracing")]
            span: tracing::Span::current(),
        }
    }

    /// Wraps `work` with a specific span.
    #[cfg(feature = "tracing")]
    pub fn with_span(work: W, span: tracing::Span) -> Self {
        Self { inner: work, span }
    }

    /// Returns the wrapped body.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Work> Work for TracedWork<W> {
    fn on_run(&mut self) {
        #[cfg(feature = "tracing")]
        let _guard = self.span.enter();
        self.inner.on_run()
    }
}

/// Metrics recording functions for observability.
///
/// These functions emit tracing events that can be consumed by
/// metrics collection systems like Prometheus via tracing-opentelemetry.
#[cfg(feature = "tracing")]
pub mod metrics {
    use std::time::Duration;

    /// Records a job submission event.
    #[inline]
    pub fn record_submission(ready_jobs: usize) {
        tracing::trace!(
            counter.jobs_submitted = 1,
            gauge.ready_jobs = ready_jobs as i64,
            "job submitted"
        );
    }

    /// Records job completion with timing.
    #[inline]
    pub fn record_completion(duration: Duration) {
        tracing::trace!(
            counter.jobs_completed = 1,
            histogram.job_duration_us = duration.as_micros() as u64,
            "job completed"
        );
    }

    /// Records a job panic event.
    #[inline]
    pub fn record_panic(duration: Duration) {
        tracing::trace!(
            counter.jobs_panicked = 1,
            histogram.job_duration_us = duration.as_micros() as u64,
            "job panicked"
        );
    }

    /// Records a trigger releasing its dependents.
    #[inline]
    pub fn record_trigger_fired(released: usize) {
        tracing::trace!(
            counter.triggers_fired = 1,
            histogram.jobs_released = released as u64,
            "trigger fired"
        );
    }

    /// Records worker becoming busy.
    #[inline]
    pub fn record_worker_busy(worker_id: usize) {
        tracing::trace!(gauge.workers_busy = 1, worker_id = worker_id, "worker busy");
    }

    /// Records worker becoming idle.
    #[inline]
    pub fn record_worker_idle(worker_id: usize) {
        tracing::trace!(
            gauge.workers_busy = -1i64,
            worker_id = worker_id,
            "worker idle"
        );
    }

    /// Records scheduler startup.
    #[inline]
    pub fn record_scheduler_start(num_workers: usize) {
        tracing::info!(workers = num_workers, "scheduler started");
    }

    /// Records scheduler shutdown.
    #[inline]
    pub fn record_scheduler_shutdown(jobs_executed: u64, jobs_panicked: u64) {
        tracing::info!(
            jobs_executed = jobs_executed,
            jobs_panicked = jobs_panicked,
            "scheduler shutdown complete"
        );
    }
}
