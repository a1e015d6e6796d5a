//! Worker thread implementation

use crate::core::{QuantumError, Result};
use crate::scheduler::stats::WorkerStats;
use crate::scheduler::world::QuantumWorld;
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::{debug, span, Level};

/// A worker thread that claims and runs ready jobs from a world.
///
/// Owned by a [`Scheduler`](crate::Scheduler), which always joins its
/// workers; dropping an unjoined worker detaches its thread.
#[derive(Debug)]
pub(crate) struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Create and start a new worker
    ///
    /// # Arguments
    ///
    /// * `id` - Unique identifier for this worker
    /// * `world` - World whose ready queues the worker drains
    /// * `running` - Cleared by the scheduler to stop the worker
    ///
    /// # Shutdown Behavior
    ///
    /// The worker finishes the job it is running, then exits. Jobs still in
    /// the ready queues are left for the scheduler to drain.
    pub fn new(id: usize, world: Arc<QuantumWorld>, running: Arc<AtomicBool>) -> Result<Self> {
        let stats = Arc::new(WorkerStats::new());
        let stats_clone = Arc::clone(&stats);

        let thread = thread::Builder::new()
            .name(format!("{}-{}", world.config().thread_name_prefix, id))
            .spawn(move || {
                Self::run(id, &world, &running, &stats_clone);
            })
            .map_err(|e| QuantumError::spawn_with_source(id, "failed to spawn worker", e))?;

        Ok(Self {
            id,
            thread: Some(thread),
            stats,
        })
    }

    /// Get worker statistics
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Join the worker thread
    pub fn join(mut self) -> Result<()> {
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| QuantumError::join(self.id, "Worker panicked"))?;
        }
        Ok(())
    }

    /// Main worker loop
    ///
    /// Claims jobs until `running` is cleared. When nothing is ready the
    /// worker spins with backoff for `spin_limit` attempts, then sleeps for
    /// the poll interval plus up to 25% jitter, or until a submission wakes it.
    fn run(id: usize, world: &QuantumWorld, running: &AtomicBool, stats: &WorkerStats) {
        #[cfg(feature = "tracing")]
        let worker_span = span!(Level::DEBUG, "worker", id = id);
        #[cfg(feature = "tracing")]
        let _guard = worker_span.enter();

        log::debug!("worker {} started", id);

        let config = world.config();
        let poll_interval = config.poll_interval;
        let max_jitter = (poll_interval.as_micros() / 4) as u64;
        let backoff = Backoff::new();
        let mut misses = 0u32;

        while running.load(Ordering::Acquire) {
            match world.get_job() {
                Some(job) => {
                    #[cfg(feature = "tracing")]
                    crate::tracing::metrics::record_worker_busy(id);

                    let execution = world.process_work_primitive(job);
                    stats.record(&execution);

                    #[cfg(feature = "tracing")]
                    crate::tracing::metrics::record_worker_idle(id);

                    backoff.reset();
                    misses = 0;
                }
                None if misses < config.spin_limit => {
                    misses += 1;
                    backoff.snooze();
                }
                None => {
                    stats.increment_idle_waits();
                    let jitter = Duration::from_micros(fastrand::u64(0..=max_jitter));
                    world.wait_for_work(poll_interval + jitter, running);
                    backoff.reset();
                    misses = 0;
                }
            }
        }

        #[cfg(feature = "tracing")]
        debug!(
            jobs_processed = stats.get_jobs_processed(),
            jobs_panicked = stats.get_jobs_panicked(),
            "worker shutting down"
        );
        log::debug!(
            "worker {} stopped after {} jobs",
            id,
            stats.get_jobs_processed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Job;
    use crate::scheduler::SchedulerConfig;

    fn world() -> Arc<QuantumWorld> {
        let config = SchedulerConfig::new(1).with_poll_interval(Duration::from_millis(10));
        QuantumWorld::new(&config).expect("world")
    }

    fn stop(worker: Worker, world: &QuantumWorld, running: &AtomicBool) {
        running.store(false, Ordering::SeqCst);
        world.wake_all();
        worker.join().expect("Failed to join worker");
    }

    #[test]
    fn test_worker_creation() {
        let world = world();
        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker::new(0, Arc::clone(&world), Arc::clone(&running))
            .expect("Failed to create worker");
        assert_eq!(worker.id, 0);
        stop(worker, &world, &running);
    }

    #[test]
    fn test_worker_job_execution() {
        let world = world();
        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker::new(0, Arc::clone(&world), Arc::clone(&running))
            .expect("Failed to create worker");
        let stats = worker.stats();

        world.add_job_to_quantum_world(Job::<_, 1>::from_fn(|| {}));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while stats.get_jobs_processed() < 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stats.get_jobs_processed(), 1);
        stop(worker, &world, &running);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let world = world();
        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker::new(0, Arc::clone(&world), Arc::clone(&running))
            .expect("Failed to create worker");
        let stats = worker.stats();

        world.add_job_to_quantum_world(Job::<_, 1>::from_fn(|| {
            panic!("Intentional panic for testing")
        }));
        world.add_job_to_quantum_world(Job::<_, 1>::from_fn(|| {}));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while stats.get_jobs_processed() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(stats.get_jobs_processed(), 2);
        assert_eq!(stats.get_jobs_panicked(), 1);
        stop(worker, &world, &running);
    }
}
