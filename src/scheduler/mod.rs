//! Worker threads and the world they drain

mod config;
mod stats;
mod worker;
mod world;

pub use config::SchedulerConfig;
pub use stats::{Execution, WorkerStats, WorldStats};
pub use world::QuantumWorld;

use crate::channel::Channel;
use crate::core::{Job, JobRef, OnceWork, QuantumError, Result, SubmitError};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use worker::Worker;

/// Owns a [`QuantumWorld`] and the worker threads that run its jobs.
///
/// The world exists from construction, so job graphs can be wired before
/// [`start`](Self::start). Workers are spawned by `start` and joined by
/// [`shutdown`](Self::shutdown); jobs still ready at shutdown are run on the
/// shutting-down thread.
///
/// # Example
///
/// ```rust
/// use quantum_jobs::prelude::*;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # fn main() -> Result<()> {
/// let scheduler = Scheduler::with_workers(4)?;
/// scheduler.start()?;
///
/// let counter = Arc::new(AtomicUsize::new(0));
/// let channel = scheduler.channel("counting")?;
/// for _ in 0..10 {
///     let counter = Arc::clone(&counter);
///     channel.submit_job(move || {
///         counter.fetch_add(1, Ordering::Relaxed);
///     });
/// }
/// channel.join();
/// assert_eq!(counter.load(Ordering::Relaxed), 10);
///
/// scheduler.shutdown()?;
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    config: SchedulerConfig,
    world: Arc<QuantumWorld>,
    workers: RwLock<Vec<Worker>>,
    running: Arc<AtomicBool>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("world", &self.world)
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with the specified number of workers
    pub fn with_workers(num_workers: usize) -> Result<Self> {
        Self::with_config(SchedulerConfig::new(num_workers))
    }

    /// Create a scheduler with custom configuration.
    ///
    /// A worker count of 0 is replaced with the number of CPUs.
    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        let config = config.resolved();
        config.validate()?;
        let world = QuantumWorld::new(&config)?;
        Ok(Self {
            config,
            world,
            workers: RwLock::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Start the worker threads
    ///
    /// # Restart Support
    ///
    /// The scheduler can be restarted after shutdown by calling `start` again.
    ///
    /// # Errors
    ///
    /// - `QuantumError::AlreadyRunning` - workers are already running
    /// - `QuantumError::SpawnError` - a worker thread could not be spawned;
    ///   workers spawned so far are stopped
    pub fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(QuantumError::already_running(
                &self.config.thread_name_prefix,
                self.config.num_workers,
            ));
        }

        let mut workers = Vec::with_capacity(self.config.num_workers);
        for id in 0..self.config.num_workers {
            match Worker::new(id, Arc::clone(&self.world), Arc::clone(&self.running)) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    self.world.wake_all();
                    for worker in workers {
                        // The spawn error is the one worth reporting.
                        let _ = worker.join();
                    }
                    return Err(e);
                }
            }
        }
        *self.workers.write() = workers;

        log::info!(
            "scheduler '{}' started with {} workers",
            self.config.thread_name_prefix,
            self.config.num_workers
        );
        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_scheduler_start(self.config.num_workers);

        Ok(())
    }

    /// Submit a job to the world
    ///
    /// # Errors
    ///
    /// - `SubmitError` - the scheduler is not running. The error owns the
    ///   job: triggers it was wired to keep waiting for it until it is
    ///   resubmitted, so dropping it leaves them pending forever.
    pub fn submit(&self, job: JobRef) -> std::result::Result<(), SubmitError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(SubmitError {
                name: self.config.thread_name_prefix.clone(),
                job,
            });
        }
        self.world.add_job_to_quantum_world(job);
        Ok(())
    }

    /// Submit a closure as a fire-and-forget job
    ///
    /// # Errors
    ///
    /// - `QuantumError::NotRunning` - the scheduler is not running
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Job::<_, 0>::from_fn(OnceWork::new(f)))?;
        Ok(())
    }

    /// Create a channel submitting into this scheduler's world
    ///
    /// # Errors
    ///
    /// - `QuantumError::OutOfMemory` - the channel's job pool could not be
    ///   reserved
    pub fn channel(&self, name: impl Into<Cow<'static, str>>) -> Result<Channel> {
        Channel::new(&self.world, name)
    }

    /// The world workers drain
    pub fn world(&self) -> &Arc<QuantumWorld> {
        &self.world
    }

    /// Get the number of worker threads
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Check if the scheduler is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get statistics for all workers
    pub fn get_stats(&self) -> Vec<Arc<WorkerStats>> {
        self.workers.read().iter().map(|w| w.stats()).collect()
    }

    /// Get total jobs processed across all workers
    pub fn total_jobs_processed(&self) -> u64 {
        let workers = self.workers.read();
        workers.iter().map(|w| w.stats().get_jobs_processed()).sum()
    }

    /// Get total jobs panicked across all workers
    pub fn total_jobs_panicked(&self) -> u64 {
        let workers = self.workers.read();
        workers.iter().map(|w| w.stats().get_jobs_panicked()).sum()
    }

    /// Stop the workers and wait for them to exit
    ///
    /// # Graceful Shutdown
    ///
    /// 1. Stops accepting submissions through [`submit`](Self::submit)
    /// 2. Wakes sleeping workers and joins every worker
    /// 3. Runs the jobs still sitting in the ready queues on this thread
    ///
    /// Step 3 also releases the jobs, and through them their triggers, so no
    /// reference cycle outlives the scheduler.
    pub fn shutdown(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        self.world.wake_all();

        let workers = std::mem::take(&mut *self.workers.write());
        let mut first_error = None;
        for worker in workers {
            if let Err(e) = worker.join() {
                log::error!("{}", e);
                first_error.get_or_insert(e);
            }
        }

        let drained = self.world.run_pending();
        let stats = self.world.stats();
        log::info!(
            "scheduler '{}' stopped: {} jobs executed, {} panicked, {} drained at shutdown",
            self.config.thread_name_prefix,
            stats.executed,
            stats.panicked,
            drained
        );
        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_scheduler_shutdown(stats.executed, stats.panicked);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!(
                "failed to shut down scheduler '{}' during drop: {}",
                self.config.thread_name_prefix,
                e
            );
        }
        // Jobs submitted straight to the world after shutdown.
        self.world.run_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while !done() {
            if start.elapsed() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }

    #[test]
    fn test_scheduler_creation() {
        let scheduler = Scheduler::new().expect("Failed to create scheduler");
        assert!(!scheduler.is_running());

        scheduler.start().expect("Failed to start scheduler");
        assert!(scheduler.is_running());
        assert_eq!(scheduler.num_workers(), num_cpus::get());
        assert_eq!(scheduler.get_stats().len(), num_cpus::get());

        scheduler.shutdown().expect("Failed to shutdown scheduler");
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_double_start() {
        let scheduler = Scheduler::with_workers(1).unwrap();
        scheduler.start().unwrap();
        assert!(matches!(
            scheduler.start(),
            Err(QuantumError::AlreadyRunning { .. })
        ));
        scheduler.shutdown().unwrap();
    }

    #[test]
    fn test_submit_requires_running() {
        let scheduler = Scheduler::with_workers(1).unwrap();
        let result = scheduler.execute(|| {});
        assert!(matches!(result, Err(QuantumError::NotRunning { .. })));
    }

    #[test]
    fn test_rejected_job_can_be_resubmitted() {
        use crate::core::Trigger;

        let scheduler = Scheduler::with_workers(1).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let job: JobRef = Job::<_, 1>::from_fn(move || ran_clone.store(true, Ordering::SeqCst));
        let trigger = Trigger::<0>::new(scheduler.world());
        trigger.job_will_notify_me(&job);

        let rejected = scheduler.submit(job).unwrap_err();
        assert_eq!(trigger.pending(), 1);

        scheduler.start().unwrap();
        scheduler.submit(rejected.into_job()).unwrap();
        trigger.join();
        assert!(ran.load(Ordering::SeqCst));
        scheduler.shutdown().unwrap();
    }

    #[test]
    fn test_literal_zero_workers_config() {
        let config = SchedulerConfig {
            num_workers: 0,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::with_config(config).unwrap();
        assert_eq!(scheduler.num_workers(), num_cpus::get());
    }

    #[test]
    fn test_job_execution() {
        let scheduler = Scheduler::with_workers(2).unwrap();
        scheduler.start().unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            scheduler
                .execute(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .expect("Failed to submit job");
        }

        assert!(wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::Relaxed) == 10
        }));
        assert_eq!(scheduler.world().stats().submitted, 10);
        scheduler.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_drains_ready_jobs() {
        let scheduler = Scheduler::with_workers(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        // Submitted straight to the world while no worker runs.
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            scheduler
                .world()
                .add_job_to_quantum_world(Job::<_, 0>::from_fn(OnceWork::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })));
        }
        scheduler.start().unwrap();
        scheduler.shutdown().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.world().pending_jobs(), 0);
    }

    #[test]
    fn test_restart() {
        let scheduler = Scheduler::with_workers(2).unwrap();
        for _ in 0..2 {
            scheduler.start().unwrap();
            let ran = Arc::new(AtomicBool::new(false));
            let ran_clone = Arc::clone(&ran);
            scheduler
                .execute(move || ran_clone.store(true, Ordering::SeqCst))
                .unwrap();
            scheduler.shutdown().unwrap();
            assert!(ran.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let scheduler = Scheduler::with_workers(1).unwrap();
        scheduler.start().unwrap();
        scheduler
            .execute(|| panic!("Intentional panic for testing"))
            .unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        scheduler
            .execute(move || ran_clone.store(true, Ordering::SeqCst))
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || ran.load(Ordering::SeqCst)));
        scheduler.shutdown().unwrap();
        assert_eq!(scheduler.world().stats().panicked, 1);
    }
}
