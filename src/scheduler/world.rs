//! The shared scheduling context

use crate::core::{JobRef, JobType, Notify, Result};
use crate::queue::BoundedStack;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::stats::{AtomicWorldStats, Execution, WorldStats};
use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Waiting threads take short jobs first.
const HELPER_ORDER: [JobType; JobType::COUNT] = [JobType::Light, JobType::Heavy];

/// Ready queues plus the wake-up machinery shared by workers, triggers and
/// channels.
///
/// A world is passed explicitly (as `Arc<QuantumWorld>`) to everything that
/// submits work; there is no global instance. A world without a
/// [`Scheduler`](crate::scheduler::Scheduler) has no workers: jobs only run
/// when some thread calls [`get_job`](Self::get_job) and
/// [`process_work_primitive`](Self::process_work_primitive), or waits with
/// [`process_while_wait`](Self::process_while_wait).
///
/// # Example
///
/// ```rust
/// use quantum_jobs::prelude::*;
///
/// # fn main() -> Result<()> {
/// let world = QuantumWorld::new(&SchedulerConfig::default())?;
/// world.add_job_to_quantum_world(Job::<_, 1>::from_fn(|| println!("ran")));
/// assert_eq!(world.pending_jobs(), 1);
///
/// let job = world.get_job().unwrap();
/// let execution = world.process_work_primitive(job);
/// assert!(!execution.panicked);
/// assert_eq!(world.stats().executed, 1);
/// # Ok(())
/// # }
/// ```
pub struct QuantumWorld {
    config: SchedulerConfig,
    ready: Box<[BoundedStack<JobRef>]>,
    sleepers: CachePadded<AtomicUsize>,
    lock: Mutex<()>,
    wakeup: Condvar,
    stats: AtomicWorldStats,
}

impl QuantumWorld {
    /// Create a world with one ready queue per job type.
    ///
    /// # Errors
    ///
    /// - `QuantumError::InvalidConfig` - the configuration does not validate
    /// - `QuantumError::OutOfMemory` - ready queue storage could not be reserved
    pub fn new(config: &SchedulerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let ready = JobType::ALL
            .iter()
            .map(|_| BoundedStack::with_capacity(config.ready_queue_capacity))
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();

        Ok(Arc::new(Self {
            config: config.clone(),
            ready,
            sleepers: CachePadded::new(AtomicUsize::new(0)),
            lock: Mutex::new(()),
            wakeup: Condvar::new(),
            stats: AtomicWorldStats::default(),
        }))
    }

    /// Makes `job` ready to run. Never blocks.
    ///
    /// The job must be idle. If the ready queue for its type is full, the job
    /// runs on the calling thread before this returns.
    pub fn add_job_to_quantum_world(&self, job: JobRef) {
        if !job.try_enqueue() {
            contract_violation!("{:?} submitted outside its idle state", job);
            return;
        }
        self.stats.increment_submitted();

        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_submission(self.pending_jobs());

        match self.ready[job.job_type().index()].push(job) {
            Ok(()) => self.wake_one(),
            Err(job) => {
                log::warn!(
                    "{} ready queue full ({} jobs), running {:?} inline",
                    job.job_type().name(),
                    self.config.ready_queue_capacity,
                    job
                );
                self.stats.increment_overflowed();
                self.process_work_primitive(job);
            }
        }
    }

    /// Claims one ready job in the configured claim order
    pub fn get_job(&self) -> Option<JobRef> {
        self.claim(&self.config.claim_order)
    }

    /// Claims one ready job, light jobs first
    pub fn get_job_for_helper(&self) -> Option<JobRef> {
        self.claim(&HELPER_ORDER)
    }

    /// Runs a claimed job to completion, trigger notification included.
    ///
    /// A panic in the job body is logged and counted; the job still notifies
    /// its triggers.
    pub fn process_work_primitive(&self, job: JobRef) -> Execution {
        let start = Instant::now();
        let outcome = job.execute();
        let elapsed = start.elapsed();

        let panicked = match outcome {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                crate::tracing::metrics::record_completion(elapsed);
                false
            }
            Err(payload) => {
                log::error!("{:?} panicked: {}", job, panic_message(payload.as_ref()));
                #[cfg(feature = "tracing")]
                crate::tracing::metrics::record_panic(elapsed);
                true
            }
        };

        let execution = Execution { elapsed, panicked };
        self.stats.record(&execution);
        execution
    }

    /// Runs ready jobs on the calling thread until `waiter` is triggered.
    ///
    /// Spins, then yields, while nothing is ready. Returns immediately if
    /// `waiter` is already triggered.
    pub fn process_while_wait<T: Notify + ?Sized>(&self, waiter: &T) {
        let backoff = Backoff::new();
        while !waiter.is_triggered() {
            match self.get_job_for_helper() {
                Some(job) => {
                    self.stats.increment_helped();
                    self.process_work_primitive(job);
                    backoff.reset();
                }
                None => backoff.snooze(),
            }
        }
    }

    /// Runs every ready job on the calling thread. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Some(job) = self.get_job() {
            self.process_work_primitive(job);
            ran += 1;
        }
        ran
    }

    /// Number of jobs sitting in the ready queues
    pub fn pending_jobs(&self) -> usize {
        self.ready.iter().map(BoundedStack::len).sum()
    }

    /// Snapshot of the world counters
    pub fn stats(&self) -> WorldStats {
        self.stats.snapshot()
    }

    /// The configuration the world was created with
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sleeps until a job is submitted, `timeout` elapses or `running` is
    /// cleared and [`wake_all`](Self::wake_all) is called.
    pub(crate) fn wait_for_work(&self, timeout: Duration, running: &AtomicBool) {
        let mut guard = self.lock.lock();
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        // Re-checked under the lock: a submitter that saw no sleeper has
        // already published its job.
        if self.pending_jobs() == 0 && running.load(Ordering::SeqCst) {
            self.wakeup.wait_for(&mut guard, timeout);
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Wakes every sleeping worker
    pub(crate) fn wake_all(&self) {
        let _guard = self.lock.lock();
        self.wakeup.notify_all();
    }

    fn wake_one(&self) {
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.wakeup.notify_one();
        }
    }

    fn claim(&self, order: &[JobType]) -> Option<JobRef> {
        order
            .iter()
            .find_map(|job_type| self.ready[job_type.index()].pop())
    }
}

impl fmt::Debug for QuantumWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantumWorld")
            .field("pending_jobs", &self.pending_jobs())
            .field("sleepers", &self.sleepers.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
