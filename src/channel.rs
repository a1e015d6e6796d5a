//! Fire-and-forget job submission with a single join point

use crate::alloc::{Pool, PoolBox};
use crate::core::{
    Definition, InlineWork, Job, JobType, Lifetime, Notify, OnceWork, Result, Schedulable,
    Trigger,
};
use crate::scheduler::QuantumWorld;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fmt;
use std::iter::FusedIterator;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type PooledJob = Job<InlineWork, 2>;

/// A reusable channel job and the lease that returns it to the pool.
struct JobSlot {
    job: Arc<PooledJob>,
    lease: Arc<Lease>,
}

/// Holds a slot's pool guard while its job is in flight. Registered as the
/// job's first trigger, so the slot is free again before the channel count
/// drops.
struct Lease(Mutex<Option<PoolBox<JobSlot>>>);

impl Notify for Lease {
    fn on_notify(&self) {
        let slot = self.0.lock().take();
        drop(slot);
    }

    fn is_triggered(&self) -> bool {
        self.0.lock().is_none()
    }
}

/// Groups anonymous jobs so that a caller can wait for all of them.
///
/// Every submitted job notifies an internal trigger that never fires; a
/// channel only counts outstanding jobs. [`join`](Self::join) helps the world
/// until that count reaches zero and can be called again after further
/// submissions.
///
/// Jobs come from a pool of
/// [`channel_job_capacity`](crate::SchedulerConfig::channel_job_capacity)
/// persistent jobs reserved when the channel is created. A submission whose
/// closure fits in [`InlineWork`] does not allocate. When every pooled job is
/// in flight, further submissions allocate their own job and are counted by
/// [`spilled`](Self::spilled).
///
/// # Example
///
/// ```rust
/// use quantum_jobs::prelude::*;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # fn main() -> Result<()> {
/// let world = QuantumWorld::new(&SchedulerConfig::default())?;
/// let channel = Channel::new(&world, "sum")?;
///
/// let data: Arc<[u64]> = (1..=100).collect();
/// let total = Arc::new(AtomicUsize::new(0));
/// let sink = Arc::clone(&total);
/// channel.foreach_log(data, 4, 10, move |batch| {
///     let sum: u64 = batch.iter().sum();
///     sink.fetch_add(sum as usize, Ordering::Relaxed);
/// });
/// channel.join();
/// assert_eq!(total.load(Ordering::Relaxed), 5050);
/// # Ok(())
/// # }
/// ```
pub struct Channel {
    world: Arc<QuantumWorld>,
    trigger: Arc<Trigger<0>>,
    jobs: Arc<Pool<JobSlot>>,
    name: Cow<'static, str>,
    submitted: AtomicUsize,
    spilled: AtomicUsize,
}

impl Channel {
    /// Create a channel submitting into `world`.
    ///
    /// # Errors
    ///
    /// - `QuantumError::InvalidConfig` - the world's `channel_job_capacity`
    ///   is 0 or too large
    /// - `QuantumError::OutOfMemory` - the job pool could not be reserved
    pub fn new(world: &Arc<QuantumWorld>, name: impl Into<Cow<'static, str>>) -> Result<Self> {
        let name = name.into();
        let jobs = Pool::init_with(world.config().channel_job_capacity, |_| {
            let definition = Definition::new()
                .lifetime(Lifetime::Persistent)
                .name(name.clone());
            JobSlot {
                job: Job::new(definition, InlineWork::new()),
                lease: Arc::new(Lease(Mutex::new(None))),
            }
        })?;

        let trigger = Trigger::named(world, name.clone());
        // Disarmed for good: the count is reused across joins.
        trigger.dont_trigger_until_ready();
        Ok(Self {
            world: Arc::clone(world),
            trigger,
            jobs: Arc::new(jobs),
            name,
            submitted: AtomicUsize::new(0),
            spilled: AtomicUsize::new(0),
        })
    }

    /// Submit `f` as a light job
    pub fn submit_job<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_typed(JobType::Light, f);
    }

    /// Submit `f` as a job of the given type
    pub fn submit_typed<F>(&self, job_type: JobType, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let Some(slot) = self.jobs.pop_arc() else {
            self.spill(job_type, f);
            return;
        };

        // A pooled job is idle whenever its slot is free.
        let job = Arc::clone(&slot.job);
        let lease = Arc::clone(&slot.lease);
        job.set_job_type(job_type);
        job.with_work(|work| work.set(f));
        *lease.0.lock() = Some(slot);
        job.attach_trigger(lease);
        self.trigger.job_will_notify_me(&job);
        self.world.add_job_to_quantum_world(job);
    }

    fn spill<F>(&self, job_type: JobType, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let spilled = self.spilled.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!(
            "channel '{}' has no free pooled job, allocating one ({} so far)",
            self.name,
            spilled
        );
        let job = Job::<_, 1>::new(Definition::new().job_type(job_type), OnceWork::new(f));
        self.trigger.job_will_notify_me(&job);
        self.world.add_job_to_quantum_world(job);
    }

    /// Calls `f` on contiguous batches of `data`, one job per batch.
    ///
    /// At most `max_batches` batches of at least `min_batch_size` elements
    /// are formed; see [`batch_ranges`]. When that yields a single batch,
    /// `f` runs on the calling thread before this returns. Empty `data`
    /// submits nothing.
    pub fn foreach_log<T, F>(&self, data: Arc<[T]>, max_batches: usize, min_batch_size: usize, f: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&[T]) + Send + Sync + 'static,
    {
        let ranges = batch_ranges(data.len(), max_batches, min_batch_size);
        if ranges.len() == 1 {
            f(&data[..]);
            return;
        }

        let f = Arc::new(f);
        for range in ranges {
            let data = Arc::clone(&data);
            let f = Arc::clone(&f);
            self.submit_job(move || (*f)(&data[range]));
        }
    }

    /// Helps the world until every job submitted so far has completed
    pub fn join(&self) {
        self.world.process_while_wait(self.trigger.as_ref());
    }

    /// Number of jobs submitted through this channel
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Number of submitted jobs that have not completed
    pub fn pending(&self) -> usize {
        self.trigger.pending()
    }

    /// Number of submissions that found no free pooled job and allocated one
    pub fn spilled(&self) -> usize {
        self.spilled.load(Ordering::Relaxed)
    }

    /// Number of pooled jobs currently free
    pub fn available_jobs(&self) -> usize {
        self.jobs.available()
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("submitted", &self.submitted())
            .field("pending", &self.pending())
            .field("available_jobs", &self.available_jobs())
            .field("spilled", &self.spilled())
            .finish()
    }
}

/// Splits `0..len` into balanced contiguous ranges.
///
/// The number of ranges is `min(max_batches, len / min_batch_size)`, at
/// least one, and exactly one when `len < min_batch_size`. Sizes differ by
/// at most one, longer ranges first. `len == 0` yields nothing. Zero
/// `max_batches` or `min_batch_size` are treated as one.
///
/// ```rust
/// use quantum_jobs::channel::batch_ranges;
///
/// let ranges: Vec<_> = batch_ranges(10, 3, 2).collect();
/// assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
/// ```
pub fn batch_ranges(len: usize, max_batches: usize, min_batch_size: usize) -> BatchRanges {
    let min = min_batch_size.max(1);
    let count = if len == 0 {
        0
    } else if len < min {
        1
    } else {
        max_batches.max(1).min(len / min)
    };
    let (base, extra) = if count == 0 {
        (0, 0)
    } else {
        (len / count, len % count)
    };
    BatchRanges {
        next: 0,
        batch: 0,
        count,
        base,
        extra,
    }
}

/// Iterator returned by [`batch_ranges`]
#[derive(Clone, Debug)]
pub struct BatchRanges {
    next: usize,
    batch: usize,
    count: usize,
    base: usize,
    extra: usize,
}

impl Iterator for BatchRanges {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.batch == self.count {
            return None;
        }
        let size = self.base + usize::from(self.batch < self.extra);
        let range = self.next..self.next + size;
        self.next = range.end;
        self.batch += 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.batch;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchRanges {}

impl FusedIterator for BatchRanges {}
