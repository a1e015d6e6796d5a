//! Job trait objects and the fixed-capacity job type

use crate::core::trigger::Notify;
use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cell::UnsafeCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

/// Unique job identifier
pub type JobId = u64;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// What happens to a job once it has run and notified its triggers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lifetime {
    /// The body is dropped after completion; the job cannot run again.
    #[default]
    DeleteWhenDone,
    /// The job returns to its owner, who may rewire and resubmit it.
    Persistent,
}

/// Scheduling hint for a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JobType {
    /// Short job; waiting threads prefer these.
    #[default]
    Light,
    /// Long job; workers prefer these by default.
    Heavy,
}

impl JobType {
    /// Number of job types
    pub const COUNT: usize = 2;

    /// Every job type, in declaration order
    pub const ALL: [JobType; Self::COUNT] = [JobType::Light, JobType::Heavy];

    /// Dense index of this type, `0..COUNT`
    pub fn index(self) -> usize {
        match self {
            JobType::Light => 0,
            JobType::Heavy => 1,
        }
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            JobType::Light => "Light",
            JobType::Heavy => "Heavy",
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == 1 {
            JobType::Heavy
        } else {
            JobType::Light
        }
    }
}

impl Lifetime {
    fn from_u8(value: u8) -> Self {
        if value == 1 {
            Lifetime::Persistent
        } else {
            Lifetime::DeleteWhenDone
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Lifetime::DeleteWhenDone => 0,
            Lifetime::Persistent => 1,
        }
    }
}

/// Metadata a job is created with
///
/// # Example
///
/// ```rust
/// use quantum_jobs::core::{Definition, JobType, Lifetime};
///
/// let definition = Definition::new()
///     .lifetime(Lifetime::Persistent)
///     .job_type(JobType::Heavy)
///     .name("physics");
/// assert_eq!(definition.name.as_deref(), Some("physics"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Definition {
    /// Lifetime after completion
    pub lifetime: Lifetime,
    /// Scheduling hint
    pub job_type: JobType,
    /// Optional debug name
    pub name: Option<Cow<'static, str>>,
}

impl Definition {
    /// A `DeleteWhenDone`, `Light`, unnamed definition
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lifetime
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the job type hint
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn job_type(mut self, job_type: JobType) -> Self {
        self.job_type = job_type;
        self
    }

    /// Set the debug name
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Observable state of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Created or returned to its owner; may be wired and submitted.
    Idle,
    /// A registration or metadata update is in progress.
    Wiring,
    /// Sitting in a ready queue.
    Queued,
    /// Claimed by a thread and running.
    Running,
    /// Finished a `DeleteWhenDone` run; the body has been dropped.
    Done,
}

const IDLE: u8 = 0;
const WIRING: u8 = 1;
const QUEUED: u8 = 2;
const RUNNING: u8 = 3;
const DONE: u8 = 4;

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            IDLE => JobState::Idle,
            WIRING => JobState::Wiring,
            QUEUED => JobState::Queued,
            RUNNING => JobState::Running,
            _ => JobState::Done,
        }
    }
}

/// The body of a job.
///
/// `on_run` is invoked once per submission, on whichever thread claimed the
/// job. It should neither block nor panic; a job reports failure through its
/// own captured state.
pub trait Work: Send {
    /// Run the job body
    fn on_run(&mut self);
}

impl<F> Work for F
where
    F: FnMut() + Send,
{
    fn on_run(&mut self) {
        self()
    }
}

/// Adapts a `FnOnce` into a [`Work`]. Runs the closure on the first
/// `on_run`; later runs do nothing.
pub struct OnceWork<F>(Option<F>);

impl<F: FnOnce() + Send> OnceWork<F> {
    /// Wrap `f`
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce() + Send> Work for OnceWork<F> {
    fn on_run(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

/// A job as seen by triggers and the scheduler.
///
/// Implemented by [`Job`]; the scheduler-facing methods drive the job state
/// machine and are not meant to be called by applications.
pub trait Schedulable: Send + Sync {
    /// Unique id
    fn id(&self) -> JobId;

    /// Debug name, if any
    fn name(&self) -> Option<Cow<'static, str>>;

    /// Scheduling hint
    fn job_type(&self) -> JobType;

    /// Lifetime after completion
    fn lifetime(&self) -> Lifetime;

    /// Current state
    fn state(&self) -> JobState;

    /// Registers a trigger to notify after the next run.
    ///
    /// Returns false if the job is not idle (the trigger is not attached).
    fn attach_trigger(&self, trigger: Arc<dyn Notify>) -> bool;

    /// Moves the job from `Idle` to `Queued`. Returns false if it is not idle.
    fn try_enqueue(&self) -> bool;

    /// Runs a queued job to completion and notifies its triggers.
    ///
    /// Returns the panic payload if the body panicked; the triggers are
    /// notified either way.
    fn execute(&self) -> thread::Result<()>;
}

/// Shared handle to any schedulable job
pub type JobRef = Arc<dyn Schedulable>;

impl<S: Schedulable + ?Sized> Schedulable for Arc<S> {
    fn id(&self) -> JobId {
        (**self).id()
    }

    fn name(&self) -> Option<Cow<'static, str>> {
        (**self).name()
    }

    fn job_type(&self) -> JobType {
        (**self).job_type()
    }

    fn lifetime(&self) -> Lifetime {
        (**self).lifetime()
    }

    fn state(&self) -> JobState {
        (**self).state()
    }

    fn attach_trigger(&self, trigger: Arc<dyn Notify>) -> bool {
        (**self).attach_trigger(trigger)
    }

    fn try_enqueue(&self) -> bool {
        (**self).try_enqueue()
    }

    fn execute(&self) -> thread::Result<()> {
        (**self).execute()
    }
}

struct TriggerList<const N: usize> {
    slots: [Option<Arc<dyn Notify>>; N],
    len: usize,
}

impl<const N: usize> Default for TriggerList<N> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            len: 0,
        }
    }
}

impl<const N: usize> TriggerList<N> {
    fn push(&mut self, trigger: Arc<dyn Notify>) -> std::result::Result<(), Arc<dyn Notify>> {
        if self.len == N {
            return Err(trigger);
        }
        self.slots[self.len] = Some(trigger);
        self.len += 1;
        Ok(())
    }
}

/// A job with room for `N` trigger notifications.
///
/// The body `W` is any [`Work`], including closures. Jobs are shared through
/// `Arc` so that triggers can hold them as dependents while their owner keeps
/// a handle.
///
/// # Example
///
/// ```rust
/// use quantum_jobs::core::{Definition, Job, JobState, Schedulable};
///
/// let job = Job::<_, 1>::new(Definition::new().name("hello"), || println!("hello"));
/// assert_eq!(job.state(), JobState::Idle);
/// assert_eq!(job.name().as_deref(), Some("hello"));
/// ```
pub struct Job<W: Work, const N: usize = 1> {
    id: JobId,
    state: AtomicU8,
    lifetime: AtomicU8,
    job_type: AtomicU8,
    name: Mutex<Option<Cow<'static, str>>>,
    triggers: UnsafeCell<TriggerList<N>>,
    work: UnsafeCell<Option<W>>,
}

// Safety: `triggers` and `work` are only touched under WIRING (the wiring
// thread) or RUNNING (the claiming thread); both states are entered through
// an exclusive CAS.
unsafe impl<W: Work, const N: usize> Send for Job<W, N> {}
unsafe impl<W: Work, const N: usize> Sync for Job<W, N> {}

impl<W: Work, const N: usize> Job<W, N> {
    /// Create a job from a definition and a body
    pub fn new(definition: Definition, work: W) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(IDLE),
            lifetime: AtomicU8::new(definition.lifetime.as_u8()),
            job_type: AtomicU8::new(definition.job_type.index() as u8),
            name: Mutex::new(definition.name),
            triggers: UnsafeCell::new(TriggerList::default()),
            work: UnsafeCell::new(Some(work)),
        })
    }

    /// Create a job with the default definition
    pub fn from_fn(work: W) -> Arc<Self> {
        Self::new(Definition::default(), work)
    }

    /// Change the lifetime. Only valid while the job is idle.
    pub fn set_lifetime(&self, lifetime: Lifetime) {
        if self
            .with_wiring(|_| self.lifetime.store(lifetime.as_u8(), Ordering::Relaxed))
            .is_none()
        {
            contract_violation!("set_lifetime on job {} outside its idle state", self.id);
        }
    }

    /// Change the job type hint. Only valid while the job is idle.
    pub fn set_job_type(&self, job_type: JobType) {
        if self
            .with_wiring(|_| self.job_type.store(job_type.index() as u8, Ordering::Relaxed))
            .is_none()
        {
            contract_violation!("set_job_type on job {} outside its idle state", self.id);
        }
    }

    /// Change the debug name. Only valid while the job is idle.
    pub fn set_name(&self, name: impl Into<Cow<'static, str>>) {
        let name = name.into();
        if self
            .with_wiring(|_| *self.name.lock() = Some(name))
            .is_none()
        {
            contract_violation!("set_name on job {} outside its idle state", self.id);
        }
    }

    /// Gives mutable access to the body while the job is idle, e.g. to load
    /// the next closure into a persistent job.
    ///
    /// Returns `None` if the job is queued, running or done.
    pub fn with_work<R>(&self, f: impl FnOnce(&mut W) -> R) -> Option<R> {
        self.with_wiring(|_| {
            // Safety: WIRING is held by this thread only.
            unsafe { (*self.work.get()).as_mut() }.map(f)
        })
        .flatten()
    }

    /// Number of triggers the next run will notify
    pub fn trigger_count(&self) -> usize {
        self.with_wiring(|triggers| triggers.len).unwrap_or(0)
    }

    /// Maximum number of triggers
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Runs `f` with exclusive access to the trigger list while the job is
    /// idle. Returns `None` if the job is queued, running or done.
    fn with_wiring<R>(&self, f: impl FnOnce(&mut TriggerList<N>) -> R) -> Option<R> {
        let backoff = Backoff::new();
        loop {
            match self.state.compare_exchange_weak(
                IDLE,
                WIRING,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(IDLE) | Err(WIRING) => backoff.snooze(),
                Err(_) => return None,
            }
        }
        // Safety: WIRING is held by this thread only.
        let result = f(unsafe { &mut *self.triggers.get() });
        self.state.store(IDLE, Ordering::Release);
        Some(result)
    }
}

impl<W: Work, const N: usize> Schedulable for Job<W, N> {
    fn id(&self) -> JobId {
        self.id
    }

    fn name(&self) -> Option<Cow<'static, str>> {
        self.name.lock().clone()
    }

    fn job_type(&self) -> JobType {
        JobType::from_u8(self.job_type.load(Ordering::Relaxed))
    }

    fn lifetime(&self) -> Lifetime {
        Lifetime::from_u8(self.lifetime.load(Ordering::Relaxed))
    }

    fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn attach_trigger(&self, trigger: Arc<dyn Notify>) -> bool {
        match self.with_wiring(|triggers| triggers.push(trigger)) {
            Some(Ok(())) => true,
            Some(Err(_)) => panic!(
                "job {} cannot notify more than {} triggers",
                self.id, N
            ),
            None => {
                contract_violation!("trigger attached to job {} outside its idle state", self.id);
                false
            }
        }
    }

    fn try_enqueue(&self) -> bool {
        let backoff = Backoff::new();
        loop {
            match self.state.compare_exchange_weak(
                IDLE,
                QUEUED,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(IDLE) | Err(WIRING) => backoff.snooze(),
                Err(_) => return false,
            }
        }
    }

    fn execute(&self) -> thread::Result<()> {
        if self
            .state
            .compare_exchange(QUEUED, RUNNING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            contract_violation!("job {} executed without being queued", self.id);
            return Ok(());
        }

        // Safety: RUNNING gives this thread exclusive access to `work` and
        // `triggers` until the state is released below.
        let outcome = match unsafe { &mut *self.work.get() } {
            Some(work) => panic::catch_unwind(AssertUnwindSafe(|| work.on_run())),
            None => Ok(()),
        };
        let triggers = std::mem::take(unsafe { &mut *self.triggers.get() });

        let finished = match self.lifetime() {
            Lifetime::DeleteWhenDone => {
                let body = unsafe { (*self.work.get()).take() };
                self.state.store(DONE, Ordering::Release);
                body
            }
            Lifetime::Persistent => {
                self.state.store(IDLE, Ordering::Release);
                None
            }
        };

        for trigger in triggers.slots.into_iter().flatten() {
            trigger.on_notify();
        }
        drop(finished);

        outcome
    }
}

impl<W: Work, const N: usize> fmt::Debug for Job<W, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .field("job_type", &self.job_type())
            .field("lifetime", &self.lifetime())
            .finish()
    }
}

impl fmt::Debug for dyn Schedulable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Job({}, #{})", name, self.id()),
            None => write!(f, "Job(#{})", self.id()),
        }
    }
}
