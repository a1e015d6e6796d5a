//! Fan-in / fan-out synchronization barrier

use crate::core::job::{JobRef, Schedulable};
use crate::scheduler::QuantumWorld;
use crossbeam_utils::{Backoff, CachePadded};
use std::borrow::Cow;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Receiver of job completion notifications.
///
/// A completing job calls [`on_notify`](Notify::on_notify) once for every
/// registration made against it. Waiters poll
/// [`is_triggered`](Notify::is_triggered) while helping the scheduler.
pub trait Notify: Send + Sync {
    /// One registered producer has completed
    fn on_notify(&self);

    /// Whether every registered producer has completed
    fn is_triggered(&self) -> bool;
}

struct FanOut<const N: usize> {
    jobs: [Option<JobRef>; N],
    len: usize,
    completions: Vec<Arc<AtomicBool>>,
}

impl<const N: usize> Default for FanOut<N> {
    fn default() -> Self {
        Self {
            jobs: std::array::from_fn(|_| None),
            len: 0,
            completions: Vec::new(),
        }
    }
}

/// An N-ary barrier: waits for every producer registered through
/// [`job_will_notify_me`](Trigger::job_will_notify_me), then releases up to `N`
/// dependent jobs into the world.
///
/// A trigger is armed on creation. To wire producers that may already be
/// running, disarm it with [`dont_trigger_until_ready`](Trigger::dont_trigger_until_ready)
/// first and arm it with [`do_trigger_when_ready`](Trigger::do_trigger_when_ready)
/// once wiring is complete; reaching zero while disarmed does not fire.
///
/// Firing happens exactly once per trigger. Dependents are submitted in
/// registration order; the order in which they then execute is unspecified.
/// A trigger counts as fired once the last dependent has been submitted.
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
/// let total = Arc::new(AtomicUsize::new(0));
///
/// let trigger = Trigger::<1>::new(&world);
/// trigger.dont_trigger_until_ready();
///
/// let mut producers = Vec::new();
/// for _ in 0..3 {
///     let total = Arc::clone(&total);
///     let job = Job::<_, 1>::from_fn(move || {
///         total.fetch_add(1, Ordering::SeqCst);
///     });
///     trigger.job_will_notify_me(&job);
///     producers.push(job);
/// }
///
/// let summary = Job::<_, 1>::from_fn(|| println!("all producers done"));
/// trigger.add_job_to_be_trigger(summary);
/// trigger.do_trigger_when_ready(None);
///
/// for job in producers {
///     world.add_job_to_quantum_world(job);
/// }
/// trigger.join();
/// assert_eq!(total.load(Ordering::SeqCst), 3);
/// # Ok(())
/// # }
/// ```
pub struct Trigger<const N: usize> {
    world: Arc<QuantumWorld>,
    name: Option<Cow<'static, str>>,
    pending: CachePadded<AtomicUsize>,
    armed: AtomicBool,
    fired: AtomicBool,
    released: AtomicBool,
    wiring: AtomicBool,
    fan_out: UnsafeCell<FanOut<N>>,
}

// Safety: `fan_out` is only accessed while holding the `wiring` flag.
unsafe impl<const N: usize> Send for Trigger<N> {}
unsafe impl<const N: usize> Sync for Trigger<N> {}

impl<const N: usize> Trigger<N> {
    /// Create an armed trigger releasing its dependents into `world`
    pub fn new(world: &Arc<QuantumWorld>) -> Arc<Self> {
        Self::build(world, None)
    }

    /// Create an armed trigger with a debug name
    pub fn named(world: &Arc<QuantumWorld>, name: impl Into<Cow<'static, str>>) -> Arc<Self> {
        Self::build(world, Some(name.into()))
    }

    fn build(world: &Arc<QuantumWorld>, name: Option<Cow<'static, str>>) -> Arc<Self> {
        Arc::new(Self {
            world: Arc::clone(world),
            name,
            pending: CachePadded::new(AtomicUsize::new(0)),
            armed: AtomicBool::new(true),
            fired: AtomicBool::new(false),
            released: AtomicBool::new(false),
            wiring: AtomicBool::new(false),
            fan_out: UnsafeCell::new(FanOut::default()),
        })
    }

    /// Registers `job` as a producer: one more notification is expected, and
    /// `job` will deliver it after its next run.
    ///
    /// The job must be idle.
    pub fn job_will_notify_me<J: Schedulable + ?Sized>(self: &Arc<Self>, job: &J) {
        if self.fired.load(Ordering::Acquire) {
            contract_violation!(
                "{} gained a producer after it fired",
                self.display_name()
            );
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        let notify: Arc<dyn Notify> = Arc::clone(self) as Arc<dyn Notify>;
        if !job.attach_trigger(notify) {
            // Not attached, so nobody will deliver this notification.
            self.on_notify();
        }
    }

    /// Appends `job` to the dependents released when this trigger fires.
    ///
    /// # Panics
    ///
    /// Panics if more than `N` dependents are added.
    pub fn add_job_to_be_trigger(&self, job: JobRef) {
        let guard = self.lock_fan_out();
        if self.fired.load(Ordering::Acquire) {
            drop(guard);
            // Released right away so the job is not lost.
            self.world.add_job_to_quantum_world(job);
            contract_violation!(
                "{} gained a dependent after it fired",
                self.display_name()
            );
            return;
        }
        // Safety: the wiring flag is held.
        let fan_out = unsafe { &mut *self.fan_out.get() };
        if fan_out.len == N {
            drop(guard);
            panic!(
                "{} cannot release more than {} jobs",
                self.display_name(),
                N
            );
        }
        fan_out.jobs[fan_out.len] = Some(job);
        fan_out.len += 1;
    }

    /// Disarms the trigger: reaching zero pending notifications does not fire
    /// it until [`do_trigger_when_ready`](Self::do_trigger_when_ready).
    pub fn dont_trigger_until_ready(&self) {
        if self.fired.load(Ordering::Acquire) {
            contract_violation!("{} disarmed after it fired", self.display_name());
        }
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Arms the trigger. Fires immediately if nothing is pending; otherwise
    /// the notification that brings the count to zero fires it.
    ///
    /// `completion`, if given, is set once every dependent has been
    /// submitted; right away if that already happened.
    pub fn do_trigger_when_ready(&self, completion: Option<Arc<AtomicBool>>) {
        if let Some(flag) = completion {
            let _guard = self.lock_fan_out();
            if self.released.load(Ordering::Acquire) {
                flag.store(true, Ordering::Release);
            } else {
                // Safety: the wiring flag is held.
                unsafe { &mut *self.fan_out.get() }.completions.push(flag);
            }
        }
        self.armed.store(true, Ordering::SeqCst);
        if self.pending.load(Ordering::SeqCst) == 0 {
            self.fire();
        }
    }

    /// Whether the pending count is zero, regardless of the armed state
    pub fn is_triggered(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    /// Whether every dependent has been submitted
    pub fn has_fired(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Number of notifications still expected
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether reaching zero fires the trigger
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Debug name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Maximum number of dependents
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Helps the world run jobs until every producer has notified
    pub fn join(&self) {
        self.world.process_while_wait(self);
    }

    fn fire(&self) {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let fan_out = {
            let _guard = self.lock_fan_out();
            // Safety: the wiring flag is held.
            std::mem::take(unsafe { &mut *self.fan_out.get() })
        };

        log::debug!(
            "{} fired, releasing {} jobs",
            self.display_name(),
            fan_out.len
        );
        #[cfg(feature = "tracing")]
        crate::tracing::metrics::record_trigger_fired(fan_out.len);

        for job in fan_out.jobs.into_iter().flatten() {
            self.world.add_job_to_quantum_world(job);
        }

        // Flags registered while the dependents were being submitted.
        let late = {
            let _guard = self.lock_fan_out();
            self.released.store(true, Ordering::Release);
            // Safety: the wiring flag is held.
            std::mem::take(&mut unsafe { &mut *self.fan_out.get() }.completions)
        };
        for flag in fan_out.completions.into_iter().chain(late) {
            flag.store(true, Ordering::Release);
        }
    }

    fn lock_fan_out(&self) -> WiringGuard<'_> {
        let backoff = Backoff::new();
        while self
            .wiring
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
        WiringGuard(&self.wiring)
    }

    fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("trigger '{}'", name),
            None => format!("trigger@{:p}", self),
        }
    }
}

impl<const N: usize> Notify for Trigger<N> {
    fn on_notify(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::SeqCst);
        if previous == 0 {
            self.pending.fetch_add(1, Ordering::SeqCst);
            contract_violation!(
                "{} notified more times than registered",
                self.display_name()
            );
            return;
        }
        if previous == 1 && self.armed.load(Ordering::SeqCst) {
            self.fire();
        }
    }

    fn is_triggered(&self) -> bool {
        Trigger::is_triggered(self)
    }
}

impl<const N: usize> fmt::Debug for Trigger<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.name)
            .field("capacity", &N)
            .field("pending", &self.pending())
            .field("armed", &self.is_armed())
            .field("fired", &self.has_fired())
            .finish()
    }
}

struct WiringGuard<'a>(&'a AtomicBool);

impl Drop for WiringGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Definition, Job, JobState, Lifetime};
    use crate::scheduler::SchedulerConfig;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::thread;

    fn world() -> Arc<QuantumWorld> {
        QuantumWorld::new(&SchedulerConfig::default()).expect("world")
    }

    fn noop() -> JobRef {
        Job::<_, 1>::from_fn(|| {})
    }

    fn run_one(world: &QuantumWorld) {
        let job = world.get_job().expect("a ready job");
        world.process_work_primitive(job);
    }

    #[test]
    fn test_fan_in_fires_after_last_notification() {
        let world = world();
        let trigger = Trigger::<1>::new(&world);
        let producers: Vec<_> = (0..3).map(|_| noop()).collect();
        for job in &producers {
            trigger.job_will_notify_me(job);
        }
        let dependent = noop();
        trigger.add_job_to_be_trigger(dependent.clone());
        assert_eq!(trigger.pending(), 3);

        for job in producers {
            world.add_job_to_quantum_world(job);
        }
        run_one(&world);
        run_one(&world);
        assert!(!trigger.is_triggered());
        assert!(!trigger.has_fired());
        assert_eq!(dependent.state(), JobState::Idle);

        run_one(&world);
        assert!(trigger.is_triggered());
        assert!(trigger.has_fired());
        assert_eq!(dependent.state(), JobState::Queued);
        assert_eq!(world.pending_jobs(), 1);
    }

    #[test]
    fn test_disarmed_trigger_waits_for_ready() {
        let world = world();
        let trigger = Trigger::<1>::new(&world);
        trigger.dont_trigger_until_ready();

        let producer = noop();
        trigger.job_will_notify_me(&producer);
        let dependent = noop();
        trigger.add_job_to_be_trigger(dependent.clone());

        world.add_job_to_quantum_world(producer);
        run_one(&world);

        // Count reached zero, but nothing fires while disarmed.
        assert!(trigger.is_triggered());
        assert!(!trigger.has_fired());
        assert_eq!(world.pending_jobs(), 0);

        let done = Arc::new(AtomicBool::new(false));
        trigger.do_trigger_when_ready(Some(Arc::clone(&done)));
        assert!(trigger.has_fired());
        assert!(done.load(Ordering::Acquire));
        assert_eq!(dependent.state(), JobState::Queued);
    }

    #[test]
    fn test_ready_with_nothing_pending_fires_immediately() {
        let world = world();
        let trigger = Trigger::<2>::named(&world, "empty");
        trigger.dont_trigger_until_ready();
        trigger.add_job_to_be_trigger(noop());
        trigger.add_job_to_be_trigger(noop());

        trigger.do_trigger_when_ready(None);
        assert!(trigger.has_fired());
        assert_eq!(world.pending_jobs(), 2);
    }

    #[test]
    fn test_completion_flag_set_on_fire() {
        let world = world();
        let trigger = Trigger::<0>::new(&world);
        trigger.dont_trigger_until_ready();
        let producer = noop();
        trigger.job_will_notify_me(&producer);

        let done = Arc::new(AtomicBool::new(false));
        trigger.do_trigger_when_ready(Some(Arc::clone(&done)));
        assert!(!done.load(Ordering::Acquire));

        world.add_job_to_quantum_world(producer);
        run_one(&world);
        assert!(done.load(Ordering::Acquire));
    }

    #[test]
    fn test_persistent_producer_rewired() {
        let world = world();
        let job = Job::<_, 1>::new(Definition::new().lifetime(Lifetime::Persistent), || {});

        for _ in 0..2 {
            let trigger = Trigger::<0>::new(&world);
            trigger.job_will_notify_me(&job);
            world.add_job_to_quantum_world(job.clone());
            trigger.join();
            assert!(trigger.has_fired());
        }
    }

    #[test]
    #[should_panic(expected = "cannot release more than 1 jobs")]
    fn test_fan_out_capacity_exceeded_panics() {
        let world = world();
        let trigger = Trigger::<1>::new(&world);
        trigger.add_job_to_be_trigger(noop());
        trigger.add_job_to_be_trigger(noop());
    }

    #[test]
    fn test_join_helps_until_triggered() {
        let world = world();
        let trigger = Trigger::<0>::new(&world);
        let jobs: Vec<_> = (0..8).map(|_| noop()).collect();
        for job in &jobs {
            trigger.job_will_notify_me(job);
        }
        for job in jobs {
            world.add_job_to_quantum_world(job);
        }
        trigger.join();
        assert!(trigger.is_triggered());
        assert_eq!(world.pending_jobs(), 0);
    }

    #[test]
    fn test_ready_after_fire_sets_flag_immediately() {
        let world = world();
        let trigger = Trigger::<1>::new(&world);
        trigger.add_job_to_be_trigger(noop());
        trigger.do_trigger_when_ready(None);
        assert!(trigger.has_fired());
        assert_eq!(world.pending_jobs(), 1);

        let done = Arc::new(AtomicBool::new(false));
        trigger.do_trigger_when_ready(Some(Arc::clone(&done)));
        assert!(done.load(Ordering::Acquire));
        // Nothing is released twice.
        assert_eq!(world.pending_jobs(), 1);
    }

    #[test]
    fn test_dependent_added_after_fire_is_submitted() {
        let world = world();
        let trigger = Trigger::<1>::named(&world, "late");
        trigger.do_trigger_when_ready(None);
        assert!(trigger.has_fired());

        let late = noop();
        let result = catch_unwind(AssertUnwindSafe(|| {
            trigger.add_job_to_be_trigger(late.clone());
        }));
        assert_eq!(result.is_err(), cfg!(debug_assertions));
        assert_eq!(late.state(), JobState::Queued);
        assert_eq!(world.pending_jobs(), 1);
    }

    #[test]
    fn test_arming_races_last_notification() {
        for _ in 0..100 {
            let world = world();
            let trigger = Trigger::<4>::new(&world);
            trigger.dont_trigger_until_ready();
            let producer = noop();
            trigger.job_will_notify_me(&producer);
            for _ in 0..4 {
                trigger.add_job_to_be_trigger(noop());
            }
            world.add_job_to_quantum_world(producer);
            let job = world.get_job().expect("producer");

            let runner = {
                let world = Arc::clone(&world);
                thread::spawn(move || world.process_work_primitive(job))
            };
            let done = Arc::new(AtomicBool::new(false));
            trigger.do_trigger_when_ready(Some(Arc::clone(&done)));
            runner.join().expect("runner");

            assert!(trigger.has_fired());
            assert!(done.load(Ordering::Acquire));
            assert_eq!(world.pending_jobs(), 4);
        }
    }

    #[test]
    fn test_completion_flag_waits_for_every_release() {
        const WIDTH: usize = 512;

        for _ in 0..20 {
            let world = world();
            let trigger = Trigger::<WIDTH>::new(&world);
            let producer = noop();
            trigger.job_will_notify_me(&producer);
            for _ in 0..WIDTH {
                trigger.add_job_to_be_trigger(noop());
            }
            world.add_job_to_quantum_world(producer);
            let job = world.get_job().expect("producer");

            let runner = {
                let world = Arc::clone(&world);
                thread::spawn(move || world.process_work_primitive(job))
            };

            // Flags registered while the fan-out is being submitted must
            // not be set early.
            let mut flags = Vec::new();
            loop {
                let done = Arc::new(AtomicBool::new(false));
                trigger.do_trigger_when_ready(Some(Arc::clone(&done)));
                let set = done.load(Ordering::Acquire);
                flags.push(done);
                if set {
                    assert_eq!(world.pending_jobs(), WIDTH);
                    break;
                }
            }
            runner.join().expect("runner");
            assert!(flags.iter().all(|flag| flag.load(Ordering::Acquire)));
        }
    }
}
