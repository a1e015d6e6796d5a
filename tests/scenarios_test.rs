//! End-to-end scenarios for pools, triggers, channels and the bounded stack

use quantum_jobs::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_pool_capacity_exhaustion_and_reuse() {
    init_logging();
    let pool: Pool<u32> = Pool::init(16).expect("Failed to create pool");

    let mut held = Vec::new();
    for _ in 0..16 {
        held.push(pool.pop().expect("pool should not be exhausted yet"));
    }
    assert!(pool.pop().is_none());

    let slot = held.pop().unwrap();
    pool.push(slot);
    assert!(pool.pop().is_some());
}

#[test]
fn test_four_producers_release_two_dependents() {
    init_logging();
    let world = QuantumWorld::new(&SchedulerConfig::new(1)).expect("Failed to create world");
    let trigger = Trigger::<2>::new(&world);
    trigger.dont_trigger_until_ready();

    let producers: Vec<JobRef> = (0..4).map(|_| -> JobRef { Job::<_, 1>::from_fn(|| {}) }).collect();
    for job in &producers {
        trigger.job_will_notify_me(job);
    }

    let released = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let released = Arc::clone(&released);
        trigger.add_job_to_be_trigger(Job::<_, 1>::from_fn(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }));
    }
    trigger.do_trigger_when_ready(None);

    let mut became_triggered = 0;
    for job in producers {
        let before = trigger.is_triggered();
        world.add_job_to_quantum_world(job);
        let job = world.get_job_for_helper().expect("producer is ready");
        world.process_work_primitive(job);
        if !before && trigger.is_triggered() {
            became_triggered += 1;
        }
    }
    assert_eq!(became_triggered, 1);
    assert!(trigger.has_fired());

    // Exactly the two dependents were submitted.
    assert_eq!(world.pending_jobs(), 2);
    assert_eq!(world.run_pending(), 2);
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(world.stats().submitted, 6);
}

#[test]
fn test_channel_sixteen_jobs_with_workers() {
    init_logging();
    let scheduler = Scheduler::with_workers(4).expect("Failed to create scheduler");
    scheduler.start().expect("Failed to start scheduler");

    let counter = Arc::new(AtomicUsize::new(0));
    let channel = scheduler.channel("scenario").expect("Failed to create channel");
    for _ in 0..16 {
        let counter = Arc::clone(&counter);
        channel.submit_job(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    channel.join();
    assert_eq!(counter.load(Ordering::SeqCst), 16);

    scheduler.shutdown().expect("Failed to shutdown scheduler");
}

#[test]
fn test_bounded_stack_is_lifo() {
    let stack = BoundedStack::with_capacity(8).expect("Failed to create stack");
    stack.push(44).unwrap();
    stack.push(45).unwrap();
    assert_eq!(stack.pop(), Some(45));
    assert_eq!(stack.pop(), Some(44));
    assert_eq!(stack.pop(), None);
}

#[test]
fn test_jitc_pool_teardown_drops_leaked_values() {
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    {
        let pool = JitcPool::init(8).expect("Failed to create pool");
        for _ in 0..3 {
            let slot = pool.alloc(Tracked(Arc::clone(&drops))).ok().unwrap();
            std::mem::forget(slot);
        }
        let returned = pool.alloc(Tracked(Arc::clone(&drops))).ok().unwrap();
        pool.push(returned);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 4);
}

#[test]
fn test_persistent_job_reused_across_frames() {
    init_logging();
    let scheduler = Scheduler::with_workers(2).expect("Failed to create scheduler");
    scheduler.start().expect("Failed to start scheduler");
    let world = scheduler.world();

    let frames = Arc::new(AtomicUsize::new(0));
    let frames_clone = Arc::clone(&frames);
    let job = Job::<_, 1>::new(
        Definition::new()
            .lifetime(Lifetime::Persistent)
            .job_type(JobType::Heavy)
            .name("frame"),
        move || {
            frames_clone.fetch_add(1, Ordering::SeqCst);
        },
    );

    for frame in 1..=5 {
        let trigger = Trigger::<0>::new(world);
        trigger.job_will_notify_me(&job);
        scheduler.submit(job.clone()).unwrap();
        trigger.join();
        assert_eq!(frames.load(Ordering::SeqCst), frame);
    }

    scheduler.shutdown().unwrap();
}

#[test]
fn test_completion_flag_observed_after_release() {
    let world = QuantumWorld::new(&SchedulerConfig::new(1)).unwrap();
    let trigger = Trigger::<1>::named(&world, "flagged");
    trigger.dont_trigger_until_ready();
    let producer = Job::<_, 1>::from_fn(|| {});
    trigger.job_will_notify_me(&producer);
    trigger.add_job_to_be_trigger(Job::<_, 1>::from_fn(|| {}));

    let done = Arc::new(AtomicBool::new(false));
    trigger.do_trigger_when_ready(Some(Arc::clone(&done)));
    world.add_job_to_quantum_world(producer);
    trigger.join();

    assert!(done.load(Ordering::Acquire));
    assert_eq!(world.pending_jobs(), 1);
    world.run_pending();
}
