//! Dependency graphs executed by worker threads

use parking_lot::Mutex;
use quantum_jobs::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn started(workers: usize) -> Scheduler {
    init_logging();
    let config = SchedulerConfig::new(workers).with_poll_interval(Duration::from_millis(5));
    let scheduler = Scheduler::with_config(config).expect("Failed to create scheduler");
    scheduler.start().expect("Failed to start scheduler");
    scheduler
}

fn recording(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> JobRef {
    let log = Arc::clone(log);
    Job::<_, 1>::new(Definition::new().name(name), move || log.lock().push(name))
}

#[test]
fn test_diamond_runs_in_dependency_order() {
    let scheduler = started(4);
    let world = scheduler.world();
    let log = Arc::new(Mutex::new(Vec::new()));

    //     a
    //    / \
    //   b   c
    //    \ /
    //     d
    let a = recording(&log, "a");
    let b = recording(&log, "b");
    let c = recording(&log, "c");
    let d = recording(&log, "d");

    let after_a = Trigger::<2>::new(world);
    after_a.job_will_notify_me(&a);
    after_a.add_job_to_be_trigger(b.clone());
    after_a.add_job_to_be_trigger(c.clone());

    let after_bc = Trigger::<1>::new(world);
    after_bc.job_will_notify_me(&b);
    after_bc.job_will_notify_me(&c);
    after_bc.add_job_to_be_trigger(d.clone());

    let after_d = Trigger::<0>::new(world);
    after_d.job_will_notify_me(&d);

    scheduler.submit(a).unwrap();
    after_d.join();

    let order = log.lock().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], "a");
    assert_eq!(order[3], "d");
    assert!(order[1..3].contains(&"b") && order[1..3].contains(&"c"));

    scheduler.shutdown().unwrap();
}

#[test]
fn test_producers_running_while_dependents_are_wired() {
    let scheduler = started(4);
    let world = scheduler.world();

    for _ in 0..50 {
        let trigger = Trigger::<4>::new(world);
        trigger.dont_trigger_until_ready();

        let work_done = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let work_done = Arc::clone(&work_done);
            let job = Job::<_, 1>::from_fn(move || {
                work_done.fetch_add(1, Ordering::SeqCst);
            });
            trigger.job_will_notify_me(&job);
            // Producers may finish before the fan-out is complete.
            scheduler.submit(job).unwrap();
        }

        let dependents_ran = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(AtomicUsize::new(0));
        let gate = Trigger::<0>::new(world);
        for _ in 0..4 {
            let dependents_ran = Arc::clone(&dependents_ran);
            let observed = Arc::clone(&observed);
            let work_done = Arc::clone(&work_done);
            let dependent = Job::<_, 1>::from_fn(move || {
                observed.fetch_add(work_done.load(Ordering::SeqCst), Ordering::SeqCst);
                dependents_ran.fetch_add(1, Ordering::SeqCst);
            });
            gate.job_will_notify_me(&dependent);
            trigger.add_job_to_be_trigger(dependent);
        }
        assert!(!trigger.has_fired());

        trigger.do_trigger_when_ready(None);
        gate.join();

        assert!(trigger.has_fired());
        assert_eq!(dependents_ran.load(Ordering::SeqCst), 4);
        // Every dependent saw all eight producers finished.
        assert_eq!(observed.load(Ordering::SeqCst), 4 * 8);
    }

    scheduler.shutdown().unwrap();
}

#[test]
fn test_wide_fan_in_from_many_threads() {
    let scheduler = started(4);
    let world = Arc::clone(scheduler.world());
    let trigger = Trigger::<1>::new(&world);
    trigger.dont_trigger_until_ready();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    trigger.add_job_to_be_trigger(Job::<_, 1>::from_fn(move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    }));

    // Wire producers from several threads at once.
    let wiring: Vec<_> = (0..4)
        .map(|_| {
            let trigger = Arc::clone(&trigger);
            thread::spawn(move || {
                (0..64)
                    .map(|_| {
                        let job: JobRef = Job::<_, 1>::from_fn(|| {});
                        trigger.job_will_notify_me(&job);
                        job
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let producers: Vec<JobRef> = wiring
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(trigger.pending(), 256);

    trigger.do_trigger_when_ready(None);
    for job in producers {
        scheduler.submit(job).unwrap();
    }
    trigger.join();

    scheduler.shutdown().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_chain_of_heavy_and_light_jobs() {
    let scheduler = started(2);
    let world = scheduler.world();
    let steps = Arc::new(Mutex::new(Vec::new()));

    let jobs: Vec<_> = (0..10)
        .map(|i| {
            let steps = Arc::clone(&steps);
            let job_type = if i % 2 == 0 { JobType::Heavy } else { JobType::Light };
            Job::<_, 1>::new(Definition::new().job_type(job_type), move || {
                steps.lock().push(i)
            })
        })
        .collect();

    let mut triggers = Vec::new();
    for pair in jobs.windows(2) {
        let trigger = Trigger::<1>::new(world);
        trigger.job_will_notify_me(&pair[0]);
        trigger.add_job_to_be_trigger(pair[1].clone());
        triggers.push(trigger);
    }
    let last = Trigger::<0>::new(world);
    last.job_will_notify_me(&jobs[9]);

    scheduler.submit(jobs[0].clone()).unwrap();
    last.join();

    assert_eq!(*steps.lock(), (0..10).collect::<Vec<_>>());
    scheduler.shutdown().unwrap();
}

#[test]
fn test_panicking_producer_still_releases_dependents() {
    let scheduler = started(2);
    let world = scheduler.world();

    let trigger = Trigger::<1>::new(world);
    let producer = Job::<_, 1>::from_fn(|| panic!("Intentional panic for testing"));
    trigger.job_will_notify_me(&producer);

    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = Arc::clone(&ran);
    let dependent = Job::<_, 1>::from_fn(move || {
        ran_clone.fetch_add(1, Ordering::SeqCst);
    });
    let done = Trigger::<0>::new(world);
    done.job_will_notify_me(&dependent);
    trigger.add_job_to_be_trigger(dependent);

    scheduler.submit(producer).unwrap();
    done.join();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    scheduler.shutdown().unwrap();
    assert_eq!(world.stats().panicked, 1);
}
