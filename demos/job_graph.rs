//! Job graph example
//!
//! Demonstrates wiring jobs into a diamond with triggers, deferred arming
//! with a completion flag, and reusing a persistent job across runs.
//!
//! Run with: cargo run --example job_graph

use quantum_jobs::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

fn main() -> Result<()> {
    println!("=== Quantum Jobs - Job Graph Example ===\n");

    let scheduler = Scheduler::with_workers(4)?;
    println!("1. Starting scheduler with {} workers", scheduler.num_workers());
    scheduler.start()?;
    let world = scheduler.world();

    // load -> (left, right) -> merge -> done
    println!("\n2. Wiring a diamond:");
    let input = Arc::new(AtomicU64::new(0));
    let left = Arc::new(AtomicU64::new(0));
    let right = Arc::new(AtomicU64::new(0));
    let merged = Arc::new(AtomicU64::new(0));

    let load = {
        let input = Arc::clone(&input);
        Job::<_, 1>::new(Definition::new().name("load"), move || {
            println!("  load on thread {:?}", thread::current().id());
            input.store(1000, Ordering::SeqCst);
        })
    };
    let sum_left = {
        let (input, left) = (Arc::clone(&input), Arc::clone(&left));
        Job::<_, 1>::new(
            Definition::new().name("sum_left").job_type(JobType::Heavy),
            move || {
                let n = input.load(Ordering::SeqCst);
                left.store((0..n / 2).sum(), Ordering::SeqCst);
                println!("  sum_left on thread {:?}", thread::current().id());
            },
        )
    };
    let sum_right = {
        let (input, right) = (Arc::clone(&input), Arc::clone(&right));
        Job::<_, 1>::new(
            Definition::new().name("sum_right").job_type(JobType::Heavy),
            move || {
                let n = input.load(Ordering::SeqCst);
                right.store((n / 2..n).sum(), Ordering::SeqCst);
                println!("  sum_right on thread {:?}", thread::current().id());
            },
        )
    };
    let merge = {
        let (left, right, merged) = (Arc::clone(&left), Arc::clone(&right), Arc::clone(&merged));
        Job::<_, 1>::new(Definition::new().name("merge"), move || {
            merged.store(
                left.load(Ordering::SeqCst) + right.load(Ordering::SeqCst),
                Ordering::SeqCst,
            );
            println!("  merge on thread {:?}", thread::current().id());
        })
    };

    let loaded = Trigger::<2>::named(world, "loaded");
    loaded.job_will_notify_me(&load);
    loaded.add_job_to_be_trigger(sum_left.clone());
    loaded.add_job_to_be_trigger(sum_right.clone());

    let halves = Trigger::<1>::named(world, "halves");
    halves.job_will_notify_me(&sum_left);
    halves.job_will_notify_me(&sum_right);
    halves.add_job_to_be_trigger(merge.clone());

    let done = Trigger::<0>::named(world, "done");
    done.job_will_notify_me(&merge);

    scheduler.submit(load)?;
    done.join();
    println!("   Sum of 0..1000 = {}", merged.load(Ordering::SeqCst));

    // Producers may finish before the dependents are wired
    println!("\n3. Deferred arming:");
    let gate = Trigger::<1>::named(world, "gate");
    gate.dont_trigger_until_ready();
    let producers: Vec<JobRef> = (0..4)
        .map(|i| -> JobRef {
            let job = Job::<_, 1>::from_fn(move || println!("  producer {} ran", i));
            gate.job_will_notify_me(&job);
            job
        })
        .collect();
    for job in producers {
        scheduler.submit(job)?;
    }
    gate.join();
    println!("   All producers finished, gate fired: {}", gate.has_fired());

    gate.add_job_to_be_trigger(Job::<_, 1>::from_fn(|| println!("  dependent ran")));
    let released = Arc::new(AtomicBool::new(false));
    gate.do_trigger_when_ready(Some(Arc::clone(&released)));
    println!("   Dependents released: {}", released.load(Ordering::Acquire));

    // A persistent job goes back to idle after each run
    println!("\n4. Reusing a persistent job:");
    let runs = Arc::new(AtomicU64::new(0));
    let tick = {
        let runs = Arc::clone(&runs);
        Job::<_, 1>::new(
            Definition::new().name("tick").lifetime(Lifetime::Persistent),
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
            },
        )
    };
    for round in 0..3 {
        let finished = Trigger::<0>::new(world);
        finished.job_will_notify_me(&tick);
        scheduler.submit(tick.clone())?;
        finished.join();
        println!("   Round {}: tick ran {} times", round, runs.load(Ordering::SeqCst));
    }

    println!("\n5. World statistics:");
    let stats = world.stats();
    println!("   Submitted: {}", stats.submitted);
    println!("   Executed: {}", stats.executed);

    println!("\n6. Shutting down scheduler...");
    scheduler.shutdown()?;

    println!("\n=== Example completed successfully! ===");

    Ok(())
}
