//! Channel example
//!
//! Demonstrates fire-and-forget submission through a channel, batched loops
//! with `foreach_log`, and reusing one channel across several joins.
//!
//! Run with: cargo run --example channel_foreach

use quantum_jobs::channel::batch_ranges;
use quantum_jobs::prelude::*;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn main() -> Result<()> {
    println!("=== Quantum Jobs - Channel Example ===\n");

    let config = SchedulerConfig::new(4).with_channel_job_capacity(64);
    let scheduler = Scheduler::with_config(config)?;
    println!("1. Starting scheduler with {} workers", scheduler.num_workers());
    scheduler.start()?;

    let channel = scheduler.channel("demo")?;
    println!("   Channel '{}' holds {} pooled jobs", channel.name(), channel.available_jobs());

    println!("\n2. Submitting fire-and-forget jobs:");
    let hits = Arc::new(AtomicUsize::new(0));
    for i in 0..8 {
        let hits = Arc::clone(&hits);
        channel.submit_job(move || {
            println!("  Job {} executing on thread {:?}", i, thread::current().id());
            hits.fetch_add(1, Ordering::Relaxed);
        });
    }
    channel.join();
    println!("   {} jobs ran", hits.load(Ordering::Relaxed));

    println!("\n3. Batched loop over 10,000 elements:");
    let data: Arc<[u64]> = (1..=10_000).collect();
    for range in batch_ranges(data.len(), 8, 500) {
        println!("  batch {:>5}..{:<5}", range.start, range.end);
    }
    let total = Arc::new(AtomicU64::new(0));
    let sink = Arc::clone(&total);
    channel.foreach_log(Arc::clone(&data), 8, 500, move |batch| {
        let sum: u64 = batch.iter().sum();
        sink.fetch_add(sum, Ordering::Relaxed);
    });
    channel.join();
    println!("   Sum = {}", total.load(Ordering::Relaxed));

    println!("\n4. Heavy jobs on the same channel:");
    for i in 0..4 {
        channel.submit_typed(JobType::Heavy, move || {
            let n: u64 = (0..100_000u64).map(|x| x % 7).sum();
            println!("  Heavy job {} computed {}", i, n);
        });
    }
    channel.join();

    println!("\n5. Channel statistics:");
    println!("   Submitted: {}", channel.submitted());
    println!("   Pending: {}", channel.pending());
    println!("   Spilled to the heap: {}", channel.spilled());
    println!("   Pooled jobs free: {}", channel.available_jobs());

    println!("\n6. Per-worker statistics:");
    for (i, stat) in scheduler.get_stats().iter().enumerate() {
        println!(
            "   Worker {}: {} processed, avg time: {:.2}μs",
            i,
            stat.get_jobs_processed(),
            stat.get_average_processing_time_us()
        );
    }

    println!("\n7. Shutting down scheduler...");
    scheduler.shutdown()?;

    println!("\n=== Example completed successfully! ===");

    Ok(())
}
