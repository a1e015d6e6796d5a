//! # Quantum Jobs
//!
//! A lock-free job system: fixed-capacity object pools, jobs wired into
//! dependency graphs through fan-in/fan-out triggers, and a worker pool that
//! runs whatever becomes ready.
//!
//! ## Features
//!
//! - **Pools**: [`Pool`](alloc::Pool) and [`JitcPool`](alloc::JitcPool),
//!   lock-free and allocation-free after `init`
//! - **Jobs**: [`Job`](core::Job) bodies with a lifetime policy and a
//!   light/heavy scheduling hint
//! - **Triggers**: [`Trigger`](core::Trigger) waits for N producers, then
//!   releases up to M dependents exactly once
//! - **Scheduler**: worker threads plus cooperative help from waiting threads
//! - **Channels**: [`Channel`](channel::Channel) for fire-and-forget jobs
//!   and batched loops with a single join point
//!
//! ## Quick Start
//!
//! ```rust
//! use quantum_jobs::prelude::*;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let scheduler = Scheduler::with_workers(4)?;
//! scheduler.start()?;
//! let world = scheduler.world();
//!
//! // Two producers feeding one consumer
//! let sum = Arc::new(AtomicUsize::new(0));
//! let trigger = Trigger::<1>::new(world);
//! let producers: Vec<_> = (1..=2)
//!     .map(|n| {
//!         let sum = Arc::clone(&sum);
//!         let job = Job::<_, 1>::from_fn(move || {
//!             sum.fetch_add(n, Ordering::SeqCst);
//!         });
//!         trigger.job_will_notify_me(&job);
//!         job
//!     })
//!     .collect();
//!
//! let done = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&done);
//! let reader = Arc::clone(&sum);
//! trigger.add_job_to_be_trigger(Job::<_, 1>::from_fn(move || {
//!     seen.store(reader.load(Ordering::SeqCst), Ordering::SeqCst);
//! }));
//!
//! for job in producers {
//!     scheduler.submit(job)?;
//! }
//!
//! scheduler.shutdown()?;
//! assert_eq!(done.load(Ordering::SeqCst), 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Worker Statistics
//!
//! ```rust
//! use quantum_jobs::prelude::*;
//!
//! # fn main() -> Result<()> {
//! # let scheduler = Scheduler::with_workers(2)?;
//! # scheduler.start()?;
//! # for _ in 0..10 {
//! #     scheduler.execute(|| {})?;
//! # }
//! # std::thread::sleep(std::time::Duration::from_millis(100));
//! for (i, stat) in scheduler.get_stats().iter().enumerate() {
//!     println!("Worker {}: {} jobs processed", i, stat.get_jobs_processed());
//! }
//!
//! let stats = scheduler.world().stats();
//! println!("{} submitted, {} executed", stats.submitted, stats.executed);
//! # scheduler.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Reports a broken API contract: logged as an error, and a panic in debug
/// builds.
macro_rules! contract_violation {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        debug_assert!(false, $($arg)*);
    }};
}

pub mod alloc;
pub mod channel;
pub mod core;
pub mod prelude;
pub mod queue;
pub mod scheduler;
pub mod tracing;

pub use crate::core::{QuantumError, Result};
pub use channel::Channel;
pub use scheduler::{QuantumWorld, Scheduler, SchedulerConfig};
