//! Convenient re-exports for common types and traits

pub use crate::alloc::{JitcPool, Pool};
pub use crate::channel::Channel;
pub use crate::core::{
    Definition, Job, JobRef, JobType, Lifetime, Notify, OnceWork, QuantumError, Result,
    Schedulable, Trigger, Work,
};
pub use crate::queue::BoundedStack;
pub use crate::scheduler::{QuantumWorld, Scheduler, SchedulerConfig};
