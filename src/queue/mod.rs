//! Lock-free bounded queues.
//!
//! [`BoundedStack`] backs the scheduler's ready queues: one per job type,
//! fixed capacity, LIFO. It is usable on its own wherever a bounded,
//! allocation-free hand-off between threads is needed.

mod bounded;

pub use bounded::BoundedStack;
