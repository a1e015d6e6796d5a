//! Core types: jobs, triggers and errors

pub mod error;
pub mod inline;
pub mod job;
pub mod trigger;

pub use error::{QuantumError, Result, SubmitError};
pub use inline::InlineWork;
pub use job::{
    Definition, Job, JobId, JobRef, JobState, JobType, Lifetime, OnceWork, Schedulable, Work,
};
pub use trigger::{Notify, Trigger};
