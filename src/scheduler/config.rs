//! Scheduler configuration

use crate::core::{JobType, QuantumError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Scheduler`](crate::scheduler::Scheduler) and its
/// [`QuantumWorld`](crate::scheduler::QuantumWorld).
///
/// # Example
///
/// ```rust
/// use quantum_jobs::prelude::*;
/// use std::time::Duration;
///
/// let config = SchedulerConfig::new(4)
///     .with_thread_name_prefix("physics")
///     .with_ready_queue_capacity(1024)
///     .with_poll_interval(Duration::from_millis(20));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 is resolved to the number of CPUs by
    /// [`new`](Self::new), [`from_json_str`](Self::from_json_str) and
    /// [`Scheduler::with_config`](crate::scheduler::Scheduler::with_config).
    pub num_workers: usize,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// How long an idle worker sleeps before polling the ready queues again.
    /// Submissions wake sleeping workers early.
    /// Default: 50ms
    pub poll_interval: Duration,
    /// Capacity of each per-type ready queue. A submission that finds its
    /// queue full runs inline on the submitting thread.
    /// Default: 4096
    pub ready_queue_capacity: usize,
    /// Order in which workers look at the per-type ready queues.
    /// Default: heavy jobs first
    pub claim_order: [JobType; JobType::COUNT],
    /// Number of empty claim attempts, with exponential backoff, before an
    /// idle worker goes to sleep.
    /// Default: 64
    pub spin_limit: u32,
    /// Number of pooled jobs each [`Channel`](crate::Channel) reserves.
    /// Submissions beyond that allocate their job.
    /// Default: 1024
    pub channel_job_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            thread_name_prefix: "quantum".to_string(),
            poll_interval: Duration::from_millis(50),
            ready_queue_capacity: 4096,
            claim_order: [JobType::Heavy, JobType::Light],
            spin_limit: 64,
            channel_job_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration with the specified number of workers
    #[must_use]
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
        .resolved()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// ```rust
    /// use quantum_jobs::prelude::*;
    ///
    /// let config = SchedulerConfig::from_json_str(
    ///     r#"{ "num_workers": 2, "claim_order": ["Light", "Heavy"] }"#,
    /// ).unwrap();
    /// assert_eq!(config.num_workers, 2);
    /// assert_eq!(config.claim_order, [JobType::Light, JobType::Heavy]);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config = Self::resolved(serde_json::from_str(json)?);
        config.validate()?;
        Ok(config)
    }

    /// Set thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the idle poll interval.
    ///
    /// # Panics
    ///
    /// Panics if interval is zero.
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "poll interval must be non-zero");
        self.poll_interval = interval;
        self
    }

    /// Set the capacity of each per-type ready queue
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_ready_queue_capacity(mut self, capacity: usize) -> Self {
        self.ready_queue_capacity = capacity;
        self
    }

    /// Set the order in which workers claim job types
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_claim_order(mut self, order: [JobType; JobType::COUNT]) -> Self {
        self.claim_order = order;
        self
    }

    /// Set how many empty claim attempts a worker makes before sleeping
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_spin_limit(mut self, spin_limit: u32) -> Self {
        self.spin_limit = spin_limit;
        self
    }

    /// Set how many jobs each channel keeps pooled
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_channel_job_capacity(mut self, capacity: usize) -> Self {
        self.channel_job_capacity = capacity;
        self
    }

    /// Replaces a worker count of 0 with the number of CPUs
    pub(crate) fn resolved(mut self) -> Self {
        if self.num_workers == 0 {
            self.num_workers = num_cpus::get();
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(QuantumError::invalid_config(
                "num_workers",
                "Number of workers must be greater than 0",
            ));
        }
        if self.ready_queue_capacity == 0 {
            return Err(QuantumError::invalid_config(
                "ready_queue_capacity",
                "Ready queue capacity must be greater than 0",
            ));
        }
        if self.channel_job_capacity == 0 {
            return Err(QuantumError::invalid_config(
                "channel_job_capacity",
                "Channel job capacity must be greater than 0",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(QuantumError::invalid_config(
                "poll_interval",
                "Poll interval must be non-zero",
            ));
        }
        for job_type in JobType::ALL {
            if !self.claim_order.contains(&job_type) {
                return Err(QuantumError::invalid_config(
                    "claim_order",
                    format!("claim order is missing {}", job_type.name()),
                ));
            }
        }
        Ok(())
    }
}
