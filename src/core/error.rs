//! Error types for the job system

use crate::core::job::JobRef;

/// Result type for job system operations
pub type Result<T> = std::result::Result<T, QuantumError>;

/// Errors that can occur in the job system
///
/// Only resource problems and lifecycle misuse of the scheduler surface as
/// values. Pool exhaustion is reported as `None` by the allocators and is not
/// an error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QuantumError {
    /// Backing storage could not be obtained
    #[error("Out of memory: failed to reserve {requested} slots")]
    OutOfMemory {
        /// Number of slots that were requested
        requested: usize,
    },

    /// Invalid configuration with parameter
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Configuration parameter name
        parameter: String,
        /// Error message
        message: String,
    },

    /// Scheduler is already running
    #[error("Scheduler '{name}' is already running with {worker_count} workers")]
    AlreadyRunning {
        /// Thread name prefix of the scheduler
        name: String,
        /// Number of worker threads
        worker_count: usize,
    },

    /// Scheduler is not running
    #[error("Scheduler '{name}' is not running")]
    NotRunning {
        /// Thread name prefix of the scheduler
        name: String,
    },

    /// Failed to spawn a worker thread
    #[error("Failed to spawn worker thread #{worker_id}: {message}")]
    SpawnError {
        /// ID of the worker that failed to spawn
        worker_id: usize,
        /// Error message
        message: String,
        /// Source IO error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Failed to join a worker thread
    #[error("Failed to join worker thread #{worker_id}: {message}")]
    JoinError {
        /// ID of the worker that failed to join
        worker_id: usize,
        /// Error message
        message: String,
    },

    /// Configuration document could not be parsed
    #[error("Failed to parse scheduler configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl QuantumError {
    /// Create an out of memory error
    pub fn out_of_memory(requested: usize) -> Self {
        QuantumError::OutOfMemory { requested }
    }

    /// Create an invalid config error
    pub fn invalid_config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        QuantumError::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an already running error
    pub fn already_running(name: impl Into<String>, worker_count: usize) -> Self {
        QuantumError::AlreadyRunning {
            name: name.into(),
            worker_count,
        }
    }

    /// Create a not running error
    pub fn not_running(name: impl Into<String>) -> Self {
        QuantumError::NotRunning { name: name.into() }
    }

    /// Create a spawn error with source
    pub fn spawn_with_source(
        worker_id: usize,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        QuantumError::SpawnError {
            worker_id,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a join error
    pub fn join(worker_id: usize, message: impl Into<String>) -> Self {
        QuantumError::JoinError {
            worker_id,
            message: message.into(),
        }
    }

    /// Returns true for allocation failures
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, QuantumError::OutOfMemory { .. })
    }
}

/// A job handed back by a scheduler that is not running.
///
/// The job was never queued, so triggers it was wired to still count it as
/// pending. Resubmit it once the scheduler runs, or run it through
/// [`QuantumWorld`](crate::scheduler::QuantumWorld) directly.
#[derive(Debug, thiserror::Error)]
#[error("Scheduler '{name}' is not running; {job:?} was not submitted")]
pub struct SubmitError {
    /// Thread name prefix of the scheduler
    pub name: String,
    /// The rejected job
    pub job: JobRef,
}

impl SubmitError {
    /// Take back the rejected job
    pub fn into_job(self) -> JobRef {
        self.job
    }
}

impl From<SubmitError> for QuantumError {
    fn from(err: SubmitError) -> Self {
        QuantumError::not_running(err.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Job, Schedulable};

    #[test]
    fn test_error_creation() {
        let err = QuantumError::out_of_memory(64);
        assert!(err.is_out_of_memory());

        let err = QuantumError::invalid_config("capacity", "must be greater than 0");
        assert!(matches!(err, QuantumError::InvalidConfig { .. }));
        assert!(!err.is_out_of_memory());
    }

    #[test]
    fn test_error_display() {
        let err = QuantumError::already_running("quantum", 4);
        assert_eq!(
            err.to_string(),
            "Scheduler 'quantum' is already running with 4 workers"
        );

        let err = QuantumError::out_of_memory(1024);
        assert_eq!(err.to_string(), "Out of memory: failed to reserve 1024 slots");

        let err = QuantumError::not_running("quantum");
        assert_eq!(err.to_string(), "Scheduler 'quantum' is not running");
    }

    #[test]
    fn test_spawn_error_with_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = QuantumError::spawn_with_source(5, "Cannot create thread", io_err);

        assert!(matches!(err, QuantumError::SpawnError { .. }));
        assert!(err.to_string().contains("worker thread #5"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_from_json() {
        let parse_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: QuantumError = parse_err.into();
        assert!(matches!(err, QuantumError::Config(_)));
    }

    #[test]
    fn test_submit_error_returns_job() {
        let job: JobRef = Job::<_, 1>::from_fn(|| {});
        let id = job.id();
        let err = SubmitError {
            name: "quantum".to_string(),
            job,
        };
        assert!(err.to_string().starts_with("Scheduler 'quantum' is not running"));
        assert_eq!(err.into_job().id(), id);
    }

    #[test]
    fn test_submit_error_converts_to_not_running() {
        let err = SubmitError {
            name: "quantum".to_string(),
            job: Job::<_, 1>::from_fn(|| {}),
        };
        let err: QuantumError = err.into();
        assert!(matches!(err, QuantumError::NotRunning { .. }));
    }
}
