use crate::job::JobId;

use thiserror::Error;

/// Errors raised while validating a new job in `Queue::create_job`.
///
/// Validation happens before the store is touched, so a rejected job is never persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("Job name must be a non-empty string")]
  MissingName,
  #[error("Job timeout must be non-negative (got {0})")]
  NegativeTimeout(i64),
  #[error("Job attempts must be non-negative (got {0})")]
  NegativeAttempts(i64),
}

/// Errors reported by a [`JobStore`](crate::store::JobStore) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("Job {0} not found in the store.")]
  NotFound(JobId),
  #[error("Store I/O failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to (de)serialize job records: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Errors returned by the public `Queue` operations.
#[derive(Error, Debug)]
pub enum QueueError {
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Errors that can occur while building a queue with `QueueBuilder`.
#[derive(Error, Debug)]
pub enum BuildError {
  #[error("Failed to initialize the job store: {0}")]
  Store(#[from] StoreError),
}

/// Classification of a job execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobErrorKind {
  /// The handler reported a failure.
  Handler,
  /// A transient network condition (e.g. a dropped connection).
  Network,
  /// The handler did not finish within the job's timeout.
  Timeout,
  /// The handler panicked.
  Panic,
  /// No worker is registered for the job's name.
  MissingWorker,
}

/// A job execution failure, as returned by worker handlers.
///
/// Network and timeout failures are *transient*: the job is still retried and its
/// record updated, but failure lifecycle callbacks are not fired for that attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct JobError {
  kind: JobErrorKind,
  message: String,
}

impl JobError {
  /// Creates an error from a message, classifying it by its content.
  ///
  /// Messages mentioning "network" become [`JobErrorKind::Network`]; messages mentioning
  /// "timeout" or "timed out" become [`JobErrorKind::Timeout`]. Everything else is a
  /// [`JobErrorKind::Handler`] failure. Matching is case-insensitive.
  pub fn new(message: impl Into<String>) -> Self {
    let message = message.into();
    let lowered = message.to_lowercase();
    let kind = if lowered.contains("network") {
      JobErrorKind::Network
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
      JobErrorKind::Timeout
    } else {
      JobErrorKind::Handler
    };
    Self { kind, message }
  }

  /// Creates an error with an explicit kind, bypassing message classification.
  pub fn with_kind(kind: JobErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::with_kind(JobErrorKind::Network, message)
  }

  pub(crate) fn timed_out(job_id: JobId, timeout_ms: u64) -> Self {
    Self::with_kind(
      JobErrorKind::Timeout,
      format!("TIMEOUT: Job id: {} timed out in {}ms.", job_id, timeout_ms),
    )
  }

  pub(crate) fn panicked(job_id: JobId) -> Self {
    Self::with_kind(
      JobErrorKind::Panic,
      format!("Handler for job {} panicked.", job_id),
    )
  }

  pub(crate) fn missing_worker(name: &str) -> Self {
    Self::with_kind(
      JobErrorKind::MissingWorker,
      format!("Job {} does not have a worker assigned to it.", name),
    )
  }

  pub fn kind(&self) -> JobErrorKind {
    self.kind
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  /// Whether this failure is a transient network/timeout condition.
  pub fn is_transient(&self) -> bool {
    matches!(self.kind, JobErrorKind::Network | JobErrorKind::Timeout)
  }
}

impl From<String> for JobError {
  fn from(message: String) -> Self {
    Self::new(message)
  }
}

impl From<&str> for JobError {
  fn from(message: &str) -> Self {
    Self::new(message)
  }
}
