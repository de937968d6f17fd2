#[cfg(feature = "job_context")]
pub mod context;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{JobError, ValidationError};

// --- Public Type Aliases & Defaults ---

/// Unique identifier of a job record.
/// Uses UUID v7, so identifiers sort in creation order.
pub type JobId = Uuid;

/// Timeout applied when a job is created without one, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;

/// Attempt ceiling applied when a job is created without one.
pub const DEFAULT_ATTEMPTS: u32 = 1;

// --- Job Record ---

/// Retry bookkeeping attached to a job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryMeta {
  /// Number of failed executions after which the job is permanently failed.
  pub attempts: u32,
  /// Number of failed executions so far. Never decreases.
  pub failed_attempts: u32,
  /// Error messages of every failed execution, oldest first.
  pub errors: Vec<String>,
}

/// A unit of work, as persisted in a [`JobStore`](crate::store::JobStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
  pub id: JobId,
  /// Name of the worker that handles this job.
  pub name: String,
  /// Opaque data handed verbatim to the worker's handler.
  pub payload: Value,
  /// Lower values are scheduled earlier.
  pub priority: i32,
  /// Execution timeout in milliseconds. `0` means unbounded.
  pub timeout: u64,
  pub created: DateTime<Utc>,
  /// `true` exactly while the job is claimed by an in-flight batch.
  pub active: bool,
  /// Set when the job has permanently failed.
  pub failed: Option<DateTime<Utc>>,
  pub meta: RetryMeta,
}

/// Lifecycle state derived from a record's `active`/`failed` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
  Pending,
  Claimed,
  PermanentlyFailed,
}

/// Result of recording one failed execution on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FailureTransition {
  /// `failed_attempts` after this failure.
  pub failed_attempts: u32,
  /// Whether this failure exhausted the attempt ceiling.
  pub is_final: bool,
}

impl Job {
  pub(crate) fn new(name: String, payload: Value, settings: JobSettings) -> Self {
    Self {
      id: Uuid::now_v7(),
      name,
      payload,
      priority: settings.priority,
      timeout: settings.timeout,
      created: Utc::now(),
      active: false,
      failed: None,
      meta: RetryMeta {
        attempts: settings.attempts,
        failed_attempts: 0,
        errors: Vec::new(),
      },
    }
  }

  pub fn state(&self) -> JobState {
    if self.failed.is_some() {
      JobState::PermanentlyFailed
    } else if self.active {
      JobState::Claimed
    } else {
      JobState::Pending
    }
  }

  /// Whether the job may be selected by the next scheduling cycle.
  pub fn is_eligible(&self) -> bool {
    !self.active && self.failed.is_none()
  }

  /// Scheduling order: priority ascending, then oldest first.
  /// The time-ordered id breaks ties between records created in the same instant.
  pub(crate) fn schedule_order(a: &Job, b: &Job) -> Ordering {
    a.priority
      .cmp(&b.priority)
      .then(a.created.cmp(&b.created))
      .then(a.id.cmp(&b.id))
  }

  /// Records a failed execution: bumps the counter, logs the message, releases the
  /// claim and marks the job permanently failed once attempts are exhausted.
  pub(crate) fn record_failure(&mut self, error: &JobError, now: DateTime<Utc>) -> FailureTransition {
    self.meta.failed_attempts = self.meta.failed_attempts.saturating_add(1);
    self.meta.errors.push(error.message().to_string());
    self.active = false;

    let is_final = self.meta.failed_attempts >= self.meta.attempts;
    if is_final {
      self.failed = Some(now);
    }
    FailureTransition {
      failed_attempts: self.meta.failed_attempts,
      is_final,
    }
  }
}

// --- Admission Options ---

/// Scheduling options for a new job.
///
/// Values are signed so that input forwarded from untrusted sources is validated
/// by the queue instead of wrapping silently. `None` selects the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
  pub priority: Option<i32>,
  pub attempts: Option<i64>,
  pub timeout: Option<i64>,
}

impl JobOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn priority(mut self, priority: i32) -> Self {
    self.priority = Some(priority);
    self
  }

  /// Sets how many failed executions are tolerated before the job permanently fails.
  pub fn attempts(mut self, attempts: i64) -> Self {
    self.attempts = Some(attempts);
    self
  }

  /// Sets the execution timeout in milliseconds (`0` for unbounded).
  pub fn timeout(mut self, timeout_ms: i64) -> Self {
    self.timeout = Some(timeout_ms);
    self
  }

  /// Validates the options and applies defaults.
  pub(crate) fn resolve(&self) -> Result<JobSettings, ValidationError> {
    let timeout = match self.timeout {
      Some(t) if t < 0 => return Err(ValidationError::NegativeTimeout(t)),
      Some(t) => t as u64,
      None => DEFAULT_TIMEOUT_MS,
    };
    let attempts = match self.attempts {
      Some(a) if a < 0 => return Err(ValidationError::NegativeAttempts(a)),
      Some(a) => u32::try_from(a).unwrap_or(u32::MAX),
      None => DEFAULT_ATTEMPTS,
    };
    Ok(JobSettings {
      priority: self.priority.unwrap_or(0),
      timeout,
      attempts,
    })
  }
}

/// Validated, defaulted job options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JobSettings {
  pub priority: i32,
  pub timeout: u64,
  pub attempts: u32,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn job_with(attempts: u32) -> Job {
    Job::new(
      "send-email".to_string(),
      json!({ "to": "a@example.com" }),
      JobSettings {
        priority: 0,
        timeout: 100,
        attempts,
      },
    )
  }

  #[test]
  fn options_default_when_omitted() {
    let settings = JobOptions::new().resolve().unwrap();
    assert_eq!(settings.priority, 0);
    assert_eq!(settings.timeout, DEFAULT_TIMEOUT_MS);
    assert_eq!(settings.attempts, DEFAULT_ATTEMPTS);
  }

  #[test]
  fn zero_timeout_is_unbounded_not_defaulted() {
    let settings = JobOptions::new().timeout(0).resolve().unwrap();
    assert_eq!(settings.timeout, 0);
  }

  #[test]
  fn negative_options_are_rejected() {
    assert_eq!(
      JobOptions::new().timeout(-1).resolve(),
      Err(ValidationError::NegativeTimeout(-1))
    );
    assert_eq!(
      JobOptions::new().attempts(-1).resolve(),
      Err(ValidationError::NegativeAttempts(-1))
    );
  }

  #[test]
  fn failure_releases_claim_and_fails_permanently_at_ceiling() {
    let mut job = job_with(2);
    job.active = true;

    let first = job.record_failure(&JobError::new("first"), Utc::now());
    assert_eq!(first.failed_attempts, 1);
    assert!(!first.is_final);
    assert_eq!(job.state(), JobState::Pending);

    job.active = true;
    let second = job.record_failure(&JobError::new("second"), Utc::now());
    assert!(second.is_final);
    assert_eq!(job.state(), JobState::PermanentlyFailed);
    assert!(!job.active);
    assert_eq!(job.meta.errors, vec!["first", "second"]);
    assert!(!job.is_eligible());
  }

  #[test]
  fn zero_attempts_fails_on_first_error() {
    let mut job = job_with(0);
    let transition = job.record_failure(&JobError::new("nope"), Utc::now());
    assert!(transition.is_final);
    assert!(job.failed.is_some());
  }

  #[test]
  fn schedule_order_prefers_priority_then_age() {
    let mut urgent = job_with(1);
    urgent.priority = -5;
    let older = job_with(1);
    let newer = job_with(1);

    let mut jobs = vec![newer.clone(), older.clone(), urgent.clone()];
    jobs.sort_by(Job::schedule_order);
    let ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![urgent.id, older.id, newer.id]);
  }

  #[test]
  fn records_serialize_with_camel_case_fields() {
    let job = job_with(3);
    let value = serde_json::to_value(&job).unwrap();
    assert_eq!(value["meta"]["failedAttempts"], 0);
    assert_eq!(value["active"], false);
    assert!(value["failed"].is_null());
  }
}
