use crate::error::JobError;
use crate::job::{FailureTransition, Job};
use crate::queue::QueueShared;
use crate::worker::LifecycleKind;

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn, Instrument};

/// Executes claimed jobs and applies the retry/permanent-failure transition.
///
/// Processing never fails: handler errors are absorbed into the job record and
/// lifecycle callbacks, store errors are logged.
#[derive(Clone)]
pub(crate) struct JobProcessor {
  shared: Arc<QueueShared>,
}

impl JobProcessor {
  pub fn new(shared: Arc<QueueShared>) -> Self {
    Self { shared }
  }

  /// Processes one claimed job to completion.
  pub async fn process(&self, job: Job) {
    let job_span = tracing::span!(
      tracing::Level::INFO,
      "job_exec",
      job_id = %job.id,
      job_name = job.name.as_str(),
      attempt = job.meta.failed_attempts.saturating_add(1)
    );
    self.execute_and_handle(job).instrument(job_span).await
  }

  async fn execute_and_handle(&self, job: Job) {
    let workers = &self.shared.workers;
    let metrics = &self.shared.metrics;

    workers.dispatch(LifecycleKind::Start, &job, None).await;

    debug!("Starting job execution.");
    metrics.jobs_in_flight.fetch_add(1, AtomicOrdering::Relaxed);
    let start_time = Instant::now();
    let result = workers.invoke(&job).await;
    let duration = start_time.elapsed();
    metrics.jobs_in_flight.fetch_sub(1, AtomicOrdering::Relaxed);
    metrics.job_execution_duration.record(duration);

    info!(
      duration_ms = duration.as_millis(),
      outcome = if result.is_ok() { "Success" } else { "Fail" },
      "Finished job execution."
    );

    match result {
      Ok(()) => self.handle_success(job).await,
      Err(error) => self.handle_failure(job, error).await,
    }
  }

  async fn handle_success(&self, job: Job) {
    if let Err(e) = self.shared.store.delete(job.id).await {
      error!(error = %e, "Failed to delete completed job.");
    }
    self
      .shared
      .metrics
      .jobs_succeeded
      .fetch_add(1, AtomicOrdering::Relaxed);

    let workers = &self.shared.workers;
    workers.dispatch(LifecycleKind::Success, &job, None).await;
    workers.dispatch(LifecycleKind::Complete, &job, None).await;
  }

  async fn handle_failure(&self, mut job: Job, error: JobError) {
    let metrics = &self.shared.metrics;
    let transition = job.record_failure(&error, Utc::now());

    metrics
      .job_attempts_failed
      .fetch_add(1, AtomicOrdering::Relaxed);
    if transition.is_final {
      metrics
        .jobs_permanently_failed
        .fetch_add(1, AtomicOrdering::Relaxed);
      error!(
        failed_attempts = transition.failed_attempts,
        error = %error,
        "Job failed permanently after exhausting attempts."
      );
    } else {
      info!(
        failed_attempts = transition.failed_attempts,
        attempts = job.meta.attempts,
        error = %error,
        "Job failed, will be retried."
      );
    }

    if let Err(e) = self.shared.store.update(&job).await {
      warn!(error = %e, "Failed to persist job failure (record may have been flushed).");
    }

    let callbacks = failure_callbacks(transition, job.meta.attempts, error.is_transient());
    if error.is_transient() {
      metrics
        .callbacks_suppressed
        .fetch_add(1, AtomicOrdering::Relaxed);
      debug!(kind = ?error.kind(), "Transient failure; lifecycle callbacks suppressed.");
    }
    for kind in callbacks {
      let err = matches!(kind, LifecycleKind::Failure | LifecycleKind::Failed).then_some(&error);
      self.shared.workers.dispatch(kind, &job, err).await;
    }
  }
}

/// Lifecycle callbacks to fire, in order, after a failed attempt.
///
/// Transient failures fire nothing. Otherwise `Failure` fires on the first and the
/// final attempt only, and a final attempt adds `Failed` then `Complete`.
pub(crate) fn failure_callbacks(
  transition: FailureTransition,
  attempts: u32,
  transient: bool,
) -> Vec<LifecycleKind> {
  if transient {
    return Vec::new();
  }
  let mut kinds = Vec::with_capacity(3);
  if transition.failed_attempts == 1 || transition.failed_attempts == attempts {
    kinds.push(LifecycleKind::Failure);
  }
  if transition.is_final {
    kinds.push(LifecycleKind::Failed);
    kinds.push(LifecycleKind::Complete);
  }
  kinds
}
