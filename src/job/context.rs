use super::JobId;

/// Contextual information available to a running handler via task-locals.
/// Accessible inside a worker handler using `try_get_current_job_context()`
/// or the `job_context!()` macro when the `job_context` feature is enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobContext {
  /// The id of the job being executed.
  pub job_id: JobId,
  /// 1-based number of this execution attempt.
  pub attempt: u32,
  /// The job's timeout in milliseconds (`0` when unbounded).
  pub timeout_ms: u64,
}

tokio::task_local! {
    /// Provides access to the current `JobContext` within a handler's execution scope.
    /// Set by the worker registry when it invokes a handler.
    pub static CURRENT_JOB_CONTEXT: JobContext;
}

/// Attempts to retrieve the `JobContext` of the executing job.
///
/// Returns `None` when called outside a handler invoked by the queue.
pub fn try_get_current_job_context() -> Option<JobContext> {
  CURRENT_JOB_CONTEXT.try_with(|ctx| *ctx).ok()
}

/// Retrieves the current `JobContext`, panicking if called outside a
/// queue-managed handler.
///
/// Use `try_get_current_job_context()` for optional access.
///
/// # Panics
/// Panics if the `CURRENT_JOB_CONTEXT` task local has not been set.
#[macro_export]
macro_rules! job_context {
  () => {
    $crate::job::context::CURRENT_JOB_CONTEXT.with(|ctx| *ctx)
  };
}
