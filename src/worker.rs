use crate::error::{JobError, JobErrorKind};
use crate::job::{Job, JobId};

#[cfg(feature = "job_context")]
use crate::job::context::{JobContext, CURRENT_JOB_CONTEXT};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// The future returned by a worker handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send + 'static>>;

/// The function type worker handlers are stored as.
///
/// A handler receives the job id and a copy of its payload. `Ok(())` means success;
/// an `Err`, a panic, or exceeding the job's timeout is a failed attempt.
pub type BoxedHandler = Box<dyn Fn(JobId, Value) -> HandlerFuture + Send + Sync + 'static>;

/// The future returned by a lifecycle callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The function type lifecycle callbacks are stored as.
pub type BoxedCallback = Box<dyn Fn(JobEvent) -> CallbackFuture + Send + Sync + 'static>;

/// Points in a job's execution at which worker callbacks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
  /// Before the handler is invoked.
  Start,
  /// After a successful execution (record already deleted).
  Success,
  /// After the first and the final failed attempt.
  Failure,
  /// After the attempt that permanently failed the job.
  Failed,
  /// After a job finished for good, either by success or permanent failure.
  Complete,
}

/// Argument passed to lifecycle callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
  pub kind: LifecycleKind,
  pub job_id: JobId,
  pub name: String,
  pub payload: Value,
  /// The failure that caused a `Failure`/`Failed` callback.
  pub error: Option<JobError>,
}

// --- Worker Options ---

/// Registration options for a worker: concurrency limit and lifecycle callbacks.
pub struct WorkerOptions {
  concurrency: usize,
  callbacks: HashMap<LifecycleKind, BoxedCallback>,
}

impl Default for WorkerOptions {
  fn default() -> Self {
    Self {
      concurrency: 1,
      callbacks: HashMap::new(),
    }
  }
}

impl fmt::Debug for WorkerOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerOptions")
      .field("concurrency", &self.concurrency)
      .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
      .finish()
  }
}

impl WorkerOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Maximum number of this worker's jobs processed together in one batch.
  /// Values below 1 are raised to 1.
  pub fn concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency.max(1);
    self
  }

  /// Registers `callback` for the given lifecycle point, replacing any previous one.
  pub fn on<F, Fut>(mut self, kind: LifecycleKind, callback: F) -> Self
  where
    F: Fn(JobEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let boxed: BoxedCallback = Box::new(move |event| Box::pin(callback(event)));
    self.callbacks.insert(kind, boxed);
    self
  }

  pub fn on_start<F, Fut>(self, callback: F) -> Self
  where
    F: Fn(JobEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.on(LifecycleKind::Start, callback)
  }

  pub fn on_success<F, Fut>(self, callback: F) -> Self
  where
    F: Fn(JobEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.on(LifecycleKind::Success, callback)
  }

  pub fn on_failure<F, Fut>(self, callback: F) -> Self
  where
    F: Fn(JobEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.on(LifecycleKind::Failure, callback)
  }

  pub fn on_failed<F, Fut>(self, callback: F) -> Self
  where
    F: Fn(JobEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.on(LifecycleKind::Failed, callback)
  }

  pub fn on_complete<F, Fut>(self, callback: F) -> Self
  where
    F: Fn(JobEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    self.on(LifecycleKind::Complete, callback)
  }
}

/// A registered worker.
struct WorkerDefinition {
  handler: BoxedHandler,
  concurrency: usize,
  callbacks: HashMap<LifecycleKind, BoxedCallback>,
}

impl fmt::Debug for WorkerDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerDefinition")
      .field("handler", &format_args!("<Fn>"))
      .field("concurrency", &self.concurrency)
      .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
      .finish()
  }
}

// --- Registry ---

/// Maps job names to their handler, concurrency limit and lifecycle callbacks.
///
/// Registration can change at any time; a running batch resolves the worker
/// at the moment each job is invoked.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
  workers: RwLock<HashMap<String, Arc<WorkerDefinition>>>,
}

impl WorkerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `handler` for jobs named `name`, replacing any existing worker.
  pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F, options: WorkerOptions)
  where
    F: Fn(JobId, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
  {
    let name = name.into();
    let handler: BoxedHandler = Box::new(move |id, payload| Box::pin(handler(id, payload)));
    let definition = Arc::new(WorkerDefinition {
      handler,
      concurrency: options.concurrency.max(1),
      callbacks: options.callbacks,
    });
    let concurrency = definition.concurrency;
    if self.workers.write().insert(name.clone(), definition).is_some() {
      info!(worker = %name, concurrency, "Replaced existing worker.");
    } else {
      info!(worker = %name, concurrency, "Registered worker.");
    }
  }

  /// Removes the worker for `name`. Returns `true` if one was registered.
  pub fn unregister(&self, name: &str) -> bool {
    let removed = self.workers.write().remove(name).is_some();
    if removed {
      info!(worker = %name, "Removed worker.");
    }
    removed
  }

  /// Names of all registered workers, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.workers.read().keys().cloned().collect();
    names.sort();
    names
  }

  /// Concurrency limit for `name`. Unregistered names process one job at a time.
  pub fn concurrency_of(&self, name: &str) -> usize {
    self
      .workers
      .read()
      .get(name)
      .map(|w| w.concurrency)
      .unwrap_or(1)
  }

  fn get(&self, name: &str) -> Option<Arc<WorkerDefinition>> {
    self.workers.read().get(name).cloned()
  }

  /// Runs the job's handler, enforcing its timeout and capturing panics.
  ///
  /// The handler runs on its own task; when the timeout elapses that task is aborted.
  pub(crate) async fn invoke(&self, job: &Job) -> Result<(), JobError> {
    let worker = self
      .get(&job.name)
      .ok_or_else(|| JobError::missing_worker(&job.name))?;
    let (job_id, payload) = (job.id, job.payload.clone());
    // The handler itself is called on the spawned task, so a panic while building
    // its future is captured like one raised while polling it.
    let future = async move { (worker.handler)(job_id, payload).await };

    #[cfg(feature = "job_context")]
    let task = {
      let context = JobContext {
        job_id: job.id,
        attempt: job.meta.failed_attempts.saturating_add(1),
        timeout_ms: job.timeout,
      };
      tokio::spawn(CURRENT_JOB_CONTEXT.scope(context, future))
    };
    #[cfg(not(feature = "job_context"))]
    let task = tokio::spawn(future);

    let abort_handle = task.abort_handle();
    let joined = if job.timeout == 0 {
      task.await
    } else {
      match tokio::time::timeout(Duration::from_millis(job.timeout), task).await {
        Ok(joined) => joined,
        Err(_) => {
          abort_handle.abort();
          warn!(job_id = %job.id, timeout_ms = job.timeout, "Handler exceeded its timeout; aborted.");
          return Err(JobError::timed_out(job.id, job.timeout));
        }
      }
    };

    match joined {
      Ok(result) => result,
      Err(join_error) if join_error.is_panic() => {
        error!(job_id = %job.id, job_name = %job.name, "Handler panicked!");
        Err(JobError::panicked(job.id))
      }
      Err(_) => {
        warn!(job_id = %job.id, "Handler task was cancelled during execution.");
        Err(JobError::with_kind(
          JobErrorKind::Handler,
          format!("Handler for job {} was cancelled.", job.id),
        ))
      }
    }
  }

  /// Fires the `kind` callback of the job's worker, if both exist.
  ///
  /// A panicking callback is logged and otherwise ignored.
  pub(crate) async fn dispatch(&self, kind: LifecycleKind, job: &Job, error: Option<&JobError>) {
    let Some(worker) = self.get(&job.name) else {
      return;
    };
    let Some(callback) = worker.callbacks.get(&kind) else {
      return;
    };
    debug!(job_id = %job.id, ?kind, "Dispatching lifecycle callback.");
    let event = JobEvent {
      kind,
      job_id: job.id,
      name: job.name.clone(),
      payload: job.payload.clone(),
      error: error.cloned(),
    };
    let guarded = AssertUnwindSafe(async { callback(event).await }).catch_unwind();
    if guarded.await.is_err() {
      error!(job_id = %job.id, ?kind, "Lifecycle callback panicked.");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::job::JobOptions;
  use serde_json::json;

  fn job(name: &str, timeout: i64) -> Job {
    Job::new(
      name.to_string(),
      json!({ "n": 1 }),
      JobOptions::new().timeout(timeout).resolve().unwrap(),
    )
  }

  #[test]
  fn concurrency_defaults_and_clamps() {
    let registry = WorkerRegistry::new();
    registry.register("zero", |_, _| async { Ok(()) }, WorkerOptions::new().concurrency(0));
    registry.register("five", |_, _| async { Ok(()) }, WorkerOptions::new().concurrency(5));
    assert_eq!(registry.concurrency_of("zero"), 1);
    assert_eq!(registry.concurrency_of("five"), 5);
    assert_eq!(registry.concurrency_of("unknown"), 1);
    assert_eq!(registry.names(), vec!["five", "zero"]);
    assert!(registry.unregister("five"));
    assert!(!registry.unregister("five"));
  }

  #[tokio::test]
  async fn invoke_passes_payload_and_reports_errors() {
    let registry = WorkerRegistry::new();
    registry.register(
      "echo",
      |_, payload: Value| async move {
        if payload["n"] == 1 {
          Err(JobError::new("saw one"))
        } else {
          Ok(())
        }
      },
      WorkerOptions::new(),
    );
    let err = registry.invoke(&job("echo", 1_000)).await.unwrap_err();
    assert_eq!(err.message(), "saw one");
  }

  #[tokio::test]
  async fn invoke_times_out_and_panics_become_failures() {
    let registry = WorkerRegistry::new();
    registry.register(
      "slow",
      |_, _| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
      },
      WorkerOptions::new(),
    );
    registry.register(
      "panics",
      |_, _| async {
        tokio::task::yield_now().await;
        panic!("handler forced panic");
        #[allow(unreachable_code)]
        Ok::<(), JobError>(())
      },
      WorkerOptions::new(),
    );

    let timed_out = registry.invoke(&job("slow", 20)).await.unwrap_err();
    assert_eq!(timed_out.kind(), JobErrorKind::Timeout);
    assert!(timed_out.message().starts_with("TIMEOUT"));

    let panicked = registry.invoke(&job("panics", 0)).await.unwrap_err();
    assert_eq!(panicked.kind(), JobErrorKind::Panic);

    let missing = registry.invoke(&job("nobody", 0)).await.unwrap_err();
    assert_eq!(missing.kind(), JobErrorKind::MissingWorker);
  }

  #[tokio::test]
  async fn panic_before_returning_a_future_is_captured() {
    let registry = WorkerRegistry::new();
    registry.register(
      "eager",
      |_, _| -> HandlerFuture { panic!("handler panicked before building its future") },
      WorkerOptions::new(),
    );
    let err = registry.invoke(&job("eager", 1_000)).await.unwrap_err();
    assert_eq!(err.kind(), JobErrorKind::Panic);
  }

  #[tokio::test]
  async fn eager_callback_panic_is_contained() {
    let registry = WorkerRegistry::new();
    registry.register(
      "noisy",
      |_, _| async { Ok(()) },
      WorkerOptions::new().on_start(|_| -> CallbackFuture { panic!("callback panicked eagerly") }),
    );
    registry
      .dispatch(LifecycleKind::Start, &job("noisy", 0), None)
      .await;
  }
}
