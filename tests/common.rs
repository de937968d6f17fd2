//! tests/common.rs
//! Shared helper functions for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::fmt::TestWriter;
use turnqueue::{Job, JobError, JobEvent, JobId, LifecycleKind, Queue, WorkerOptions};

pub type HandlerResult = BoxFuture<'static, Result<(), JobError>>;

/// Every lifecycle event observed by a recording worker, in firing order.
pub type CallbackLog = Arc<Mutex<Vec<JobEvent>>>;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds an in-memory queue.
pub async fn build_queue() -> Queue {
  Queue::builder()
    .memory_store()
    .build()
    .await
    .expect("Failed to build queue")
}

// Creates a handler that increments a counter, optionally delays,
// and then returns `outcome`.
pub fn counting_handler(
  counter: Arc<AtomicUsize>,
  delay: StdDuration,
  outcome: Result<(), JobError>,
) -> impl Fn(JobId, Value) -> HandlerResult + Send + Sync + 'static {
  move |id: JobId, _: Value| -> HandlerResult {
    let ctr = counter.clone();
    let outcome = outcome.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(%id, "Counter job executing (Count: {})", count);
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      outcome
    })
  }
}

// Creates a handler that appends each payload to `seen` and succeeds.
pub fn recording_handler(
  seen: Arc<Mutex<Vec<Value>>>,
) -> impl Fn(JobId, Value) -> HandlerResult + Send + Sync + 'static {
  move |_: JobId, payload: Value| -> HandlerResult {
    let seen = seen.clone();
    Box::pin(async move {
      seen.lock().push(payload);
      Ok(())
    })
  }
}

// Creates a handler for concurrency testing.
// Increments active count on start, decrements on end. Updates max observed.
pub fn concurrency_tracker(
  active_counter: Arc<AtomicUsize>,
  max_observed_active: Arc<AtomicUsize>,
  delay: StdDuration,
) -> impl Fn(JobId, Value) -> HandlerResult + Send + Sync + 'static {
  move |_: JobId, _: Value| -> HandlerResult {
    let active = active_counter.clone();
    let max_obs = max_observed_active.clone();
    Box::pin(async move {
      let current_active = active.fetch_add(1, Ordering::SeqCst) + 1;
      max_obs.fetch_max(current_active, Ordering::SeqCst);
      tokio::time::sleep(delay).await;
      active.fetch_sub(1, Ordering::SeqCst);
      Ok(())
    })
  }
}

// Worker options that record every lifecycle callback into `log`.
pub fn recording_options(log: &CallbackLog, concurrency: usize) -> WorkerOptions {
  let mut options = WorkerOptions::new().concurrency(concurrency);
  for kind in [
    LifecycleKind::Start,
    LifecycleKind::Success,
    LifecycleKind::Failure,
    LifecycleKind::Failed,
    LifecycleKind::Complete,
  ] {
    let log = log.clone();
    options = options.on(kind, move |event: JobEvent| {
      let log = log.clone();
      async move {
        log.lock().push(event);
      }
    });
  }
  options
}

pub fn new_log() -> CallbackLog {
  Arc::new(Mutex::new(Vec::new()))
}

pub fn kinds(log: &CallbackLog) -> Vec<LifecycleKind> {
  log.lock().iter().map(|event| event.kind).collect()
}

pub async fn find_job(queue: &Queue, id: JobId) -> Option<Job> {
  queue
    .get_jobs()
    .await
    .expect("get_jobs failed")
    .into_iter()
    .find(|job| job.id == id)
}
