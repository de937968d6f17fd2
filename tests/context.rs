//! Tests for the `job_context` feature.

// Only compile this module if the feature is enabled
#![cfg(feature = "job_context")]

mod common;

use crate::common::{build_queue, setup_tracing};

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use turnqueue::{job_context, try_get_current_job_context, JobContext, JobError, JobOptions, WorkerOptions};

#[tokio::test]
async fn test_job_context_access() {
  setup_tracing();
  let queue = build_queue().await;
  let captured = Arc::new(Mutex::new(None::<JobContext>));

  let capture = captured.clone();
  queue.add_worker(
    "ctx",
    move |id, _| {
      let capture = capture.clone();
      async move {
        let ctx_option = try_get_current_job_context();
        assert!(ctx_option.is_some(), "Context should be available via try_get");

        // Panics if the context is not set.
        let ctx_macro = job_context!();
        assert_eq!(ctx_option, Some(ctx_macro));
        assert_eq!(ctx_macro.job_id, id);
        *capture.lock() = Some(ctx_macro);
        Ok(())
      }
    },
    WorkerOptions::new(),
  );

  let id = queue
    .create_job("ctx", json!(null), JobOptions::new().timeout(1_500), false)
    .await
    .unwrap();
  queue.start(None).await.unwrap();

  let ctx = (*captured.lock()).expect("Context was not captured by the handler!");
  assert_eq!(ctx.job_id, id);
  assert_eq!(ctx.attempt, 1);
  assert_eq!(ctx.timeout_ms, 1_500);
}

#[tokio::test]
async fn test_job_context_counts_attempts() {
  setup_tracing();
  let queue = build_queue().await;
  let attempts_seen = Arc::new(Mutex::new(Vec::<u32>::new()));

  let seen = attempts_seen.clone();
  queue.add_worker(
    "retrying",
    move |_, _| {
      let seen = seen.clone();
      async move {
        let attempt = job_context!().attempt;
        seen.lock().push(attempt);
        if attempt < 3 {
          Err(JobError::new("not yet"))
        } else {
          Ok(())
        }
      }
    },
    WorkerOptions::new(),
  );

  queue
    .create_job("retrying", json!(null), JobOptions::new().attempts(5), false)
    .await
    .unwrap();
  queue.start(None).await.unwrap();

  assert_eq!(*attempts_seen.lock(), vec![1, 2, 3]);
  assert!(queue.get_jobs().await.unwrap().is_empty());
}

#[test]
fn test_context_absent_outside_handlers() {
  assert!(try_get_current_job_context().is_none());
}
