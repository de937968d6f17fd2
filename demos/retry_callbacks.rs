//! demos/retry_callbacks.rs
//!
//! Demonstrates retries and lifecycle callbacks: a job that keeps failing is
//! retried until its attempts are exhausted, then kept in the store as failed.
//! Network errors are retried without firing failure callbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};
use turnqueue::{JobError, JobOptions, Queue, WorkerOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,turnqueue=info,retry_callbacks=trace")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let queue = Queue::builder().build().await?;

  let calls = Arc::new(AtomicUsize::new(0));
  let calls_clone = calls.clone();
  queue.add_worker(
    "charge",
    move |id, payload| {
      let calls = calls_clone.clone();
      async move {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        info!(%id, attempt, "Charging {}", payload["amount"]);
        match attempt {
          1 => Err(JobError::network("Network unreachable")),
          _ => Err(JobError::new("card declined")),
        }
      }
    },
    WorkerOptions::new()
      .on_start(|event| async move {
        info!(job_id = %event.job_id, "on_start");
      })
      .on_failure(|event| async move {
        warn!(job_id = %event.job_id, error = ?event.error, "on_failure");
      })
      .on_failed(|event| async move {
        error!(job_id = %event.job_id, error = ?event.error, "on_failed");
      })
      .on_complete(|event| async move {
        info!(job_id = %event.job_id, "on_complete");
      }),
  );

  let id = queue
    .create_job(
      "charge",
      json!({ "amount": 42 }),
      JobOptions::new().attempts(3),
      false,
    )
    .await?;
  queue.start(None).await?;

  if let Some(job) = queue.get_jobs().await?.into_iter().find(|job| job.id == id) {
    info!(
      failed_attempts = job.meta.failed_attempts,
      errors = ?job.meta.errors,
      state = ?job.state(),
      "Job kept after exhausting attempts."
    );
  }
  info!("Handler ran {} times.", calls.load(Ordering::SeqCst));
  Ok(())
}
