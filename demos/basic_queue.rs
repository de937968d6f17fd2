//! demos/basic_queue.rs
//!
//! Registers two workers, enqueues a handful of jobs with different priorities,
//! and drains the queue once.

use std::time::Duration as StdDuration;

use serde_json::json;
use tracing::info;
use turnqueue::{JobOptions, Queue, WorkerOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,turnqueue=info,basic_queue=trace")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  // --- Build Queue ---
  let queue = Queue::builder().build().await?;

  queue.add_worker(
    "thumbnail",
    |id, payload| async move {
      info!(%id, "Rendering thumbnail for {}", payload["image"]);
      tokio::time::sleep(StdDuration::from_millis(100)).await;
      Ok(())
    },
    // Up to three thumbnails render side by side.
    WorkerOptions::new().concurrency(3),
  );
  queue.add_worker(
    "notify",
    |id, payload| async move {
      info!(%id, "Notifying {}", payload["user"]);
      Ok(())
    },
    WorkerOptions::new().on_complete(|event| async move {
      info!(job_id = %event.job_id, "Notification finished.");
    }),
  );

  // --- Enqueue ---
  for image in ["a.png", "b.png", "c.png", "d.png"] {
    queue
      .create_job("thumbnail", json!({ "image": image }), JobOptions::new(), false)
      .await?;
  }
  // Lower priority values run first, so the notification jumps the queue.
  queue
    .create_job(
      "notify",
      json!({ "user": "ops" }),
      JobOptions::new().priority(-1),
      false,
    )
    .await?;
  info!("Queued {} jobs.", queue.get_jobs().await?.len());

  // --- Drain ---
  queue.start(None).await?;

  let metrics = queue.metrics_snapshot();
  info!(
    succeeded = metrics.jobs_succeeded,
    batches = metrics.batches_claimed,
    "Queue drained."
  );
  Ok(())
}
