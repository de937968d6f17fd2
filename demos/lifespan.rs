//! demos/lifespan.rs
//!
//! Runs the queue with a time budget, the way a background-fetch style task would:
//! only jobs whose timeout fits in the remaining time are claimed, and whatever is
//! left stays persisted for the next run.

use std::time::{Duration as StdDuration, Instant};

use serde_json::json;
use tracing::info;
use turnqueue::{JobOptions, Queue, WorkerOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,turnqueue=debug,lifespan=trace")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let path = std::env::temp_dir().join("turnqueue-lifespan-demo.json");
  let queue = Queue::builder().file_store(&path).build().await?;
  queue.flush_queue(None).await?;

  queue.add_worker(
    "upload",
    |id, payload| async move {
      info!(%id, "Uploading chunk {}", payload["chunk"]);
      tokio::time::sleep(StdDuration::from_millis(400)).await;
      Ok(())
    },
    WorkerOptions::new(),
  );

  for chunk in 0..8 {
    queue
      .create_job(
        "upload",
        json!({ "chunk": chunk }),
        JobOptions::new().timeout(600),
        false,
      )
      .await?;
  }
  // Unbounded jobs never run under a deadline.
  queue
    .create_job("upload", json!({ "chunk": "final" }), JobOptions::new().timeout(0), false)
    .await?;

  let started = Instant::now();
  queue.start(Some(StdDuration::from_secs(2))).await?;
  info!(
    elapsed_ms = started.elapsed().as_millis() as u64,
    left = queue.get_jobs().await?.len(),
    "Time-boxed run ended."
  );

  // A later run without a deadline picks up the rest, unbounded job included.
  queue.start(None).await?;
  info!(left = queue.get_jobs().await?.len(), "Unbounded run ended.");

  let _ = std::fs::remove_file(&path);
  Ok(())
}
