//! TurnQueue: An Embedded, Persistent Job Queue for Tokio
//!
//! Register named workers, enqueue jobs with a JSON payload and scheduling options,
//! and let the queue drain them with bounded concurrency, priority ordering, retries,
//! and optional time-boxed runs (for environments where background processing time
//! is limited).
//!
//! # Features
//!
//! - Jobs carry a `priority` (lower runs first), a `timeout` (milliseconds, `0` for
//!   unbounded) and an `attempts` ceiling.
//! - Each scheduling cycle claims a *batch*: up to the worker's `concurrency` jobs
//!   sharing the name of the highest-priority, oldest eligible job. The whole batch
//!   settles before the next one is claimed; one job's failure never affects its
//!   siblings.
//! - Failed jobs are retried until `attempts` failures accumulate, after which they
//!   stay in the store, marked failed, with their full error history.
//! - Lifecycle callbacks per worker: `on_start`, `on_success`, `on_failure`,
//!   `on_failed`, `on_complete`. Transient (network/timeout) failures are retried
//!   silently.
//! - Optional lifespan for a run: only jobs whose timeout fits in the remaining time
//!   are claimed.
//! - Pluggable storage through the [`JobStore`] trait, with bundled in-memory and
//!   JSON-file stores.
//! - Metrics snapshots ([`MetricsSnapshot`]) and `tracing` instrumentation.
//! - Optional task-local job context (`JobContext`) for handlers (requires the
//!   `job_context` feature, enabled by default).
//!
//! # Usage
//!
//! ```no_run
//! use turnqueue::{JobError, JobOptions, Queue, WorkerOptions};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = Queue::builder().file_store("jobs.json").build().await?;
//!
//!     queue.add_worker(
//!         "send-email",
//!         |id, payload| async move {
//!             println!("Job {} sending to {}", id, payload["to"]);
//!             if payload["to"].is_null() {
//!                 return Err(JobError::new("missing recipient"));
//!             }
//!             Ok(())
//!         },
//!         WorkerOptions::new()
//!             .concurrency(4)
//!             .on_failed(|event| async move {
//!                 eprintln!("Job {} gave up: {:?}", event.job_id, event.error);
//!             }),
//!     );
//!
//!     // Enqueue without starting, then drain for at most 30 seconds.
//!     queue
//!         .create_job(
//!             "send-email",
//!             json!({ "to": "someone@example.com" }),
//!             JobOptions::new().attempts(3).timeout(5_000),
//!             false,
//!         )
//!         .await?;
//!     queue.start(Some(Duration::from_secs(30))).await?;
//!
//!     println!("Remaining jobs: {}", queue.get_jobs().await?.len());
//!     Ok(())
//! }
//! ```
//!
//! # Observability
//!
//! - Retrieve metrics snapshots using [`Queue::metrics_snapshot`].
//! - Inspect records (including permanently failed ones) with [`Queue::get_jobs`].
//! - Integrate with the `tracing` crate for detailed logs; each processed job runs
//!   inside a `job_exec` span.

mod coordinator;
pub mod error;
pub mod job;
pub mod metrics;
mod processor;
pub mod queue;
pub mod store;
pub mod worker;

// --- Public Re-exports ---

pub use queue::{Queue, QueueBuilder, QueueStatus, StoreConfig};

pub use error::{BuildError, JobError, JobErrorKind, QueueError, StoreError, ValidationError};

pub use job::{Job, JobId, JobOptions, JobState, RetryMeta, DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT_MS};
#[cfg(feature = "job_context")]
pub use job::context::{try_get_current_job_context, JobContext};

pub use store::{FileStore, JobStore, MemoryStore};

pub use worker::{JobEvent, LifecycleKind, WorkerOptions, WorkerRegistry};

pub use metrics::{MetricsSnapshot, QueueMetrics};
