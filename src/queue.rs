use crate::coordinator::Coordinator;
use crate::error::{BuildError, JobError, QueueError, StoreError, ValidationError};
use crate::job::{Job, JobId, JobOptions};
use crate::metrics::{MetricsSnapshot, QueueMetrics};
use crate::store::{FileStore, JobStore, MemoryStore};
use crate::worker::{WorkerOptions, WorkerRegistry};

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Whether the scheduling loop is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  Inactive,
  Active,
}

/// Run state published to observers. `generation` identifies the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunState {
  pub status: QueueStatus,
  pub generation: u64,
}

/// Where the queue keeps its job records.
#[derive(Clone, Default)]
pub enum StoreConfig {
  /// Records live in memory for the lifetime of the queue.
  #[default]
  Memory,
  /// Records persist in a JSON file at the given path.
  File(PathBuf),
  /// A caller-provided store.
  Custom(Arc<dyn JobStore>),
}

impl fmt::Debug for StoreConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StoreConfig::Memory => f.write_str("Memory"),
      StoreConfig::File(path) => f.debug_tuple("File").field(path).finish(),
      StoreConfig::Custom(_) => f.write_str("Custom(<dyn JobStore>)"),
    }
  }
}

/// Builder for configuring and creating a [`Queue`].
///
/// # Example
///
/// ```no_run
/// use turnqueue::Queue;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = Queue::builder()
///     .file_store("/var/lib/myapp/jobs.json")
///     .execute_failed_jobs_on_start(true)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct QueueBuilder {
  store: StoreConfig,
  execute_failed_jobs_on_start: bool,
}

impl QueueBuilder {
  /// Creates a builder with an in-memory store and no failed-job reset.
  pub fn new() -> Self {
    Self::default()
  }

  /// Keeps records in memory only (the default).
  pub fn memory_store(mut self) -> Self {
    self.store = StoreConfig::Memory;
    self
  }

  /// Persists records in a JSON file at `path` (created on first write).
  pub fn file_store(mut self, path: impl Into<PathBuf>) -> Self {
    self.store = StoreConfig::File(path.into());
    self
  }

  /// Uses a caller-provided store implementation.
  pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
    self.store = StoreConfig::Custom(store);
    self
  }

  /// Sets the store from a [`StoreConfig`], e.g. one read from application settings.
  pub fn store_config(mut self, config: StoreConfig) -> Self {
    self.store = config;
    self
  }

  /// When set, the next successful `create_job` call first clears the `failed`
  /// mark of every permanently failed job, making them eligible again. This
  /// happens at most once per queue.
  pub fn execute_failed_jobs_on_start(mut self, enabled: bool) -> Self {
    self.execute_failed_jobs_on_start = enabled;
    self
  }

  /// Opens the store and returns a ready, inactive queue.
  ///
  /// Claims left behind by a previous process (records still marked active) are
  /// released, since nothing can be executing them.
  ///
  /// # Errors
  ///
  /// Returns `BuildError::Store` if the store cannot be opened or read.
  pub async fn build(self) -> Result<Queue, BuildError> {
    let store: Arc<dyn JobStore> = match self.store {
      StoreConfig::Memory => Arc::new(MemoryStore::new()),
      StoreConfig::File(path) => Arc::new(FileStore::open(path).await?),
      StoreConfig::Custom(store) => store,
    };
    release_stale_claims(store.as_ref()).await?;

    let (run_state, _) = watch::channel(RunState {
      status: QueueStatus::Inactive,
      generation: 0,
    });

    Ok(Queue {
      shared: Arc::new(QueueShared {
        store,
        workers: WorkerRegistry::new(),
        metrics: QueueMetrics::new(),
        run_state,
        execute_failed_jobs_on_start: AtomicBool::new(self.execute_failed_jobs_on_start),
      }),
    })
  }
}

async fn release_stale_claims(store: &dyn JobStore) -> Result<(), StoreError> {
  let mut stale: Vec<Job> = store
    .list_all()
    .await?
    .into_iter()
    .filter(|job| job.active)
    .collect();
  if stale.is_empty() {
    return Ok(());
  }
  for job in &mut stale {
    job.active = false;
  }
  store.update_all(&stale).await?;
  warn!(count = stale.len(), "Released stale job claims left by a previous run.");
  Ok(())
}

/// State shared between the queue handle and its runs.
pub(crate) struct QueueShared {
  pub store: Arc<dyn JobStore>,
  pub workers: WorkerRegistry,
  pub metrics: QueueMetrics,
  pub run_state: watch::Sender<RunState>,
  pub execute_failed_jobs_on_start: AtomicBool,
}

impl QueueShared {
  /// Moves the queue from inactive to active, returning the new run's generation.
  /// Returns `None` if a run is already active.
  pub fn try_begin_run(&self) -> Option<u64> {
    let mut generation = None;
    self.run_state.send_if_modified(|state| {
      if state.status == QueueStatus::Active {
        return false;
      }
      state.status = QueueStatus::Active;
      state.generation += 1;
      generation = Some(state.generation);
      true
    });
    generation
  }

  /// Whether `generation` is still the active run.
  pub fn is_current_run(&self, generation: u64) -> bool {
    let state = self.run_state.borrow();
    state.status == QueueStatus::Active && state.generation == generation
  }

  /// Marks run `generation` inactive, unless a newer run has taken over.
  pub fn finish_run(&self, generation: u64) {
    self.run_state.send_if_modified(|state| {
      if state.status == QueueStatus::Active && state.generation == generation {
        state.status = QueueStatus::Inactive;
        true
      } else {
        false
      }
    });
  }

  fn stop(&self) -> bool {
    self.run_state.send_if_modified(|state| {
      if state.status == QueueStatus::Active {
        state.status = QueueStatus::Inactive;
        true
      } else {
        false
      }
    })
  }
}

/// An embedded job queue.
///
/// Register workers with [`Queue::add_worker`], enqueue jobs with
/// [`Queue::create_job`], and let the queue drain them: it repeatedly claims a batch
/// of same-named jobs (bounded by the worker's concurrency, in priority then age
/// order), runs the batch to completion, and retries failed jobs until their
/// attempts are exhausted.
///
/// The handle is cheap to clone; clones share the same store, workers and run state.
///
/// Use [`Queue::builder()`] to create an instance.
#[derive(Clone)]
pub struct Queue {
  pub(crate) shared: Arc<QueueShared>,
}

impl fmt::Debug for Queue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Queue")
      .field("status", &self.status())
      .field("workers", &self.shared.workers.names())
      .finish()
  }
}

impl Queue {
  /// Returns a builder to configure and create a `Queue`.
  pub fn builder() -> QueueBuilder {
    QueueBuilder::new()
  }

  /// Validates and persists a new job, returning its id.
  ///
  /// When `start_queue` is `true` and the queue is inactive, a run is started on a
  /// spawned task; this call does not wait for it. The queue is already active
  /// when this returns, so [`Queue::wait_until_idle`] observes that run.
  ///
  /// # Errors
  ///
  /// - [`QueueError::Validation`]: empty name, negative timeout or negative attempts.
  ///   Nothing is persisted.
  /// - [`QueueError::Store`]: the store rejected the write.
  pub async fn create_job(
    &self,
    name: &str,
    payload: Value,
    options: JobOptions,
    start_queue: bool,
  ) -> Result<JobId, QueueError> {
    if name.is_empty() {
      return Err(ValidationError::MissingName.into());
    }
    let settings = options.resolve()?;

    let reset_flag = &self.shared.execute_failed_jobs_on_start;
    if reset_flag.swap(false, AtomicOrdering::SeqCst) {
      if let Err(e) = self.reset_failed_jobs().await {
        // Not consumed: the next admission tries again.
        reset_flag.store(true, AtomicOrdering::SeqCst);
        return Err(e.into());
      }
    }

    let job = Job::new(name.to_string(), payload, settings);
    let job_id = job.id;
    self.shared.store.create(job).await?;
    self
      .shared
      .metrics
      .jobs_created
      .fetch_add(1, AtomicOrdering::Relaxed);
    debug!(%job_id, job_name = name, ?settings, "Job created.");

    if start_queue {
      self.spawn_run();
    }
    Ok(job_id)
  }

  async fn reset_failed_jobs(&self) -> Result<(), StoreError> {
    let store = &self.shared.store;
    let mut failed: Vec<Job> = store
      .list_all()
      .await?
      .into_iter()
      .filter(|job| job.failed.is_some())
      .collect();
    for job in &mut failed {
      job.failed = None;
    }
    if !failed.is_empty() {
      store.update_all(&failed).await?;
    }
    info!(count = failed.len(), "Cleared permanently failed jobs for re-execution.");
    Ok(())
  }

  fn spawn_run(&self) {
    if let Some(generation) = self.shared.try_begin_run() {
      let coordinator = Coordinator::new(self.shared.clone(), generation);
      tokio::spawn(async move {
        // Store errors are logged by the run itself.
        let _ = coordinator.run(None).await;
      });
    }
  }

  /// Runs the scheduling loop on the calling task until no eligible job remains,
  /// [`Queue::stop`] is called, or `lifespan` is used up.
  ///
  /// With a lifespan, only jobs with a non-zero timeout at least ~500ms shorter than
  /// the remaining time are claimed. The lifespan is soft: a batch that already
  /// started is never interrupted. `None` or a zero duration means no deadline.
  ///
  /// Returns `Ok(false)` without doing anything if the queue is already running,
  /// and `Ok(true)` once this run has ended.
  ///
  /// # Errors
  ///
  /// - [`QueueError::Store`]: the store failed while selecting jobs. The queue is
  ///   inactive again.
  pub async fn start(&self, lifespan: Option<Duration>) -> Result<bool, QueueError> {
    let lifespan = lifespan.filter(|l| !l.is_zero());
    let Some(generation) = self.shared.try_begin_run() else {
      info!("Queue is already running; start ignored.");
      return Ok(false);
    };
    Coordinator::new(self.shared.clone(), generation)
      .run(lifespan)
      .await?;
    Ok(true)
  }

  /// Requests the running loop to stop. The current batch runs to completion.
  pub fn stop(&self) {
    if self.shared.stop() {
      info!("Queue stop requested.");
    }
  }

  pub fn status(&self) -> QueueStatus {
    self.shared.run_state.borrow().status
  }

  pub fn is_running(&self) -> bool {
    self.status() == QueueStatus::Active
  }

  /// Waits until the queue is inactive (returns immediately if it already is).
  pub async fn wait_until_idle(&self) {
    let mut rx = self.shared.run_state.subscribe();
    let _ = rx
      .wait_for(|state| state.status == QueueStatus::Inactive)
      .await;
  }

  /// Returns a snapshot of every job record, including claimed and failed ones.
  pub async fn get_jobs(&self) -> Result<Vec<Job>, QueueError> {
    Ok(self.shared.store.list_all().await?)
  }

  /// Deletes every job named `name`, or every job when `name` is `None`.
  ///
  /// Independent of the run state: a claimed job that is flushed still finishes
  /// executing, but its outcome is no longer recorded.
  pub async fn flush_queue(&self, name: Option<&str>) -> Result<(), QueueError> {
    let store = &self.shared.store;
    let records = store.list_all().await?;
    let count = match name {
      Some(name) => {
        let ids: Vec<JobId> = records
          .into_iter()
          .filter(|job| job.name == name)
          .map(|job| job.id)
          .collect();
        store.delete_many(&ids).await?;
        ids.len()
      }
      None => {
        store.delete_all().await?;
        records.len()
      }
    };
    self
      .shared
      .metrics
      .jobs_flushed
      .fetch_add(count, AtomicOrdering::Relaxed);
    info!(job_name = ?name, count, "Flushed jobs.");
    Ok(())
  }

  /// Registers the handler for jobs named `name`, replacing any existing worker.
  pub fn add_worker<F, Fut>(&self, name: impl Into<String>, handler: F, options: WorkerOptions)
  where
    F: Fn(JobId, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
  {
    self.shared.workers.register(name, handler, options);
  }

  /// Removes the worker for `name`. Pending jobs with that name stay in the store
  /// and fail when executed.
  pub fn remove_worker(&self, name: &str) -> bool {
    self.shared.workers.unregister(name)
  }

  pub fn worker_names(&self) -> Vec<String> {
    self.shared.workers.names()
  }

  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}
