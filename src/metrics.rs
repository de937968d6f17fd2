use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without percentile information.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  /// Gets the total number of observations recorded.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Gets the total sum of durations recorded (in microseconds).
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Atomic counters describing queue activity.
///
/// Cloning only clones the `Arc`s, so the queue handle and its runs share the
/// same underlying values.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
  // --- Counters ---
  /// Jobs persisted by `create_job`.
  pub jobs_created: Arc<AtomicUsize>,
  /// Executions that completed successfully (record deleted).
  pub jobs_succeeded: Arc<AtomicUsize>,
  /// Executions that failed, including transient failures.
  pub job_attempts_failed: Arc<AtomicUsize>,
  /// Jobs that exhausted their attempts.
  pub jobs_permanently_failed: Arc<AtomicUsize>,
  /// Non-empty batches claimed by the scheduling loop.
  pub batches_claimed: Arc<AtomicUsize>,
  /// Jobs claimed across all batches.
  pub jobs_claimed: Arc<AtomicUsize>,
  /// Failed attempts whose lifecycle callbacks were suppressed as transient.
  pub callbacks_suppressed: Arc<AtomicUsize>,
  /// Runs of the scheduling loop that were started.
  pub runs_started: Arc<AtomicUsize>,
  /// Records removed by `flush_queue`.
  pub jobs_flushed: Arc<AtomicUsize>,

  // --- Gauges ---
  /// Jobs currently executing.
  pub jobs_in_flight: Arc<AtomicUsize>,

  // --- Histograms ---
  /// Handler execution durations.
  pub job_execution_duration: Arc<SimpleHistogram>,
}

impl QueueMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_created: self.jobs_created.load(order),
      jobs_succeeded: self.jobs_succeeded.load(order),
      job_attempts_failed: self.job_attempts_failed.load(order),
      jobs_permanently_failed: self.jobs_permanently_failed.load(order),
      batches_claimed: self.batches_claimed.load(order),
      jobs_claimed: self.jobs_claimed.load(order),
      callbacks_suppressed: self.callbacks_suppressed.load(order),
      runs_started: self.runs_started.load(order),
      jobs_flushed: self.jobs_flushed.load(order),
      jobs_in_flight: self.jobs_in_flight.load(order),
      job_execution_duration_count: self.job_execution_duration.get_count(),
      job_execution_duration_sum_micros: self.job_execution_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the queue's metrics at a specific point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
  // Counters
  pub jobs_created: usize,
  pub jobs_succeeded: usize,
  pub job_attempts_failed: usize,
  pub jobs_permanently_failed: usize,
  pub batches_claimed: usize,
  pub jobs_claimed: usize,
  pub callbacks_suppressed: usize,
  pub runs_started: usize,
  pub jobs_flushed: usize,
  // Gauges
  pub jobs_in_flight: usize,
  // Histogram Data
  pub job_execution_duration_count: usize,
  pub job_execution_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean handler execution duration in microseconds, if any job ran.
  pub fn mean_execution_duration_micros(&self) -> Option<f64> {
    if self.job_execution_duration_count == 0 {
      None
    } else {
      Some(self.job_execution_duration_sum_micros as f64 / self.job_execution_duration_count as f64)
    }
  }

  /// Mean handler execution duration, if any job ran.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    self
      .mean_execution_duration_micros()
      .map(|micros| Duration::from_micros(micros as u64))
  }
}
