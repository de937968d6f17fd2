use crate::error::StoreError;
use crate::job::{Job, JobId};
use crate::processor::JobProcessor;
use crate::queue::QueueShared;

use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, error, info, trace};

/// Margin kept between a job's timeout and the remaining lifespan: only jobs whose
/// timeout is below `remaining - DEADLINE_BUFFER_MS` are claimed.
pub(crate) const DEADLINE_BUFFER_MS: i64 = 499;

/// Milliseconds left of `lifespan` after `elapsed`.
///
/// An exact zero is reported as `-1`, so an exhausted lifespan is never mistaken
/// for "no deadline".
pub(crate) fn remaining_ms(lifespan: Duration, elapsed: Duration) -> i64 {
  let lifespan = i64::try_from(lifespan.as_millis()).unwrap_or(i64::MAX);
  let elapsed = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
  match lifespan.saturating_sub(elapsed) {
    0 => -1,
    remaining => remaining,
  }
}

/// Exclusive upper bound on job timeouts given `remaining` milliseconds.
pub(crate) fn timeout_upper_bound(remaining: i64) -> u64 {
  remaining.saturating_sub(DEADLINE_BUFFER_MS).max(0) as u64
}

/// Whether `job` may be claimed. With a deadline, unbounded (`timeout == 0`) jobs
/// and jobs that could outlast it are skipped.
fn is_selectable(job: &Job, upper_bound: Option<u64>) -> bool {
  job.is_eligible()
    && match upper_bound {
      None => true,
      Some(bound) => job.timeout > 0 && job.timeout < bound,
    }
}

/// Marks the run finished when dropped, so a cancelled `start()` future does not
/// leave the queue stuck in the active state.
struct RunGuard {
  shared: Arc<QueueShared>,
  generation: u64,
}

impl Drop for RunGuard {
  fn drop(&mut self) {
    self.shared.finish_run(self.generation);
  }
}

/// Drives one run of the scheduling loop: claim a batch, process it, repeat.
pub(crate) struct Coordinator {
  shared: Arc<QueueShared>,
  processor: JobProcessor,
  generation: u64,
}

impl Coordinator {
  /// Creates a coordinator for the run identified by `generation`.
  /// The caller must already have moved the queue into the active state.
  pub fn new(shared: Arc<QueueShared>, generation: u64) -> Self {
    let processor = JobProcessor::new(shared.clone());
    Self {
      shared,
      processor,
      generation,
    }
  }

  /// Runs until no eligible work remains, the queue is stopped, or the lifespan
  /// is exhausted. The queue is inactive again when this returns.
  pub async fn run(self, lifespan: Option<Duration>) -> Result<(), StoreError> {
    let _guard = RunGuard {
      shared: self.shared.clone(),
      generation: self.generation,
    };
    self
      .shared
      .metrics
      .runs_started
      .fetch_add(1, AtomicOrdering::Relaxed);
    info!(
      generation = self.generation,
      lifespan_ms = lifespan.map(|l| l.as_millis() as u64),
      "Queue run started."
    );

    let result = self.drive(lifespan).await;
    match &result {
      Ok(()) => info!(generation = self.generation, "Queue run finished."),
      Err(e) => error!(generation = self.generation, error = %e, "Queue run aborted by store error."),
    }
    result
  }

  async fn drive(&self, lifespan: Option<Duration>) -> Result<(), StoreError> {
    let started = Instant::now();

    while self.shared.is_current_run(self.generation) {
      let remaining = lifespan.map(|l| remaining_ms(l, started.elapsed()));
      let batch = self.next_batch(remaining).await?;
      if batch.is_empty() {
        debug!(?remaining, "No eligible jobs left.");
        break;
      }

      // Every job settles before the next batch is claimed; failures are absorbed
      // by the processor, so one job never cuts its siblings short.
      join_all(batch.into_iter().map(|job| self.processor.process(job))).await;
    }

    if !self.shared.is_current_run(self.generation) {
      info!(generation = self.generation, "Queue run stopped at batch boundary.");
    }
    Ok(())
  }

  /// Claims the next batch: up to `concurrency` eligible jobs sharing the name of
  /// the highest-priority, oldest eligible job.
  ///
  /// Claimed jobs are marked active in one `update_all` and then read back by id,
  /// in scheduling order. If a selected record disappears before the claim (a
  /// concurrent flush), nothing is claimed and selection starts over.
  pub(crate) async fn next_batch(&self, remaining: Option<i64>) -> Result<Vec<Job>, StoreError> {
    let store = &self.shared.store;
    let upper_bound = remaining.map(timeout_upper_bound);

    let (name, concurrency, batch) = loop {
      let mut eligible: Vec<Job> = store
        .list_all()
        .await?
        .into_iter()
        .filter(|job| is_selectable(job, upper_bound))
        .collect();
      eligible.sort_by(Job::schedule_order);

      let Some(head) = eligible.first() else {
        trace!(?upper_bound, "Selection found no eligible job.");
        return Ok(Vec::new());
      };
      let name = head.name.clone();
      let concurrency = self.shared.workers.concurrency_of(&name);

      let mut batch: Vec<Job> = eligible
        .into_iter()
        .filter(|job| job.name == name)
        .take(concurrency)
        .collect();
      for job in &mut batch {
        job.active = true;
      }
      match store.update_all(&batch).await {
        Ok(()) => break (name, concurrency, batch),
        Err(StoreError::NotFound(job_id)) => {
          debug!(%job_id, "Selected job vanished before the claim; reselecting.");
        }
        Err(e) => return Err(e),
      }
    };

    let mut current: HashMap<JobId, Job> = store
      .list_all()
      .await?
      .into_iter()
      .map(|job| (job.id, job))
      .collect();
    let claimed: Vec<Job> = batch
      .iter()
      .filter_map(|job| current.remove(&job.id))
      .collect();

    let metrics = &self.shared.metrics;
    metrics.batches_claimed.fetch_add(1, AtomicOrdering::Relaxed);
    metrics
      .jobs_claimed
      .fetch_add(claimed.len(), AtomicOrdering::Relaxed);
    debug!(
      job_name = %name,
      concurrency,
      claimed = claimed.len(),
      ?upper_bound,
      "Claimed batch."
    );
    Ok(claimed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::job::JobOptions;
  use crate::worker::WorkerOptions;
  use crate::Queue;
  use serde_json::json;

  #[test]
  fn remaining_time_never_reports_zero() {
    let lifespan = Duration::from_millis(1_000);
    assert_eq!(remaining_ms(lifespan, Duration::from_millis(600)), 400);
    assert_eq!(remaining_ms(lifespan, Duration::from_millis(1_000)), -1);
    assert_eq!(remaining_ms(lifespan, Duration::from_millis(1_200)), -200);
  }

  #[test]
  fn upper_bound_keeps_a_buffer() {
    assert_eq!(timeout_upper_bound(600), 101);
    assert_eq!(timeout_upper_bound(500), 1);
    assert_eq!(timeout_upper_bound(400), 0);
    assert_eq!(timeout_upper_bound(-1), 0);
  }

  async fn queue_with_workers() -> Queue {
    let queue = Queue::builder().build().await.unwrap();
    queue.add_worker("a", |_, _| async { Ok(()) }, WorkerOptions::new());
    queue.add_worker("b", |_, _| async { Ok(()) }, WorkerOptions::new().concurrency(2));
    queue
  }

  fn coordinator(queue: &Queue) -> Coordinator {
    Coordinator::new(queue.shared.clone(), 0)
  }

  #[tokio::test]
  async fn deadline_excludes_long_and_unbounded_jobs() {
    let queue = queue_with_workers().await;
    let long = queue
      .create_job("a", json!(1), JobOptions::new().timeout(600), false)
      .await
      .unwrap();
    let short = queue
      .create_job("a", json!(2), JobOptions::new().timeout(50), false)
      .await
      .unwrap();
    queue
      .create_job("a", json!(3), JobOptions::new().timeout(0), false)
      .await
      .unwrap();

    let coordinator = coordinator(&queue);
    assert!(coordinator.next_batch(Some(400)).await.unwrap().is_empty());

    let batch = coordinator.next_batch(Some(600)).await.unwrap();
    let ids: Vec<JobId> = batch.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![short]);
    assert!(batch[0].active);

    // Nothing else fits: the 600ms job is too long, the unbounded one never runs under a deadline.
    assert!(coordinator.next_batch(Some(600)).await.unwrap().is_empty());
    let jobs = queue.get_jobs().await.unwrap();
    assert!(jobs.iter().any(|j| j.id == long && !j.active));
  }

  #[tokio::test]
  async fn batch_is_single_named_and_bounded_by_concurrency() {
    let queue = queue_with_workers().await;
    let mut b_ids = Vec::new();
    for i in 0..3 {
      b_ids.push(
        queue
          .create_job("b", json!(i), JobOptions::new().priority(-1), false)
          .await
          .unwrap(),
      );
    }
    queue
      .create_job("a", json!("x"), JobOptions::new(), false)
      .await
      .unwrap();

    let coordinator = coordinator(&queue);
    let first = coordinator.next_batch(None).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|j| j.name == "b" && j.active));
    assert_eq!(first[0].id, b_ids[0]);
    assert_eq!(first[1].id, b_ids[1]);

    // Claimed jobs are no longer eligible.
    let second = coordinator.next_batch(None).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, b_ids[2]);

    let third = coordinator.next_batch(None).await.unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].name, "a");

    assert!(coordinator.next_batch(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn selection_skips_permanently_failed_jobs() {
    let queue = queue_with_workers().await;
    let id = queue
      .create_job("a", json!(null), JobOptions::new(), false)
      .await
      .unwrap();
    let mut job = queue
      .get_jobs()
      .await
      .unwrap()
      .into_iter()
      .find(|j| j.id == id)
      .unwrap();
    job.failed = Some(chrono::Utc::now());
    queue.shared.store.update(&job).await.unwrap();

    assert!(coordinator(&queue).next_batch(None).await.unwrap().is_empty());
  }
}
