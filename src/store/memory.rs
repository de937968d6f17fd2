use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::JobStore;
use crate::error::StoreError;
use crate::job::{Job, JobId};

/// In-memory [`JobStore`]. Records live as long as the store.
///
/// Records are keyed by their time-ordered id, so iteration follows creation order.
#[derive(Debug, Default)]
pub struct MemoryStore {
  records: RwLock<BTreeMap<JobId, Job>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a store pre-populated with `jobs`.
  pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
    let records = jobs.into_iter().map(|job| (job.id, job)).collect();
    Self {
      records: RwLock::new(records),
    }
  }

  pub fn len(&self) -> usize {
    self.records.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.read().is_empty()
  }
}

/// Applies the batch to `records` only if every id already exists.
pub(super) fn replace_all(records: &mut BTreeMap<JobId, Job>, jobs: &[Job]) -> Result<(), StoreError> {
  if let Some(missing) = jobs.iter().find(|job| !records.contains_key(&job.id)) {
    return Err(StoreError::NotFound(missing.id));
  }
  for job in jobs {
    records.insert(job.id, job.clone());
  }
  Ok(())
}

#[async_trait]
impl JobStore for MemoryStore {
  async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
    Ok(self.records.read().values().cloned().collect())
  }

  async fn create(&self, job: Job) -> Result<(), StoreError> {
    self.records.write().insert(job.id, job);
    Ok(())
  }

  async fn update(&self, job: &Job) -> Result<(), StoreError> {
    match self.records.write().get_mut(&job.id) {
      Some(existing) => {
        *existing = job.clone();
        Ok(())
      }
      None => Err(StoreError::NotFound(job.id)),
    }
  }

  async fn update_all(&self, jobs: &[Job]) -> Result<(), StoreError> {
    replace_all(&mut self.records.write(), jobs)
  }

  async fn delete(&self, id: JobId) -> Result<(), StoreError> {
    self.records.write().remove(&id);
    Ok(())
  }

  async fn delete_many(&self, ids: &[JobId]) -> Result<(), StoreError> {
    let mut records = self.records.write();
    for id in ids {
      records.remove(id);
    }
    Ok(())
  }

  async fn delete_all(&self) -> Result<(), StoreError> {
    self.records.write().clear();
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::job::JobOptions;
  use serde_json::json;

  fn job(name: &str) -> Job {
    Job::new(name.to_string(), json!(null), JobOptions::new().resolve().unwrap())
  }

  #[tokio::test]
  async fn update_all_is_all_or_nothing() {
    let store = MemoryStore::new();
    let mut known = job("a");
    store.create(known.clone()).await.unwrap();
    let unknown = job("b");

    known.active = true;
    let result = store.update_all(&[known.clone(), unknown.clone()]).await;
    assert!(matches!(result, Err(StoreError::NotFound(id)) if id == unknown.id));
    assert!(!store.list_all().await.unwrap()[0].active);
  }

  #[tokio::test]
  async fn update_of_deleted_record_is_not_found() {
    let store = MemoryStore::new();
    let record = job("a");
    store.create(record.clone()).await.unwrap();
    store.delete(record.id).await.unwrap();
    store.delete(record.id).await.unwrap();
    assert!(matches!(
      store.update(&record).await,
      Err(StoreError::NotFound(_))
    ));
    assert!(store.is_empty());
  }

  #[tokio::test]
  async fn list_all_follows_creation_order() {
    let first = job("a");
    let second = job("b");
    let store = MemoryStore::with_jobs(vec![second.clone(), first.clone()]);
    let ids: Vec<JobId> = store.list_all().await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
  }
}
