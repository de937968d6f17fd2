use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::memory::replace_all;
use super::JobStore;
use crate::error::StoreError;
use crate::job::{Job, JobId};

/// Persistent [`JobStore`] backed by a single JSON file.
///
/// The whole record set is kept in memory and the file is rewritten after every
/// mutation (written to a sibling temp file, then renamed over the original).
/// The lock is held across the write so the file always reflects the latest
/// committed state.
#[derive(Debug)]
pub struct FileStore {
  path: PathBuf,
  records: Mutex<BTreeMap<JobId, Job>>,
}

impl FileStore {
  /// Opens the store at `path`, loading existing records.
  /// A missing file is treated as an empty store and created on first write.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref().to_path_buf();
    let records = match tokio::fs::read(&path).await {
      Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
      Ok(bytes) => {
        let jobs: Vec<Job> = serde_json::from_slice(&bytes)?;
        jobs.into_iter().map(|job| (job.id, job)).collect()
      }
      Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
      Err(e) => return Err(e.into()),
    };
    info!(path = %path.display(), records = records.len(), "Opened job store file.");
    Ok(Self {
      path,
      records: Mutex::new(records),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Writes `next` to disk and only then makes it the visible record set, so a
  /// failed write leaves both the file and memory unchanged.
  async fn commit(
    &self,
    records: &mut BTreeMap<JobId, Job>,
    next: BTreeMap<JobId, Job>,
  ) -> Result<(), StoreError> {
    self.persist(&next).await?;
    *records = next;
    Ok(())
  }

  async fn persist(&self, records: &BTreeMap<JobId, Job>) -> Result<(), StoreError> {
    let jobs: Vec<&Job> = records.values().collect();
    let bytes = serde_json::to_vec_pretty(&jobs)?;

    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = self.path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, &self.path).await?;
    debug!(path = %self.path.display(), records = jobs.len(), "Persisted job store.");
    Ok(())
  }
}

#[async_trait]
impl JobStore for FileStore {
  async fn list_all(&self) -> Result<Vec<Job>, StoreError> {
    Ok(self.records.lock().await.values().cloned().collect())
  }

  async fn create(&self, job: Job) -> Result<(), StoreError> {
    let mut records = self.records.lock().await;
    let mut next = records.clone();
    next.insert(job.id, job);
    self.commit(&mut records, next).await
  }

  async fn update(&self, job: &Job) -> Result<(), StoreError> {
    let mut records = self.records.lock().await;
    if !records.contains_key(&job.id) {
      return Err(StoreError::NotFound(job.id));
    }
    let mut next = records.clone();
    next.insert(job.id, job.clone());
    self.commit(&mut records, next).await
  }

  async fn update_all(&self, jobs: &[Job]) -> Result<(), StoreError> {
    let mut records = self.records.lock().await;
    let mut next = records.clone();
    replace_all(&mut next, jobs)?;
    self.commit(&mut records, next).await
  }

  async fn delete(&self, id: JobId) -> Result<(), StoreError> {
    let mut records = self.records.lock().await;
    if !records.contains_key(&id) {
      return Ok(());
    }
    let mut next = records.clone();
    next.remove(&id);
    self.commit(&mut records, next).await
  }

  async fn delete_many(&self, ids: &[JobId]) -> Result<(), StoreError> {
    let mut records = self.records.lock().await;
    if !ids.iter().any(|id| records.contains_key(id)) {
      return Ok(());
    }
    let mut next = records.clone();
    for id in ids {
      next.remove(id);
    }
    self.commit(&mut records, next).await
  }

  async fn delete_all(&self) -> Result<(), StoreError> {
    let mut records = self.records.lock().await;
    self.commit(&mut records, BTreeMap::new()).await
  }
}
