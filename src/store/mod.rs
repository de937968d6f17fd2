//! Persistence contracts for job records.
//!
//! The queue reads and mutates records exclusively through [`JobStore`]. Two
//! implementations are bundled: [`MemoryStore`] (process lifetime only) and
//! [`FileStore`] (a JSON snapshot on disk, rewritten on every mutation).

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::job::{Job, JobId};

/// Durable collection of job records.
///
/// Every call must reflect committed state to subsequent calls made by the same
/// task. `list_all` returns records in creation order.
#[async_trait]
pub trait JobStore: Send + Sync {
  /// Returns a snapshot of every record.
  async fn list_all(&self) -> Result<Vec<Job>, StoreError>;

  async fn create(&self, job: Job) -> Result<(), StoreError>;

  /// Replaces an existing record. Fails with `NotFound` if the id is unknown.
  async fn update(&self, job: &Job) -> Result<(), StoreError>;

  /// Replaces several records at once. Either all records are written or none
  /// are: an unknown id fails the whole call with `NotFound`.
  async fn update_all(&self, jobs: &[Job]) -> Result<(), StoreError>;

  /// Removes a record. Removing an unknown id is not an error.
  async fn delete(&self, id: JobId) -> Result<(), StoreError>;

  async fn delete_many(&self, ids: &[JobId]) -> Result<(), StoreError>;

  async fn delete_all(&self) -> Result<(), StoreError>;
}
