use crate::models::{NewResume, Resume, ResumeStatus, ResumeUpdate, VectorMatch, VectorMetadata};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Vector database access. Transport failures are logged by implementations and
/// surface only as `false` or an empty result.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Prepares the backing collection. Called once at startup.
    async fn connect(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn upsert(&self, vector_id: &str, vector: &[f32], metadata: &VectorMetadata) -> bool;

    /// Matches ordered by descending score, restricted to `score >= min_similarity`.
    async fn query(&self, vector: &[f32], top_k: usize, min_similarity: f64) -> Vec<VectorMatch>;

    async fn delete(&self, vector_id: &str) -> bool;

    async fn count(&self) -> u64 {
        0
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Document store for resume rows. Malformed ids behave like missing ones.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Prepares the backing index. Called once at startup.
    async fn connect(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn create(&self, resume: NewResume) -> Result<String, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Resume>, StoreError>;

    /// Returns `Ok(false)` when no row with `id` exists.
    async fn update(&self, id: &str, update: &ResumeUpdate) -> Result<bool, StoreError>;

    /// Applies `update` only while the row is still in `from`, atomically with
    /// respect to other writers. Returns `Ok(false)` when the row is missing or
    /// has already moved on.
    async fn transition(
        &self,
        id: &str,
        from: ResumeStatus,
        update: &ResumeUpdate,
    ) -> Result<bool, StoreError>;

    async fn list_by_status(
        &self,
        status: ResumeStatus,
        limit: usize,
    ) -> Result<Vec<Resume>, StoreError>;

    /// Rows in `status` uploaded before `before`, oldest first.
    async fn list_stale(
        &self,
        status: ResumeStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Resume>, StoreError>;

    /// Newest uploads first.
    async fn list_all(&self, skip: usize, limit: usize) -> Result<Vec<Resume>, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
