use super::is_valid_resume_id;
use crate::models::{NewResume, Resume, ResumeStatus, ResumeUpdate, VectorMatch, VectorMetadata};
use crate::traits::{DocumentStore, VectorIndex};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local document store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    rows: RwLock<HashMap<String, Resume>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, resume: Resume) {
        self.rows.write().await.insert(resume.id.clone(), resume);
    }
}

fn newest_first(rows: &mut [Resume]) {
    rows.sort_by(|left, right| {
        right
            .upload_date
            .cmp(&left.upload_date)
            .then_with(|| left.id.cmp(&right.id))
    });
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, resume: NewResume) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        let row = Resume {
            id: id.clone(),
            filename: resume.filename,
            upload_date: resume.upload_date,
            status: ResumeStatus::Processing,
            file_size: Some(resume.file_size),
            content: None,
            metadata: None,
            vector_id: None,
            error_message: None,
        };
        self.rows.write().await.insert(id.clone(), row);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Resume>, StoreError> {
        if !is_valid_resume_id(id) {
            return Ok(None);
        }
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn update(&self, id: &str, update: &ResumeUpdate) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(id) {
            Some(row) => {
                row.apply(update.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn transition(
        &self,
        id: &str,
        from: ResumeStatus,
        update: &ResumeUpdate,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(id) {
            Some(row) if row.status == from => {
                row.apply(update.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_stale(
        &self,
        status: ResumeStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Resume>, StoreError> {
        let mut rows: Vec<Resume> = self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.status == status && row.upload_date < before)
            .cloned()
            .collect();
        rows.sort_by(|left, right| {
            left.upload_date
                .cmp(&right.upload_date)
                .then_with(|| left.id.cmp(&right.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_by_status(
        &self,
        status: ResumeStatus,
        limit: usize,
    ) -> Result<Vec<Resume>, StoreError> {
        let mut rows: Vec<Resume> = self
            .rows
            .read()
            .await
            .values()
            .filter(|row| row.status == status)
            .cloned()
            .collect();
        newest_first(&mut rows);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_all(&self, skip: usize, limit: usize) -> Result<Vec<Resume>, StoreError> {
        let mut rows: Vec<Resume> = self.rows.read().await.values().cloned().collect();
        newest_first(&mut rows);
        Ok(rows.into_iter().skip(skip).take(limit).collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.rows.write().await.remove(id).is_some())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.rows.read().await.len() as u64)
    }
}

/// Process-local vector index scored by cosine similarity.
#[derive(Default)]
pub struct MemoryVectorIndex {
    points: RwLock<HashMap<String, (Vec<f32>, VectorMetadata)>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, vector_id: &str) -> bool {
        self.points.read().await.contains_key(vector_id)
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, vector_id: &str, vector: &[f32], metadata: &VectorMetadata) -> bool {
        if vector.is_empty() {
            return false;
        }
        self.points
            .write()
            .await
            .insert(vector_id.to_string(), (vector.to_vec(), metadata.clone()));
        true
    }

    async fn query(&self, vector: &[f32], top_k: usize, min_similarity: f64) -> Vec<VectorMatch> {
        let mut matches: Vec<VectorMatch> = self
            .points
            .read()
            .await
            .iter()
            .map(|(vector_id, (stored, metadata))| VectorMatch {
                vector_id: vector_id.clone(),
                score: cosine_similarity(vector, stored),
                metadata: metadata.clone(),
            })
            .collect();

        matches.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.vector_id.cmp(&right.vector_id))
        });
        matches.truncate(top_k);
        matches.retain(|hit| hit.score >= min_similarity);
        matches
    }

    async fn delete(&self, vector_id: &str) -> bool {
        self.points.write().await.remove(vector_id).is_some()
    }

    async fn count(&self) -> u64 {
        self.points.read().await.len() as u64
    }
}
