use crate::models::{VectorMatch, VectorMetadata};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            endpoint: format!("{}/", endpoint.trim_end_matches('/')),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        Ok(Url::parse(&self.endpoint)?.join(&format!("collections/{}{path}", self.collection))?)
    }

    /// Creates the cosine collection if it is missing and checks the vector size
    /// of an existing one.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.url("")?).send().await?;

        if response.status() == StatusCode::OK {
            let info: Value = response.json().await?;
            let existing = info
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match existing {
                Some(size) if size as usize != self.vector_size => Err(StoreError::Request(format!(
                    "collection {} has vector size {size}, expected {}",
                    self.collection, self.vector_size
                ))),
                _ => Ok(()),
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }

    async fn try_upsert(
        &self,
        vector_id: &str,
        vector: &[f32],
        metadata: &VectorMetadata,
    ) -> Result<(), StoreError> {
        if vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "embedding dimension {} != {}",
                vector.len(),
                self.vector_size
            )));
        }

        let payload = json!({
            "vector_id": vector_id,
            "resume_id": metadata.resume_id,
            "filename": metadata.filename,
            "skills": metadata.skills,
            "upload_date": metadata.upload_date,
        });

        let response = self
            .client
            .put(self.url("/points?wait=true")?)
            .json(&json!({
                "points": [{
                    "id": point_id(vector_id),
                    "vector": vector,
                    "payload": payload,
                }]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn try_query(
        &self,
        vector: &[f32],
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        if vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(self.url("/points/search")?)
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
                "score_threshold": min_similarity,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parse_search_hits(&parsed, min_similarity))
    }

    async fn try_delete(&self, vector_id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.url("/points/delete?wait=true")?)
            .json(&json!({ "points": [point_id(vector_id)] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn try_count(&self) -> Result<u64, StoreError> {
        let response = self
            .client
            .post(self.url("/points/count")?)
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

/// Qdrant only accepts integer or UUID point ids, so string vector ids are
/// hashed into a stable UUID and kept verbatim in the payload.
pub fn point_id(vector_id: &str) -> String {
    let digest = Sha256::digest(vector_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

fn parse_search_hits(parsed: &Value, min_similarity: f64) -> Vec<VectorMatch> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::new();
    for hit in hits {
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
        if score < min_similarity {
            continue;
        }

        let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
        let vector_id = payload
            .pointer("/vector_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| hit.pointer("/id").map(|id| id.to_string().trim_matches('"').to_string()))
            .unwrap_or_default();
        let metadata: VectorMetadata = serde_json::from_value(payload).unwrap_or_default();

        result.push(VectorMatch {
            vector_id,
            score,
            metadata,
        });
    }

    result
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn connect(&self) -> Result<(), StoreError> {
        self.ensure_collection().await
    }

    async fn upsert(&self, vector_id: &str, vector: &[f32], metadata: &VectorMetadata) -> bool {
        match self.try_upsert(vector_id, vector, metadata).await {
            Ok(()) => {
                info!(%vector_id, "stored vector in qdrant");
                true
            }
            Err(error) => {
                error!(%vector_id, %error, "failed to store vector in qdrant");
                false
            }
        }
    }

    async fn query(&self, vector: &[f32], top_k: usize, min_similarity: f64) -> Vec<VectorMatch> {
        match self.try_query(vector, top_k, min_similarity).await {
            Ok(matches) => {
                info!(matches = matches.len(), "qdrant search complete");
                matches
            }
            Err(error) => {
                error!(%error, "failed to search qdrant");
                Vec::new()
            }
        }
    }

    async fn delete(&self, vector_id: &str) -> bool {
        match self.try_delete(vector_id).await {
            Ok(()) => {
                info!(%vector_id, "deleted vector from qdrant");
                true
            }
            Err(error) => {
                error!(%vector_id, %error, "failed to delete vector from qdrant");
                false
            }
        }
    }

    async fn count(&self) -> u64 {
        self.try_count().await.unwrap_or_else(|error| {
            warn!(%error, "failed to count qdrant vectors");
            0
        })
    }

    async fn ping(&self) -> bool {
        match self.url("") {
            Ok(url) => self
                .client
                .get(url)
                .send()
                .await
                .map(|response| response.status().is_success())
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
