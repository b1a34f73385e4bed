use super::is_valid_resume_id;
use crate::models::{NewResume, Resume, ResumeStatus, ResumeUpdate};
use crate::traits::DocumentStore;
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Resume rows kept as documents in a single OpenSearch index.
pub struct OpenSearchDocumentStore {
    client: Arc<Client>,
    endpoint: String,
    index_name: String,
}

impl OpenSearchDocumentStore {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            client: Arc::new(Client::new()),
            endpoint: format!("{}/", endpoint.trim_end_matches('/')),
            index_name: index_name.into(),
        }
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        Ok(Url::parse(&self.endpoint)?.join(&format!("{}{path}", self.index_name))?)
    }

    pub async fn ensure_index(&self) -> Result<(), StoreError> {
        let response = self.client.head(self.url("")?).send().await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "settings": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0
                },
                "mappings": {
                    "properties": {
                        "id": {"type": "keyword"},
                        "filename": {"type": "keyword"},
                        "status": {"type": "keyword"},
                        "upload_date": {"type": "date"},
                        "vector_id": {"type": "keyword"},
                        "file_size": {"type": "long"},
                        "error_message": {"type": "text"},
                        "content": {"type": "object", "enabled": false},
                        "metadata": {"type": "object", "enabled": false}
                    }
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "opensearch index setup failed with {}",
                response.status()
            )));
        }

        info!(index = %self.index_name, "created opensearch index");
        Ok(())
    }

    async fn search(&self, body: Value) -> Result<Vec<Resume>, StoreError> {
        let response = self
            .client
            .post(self.url("/_search")?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_hits(&parsed)
    }
}

fn parse_hits(parsed: &Value) -> Result<Vec<Resume>, StoreError> {
    parsed
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|hit| hit.get("_source").cloned())
        .map(|source| serde_json::from_value::<Resume>(source).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl DocumentStore for OpenSearchDocumentStore {
    async fn connect(&self) -> Result<(), StoreError> {
        self.ensure_index().await
    }

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

        let response = self
            .client
            .put(self.url(&format!("/_doc/{id}?refresh=wait_for"))?)
            .json(&row)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        info!(resume_id = %id, "created resume row");
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Resume>, StoreError> {
        if !is_valid_resume_id(id) {
            debug!(resume_id = %id, "rejecting malformed resume id");
            return Ok(None);
        }

        let response = self
            .client
            .get(self.url(&format!("/_doc/{id}"))?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        match parsed.get("_source") {
            Some(source) => Ok(Some(serde_json::from_value(source.clone())?)),
            None => Ok(None),
        }
    }

    async fn update(&self, id: &str, update: &ResumeUpdate) -> Result<bool, StoreError> {
        if !is_valid_resume_id(id) {
            return Ok(false);
        }

        let response = self
            .client
            .post(self.url(&format!("/_update/{id}?refresh=wait_for"))?)
            .json(&json!({ "doc": update }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        debug!(resume_id = %id, "updated resume row");
        Ok(true)
    }

    async fn transition(
        &self,
        id: &str,
        from: ResumeStatus,
        update: &ResumeUpdate,
    ) -> Result<bool, StoreError> {
        if !is_valid_resume_id(id) {
            return Ok(false);
        }

        let response = self
            .client
            .post(self.url(&format!("/_update/{id}?refresh=wait_for"))?)
            .json(&json!({
                "script": {
                    "lang": "painless",
                    "source": TRANSITION_SCRIPT,
                    "params": { "from": from.as_str(), "doc": update }
                }
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let applied = body.get("result").and_then(Value::as_str) == Some("updated");
        debug!(resume_id = %id, from = %from, applied, "status transition");
        Ok(applied)
    }

    async fn list_stale(
        &self,
        status: ResumeStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Resume>, StoreError> {
        self.search(stale_query(status, before, limit)).await
    }

    async fn list_by_status(
        &self,
        status: ResumeStatus,
        limit: usize,
    ) -> Result<Vec<Resume>, StoreError> {
        self.search(json!({
            "size": limit,
            "query": { "term": { "status": status.as_str() } },
            "sort": [{ "upload_date": { "order": "desc" } }]
        }))
        .await
    }

    async fn list_all(&self, skip: usize, limit: usize) -> Result<Vec<Resume>, StoreError> {
        self.search(json!({
            "from": skip,
            "size": limit,
            "query": { "match_all": {} },
            "sort": [{ "upload_date": { "order": "desc" } }]
        }))
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if !is_valid_resume_id(id) {
            return Ok(false);
        }

        let response = self
            .client
            .delete(self.url(&format!("/_doc/{id}?refresh=wait_for"))?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        info!(resume_id = %id, "deleted resume row");
        Ok(true)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let response = self.client.get(self.url("/_count")?).send().await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed.pointer("/count").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(Url::parse(&self.endpoint)?)
            .send()
            .await
            .map_err(|error| StoreError::NotReady(error.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::NotReady(format!(
                "opensearch returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Copies `params.doc` over the row only while its status equals `params.from`.
/// Null entries clear the field.
const TRANSITION_SCRIPT: &str = "if (ctx._source.status == params.from) { \
    for (entry in params.doc.entrySet()) { ctx._source[entry.getKey()] = entry.getValue(); } \
} else { ctx.op = 'noop'; }";

fn stale_query(status: ResumeStatus, before: DateTime<Utc>, limit: usize) -> Value {
    json!({
        "size": limit,
        "query": {
            "bool": {
                "filter": [
                    { "term": { "status": status.as_str() } },
                    { "range": { "upload_date": { "lt": before.to_rfc3339() } } }
                ]
            }
        },
        "sort": [{ "upload_date": { "order": "asc" } }]
    })
}
