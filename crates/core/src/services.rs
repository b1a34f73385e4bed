use crate::embeddings::Embedder;
use crate::extractor::PdfExtractor;
use crate::fields::FieldExtractor;
use crate::ingest::ResumeProcessor;
use crate::models::PipelineOptions;
use crate::search::SearchCoordinator;
use crate::traits::{DocumentStore, VectorIndex};
use crate::StoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub dependencies: BTreeMap<String, String>,
}

/// Process-wide handles, created once at startup and shared by every unit of work.
pub struct Services {
    pub extractor: Arc<dyn PdfExtractor>,
    pub fields: Arc<dyn FieldExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<dyn VectorIndex>,
    pub documents: Arc<dyn DocumentStore>,
    pub options: PipelineOptions,
    ready: AtomicBool,
}

impl Services {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        fields: Arc<dyn FieldExtractor>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            extractor,
            fields,
            embedder,
            vectors,
            documents,
            options,
            ready: AtomicBool::new(false),
        }
    }

    pub async fn connect(&self) -> Result<(), StoreError> {
        self.documents.connect().await?;
        self.vectors.connect().await?;
        self.ready.store(true, Ordering::SeqCst);
        info!("connected to document store and vector index");
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.vectors.disconnect().await;
        self.documents.disconnect().await;
        info!("disconnected from backing services");
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn health(&self) -> HealthReport {
        let mut dependencies = BTreeMap::new();

        let documents = match self.documents.ping().await {
            Ok(()) => "healthy".to_string(),
            Err(error) => {
                warn!(%error, "document store health check failed");
                format!("unhealthy: {error}")
            }
        };
        dependencies.insert("document_store".to_string(), documents);

        let vectors = if self.vectors.ping().await {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        };
        dependencies.insert("vector_index".to_string(), vectors);

        HealthReport {
            healthy: dependencies.values().all(|status| status == "healthy"),
            dependencies,
        }
    }

    fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(StoreError::NotReady("services are not connected".to_string()))
        }
    }

    /// Fails with [`StoreError::NotReady`] until [`Services::connect`] has succeeded.
    pub fn processor(&self) -> Result<ResumeProcessor, StoreError> {
        self.ensure_ready()?;
        Ok(ResumeProcessor::new(
            Arc::clone(&self.extractor),
            Arc::clone(&self.fields),
            Arc::clone(&self.embedder),
            Arc::clone(&self.vectors),
            Arc::clone(&self.documents),
            self.options.clone(),
        ))
    }

    /// Fails with [`StoreError::NotReady`] until [`Services::connect`] has succeeded.
    pub fn search(&self) -> Result<SearchCoordinator, StoreError> {
        self.ensure_ready()?;
        Ok(SearchCoordinator::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.vectors),
            Arc::clone(&self.documents),
            self.options.query_prefix_chars,
        ))
    }
}

/// Compares a presented credential against the configured one. No configured
/// key means the check is disabled.
pub fn verify_api_key(expected: Option<&str>, presented: Option<&str>) -> bool {
    match expected.filter(|key| !key.is_empty()) {
        None => true,
        Some(expected) => presented.is_some_and(|presented| {
            presented.len() == expected.len()
                && presented
                    .bytes()
                    .zip(expected.bytes())
                    .fold(0u8, |diff, (left, right)| diff | (left ^ right))
                    == 0
        }),
    }
}
