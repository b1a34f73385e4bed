use crate::models::ResumeStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("embedding produced no vector for resume {0}")]
    EmptyEmbedding(String),

    #[error("failed to store vector {0} in vector database")]
    VectorUpsert(String),

    #[error("failed to update resume {0} in document store")]
    Persistence(String),

    #[error("resume {id} is {status}, not processing")]
    NotProcessing { id: String, status: ResumeStatus },

    #[error("document store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding api error: {0}")]
    Api(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding api returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("json parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("llm returned empty content")]
    EmptyContent,

    #[error("llm extraction is not configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),

    #[error("store not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("document store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
