pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod fields;
pub mod ingest;
pub mod maintenance;
pub mod models;
pub mod queue;
pub mod search;
pub mod services;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_text, ChunkingConfig};
pub use embeddings::{
    average_embeddings, embed_job_description, embed_resume, CharacterNgramEmbedder, Embedder,
    OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
    OPENAI_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IngestError, LlmError, SearchError, StoreError};
pub use extractor::{
    extract_resume_text, ExtractedText, FallbackExtractor, LayoutExtractor, LopdfExtractor,
    PdfExtractor,
};
pub use fields::{
    extract_structured, fallback_extraction, FieldExtractor, OpenAiFieldExtractor,
    DEFAULT_PARSING_MODEL,
};
pub use ingest::{
    discover_pdf_files, stage_upload, NoProgress, ProcessingSummary, ProgressSink, ProgressStage,
    ResumeJob, ResumeProcessor,
};
pub use maintenance::{
    cleanup_old_uploads, delete_resume, reconcile_stale_processing, spawn_periodic_cleanup,
    CleanupReport, CLEANUP_INTERVAL,
};
pub use models::{
    NewResume, PipelineOptions, Resume, ResumeContent, ResumeMatch, ResumeMetadata, ResumeStatus,
    ResumeUpdate, SearchQuery, SearchResult, StructuredResume, VectorMatch, VectorMetadata,
};
pub use queue::{TaskProgress, TaskQueue, TaskState};
pub use search::SearchCoordinator;
pub use services::{verify_api_key, HealthReport, Services};
pub use stores::{MemoryDocumentStore, MemoryVectorIndex, OpenSearchDocumentStore, QdrantStore};
pub use traits::{DocumentStore, VectorIndex};
