//! Per-resume ingestion pipeline.
//!
//! A resume row is created in `Processing` by [`stage_upload`]; a
//! [`ResumeProcessor`] then drives it to `Processed` or `Failed`. Stages run
//! strictly in order and the temporary upload is removed whatever the outcome.

use crate::embeddings::{embed_resume, Embedder};
use crate::extractor::PdfExtractor;
use crate::fields::{extract_structured, FieldExtractor};
use crate::models::{
    vector_id_for, NewResume, PipelineOptions, ResumeContent, ResumeMetadata, ResumeStatus,
    ResumeUpdate, VectorMetadata,
};
use crate::traits::{DocumentStore, VectorIndex};
use crate::IngestError;
use chrono::Utc;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Hand-off from the upload step to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeJob {
    pub resume_id: String,
    pub file_path: PathBuf,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessingSummary {
    pub status: ResumeStatus,
    pub resume_id: String,
    pub vector_id: String,
    pub skills_count: usize,
    pub experience_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProgressStage {
    Started,
    Extracted,
    Embedded,
    Indexed,
}

impl ProgressStage {
    pub const TOTAL: u8 = 4;

    pub fn checkpoint(&self) -> u8 {
        match self {
            ProgressStage::Started => 0,
            ProgressStage::Extracted => 1,
            ProgressStage::Embedded => 2,
            ProgressStage::Indexed => 3,
        }
    }

    /// What the pipeline does next.
    pub fn status(&self) -> &'static str {
        match self {
            ProgressStage::Started => "Parsing PDF...",
            ProgressStage::Extracted => "Generating embeddings...",
            ProgressStage::Embedded => "Storing in vector database...",
            ProgressStage::Indexed => "Updating database...",
        }
    }
}

/// Receives advisory progress checkpoints.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: ProgressStage);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _stage: ProgressStage) {}
}

#[derive(Clone)]
pub struct ResumeProcessor {
    extractor: Arc<dyn PdfExtractor>,
    fields: Arc<dyn FieldExtractor>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentStore>,
    options: PipelineOptions,
}

impl ResumeProcessor {
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
        }
    }

    /// Runs the whole pipeline for one resume. On error the row has been moved
    /// to `Failed` (best-effort) before the error is returned. Rows that have
    /// already left `Processing` are rejected and left untouched.
    pub async fn process(
        &self,
        job: &ResumeJob,
        progress: &dyn ProgressSink,
    ) -> Result<ProcessingSummary, IngestError> {
        info!(resume_id = %job.resume_id, path = %job.file_path.display(), "starting resume processing");

        let outcome = self.run_stages(job, progress).await;

        match &outcome {
            Ok(summary) => info!(
                resume_id = %summary.resume_id,
                vector_id = %summary.vector_id,
                skills = summary.skills_count,
                "processed resume"
            ),
            Err(error @ IngestError::NotProcessing { .. }) => {
                warn!(resume_id = %job.resume_id, %error, "skipped resume");
            }
            Err(error) => {
                error!(resume_id = %job.resume_id, %error, "failed to process resume");
                self.mark_failed(&job.resume_id, &error.to_string()).await;
            }
        }

        remove_upload(&job.file_path).await;
        outcome
    }

    async fn run_stages(
        &self,
        job: &ResumeJob,
        progress: &dyn ProgressSink,
    ) -> Result<ProcessingSummary, IngestError> {
        let started = Instant::now();
        progress.report(ProgressStage::Started);

        let resume = self
            .documents
            .get(&job.resume_id)
            .await?
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("resume {} not found", job.resume_id))
            })?;
        if resume.status != ResumeStatus::Processing {
            return Err(IngestError::NotProcessing {
                id: resume.id,
                status: resume.status,
            });
        }

        let extractor = Arc::clone(&self.extractor);
        let path = job.file_path.clone();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .map_err(|error| IngestError::PdfParse(format!("extraction task failed: {error}")))??;
        progress.report(ProgressStage::Extracted);

        let fields = extract_structured(
            self.fields.as_ref(),
            &extracted.text,
            self.options.llm_text_prefix_chars,
            self.options.fallback_summary_chars,
        )
        .await;
        let content = ResumeContent::from_structured(extracted.text, fields);
        let metadata = ResumeMetadata {
            file_size: job.file_size,
            pages: extracted.page_count,
            processing_time: Some(started.elapsed().as_secs_f64()),
            extracted_at: Some(Utc::now()),
        };

        let embedding = embed_resume(
            self.embedder.as_ref(),
            &content.text,
            &content.skills,
            &content.experience_descriptions(),
            &self.options,
        )
        .await?;
        if embedding.is_empty() {
            return Err(IngestError::EmptyEmbedding(job.resume_id.clone()));
        }
        progress.report(ProgressStage::Embedded);

        let vector_id = vector_id_for(&job.resume_id);
        let vector_metadata = VectorMetadata {
            resume_id: job.resume_id.clone(),
            filename: resume.filename.clone(),
            skills: content.skills.clone(),
            upload_date: resume.upload_date.to_rfc3339(),
        };
        if !self
            .vectors
            .upsert(&vector_id, &embedding, &vector_metadata)
            .await
        {
            return Err(IngestError::VectorUpsert(vector_id));
        }
        progress.report(ProgressStage::Indexed);

        let summary = ProcessingSummary {
            status: ResumeStatus::Processed,
            resume_id: job.resume_id.clone(),
            vector_id: vector_id.clone(),
            skills_count: content.skills.len(),
            experience_count: content.experience.len(),
        };

        let update = ResumeUpdate::processed(content, metadata, vector_id.clone());
        let persisted = match self
            .documents
            .transition(&job.resume_id, ResumeStatus::Processing, &update)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(IngestError::Persistence(job.resume_id.clone())),
            Err(error) => Err(IngestError::Store(error)),
        };

        if let Err(error) = persisted {
            // The row never reached Processed, so its vector must not stay searchable.
            if !self.vectors.delete(&vector_id).await {
                warn!(%vector_id, "could not remove vector for unpersisted resume");
            }
            return Err(error);
        }

        Ok(summary)
    }

    async fn mark_failed(&self, resume_id: &str, message: &str) {
        match self
            .documents
            .transition(resume_id, ResumeStatus::Processing, &ResumeUpdate::failed(message))
            .await
        {
            Ok(true) => debug!(%resume_id, "marked resume as failed"),
            Ok(false) => error!(
                %resume_id,
                "failed to update resume status: row not found or no longer processing"
            ),
            Err(error) => error!(%resume_id, %error, "failed to update resume status"),
        }
    }
}

async fn remove_upload(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "cleaned up uploaded pdf"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), %error, "failed to clean up uploaded pdf"),
    }
}

pub fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() && is_pdf_path(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Copies `source` into `upload_dir` under a fresh name, creates its row in
/// `Processing`, and returns the job to hand to a [`ResumeProcessor`].
pub async fn stage_upload(
    source: &Path,
    upload_dir: &Path,
    documents: &dyn DocumentStore,
    max_bytes: u64,
) -> Result<ResumeJob, IngestError> {
    let filename = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(source.display().to_string()))?
        .to_string();

    if !is_pdf_path(source) {
        return Err(IngestError::InvalidUpload(format!(
            "only PDF files are allowed: {filename}"
        )));
    }

    let file_size = tokio::fs::metadata(source).await?.len();
    if file_size > max_bytes {
        return Err(IngestError::InvalidUpload(format!(
            "file size {file_size} exceeds maximum limit of {max_bytes} bytes"
        )));
    }

    tokio::fs::create_dir_all(upload_dir).await?;
    let file_path = upload_dir.join(format!("{}.pdf", Uuid::new_v4()));
    tokio::fs::copy(source, &file_path).await?;

    let created = documents
        .create(NewResume {
            filename,
            upload_date: Utc::now(),
            file_size,
        })
        .await;

    let resume_id = match created {
        Ok(id) => id,
        Err(error) => {
            remove_upload(&file_path).await;
            return Err(error.into());
        }
    };

    info!(%resume_id, path = %file_path.display(), "staged resume upload");
    Ok(ResumeJob {
        resume_id,
        file_path,
        file_size,
    })
}
