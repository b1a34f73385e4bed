//! Housekeeping: expiring stale uploads, reconciling rows stuck in
//! `Processing`, and deleting resumes together with their vectors.

use crate::ingest::is_pdf_path;
use crate::models::{ResumeStatus, ResumeUpdate};
use crate::traits::{DocumentStore, VectorIndex};
use crate::StoreError;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: usize,
}

/// Removes `.pdf` files directly under `upload_dir` whose modification time is
/// older than `retention`. A missing directory counts as nothing to do.
pub fn cleanup_old_uploads(upload_dir: &Path, retention: Duration) -> CleanupReport {
    let mut report = CleanupReport::default();
    if !upload_dir.is_dir() {
        return report;
    }

    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in WalkDir::new(upload_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() || !is_pdf_path(entry.path()) {
            continue;
        }

        let modified = match entry.metadata().map(|meta| meta.modified()) {
            Ok(Ok(modified)) => modified,
            _ => continue,
        };
        if modified >= cutoff {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                info!(path = %entry.path().display(), "removed old upload");
                report.removed.push(entry.path().to_path_buf());
            }
            Err(error) => {
                error!(path = %entry.path().display(), %error, "failed to remove old upload");
                report.failed += 1;
            }
        }
    }

    report
}

/// Runs [`cleanup_old_uploads`] now and then every `interval`, until the handle
/// is aborted.
pub fn spawn_periodic_cleanup(
    upload_dir: PathBuf,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let dir = upload_dir.clone();
            match tokio::task::spawn_blocking(move || cleanup_old_uploads(&dir, retention)).await {
                Ok(report) => info!(
                    removed = report.removed.len(),
                    failed = report.failed,
                    "upload cleanup finished"
                ),
                Err(error) => error!(%error, "upload cleanup task failed"),
            }
        }
    })
}

/// Moves rows that have sat in `Processing` longer than `deadline` to `Failed`,
/// oldest first and at most `limit` per call. Returns how many rows were changed.
pub async fn reconcile_stale_processing(
    documents: &dyn DocumentStore,
    deadline: Duration,
    limit: usize,
) -> Result<usize, StoreError> {
    let deadline = chrono::Duration::from_std(deadline)
        .map_err(|error| StoreError::Request(format!("invalid deadline: {error}")))?;
    let cutoff = Utc::now() - deadline;

    let update = ResumeUpdate::failed("processing did not finish before the deadline");
    let mut reconciled = 0;
    for resume in documents
        .list_stale(ResumeStatus::Processing, cutoff, limit)
        .await?
    {
        if documents
            .transition(&resume.id, ResumeStatus::Processing, &update)
            .await?
        {
            warn!(resume_id = %resume.id, "marked stale resume as failed");
            reconciled += 1;
        }
    }

    Ok(reconciled)
}

/// Deletes a resume row and, when it has one, its vector. Returns `false` when
/// the row does not exist. A vector that cannot be removed is logged only.
pub async fn delete_resume(
    documents: &dyn DocumentStore,
    vectors: &dyn VectorIndex,
    resume_id: &str,
) -> Result<bool, StoreError> {
    let Some(resume) = documents.get(resume_id).await? else {
        return Ok(false);
    };

    if let Some(vector_id) = &resume.vector_id {
        if !vectors.delete(vector_id).await {
            warn!(%resume_id, %vector_id, "vector was not removed with its resume");
        }
    }

    documents.delete(resume_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewResume, Resume, VectorMetadata};
    use crate::stores::{MemoryDocumentStore, MemoryVectorIndex};
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn age(path: &Path, by: Duration) -> std::io::Result<()> {
        let file = File::options().write(true).open(path)?;
        file.set_modified(SystemTime::now() - by)
    }

    #[test]
    fn only_old_pdfs_are_removed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let old_pdf = dir.path().join("old.pdf");
        let fresh_pdf = dir.path().join("fresh.pdf");
        let old_text = dir.path().join("old.txt");
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        let nested_pdf = nested.join("deep.pdf");
        for path in [&old_pdf, &fresh_pdf, &old_text, &nested_pdf] {
            fs::write(path, b"%PDF-1.4")?;
        }
        let two_days = Duration::from_secs(48 * 60 * 60);
        age(&old_pdf, two_days)?;
        age(&old_text, two_days)?;
        age(&nested_pdf, two_days)?;

        let report = cleanup_old_uploads(dir.path(), Duration::from_secs(24 * 60 * 60));

        assert_eq!(report.removed, vec![old_pdf.clone()]);
        assert_eq!(report.failed, 0);
        assert!(!old_pdf.exists());
        assert!(fresh_pdf.exists());
        assert!(old_text.exists());
        assert!(nested_pdf.exists());
        Ok(())
    }

    #[test]
    fn missing_directory_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let report = cleanup_old_uploads(&dir.path().join("absent"), Duration::from_secs(1));
        assert_eq!(report, CleanupReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn stale_processing_rows_become_failed() -> Result<(), StoreError> {
        let documents = MemoryDocumentStore::new();
        let stale = documents
            .create(NewResume {
                filename: "stale.pdf".to_string(),
                upload_date: Utc::now() - chrono::Duration::hours(3),
                file_size: 10,
            })
            .await?;
        let fresh = documents
            .create(NewResume {
                filename: "fresh.pdf".to_string(),
                upload_date: Utc::now(),
                file_size: 10,
            })
            .await?;

        let changed =
            reconcile_stale_processing(&documents, Duration::from_secs(60 * 60), 100).await?;

        assert_eq!(changed, 1);
        let stale_row = documents.get(&stale).await?;
        assert_eq!(stale_row.map(|row| row.status), Some(ResumeStatus::Failed));
        let fresh_row = documents.get(&fresh).await?;
        assert_eq!(fresh_row.map(|row| row.status), Some(ResumeStatus::Processing));
        Ok(())
    }

    #[tokio::test]
    async fn fresh_rows_do_not_crowd_out_stale_ones() -> Result<(), StoreError> {
        let documents = MemoryDocumentStore::new();
        let stale = documents
            .create(NewResume {
                filename: "stale.pdf".to_string(),
                upload_date: Utc::now() - chrono::Duration::hours(5),
                file_size: 10,
            })
            .await?;
        for minutes in 0..3 {
            documents
                .create(NewResume {
                    filename: format!("fresh-{minutes}.pdf"),
                    upload_date: Utc::now() - chrono::Duration::minutes(minutes),
                    file_size: 10,
                })
                .await?;
        }

        let changed =
            reconcile_stale_processing(&documents, Duration::from_secs(60 * 60), 3).await?;

        assert_eq!(changed, 1);
        let stale_row = documents.get(&stale).await?;
        assert_eq!(stale_row.map(|row| row.status), Some(ResumeStatus::Failed));
        assert_eq!(documents.list_by_status(ResumeStatus::Processing, 10).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_row_and_vector() -> Result<(), StoreError> {
        let documents = MemoryDocumentStore::new();
        let vectors = MemoryVectorIndex::new();
        documents
            .insert(Resume {
                id: "r1".to_string(),
                filename: "cv.pdf".to_string(),
                upload_date: Utc::now(),
                status: ResumeStatus::Processed,
                file_size: Some(10),
                content: None,
                metadata: None,
                vector_id: Some("resume_r1".to_string()),
                error_message: None,
            })
            .await;
        assert!(
            vectors
                .upsert("resume_r1", &[1.0, 0.0], &VectorMetadata::default())
                .await
        );

        assert!(delete_resume(&documents, &vectors, "r1").await?);
        assert!(documents.get("r1").await?.is_none());
        assert!(!vectors.contains("resume_r1").await);
        assert!(!delete_resume(&documents, &vectors, "r1").await?);
        Ok(())
    }
}
