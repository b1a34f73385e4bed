use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStatus {
    Processing,
    Processed,
    Failed,
}

impl ResumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeStatus::Processing => "processing",
            ResumeStatus::Processed => "processed",
            ResumeStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResumeStatus::Processing)
    }
}

impl fmt::Display for ResumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResumeStatus {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "processing" => Ok(ResumeStatus::Processing),
            "processed" => Ok(ResumeStatus::Processed),
            "failed" => Ok(ResumeStatus::Failed),
            other => Err(IngestError::InvalidArgument(format!(
                "unknown resume status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Experience {
    pub company: String,
    pub position: String,
    pub duration: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Education {
    pub degree: String,
    pub institution: String,
    #[serde(default)]
    pub year: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
}

/// Structured fields pulled out of a resume, either by the LLM or by the
/// pattern-matching fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StructuredResume {
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeContent {
    pub text: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ResumeContent {
    pub fn from_structured(text: String, fields: StructuredResume) -> Self {
        Self {
            text,
            skills: fields.skills,
            experience: fields.experience,
            education: fields.education,
            contact_info: fields.contact_info,
            summary: fields.summary,
        }
    }

    pub fn experience_descriptions(&self) -> Vec<String> {
        self.experience
            .iter()
            .map(|entry| entry.description.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeMetadata {
    pub file_size: u64,
    pub pages: u32,
    #[serde(default)]
    pub processing_time: Option<f64>,
    #[serde(default)]
    pub extracted_at: Option<DateTime<Utc>>,
}

/// One uploaded resume and its processing lifecycle.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resume {
    pub id: String,
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub status: ResumeStatus,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub content: Option<ResumeContent>,
    #[serde(default)]
    pub metadata: Option<ResumeMetadata>,
    #[serde(default)]
    pub vector_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Resume {
    pub fn apply(&mut self, update: ResumeUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(content) = update.content {
            self.content = Some(content);
        }
        if let Some(metadata) = update.metadata {
            self.metadata = Some(metadata);
        }
        if let Some(vector_id) = update.vector_id {
            self.vector_id = Some(vector_id);
        }
        if let Some(error_message) = update.error_message {
            self.error_message = error_message;
        }
    }
}

/// Fields supplied when a resume row is first created, before any processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewResume {
    pub filename: String,
    pub upload_date: DateTime<Utc>,
    pub file_size: u64,
}

/// Partial update applied to a stored resume. Unset fields are left untouched;
/// `error_message: Some(None)` clears the stored message.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResumeUpdate {
    pub status: Option<ResumeStatus>,
    pub content: Option<ResumeContent>,
    pub metadata: Option<ResumeMetadata>,
    pub vector_id: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub error_message: Option<Option<String>>,
}

impl ResumeUpdate {
    pub fn processed(content: ResumeContent, metadata: ResumeMetadata, vector_id: String) -> Self {
        Self {
            status: Some(ResumeStatus::Processed),
            content: Some(content),
            metadata: Some(metadata),
            vector_id: Some(vector_id),
            error_message: Some(None),
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: Some(ResumeStatus::Failed),
            error_message: Some(Some(error_message.into())),
            ..Self::default()
        }
    }
}

pub fn vector_id_for(resume_id: &str) -> String {
    format!("resume_{resume_id}")
}

/// Payload stored next to each resume vector; `resume_id` links a hit back to its row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VectorMetadata {
    #[serde(default)]
    pub resume_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub upload_date: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub vector_id: String,
    pub score: f64,
    pub metadata: VectorMetadata,
}

pub const MAX_TOP_K: usize = 20;
pub const MIN_JOB_DESCRIPTION_CHARS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub job_description: String,
    pub top_k: usize,
    pub min_similarity: f64,
}

impl SearchQuery {
    pub fn new(job_description: impl Into<String>) -> Self {
        Self {
            job_description: job_description.into(),
            top_k: 5,
            min_similarity: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeMatch {
    pub id: String,
    pub filename: String,
    pub similarity_score: f64,
    pub skills: Vec<String>,
    pub experience_years: usize,
    pub summary: Option<String>,
    pub upload_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub matches: Vec<ResumeMatch>,
    pub total_matches: usize,
    pub search_time: f64,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub llm_text_prefix_chars: usize,
    pub resume_text_chunk_chars: usize,
    pub experience_chunk_chars: usize,
    pub max_experience_chunks: usize,
    pub query_prefix_chars: usize,
    pub min_extracted_chars: usize,
    pub fallback_summary_chars: usize,
    pub max_upload_bytes: u64,
    pub upload_retention: Duration,
    pub task_soft_limit: Duration,
    pub task_hard_limit: Duration,
    pub stale_processing_after: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            llm_text_prefix_chars: 4_000,
            resume_text_chunk_chars: 1_000,
            experience_chunk_chars: 500,
            max_experience_chunks: 3,
            query_prefix_chars: 2_000,
            min_extracted_chars: 100,
            fallback_summary_chars: 200,
            max_upload_bytes: 10 * 1024 * 1024,
            upload_retention: Duration::from_secs(24 * 60 * 60),
            task_soft_limit: Duration::from_secs(25 * 60),
            task_hard_limit: Duration::from_secs(30 * 60),
            stale_processing_after: Duration::from_secs(60 * 60),
        }
    }
}

/// Returns at most `max_chars` characters from the start of `text`.
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_prefix_respects_multibyte_boundaries() {
        assert_eq!(char_prefix("héllo", 2), "hé");
        assert_eq!(char_prefix("abc", 10), "abc");
        assert_eq!(char_prefix("", 3), "");
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "Processed".parse::<ResumeStatus>().ok(),
            Some(ResumeStatus::Processed)
        );
        assert!("archived".parse::<ResumeStatus>().is_err());
    }

    #[test]
    fn failed_update_leaves_content_untouched() {
        let mut resume = Resume {
            id: "r1".to_string(),
            filename: "cv.pdf".to_string(),
            upload_date: Utc::now(),
            status: ResumeStatus::Processing,
            file_size: Some(10),
            content: None,
            metadata: None,
            vector_id: None,
            error_message: None,
        };

        resume.apply(ResumeUpdate::failed("boom"));

        assert_eq!(resume.status, ResumeStatus::Failed);
        assert_eq!(resume.error_message.as_deref(), Some("boom"));
        assert!(resume.content.is_none());
        assert!(resume.vector_id.is_none());
    }

    #[test]
    fn processed_update_clears_previous_error() -> Result<(), serde_json::Error> {
        let mut resume = Resume {
            id: "r1".to_string(),
            filename: "cv.pdf".to_string(),
            upload_date: Utc::now(),
            status: ResumeStatus::Processing,
            file_size: Some(10),
            content: None,
            metadata: None,
            vector_id: None,
            error_message: Some("timed out".to_string()),
        };
        let content = ResumeContent::from_structured("text".to_string(), StructuredResume::default());
        let metadata = ResumeMetadata {
            file_size: 10,
            pages: 1,
            processing_time: None,
            extracted_at: None,
        };
        let update = ResumeUpdate::processed(content, metadata, "resume_r1".to_string());

        let value = serde_json::to_value(&update)?;
        assert_eq!(value.get("error_message"), Some(&serde_json::Value::Null));

        resume.apply(update);
        assert_eq!(resume.status, ResumeStatus::Processed);
        assert!(resume.error_message.is_none());
        Ok(())
    }

    #[test]
    fn update_serialization_skips_unset_fields() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(ResumeUpdate::failed("bad pdf"))?;
        let object = value.as_object().cloned().unwrap_or_default();
        assert_eq!(object.len(), 2);
        assert_eq!(object.get("status"), Some(&serde_json::json!("failed")));
        Ok(())
    }
}
