use crate::embeddings::{embed_job_description, Embedder};
use crate::models::{
    ResumeMatch, ResumeStatus, SearchQuery, SearchResult, VectorMatch, MAX_TOP_K,
    MIN_JOB_DESCRIPTION_CHARS,
};
use crate::traits::{DocumentStore, VectorIndex};
use crate::SearchError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Ranks processed resumes against a job description.
#[derive(Clone)]
pub struct SearchCoordinator {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentStore>,
    query_prefix_chars: usize,
}

impl SearchCoordinator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentStore>,
        query_prefix_chars: usize,
    ) -> Self {
        Self {
            embedder,
            vectors,
            documents,
            query_prefix_chars,
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResult, SearchError> {
        validate(query)?;
        let started = Instant::now();

        let query_vector =
            embed_job_description(self.embedder.as_ref(), &query.job_description, self.query_prefix_chars)
                .await?;

        let hits = self
            .vectors
            .query(&query_vector, query.top_k, query.min_similarity)
            .await;
        debug!(hits = hits.len(), "vector index returned candidates");

        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(found) = self.resolve(hit, query.min_similarity).await? {
                matches.push(found);
            }
        }

        // Stable, so equal scores keep index order.
        matches.sort_by(|left, right| right.similarity_score.total_cmp(&left.similarity_score));

        let search_time = started.elapsed().as_secs_f64();
        info!(
            matches = matches.len(),
            search_time, "resume search complete"
        );

        Ok(SearchResult {
            query: query.job_description.clone(),
            total_matches: matches.len(),
            matches,
            search_time,
        })
    }

    async fn resolve(
        &self,
        hit: VectorMatch,
        min_similarity: f64,
    ) -> Result<Option<ResumeMatch>, SearchError> {
        if hit.score < min_similarity || hit.metadata.resume_id.is_empty() {
            return Ok(None);
        }

        let Some(resume) = self.documents.get(&hit.metadata.resume_id).await? else {
            debug!(resume_id = %hit.metadata.resume_id, "vector has no resume row");
            return Ok(None);
        };
        if resume.status != ResumeStatus::Processed {
            return Ok(None);
        }

        let (skills, experience_years, summary) = match resume.content {
            Some(content) => (content.skills, content.experience.len(), content.summary),
            None => (Vec::new(), 0, None),
        };

        Ok(Some(ResumeMatch {
            id: resume.id,
            filename: resume.filename,
            similarity_score: hit.score,
            skills,
            experience_years,
            summary,
            upload_date: resume.upload_date,
        }))
    }
}

fn validate(query: &SearchQuery) -> Result<(), SearchError> {
    if query.job_description.trim().chars().count() < MIN_JOB_DESCRIPTION_CHARS {
        return Err(SearchError::Request(format!(
            "job description must be at least {MIN_JOB_DESCRIPTION_CHARS} characters"
        )));
    }
    if query.top_k == 0 || query.top_k > MAX_TOP_K {
        return Err(SearchError::Request(format!(
            "top_k must be between 1 and {MAX_TOP_K}"
        )));
    }
    if !(0.0..=1.0).contains(&query.min_similarity) {
        return Err(SearchError::Request(
            "min_similarity must be between 0 and 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Experience, Resume, ResumeContent, VectorMetadata};
    use crate::stores::MemoryDocumentStore;
    use crate::CharacterNgramEmbedder;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    /// Returns its canned hits verbatim, ignoring the query vector.
    struct FakeVectorIndex {
        hits: Vec<(String, f64)>,
    }

    #[async_trait]
    impl VectorIndex for FakeVectorIndex {
        async fn upsert(&self, _id: &str, _vector: &[f32], _metadata: &VectorMetadata) -> bool {
            true
        }

        async fn query(&self, _vector: &[f32], top_k: usize, _min: f64) -> Vec<VectorMatch> {
            self.hits
                .iter()
                .take(top_k)
                .map(|(resume_id, score)| VectorMatch {
                    vector_id: format!("resume_{resume_id}"),
                    score: *score,
                    metadata: VectorMetadata {
                        resume_id: resume_id.clone(),
                        ..VectorMetadata::default()
                    },
                })
                .collect()
        }

        async fn delete(&self, _id: &str) -> bool {
            true
        }
    }

    fn resume(id: &str, status: ResumeStatus, experience: usize) -> Resume {
        let entry = Experience {
            company: "Acme".to_string(),
            position: "Engineer".to_string(),
            duration: "2 years".to_string(),
            description: "Shipped things.".to_string(),
        };
        Resume {
            id: id.to_string(),
            filename: format!("{id}.pdf"),
            upload_date: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).single().unwrap_or_default(),
            status,
            file_size: Some(1024),
            content: Some(ResumeContent {
                text: "resume text".to_string(),
                skills: vec!["Rust".to_string()],
                experience: vec![entry; experience],
                education: Vec::new(),
                contact_info: Default::default(),
                summary: Some(format!("{id} summary")),
            }),
            metadata: None,
            vector_id: Some(format!("resume_{id}")),
            error_message: None,
        }
    }

    async fn coordinator(
        hits: Vec<(&str, f64)>,
        rows: Vec<Resume>,
    ) -> SearchCoordinator {
        let documents = MemoryDocumentStore::new();
        for row in rows {
            documents.insert(row).await;
        }
        SearchCoordinator::new(
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(FakeVectorIndex {
                hits: hits
                    .into_iter()
                    .map(|(id, score)| (id.to_string(), score))
                    .collect(),
            }),
            Arc::new(documents),
            2_000,
        )
    }

    fn query(min_similarity: f64) -> SearchQuery {
        SearchQuery {
            job_description: "Senior Rust engineer for distributed storage".to_string(),
            top_k: 5,
            min_similarity,
        }
    }

    #[tokio::test]
    async fn low_scores_are_dropped() -> Result<(), SearchError> {
        let coordinator = coordinator(
            vec![("a", 0.9), ("b", 0.85), ("c", 0.7)],
            vec![
                resume("a", ResumeStatus::Processed, 2),
                resume("b", ResumeStatus::Processed, 0),
                resume("c", ResumeStatus::Processed, 1),
            ],
        )
        .await;

        let result = coordinator.search(&query(0.8)).await?;

        let ids: Vec<&str> = result.matches.iter().map(|found| found.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(result.total_matches, 2);
        assert_eq!(result.matches[0].experience_years, 2);
        assert_eq!(result.matches[1].experience_years, 0);
        assert!(result.search_time >= 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_and_unprocessed_rows_are_skipped() -> Result<(), SearchError> {
        let coordinator = coordinator(
            vec![("a", 0.95), ("gone", 0.9), ("busy", 0.88), ("bad", 0.86)],
            vec![
                resume("a", ResumeStatus::Processed, 1),
                resume("busy", ResumeStatus::Processing, 1),
                resume("bad", ResumeStatus::Failed, 1),
            ],
        )
        .await;

        let result = coordinator.search(&query(0.5)).await?;

        assert_eq!(result.total_matches, 1);
        assert_eq!(result.matches[0].id, "a");
        assert_eq!(result.matches[0].summary.as_deref(), Some("a summary"));
        Ok(())
    }

    #[tokio::test]
    async fn matches_are_reordered_by_score_and_ties_keep_index_order() -> Result<(), SearchError> {
        let coordinator = coordinator(
            vec![("low", 0.6), ("first", 0.8), ("second", 0.8), ("top", 0.99)],
            vec![
                resume("low", ResumeStatus::Processed, 0),
                resume("first", ResumeStatus::Processed, 0),
                resume("second", ResumeStatus::Processed, 0),
                resume("top", ResumeStatus::Processed, 0),
            ],
        )
        .await;

        let result = coordinator.search(&query(0.5)).await?;

        let ids: Vec<&str> = result.matches.iter().map(|found| found.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "first", "second", "low"]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_returns_no_matches() -> Result<(), SearchError> {
        let coordinator = coordinator(Vec::new(), Vec::new()).await;
        let result = coordinator.search(&query(0.5)).await?;
        assert!(result.matches.is_empty());
        assert_eq!(result.total_matches, 0);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_queries_are_rejected() {
        let coordinator = coordinator(Vec::new(), Vec::new()).await;

        let short = SearchQuery::new("  rust   ");
        assert!(matches!(
            coordinator.search(&short).await,
            Err(SearchError::Request(_))
        ));

        let mut too_many = query(0.5);
        too_many.top_k = MAX_TOP_K + 1;
        assert!(coordinator.search(&too_many).await.is_err());

        let mut zero = query(0.5);
        zero.top_k = 0;
        assert!(coordinator.search(&zero).await.is_err());

        assert!(coordinator.search(&query(1.5)).await.is_err());
    }
}
