use crate::error::EmbeddingError;
use crate::models::{char_prefix, PipelineOptions};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const OPENAI_EMBEDDING_DIMENSIONS: usize = 1_536;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// One vector per input text, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }
}

/// Deterministic hashed character-trigram embedder. Needs no network access.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// OpenAI-compatible `/v1/embeddings` backend.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            dimensions,
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("{status}: {body}")));
        }

        let mut parsed: EmbedResponse = response.json().await?;
        parsed.data.sort_by_key(|item| item.index);

        let embeddings: Vec<Vec<f32>> = parsed.data.into_iter().map(|item| item.embedding).collect();
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            });
        }
        if let Some(mismatched) = embeddings.iter().find(|vector| vector.len() != self.dimensions) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: mismatched.len(),
            });
        }

        debug!(count = embeddings.len(), "generated batch embeddings");
        Ok(embeddings)
    }
}

/// Coordinate-wise arithmetic mean. An empty input yields an empty vector.
pub fn average_embeddings(embeddings: &[Vec<f32>]) -> Result<Vec<f32>, EmbeddingError> {
    let Some(first) = embeddings.first() else {
        return Ok(Vec::new());
    };

    let dimensions = first.len();
    let mut sum = vec![0f64; dimensions];
    for embedding in embeddings {
        if embedding.len() != dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimensions,
                actual: embedding.len(),
            });
        }
        for (total, value) in sum.iter_mut().zip(embedding) {
            *total += f64::from(*value);
        }
    }

    let count = embeddings.len() as f64;
    Ok(sum.into_iter().map(|total| (total / count) as f32).collect())
}

/// The texts embedded for one resume: a prefix of the raw text, the skill list,
/// and prefixes of the first few experience descriptions. Blank entries are skipped.
pub fn resume_embedding_chunks(
    text: &str,
    skills: &[String],
    experience_descriptions: &[String],
    options: &PipelineOptions,
) -> Vec<String> {
    let mut chunks = Vec::new();

    let head = char_prefix(text, options.resume_text_chunk_chars);
    if !head.trim().is_empty() {
        chunks.push(head.to_string());
    }

    if !skills.is_empty() {
        chunks.push(format!("Skills: {}", skills.join(", ")));
    }

    for description in experience_descriptions
        .iter()
        .take(options.max_experience_chunks)
    {
        let prefix = char_prefix(description, options.experience_chunk_chars);
        if !prefix.trim().is_empty() {
            chunks.push(prefix.to_string());
        }
    }

    chunks
}

/// Embeds every resume chunk in one batch and averages them into a single vector.
pub async fn embed_resume(
    embedder: &dyn Embedder,
    text: &str,
    skills: &[String],
    experience_descriptions: &[String],
    options: &PipelineOptions,
) -> Result<Vec<f32>, EmbeddingError> {
    let chunks = resume_embedding_chunks(text, skills, experience_descriptions, options);
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let inputs: Vec<&str> = chunks.iter().map(String::as_str).collect();
    let embeddings = embedder.embed_batch(&inputs).await?;
    if embeddings.len() != inputs.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: inputs.len(),
            actual: embeddings.len(),
        });
    }

    let averaged = average_embeddings(&embeddings)?;
    info!(
        chunks = inputs.len(),
        dimensions = averaged.len(),
        "created resume embedding"
    );
    Ok(averaged)
}

/// A job description is embedded as one trimmed, length-bounded chunk.
pub async fn embed_job_description(
    embedder: &dyn Embedder,
    job_description: &str,
    prefix_chars: usize,
) -> Result<Vec<f32>, EmbeddingError> {
    let cleaned = char_prefix(job_description.trim(), prefix_chars);
    embedder.embed(cleaned).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEmbedder {
        batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if let Ok(mut batches) = self.batches.lock() {
                batches.push(texts.iter().map(|text| text.to_string()).collect());
            }
            Ok(texts
                .iter()
                .enumerate()
                .map(|(index, _)| vec![index as f32, 1.0])
                .collect())
        }
    }

    #[tokio::test]
    async fn embedder_is_deterministic() -> Result<(), EmbeddingError> {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Senior Rust engineer with Kubernetes experience").await?;
        let second = embedder.embed("Senior Rust engineer with Kubernetes experience").await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() -> Result<(), EmbeddingError> {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await?;
        assert_eq!(vector.len(), 32);
        Ok(())
    }

    #[test]
    fn averaging_identical_vectors_is_identity() -> Result<(), EmbeddingError> {
        let vector = vec![0.25f32, -1.5, 3.0];
        let averaged = average_embeddings(&[vector.clone(), vector.clone(), vector.clone()])?;
        assert_eq!(averaged, vector);
        Ok(())
    }

    #[test]
    fn averaging_is_coordinate_wise_mean() -> Result<(), EmbeddingError> {
        let averaged = average_embeddings(&[vec![1.0, 0.0], vec![3.0, 2.0]])?;
        assert_eq!(averaged, vec![2.0, 1.0]);
        assert!(average_embeddings(&[]).map(|value| value.is_empty())?);
        Ok(())
    }

    #[test]
    fn averaging_rejects_ragged_input() {
        let result = average_embeddings(&[vec![1.0, 0.0], vec![3.0]]);
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn resume_chunks_follow_layout() {
        let options = PipelineOptions::default();
        let text = "t".repeat(1_500);
        let skills = vec!["Rust".to_string(), "SQL".to_string()];
        let experience = vec![
            "e".repeat(800),
            "second".to_string(),
            "third".to_string(),
            "fourth".to_string(),
        ];

        let chunks = resume_embedding_chunks(&text, &skills, &experience, &options);

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].len(), 1_000);
        assert_eq!(chunks[1], "Skills: Rust, SQL");
        assert_eq!(chunks[2].len(), 500);
        assert_eq!(chunks[4], "third");
    }

    #[tokio::test]
    async fn resume_embedding_uses_one_batch_and_averages() -> Result<(), EmbeddingError> {
        let embedder = RecordingEmbedder::default();
        let vector = embed_resume(
            &embedder,
            "Backend engineer",
            &["Rust".to_string()],
            &["Built APIs".to_string()],
            &PipelineOptions::default(),
        )
        .await?;

        assert_eq!(vector, vec![1.0, 1.0]);
        let batches = embedder.batches.lock().map(|batches| batches.len()).unwrap_or(0);
        assert_eq!(batches, 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_resume_yields_empty_vector() -> Result<(), EmbeddingError> {
        let embedder = RecordingEmbedder::default();
        let vector = embed_resume(&embedder, "   ", &[], &[], &PipelineOptions::default()).await?;
        assert!(vector.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn job_description_is_trimmed_and_bounded() -> Result<(), EmbeddingError> {
        let embedder = RecordingEmbedder::default();
        let description = format!("   {}   ", "j".repeat(3_000));

        embed_job_description(&embedder, &description, 2_000).await?;

        let sent = embedder
            .batches
            .lock()
            .ok()
            .and_then(|batches| batches.first().cloned())
            .unwrap_or_default();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 2_000);
        Ok(())
    }
}
