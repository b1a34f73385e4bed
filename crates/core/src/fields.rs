//! Structured field extraction from raw resume text.
//!
//! The primary path is a single schema-constrained LLM call. Any error from that
//! call is absorbed here and replaced by [`fallback_extraction`], which only uses
//! pattern matching and therefore always produces a record.

use crate::error::LlmError;
use crate::models::{char_prefix, ContactInfo, Education, Experience, StructuredResume};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_PARSING_MODEL: &str = "gpt-4o-2024-08-06";
const EMPTY_SUMMARY: &str = "Resume content extracted";

const SYSTEM_PROMPT: &str = "You are a professional resume parser. Extract structured information \
from resume text and return it in the specified format.";

#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract_fields(&self, text: &str) -> Result<StructuredResume, LlmError>;
}

/// Runs the LLM extraction on the first `prefix_chars` characters of `text` and
/// falls back to pattern matching on the full text if the call fails.
pub async fn extract_structured(
    extractor: &dyn FieldExtractor,
    text: &str,
    prefix_chars: usize,
    fallback_summary_chars: usize,
) -> StructuredResume {
    match extractor.extract_fields(char_prefix(text, prefix_chars)).await {
        Ok(fields) => {
            info!(
                skills = fields.skills.len(),
                experience = fields.experience.len(),
                education = fields.education.len(),
                "extracted structured resume fields"
            );
            fields
        }
        Err(error) => {
            warn!(%error, "structured extraction failed, using fallback extraction");
            fallback_extraction(text, fallback_summary_chars)
        }
    }
}

pub fn fallback_extraction(text: &str, summary_chars: usize) -> StructuredResume {
    let email = pattern(&EMAIL, r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .and_then(|re| re.find(text))
        .map(|found| found.as_str().to_string());

    let phone = pattern(
        &PHONE,
        r"(\+?1?[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})",
    )
    .and_then(|re| re.captures(text))
    .map(|captures| {
        captures
            .iter()
            .skip(1)
            .flatten()
            .map(|group| group.as_str().trim())
            .collect::<String>()
    });

    let linkedin = pattern(&LINKEDIN, r"https?://(?:www\.)?linkedin\.com/in/[a-zA-Z0-9-]+")
        .and_then(|re| re.find(text))
        .map(|found| found.as_str().to_string());

    let summary = if text.is_empty() {
        EMPTY_SUMMARY.to_string()
    } else {
        char_prefix(text, summary_chars).to_string()
    };

    StructuredResume {
        skills: word_tokens(text),
        experience: Vec::new(),
        education: Vec::new(),
        contact_info: ContactInfo {
            email,
            phone,
            linkedin,
        },
        summary: Some(summary),
    }
}

static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
static PHONE: OnceLock<Option<Regex>> = OnceLock::new();
static LINKEDIN: OnceLock<Option<Regex>> = OnceLock::new();
static WORD: OnceLock<Option<Regex>> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

/// Alphabetic word tokens, de-duplicated case-insensitively in first-seen order.
fn word_tokens(text: &str) -> Vec<String> {
    let Some(re) = pattern(&WORD, r"\b[A-Za-z]{2,}\b") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    re.find_iter(text)
        .map(|found| found.as_str())
        .filter(|token| seen.insert(token.to_lowercase()))
        .map(str::to_string)
        .collect()
}

pub struct OpenAiFieldExtractor {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiFieldExtractor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LlmResume {
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    experience: Vec<LlmExperience>,
    #[serde(default)]
    education: Vec<LlmEducation>,
    #[serde(default)]
    contact_info: ContactInfo,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LlmExperience {
    #[serde(default)]
    company: String,
    #[serde(default)]
    position: String,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct LlmEducation {
    #[serde(default)]
    degree: String,
    #[serde(default)]
    institution: String,
    #[serde(default)]
    year: Option<String>,
}

impl From<LlmResume> for StructuredResume {
    fn from(value: LlmResume) -> Self {
        Self {
            skills: value
                .skills
                .into_iter()
                .map(|skill| skill.trim().to_string())
                .filter(|skill| !skill.is_empty())
                .collect(),
            experience: value
                .experience
                .into_iter()
                .map(|entry| Experience {
                    company: or_default(entry.company, "Unknown Company"),
                    position: or_default(entry.position, "Unknown Position"),
                    duration: or_default(entry.duration, "Unknown Duration"),
                    description: or_default(entry.description, "No description available"),
                })
                .collect(),
            education: value
                .education
                .into_iter()
                .map(|entry| Education {
                    degree: or_default(entry.degree, "Unknown Degree"),
                    institution: or_default(entry.institution, "Unknown Institution"),
                    year: entry.year.filter(|year| !year.trim().is_empty()),
                })
                .collect(),
            contact_info: value.contact_info,
            summary: value.summary.filter(|summary| !summary.trim().is_empty()),
        }
    }
}

fn or_default(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn user_prompt(text: &str) -> String {
    format!(
        "Please analyze the following resume text and extract structured information.\n\n\
         Resume text:\n{text}\n\n\
         Please ensure:\n\
         1. Skills are technical and relevant to the job market\n\
         2. Experience entries include company, position, duration, and description\n\
         3. Education includes degree, institution, and year\n\
         4. Contact info includes email, phone, and LinkedIn if available\n\
         5. Summary is professional and concise (2-3 sentences)"
    )
}

fn response_schema() -> Value {
    let nullable_string = json!({ "type": ["string", "null"] });
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "resume_structured_output",
            "strict": true,
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "required": ["skills", "experience", "education", "contact_info", "summary"],
                "properties": {
                    "skills": { "type": "array", "items": { "type": "string" } },
                    "experience": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["company", "position", "duration", "description"],
                            "properties": {
                                "company": { "type": "string" },
                                "position": { "type": "string" },
                                "duration": { "type": "string" },
                                "description": { "type": "string" }
                            }
                        }
                    },
                    "education": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": ["degree", "institution", "year"],
                            "properties": {
                                "degree": { "type": "string" },
                                "institution": { "type": "string" },
                                "year": nullable_string
                            }
                        }
                    },
                    "contact_info": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["email", "phone", "linkedin"],
                        "properties": {
                            "email": nullable_string,
                            "phone": nullable_string,
                            "linkedin": nullable_string
                        }
                    },
                    "summary": { "type": "string" }
                }
            }
        }
    })
}

fn parse_reply(content: &str) -> Result<StructuredResume, LlmError> {
    let parsed: LlmResume = serde_json::from_str(content.trim())?;
    Ok(parsed.into())
}

#[async_trait]
impl FieldExtractor for OpenAiFieldExtractor {
    async fn extract_fields(&self, text: &str) -> Result<StructuredResume, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::NotConfigured);
        }

        let prompt = user_prompt(text);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            response_format: response_schema(),
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyContent)?;

        parse_reply(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FailingExtractor;

    #[async_trait]
    impl FieldExtractor for FailingExtractor {
        async fn extract_fields(&self, _text: &str) -> Result<StructuredResume, LlmError> {
            Err(LlmError::Api {
                status: 503,
                message: "unavailable".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingExtractor {
        seen: Mutex<Option<String>>,
    }

    #[async_trait]
    impl FieldExtractor for RecordingExtractor {
        async fn extract_fields(&self, text: &str) -> Result<StructuredResume, LlmError> {
            if let Ok(mut seen) = self.seen.lock() {
                *seen = Some(text.to_string());
            }
            Ok(StructuredResume {
                skills: vec!["Rust".to_string()],
                ..StructuredResume::default()
            })
        }
    }

    const RESUME: &str = "Jane Doe\njane@x.com | (555) 123-4567\n\
        https://www.linkedin.com/in/jane-doe\n\nRust and Kubernetes engineer. Rust expert.";

    #[test]
    fn fallback_pulls_contact_details() {
        let fields = fallback_extraction(RESUME, 200);

        assert_eq!(fields.contact_info.email.as_deref(), Some("jane@x.com"));
        assert_eq!(fields.contact_info.phone.as_deref(), Some("5551234567"));
        assert_eq!(
            fields.contact_info.linkedin.as_deref(),
            Some("https://www.linkedin.com/in/jane-doe")
        );
        assert!(fields.experience.is_empty());
        assert!(fields.education.is_empty());
    }

    #[test]
    fn fallback_skills_are_deduplicated_in_order() {
        let fields = fallback_extraction("Rust rust Go, Rust and SQL", 200);
        assert_eq!(fields.skills, vec!["Rust", "Go", "and", "SQL"]);
    }

    #[test]
    fn fallback_on_empty_text_still_returns_a_record() {
        let fields = fallback_extraction("", 200);

        assert!(fields.skills.is_empty());
        assert_eq!(fields.contact_info, ContactInfo::default());
        assert_eq!(fields.summary.as_deref(), Some("Resume content extracted"));
    }

    #[test]
    fn fallback_summary_is_a_text_prefix() {
        let text = "x".repeat(500);
        let fields = fallback_extraction(&text, 200);
        assert_eq!(fields.summary.map(|summary| summary.len()), Some(200));
    }

    #[tokio::test]
    async fn failing_llm_call_falls_back() {
        let fields = extract_structured(&FailingExtractor, RESUME, 4_000, 200).await;

        assert_eq!(fields.contact_info.email.as_deref(), Some("jane@x.com"));
        assert!(!fields.skills.is_empty());
    }

    #[tokio::test]
    async fn llm_receives_bounded_prefix() {
        let extractor = RecordingExtractor::default();
        let text = "a".repeat(5_000);

        let fields = extract_structured(&extractor, &text, 4_000, 200).await;

        assert_eq!(fields.skills, vec!["Rust"]);
        let seen = extractor.seen.lock().ok().and_then(|seen| seen.clone());
        assert_eq!(seen.map(|text| text.len()), Some(4_000));
    }

    #[test]
    fn llm_reply_fills_missing_entry_fields() -> Result<(), LlmError> {
        let reply = r#"{
            "skills": ["Rust", " "],
            "experience": [{"company": "", "position": "Engineer", "duration": "2y", "description": ""}],
            "education": [{"degree": "BSc", "institution": "", "year": null}],
            "contact_info": {"email": "jane@x.com", "phone": null, "linkedin": null},
            "summary": "Systems engineer."
        }"#;

        let fields = parse_reply(reply)?;

        assert_eq!(fields.skills, vec!["Rust"]);
        assert_eq!(fields.experience[0].company, "Unknown Company");
        assert_eq!(fields.experience[0].description, "No description available");
        assert_eq!(fields.education[0].institution, "Unknown Institution");
        assert_eq!(fields.education[0].year, None);
        assert_eq!(fields.summary.as_deref(), Some("Systems engineer."));
        Ok(())
    }

    #[test]
    fn malformed_llm_reply_is_a_parse_error() {
        assert!(matches!(parse_reply("not json"), Err(LlmError::Parse(_))));
    }

    #[tokio::test]
    async fn unconfigured_client_errors_without_network() {
        let extractor = OpenAiFieldExtractor::new("", DEFAULT_PARSING_MODEL, None);
        let result = extractor.extract_fields("text").await;
        assert!(matches!(result, Err(LlmError::NotConfigured)));
    }
}
