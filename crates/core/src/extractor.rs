use crate::error::IngestError;
use lopdf::Document;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_MIN_EXTRACTED_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: u32,
}

impl ExtractedText {
    fn trimmed_len(&self) -> usize {
        self.text.trim().chars().count()
    }
}

pub trait PdfExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ExtractedText, IngestError>;
}

/// Layout-aware pass backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LayoutExtractor;

impl PdfExtractor for LayoutExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedText, IngestError> {
        let bytes = std::fs::read(path)?;
        let page_count = count_pages(&bytes)?;

        // pdf-extract panics on some malformed font tables.
        let extracted = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(&bytes)
        }))
        .map_err(|_| {
            IngestError::PdfParse(format!("layout extraction panicked: {}", path.display()))
        })?
        .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        Ok(ExtractedText {
            text: extracted.trim().to_string(),
            page_count,
        })
    }
}

/// Simpler page-by-page pass backed by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedText, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let pages = document.get_pages();
        let mut text = String::new();
        for page_no in pages.keys() {
            let page_text = document
                .extract_text(&[*page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !page_text.trim().is_empty() {
                text.push_str(&page_text);
                text.push('\n');
            }
        }

        Ok(ExtractedText {
            text: text.trim().to_string(),
            page_count: pages.len() as u32,
        })
    }
}

/// Runs `primary`, and re-runs with `secondary` when the primary pass either
/// cannot parse the file or yields fewer than `min_chars` characters.
pub struct FallbackExtractor<P, S> {
    primary: P,
    secondary: S,
    min_chars: usize,
}

impl<P, S> FallbackExtractor<P, S>
where
    P: PdfExtractor,
    S: PdfExtractor,
{
    pub fn new(primary: P, secondary: S, min_chars: usize) -> Self {
        Self {
            primary,
            secondary,
            min_chars,
        }
    }
}

impl Default for FallbackExtractor<LayoutExtractor, LopdfExtractor> {
    fn default() -> Self {
        Self::new(LayoutExtractor, LopdfExtractor, DEFAULT_MIN_EXTRACTED_CHARS)
    }
}

impl<P, S> PdfExtractor for FallbackExtractor<P, S>
where
    P: PdfExtractor,
    S: PdfExtractor,
{
    fn extract(&self, path: &Path) -> Result<ExtractedText, IngestError> {
        let extracted = match self.primary.extract(path) {
            Ok(extracted) if extracted.trimmed_len() >= self.min_chars => extracted,
            Ok(short) => {
                debug!(
                    path = %path.display(),
                    chars = short.trimmed_len(),
                    "primary extraction too short, retrying with secondary extractor"
                );
                match self.secondary.extract(path) {
                    Ok(secondary) => secondary,
                    Err(error) => {
                        warn!(path = %path.display(), %error, "secondary extraction failed");
                        short
                    }
                }
            }
            Err(IngestError::PdfParse(parse_error)) => match self.secondary.extract(path) {
                Ok(secondary) => secondary,
                Err(secondary_error) => {
                    return Err(IngestError::PdfParse(format!(
                        "{parse_error}; secondary extraction failed: {secondary_error}"
                    )))
                }
            },
            Err(error) => return Err(error),
        };

        info!(
            path = %path.display(),
            chars = extracted.text.chars().count(),
            pages = extracted.page_count,
            "extracted resume text"
        );
        Ok(extracted)
    }
}

pub fn extract_resume_text(path: &Path) -> Result<ExtractedText, IngestError> {
    FallbackExtractor::default().extract(path)
}

fn count_pages(bytes: &[u8]) -> Result<u32, IngestError> {
    let document =
        Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;
    Ok(document.get_pages().len() as u32)
}
