use crate::models::PipelineOptions;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1_000 }
    }
}

impl From<&PipelineOptions> for ChunkingConfig {
    fn from(value: &PipelineOptions) -> Self {
        Self {
            max_chars: value.chunk_size,
        }
    }
}

/// Splits `text` into chunks of roughly `config.max_chars` characters.
///
/// Paragraphs (blank-line separated) shorter than the limit are kept verbatim.
/// Longer paragraphs are split into sentences, which are packed greedily in
/// order: a sentence joins the running chunk unless that would reach the limit,
/// in which case the running chunk is emitted first. Packing never reorders
/// sentences, so ties always keep earlier sentences together. A single sentence
/// longer than the limit becomes its own oversized chunk.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if paragraph.chars().count() < config.max_chars {
            chunks.push(paragraph.to_string());
            continue;
        }

        let mut current = String::new();
        let mut current_len = 0usize;
        for sentence in split_sentences(paragraph) {
            let sentence_len = sentence.chars().count();
            if current_len > 0 && current_len + 1 + sentence_len >= config.max_chars {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }

            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(sentence);
            current_len += sentence_len;
        }

        if !current.is_empty() {
            chunks.push(current);
        }
    }

    chunks
}

/// Sentences end after a run of `.`, `!` or `?`; the terminators stay attached.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut in_terminator = false;

    for (index, ch) in paragraph.char_indices() {
        let is_terminator = matches!(ch, '.' | '!' | '?');
        if in_terminator && !is_terminator {
            push_trimmed(&mut sentences, &paragraph[start..index]);
            start = index;
        }
        in_terminator = is_terminator;
    }
    push_trimmed(&mut sentences, &paragraph[start..]);

    sentences
}

fn push_trimmed<'a>(target: &mut Vec<&'a str>, sentence: &'a str) {
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        target.push(sentence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_whitespace(text: &str) -> String {
        text.chars().filter(|ch| !ch.is_whitespace()).collect()
    }

    #[test]
    fn short_paragraphs_are_kept_verbatim() {
        let chunks = chunk_text("First paragraph.\n\n  Second one!  \n\n\n", ChunkingConfig { max_chars: 100 });
        assert_eq!(chunks, vec!["First paragraph.", "Second one!"]);
    }

    #[test]
    fn long_paragraph_is_packed_by_sentence() {
        let text = "Alpha beta. Gamma delta! Epsilon zeta? Eta theta.";
        let chunks = chunk_text(text, ChunkingConfig { max_chars: 25 });

        assert_eq!(
            chunks,
            vec!["Alpha beta. Gamma delta!", "Epsilon zeta? Eta theta."]
        );
        assert!(chunks.iter().all(|chunk| !chunk.trim().is_empty()));
    }

    #[test]
    fn oversized_sentence_becomes_its_own_chunk() {
        let long_sentence = format!("{}.", "word ".repeat(30).trim());
        let text = format!("Short. {long_sentence} Tail.");
        let chunks = chunk_text(&text, ChunkingConfig { max_chars: 20 });

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "Short.");
        assert_eq!(chunks[1], long_sentence);
        assert_eq!(chunks[2], "Tail.");
    }

    #[test]
    fn chunking_preserves_non_whitespace_characters_in_order() {
        let text = "Led a team of 5... Shipped v2!! Why? Because.\n\n\nSkills: Rust, Go\n\n \
                    Mentored juniors; ran on-call. Wrote docs";
        for max_chars in [5, 12, 40, 1_000] {
            let chunks = chunk_text(text, ChunkingConfig { max_chars });
            assert!(chunks.iter().all(|chunk| !chunk.trim().is_empty()));
            assert_eq!(non_whitespace(&chunks.concat()), non_whitespace(text));
        }
    }

    #[test]
    fn whitespace_only_input_has_no_chunks() {
        assert!(chunk_text(" \n\n \t ", ChunkingConfig::default()).is_empty());
        assert!(chunk_text("", ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn non_empty_input_has_at_least_one_chunk() {
        assert_eq!(chunk_text("x", ChunkingConfig::default()).len(), 1);
    }
}
