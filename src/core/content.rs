use serde::{Deserialize, Serialize};

/// Whitespace-delimited word count.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Source text as handed over by the content-extraction collaborator.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SourceContent {
    pub combined_text: String,
    pub total_word_count: usize,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceContent {
    pub fn from_text(text: impl Into<String>) -> Self {
        let combined_text = text.into();
        let total_word_count = count_words(&combined_text);
        let valid = total_word_count > 0;
        Self {
            combined_text,
            total_word_count,
            valid,
            error: (!valid).then(|| "Content is empty".to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExtractedSource {
    pub title: String,
    pub content: String,
}

/// Joins already-extracted sources under `--- Source: <title> ---` headers.
///
/// The result is only valid once the combined word count reaches `min_words`.
pub fn aggregate(sources: &[ExtractedSource], min_words: usize) -> SourceContent {
    let mut combined_text = String::new();
    let mut total_word_count = 0;

    for source in sources {
        let words = count_words(&source.content);
        if words == 0 {
            log::warn!("Skipping empty source: {}", source.title);
            continue;
        }
        combined_text.push_str(&format!(
            "\n\n--- Source: {} ---\n{}",
            source.title, source.content
        ));
        total_word_count += words;
        log::info!("Added source '{}' ({} words)", source.title, words);
    }

    let valid = total_word_count >= min_words && total_word_count > 0;
    let error = (!valid).then(|| {
        format!(
            "Content too short ({} words). Minimum {} words required.",
            total_word_count, min_words
        )
    });

    SourceContent {
        combined_text,
        total_word_count,
        valid,
        error,
    }
}
