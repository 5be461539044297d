use crate::core::content::count_words;
use serde::{Deserialize, Serialize};

/// One bounded slice of the source, in source order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceChunk {
    pub text: String,
    pub index: usize,
    pub total: usize,
}

/// Splits after `.`, `!` or `?` when followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        match chars.peek() {
            Some(&(_, next)) if next.is_whitespace() => {
                push_trimmed(&mut sentences, &text[start..end]);
                while let Some(&(_, ws)) = chars.peek() {
                    if !ws.is_whitespace() {
                        break;
                    }
                    chars.next();
                }
                start = chars.peek().map(|&(j, _)| j).unwrap_or(text.len());
            }
            _ => {}
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(sentences: &mut Vec<&'a str>, sentence: &'a str) {
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
}

/// Greedily packs whole sentences into chunks of at most `max_words` words.
///
/// Sentences are never cut, so a chunk holding a single over-long sentence
/// may exceed the bound.
pub fn chunk_text(text: &str, max_words: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0;

    for sentence in split_sentences(text) {
        let words = count_words(sentence);
        if current_words + words > max_words && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            current_words = 0;
        }
        current.push(sentence);
        current_words += words;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    log::info!("Total chunks created: {}", chunks.len());
    chunks
}

pub fn split_into_chunks(text: &str, max_words: usize) -> Vec<SourceChunk> {
    let chunks = chunk_text(text, max_words);
    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, text)| SourceChunk { text, index, total })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn sample_text(sentences: usize, words_per_sentence: usize) -> String {
        (0..sentences)
            .map(|s| {
                let body = (0..words_per_sentence)
                    .map(|w| format!("w{}_{}", s, w))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{}.", body)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_split_sentences() {
        let text = "First one. Second?  Third!\nFourth without end";
        assert_eq!(
            split_sentences(text),
            vec!["First one.", "Second?", "Third!", "Fourth without end"]
        );
    }

    #[test]
    fn test_split_ignores_punctuation_without_whitespace() {
        assert_eq!(
            split_sentences("Version 1.2 shipped. e.g.this stays"),
            vec!["Version 1.2 shipped.", "e.g.this stays"]
        );
    }

    #[test]
    fn test_split_handles_multibyte_text() {
        assert_eq!(split_sentences("Café é bom. Olá!"), vec!["Café é bom.", "Olá!"]);
    }

    #[test]
    fn test_chunks_respect_bound_and_order() {
        let text = sample_text(10, 10);
        let chunks = chunk_text(&text, 35);
        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            assert!(count_words(chunk) <= 35);
        }
        assert_eq!(normalize(&chunks.join(" ")), normalize(&text));
    }

    #[test]
    fn test_long_sentence_gets_its_own_chunk() {
        let text = format!("Short start. {} Short end.", sample_text(1, 50));
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "Short start.");
        assert_eq!(count_words(&chunks[1]), 50);
        assert_eq!(split_sentences(&chunks[1]).len(), 1);
        assert_eq!(chunks[2], "Short end.");
    }

    #[test]
    fn test_non_empty_input_never_yields_no_chunks() {
        assert_eq!(chunk_text("no punctuation at all", 2), vec!["no punctuation at all"]);
        assert!(chunk_text("   ", 10).is_empty());
    }

    #[test]
    fn test_five_thousand_words_make_two_chunks() {
        let text = sample_text(250, 20);
        let chunks = split_into_chunks(&text, 3000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].index, 1);
        assert!(chunks.iter().all(|c| c.total == 2));
        assert_eq!(count_words(&chunks[0].text), 3000);
        assert_eq!(count_words(&chunks[1].text), 2000);
    }
}
