//! Recovers dialogue turns from free-form model output.
//!
//! Models are asked for a JSON array of `{"speaker", "text"}` objects but do
//! not always comply. Extraction tries, in order:
//!
//! 1. the first complete JSON value starting at the first `[`, ignoring any
//!    trailing prose, then the slice between the first `[` and the last `]`;
//! 2. a scan for standalone `{...}` objects, keeping those that carry both
//!    `speaker` and `text`.
//!
//! Extraction never fails; an unusable response yields no turns.

use crate::core::script::DialogueTurn;
use serde_json::Value;

pub fn extract_turns(response: &str) -> Vec<DialogueTurn> {
    let response = strip_code_blocks(response);

    if let Some(turns) = extract_array(&response) {
        return turns;
    }

    let turns = extract_objects(&response);
    if turns.is_empty() {
        log::warn!("No dialogue found in response ({} chars)", response.len());
        log::debug!(
            "Response was: {}...",
            response.chars().take(500).collect::<String>()
        );
    }
    turns
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

/// Returns `None` unless some array parse produced at least one turn.
fn extract_array(response: &str) -> Option<Vec<DialogueTurn>> {
    let start = response.find('[')?;

    let mut stream = serde_json::Deserializer::from_str(&response[start..]).into_iter::<Value>();
    if let Some(Ok(value)) = stream.next() {
        let turns = turns_from_value(&value);
        if !turns.is_empty() {
            return Some(turns);
        }
    }

    let end = response.rfind(']')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&response[start..=end]).ok()?;
    let turns = turns_from_value(&value);
    (!turns.is_empty()).then_some(turns)
}

fn turns_from_value(value: &Value) -> Vec<DialogueTurn> {
    match value {
        Value::Array(items) => items.iter().filter_map(turn_from_object).collect(),
        _ => Vec::new(),
    }
}

/// A turn needs string `speaker` and `text` fields; blank text is dropped.
fn turn_from_object(value: &Value) -> Option<DialogueTurn> {
    let object = value.as_object()?;
    let speaker = object.get("speaker")?.as_str()?.trim();
    let text = object.get("text")?.as_str()?.trim();
    if speaker.is_empty() || text.is_empty() {
        return None;
    }
    Some(DialogueTurn::new(speaker, text))
}

/// Scans for top-level `{...}` spans and parses each one independently.
///
/// Braces inside JSON string literals do not count toward nesting, so a
/// line such as `"text": "use {braces}"` does not split an object.
fn extract_objects(response: &str) -> Vec<DialogueTurn> {
    let mut scanner = ObjectScanner::default();
    let mut turns = Vec::new();

    for (i, c) in response.char_indices() {
        if let Some(span) = scanner.feed(i, c) {
            let candidate = &response[span.0..=span.1];
            match serde_json::from_str::<Value>(candidate) {
                Ok(value) => {
                    if let Some(turn) = turn_from_object(&value) {
                        turns.push(turn);
                    }
                }
                Err(e) => log::debug!("Skipping malformed object: {}", e),
            }
        }
    }
    turns
}

#[derive(Default)]
struct ObjectScanner {
    depth: usize,
    start: usize,
    in_string: bool,
    escaped: bool,
}

impl ObjectScanner {
    /// Feeds one character at byte offset `i`; returns the byte range of an
    /// object when its closing brace is seen.
    fn feed(&mut self, i: usize, c: char) -> Option<(usize, usize)> {
        if self.depth == 0 {
            if c == '{' {
                self.depth = 1;
                self.start = i;
                self.in_string = false;
                self.escaped = false;
            }
            return None;
        }

        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            return None;
        }

        match c {
            '"' => self.in_string = true,
            '{' => self.depth += 1,
            '}' => {
                self.depth -= 1;
                if self.depth == 0 {
                    return Some((self.start, i));
                }
            }
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: &str, text: &str) -> DialogueTurn {
        DialogueTurn::new(speaker, text)
    }

    #[test]
    fn test_well_formed_array_round_trips() {
        let turns = vec![
            turn("Alex", "Welcome back."),
            turn("Bailey", "Glad to be here."),
            turn("Alex", "Let's dive in."),
        ];
        let raw = serde_json::to_string(&turns).unwrap();
        assert_eq!(extract_turns(&raw), turns);
    }

    #[test]
    fn test_array_with_surrounding_prose() {
        let raw = r#"Sure! Here is the script:
[{"speaker": "Alex", "text": "Hi"}, {"speaker": "Bailey", "text": "Hello"}]
Let me know if you want changes [or anything else]."#;
        assert_eq!(
            extract_turns(raw),
            vec![turn("Alex", "Hi"), turn("Bailey", "Hello")]
        );
    }

    #[test]
    fn test_code_fenced_array() {
        let raw = "```json\n[{\"speaker\": \"Alex\", \"text\": \"Fenced\"}]\n```";
        assert_eq!(extract_turns(raw), vec![turn("Alex", "Fenced")]);
    }

    #[test]
    fn test_stray_bracket_recovers_through_object_scan() {
        // "[Draft]" breaks both array parses
        let raw = r#"[Draft] [{"speaker": "Alex", "text": "One"}]"#;
        assert_eq!(extract_turns(raw), vec![turn("Alex", "One")]);
    }

    #[test]
    fn test_concatenated_objects() {
        let raw = r#"{"speaker": "Alex", "text": "First"}{"speaker": "Bailey", "text": "Second"}"#;
        assert_eq!(
            extract_turns(raw),
            vec![turn("Alex", "First"), turn("Bailey", "Second")]
        );
    }

    #[test]
    fn test_newline_separated_objects_skip_malformed_ones() {
        let raw = "{\"speaker\": \"Alex\", \"text\": \"Good\"}\n\
                   {\"speaker\": \"Bailey\", \"text\": broken}\n\
                   {\"note\": \"no speaker\"}\n\
                   {\"speaker\": \"Casey\", \"text\": \"Also good\"}";
        assert_eq!(
            extract_turns(raw),
            vec![turn("Alex", "Good"), turn("Casey", "Also good")]
        );
    }

    #[test]
    fn test_braces_inside_strings_do_not_split_objects() {
        let raw = r#"{"speaker": "Alex", "text": "Sets look like {1, 2} and \"quotes}\" too"}
{"speaker": "Bailey", "text": "Right"}"#;
        assert_eq!(
            extract_turns(raw),
            vec![
                turn("Alex", r#"Sets look like {1, 2} and "quotes}" too"#),
                turn("Bailey", "Right")
            ]
        );
    }

    #[test]
    fn test_empty_turns_are_discarded() {
        let raw = r#"[{"speaker": "Alex", "text": "   "}, {"speaker": "Bailey", "text": "Kept"}, {"speaker": "Casey"}]"#;
        assert_eq!(extract_turns(raw), vec![turn("Bailey", "Kept")]);
    }

    #[test]
    fn test_not_json_yields_nothing() {
        assert!(extract_turns("not json at all").is_empty());
        assert!(extract_turns("").is_empty());
        assert!(extract_turns("] backwards [").is_empty());
        assert!(extract_turns("{ unbalanced").is_empty());
    }

    #[test]
    fn test_array_of_non_turns_falls_through() {
        let raw = r#"["a", "b"] {"speaker": "Alex", "text": "Recovered"}"#;
        assert_eq!(extract_turns(raw), vec![turn("Alex", "Recovered")]);
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }
}
