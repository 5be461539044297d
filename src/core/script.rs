use crate::core::speakers::Roster;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DialogueTurn {
    pub speaker: String,
    pub text: String,
}

impl DialogueTurn {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Script {
    pub title: String,
    pub dialogue: Vec<DialogueTurn>,
}

impl Script {
    /// Speakers that appear in the dialogue but not in the roster, in first-seen order.
    pub fn unknown_speakers(&self, roster: &Roster) -> Vec<String> {
        let mut unknown: Vec<String> = Vec::new();
        for turn in &self.dialogue {
            if !roster.contains(&turn.speaker) && !unknown.contains(&turn.speaker) {
                unknown.push(turn.speaker.clone());
            }
        }
        unknown
    }
}

/// Result of a generation run as handed to callers.
///
/// Serializes either as `{"title": ..., "dialogue": [...]}` or as
/// `{"error": ...}`; the two shapes never mix.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScriptDocument {
    Script(Script),
    Failure { error: String },
}

impl ScriptDocument {
    pub fn failure(message: impl Into<String>) -> Self {
        ScriptDocument::Failure {
            error: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ScriptDocument::Failure { .. })
    }

    pub fn script(&self) -> Option<&Script> {
        match self {
            ScriptDocument::Script(script) => Some(script),
            ScriptDocument::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ScriptDocument::Script(_) => None,
            ScriptDocument::Failure { error } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<Script, String> {
        match self {
            ScriptDocument::Script(script) => Ok(script),
            ScriptDocument::Failure { error } => Err(error),
        }
    }
}

/// Renders turns as `speaker: text` lines, the form stages feed back to the model.
pub fn render_lines(turns: &[DialogueTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.speaker, t.text))
        .collect::<Vec<_>>()
        .join("\n")
}
