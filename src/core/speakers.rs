use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_SPEAKERS: usize = 2;
pub const MAX_SPEAKERS: usize = 4;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerRole {
    Host,
    Expert,
    Skeptic,
    Futurist,
}

impl fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SpeakerRole::Host => "Host",
            SpeakerRole::Expert => "Expert",
            SpeakerRole::Skeptic => "Skeptic",
            SpeakerRole::Futurist => "Futurist",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SpeakerProfile {
    pub name: String,
    pub role: SpeakerRole,
    pub personality: String,
}

struct Archetype {
    name: &'static str,
    role: SpeakerRole,
    personality: &'static str,
}

const BASE_ROSTER: [Archetype; MAX_SPEAKERS] = [
    Archetype {
        name: "Alex",
        role: SpeakerRole::Host,
        personality: "curious, enthusiastic, asks clarifying questions, guides the conversation",
    },
    Archetype {
        name: "Bailey",
        role: SpeakerRole::Expert,
        personality: "knowledgeable, calm, articulate, explains complex concepts simply",
    },
    Archetype {
        name: "Casey",
        role: SpeakerRole::Skeptic,
        personality: "critical thinker, challenges assumptions, looks for evidence, plays devil's advocate",
    },
    Archetype {
        name: "Devin",
        role: SpeakerRole::Futurist,
        personality: "energetic, visionary, relates topics to future possibilities and trends",
    },
];

/// The resolved, ordered set of speakers for one generation request.
///
/// A roster is read-only once built, so it can be shared across concurrently
/// processed chunks behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    speakers: Vec<SpeakerProfile>,
}

impl Roster {
    /// Clamps `requested` into `[MIN_SPEAKERS, MAX_SPEAKERS]`, takes that many
    /// base archetypes and applies any non-blank custom names by position.
    ///
    /// Only the name is ever overridden. Uniqueness is checked against the
    /// final names, so custom names may reuse defaults they displace. A custom
    /// name that still duplicates another final name is ignored, the earlier
    /// position winning between two custom names.
    pub fn resolve(requested: usize, custom_names: Option<&[String]>) -> Self {
        let count = requested.clamp(MIN_SPEAKERS, MAX_SPEAKERS);
        let mut speakers: Vec<SpeakerProfile> = BASE_ROSTER[..count]
            .iter()
            .map(|a| SpeakerProfile {
                name: a.name.to_string(),
                role: a.role,
                personality: a.personality.to_string(),
            })
            .collect();

        let mut custom: Vec<Option<&str>> = vec![None; count];
        for (i, name) in custom_names.unwrap_or_default().iter().enumerate().take(count) {
            let name = name.trim();
            if !name.is_empty() {
                custom[i] = Some(name);
            }
        }

        // Drop custom names that clash with the final set until none do.
        // Each pass reverts one position, so this settles within `count` passes.
        loop {
            let final_name = |k: usize| custom[k].unwrap_or(BASE_ROSTER[k].name);
            let clash = (0..count).find(|&i| {
                custom[i].is_some()
                    && (0..count).any(|j| {
                        j != i
                            && (custom[j].is_none() || j < i)
                            && final_name(j).eq_ignore_ascii_case(final_name(i))
                    })
            });
            match clash {
                Some(i) => {
                    log::warn!(
                        "Ignoring custom speaker name '{}' at position {}: already in use",
                        custom[i].unwrap_or_default(),
                        i
                    );
                    custom[i] = None;
                }
                None => break,
            }
        }

        for (speaker, name) in speakers.iter_mut().zip(custom) {
            if let Some(name) = name {
                speaker.name = name.to_string();
            }
        }

        Self { speakers }
    }

    pub fn speakers(&self) -> &[SpeakerProfile] {
        &self.speakers
    }

    pub fn len(&self) -> usize {
        self.speakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speakers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.speakers.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.speakers.iter().any(|s| s.name == name)
    }

    /// The Host-role speaker, or the first speaker if no host is present.
    pub fn host(&self) -> &SpeakerProfile {
        self.speakers
            .iter()
            .find(|s| s.role == SpeakerRole::Host)
            .unwrap_or(&self.speakers[0])
    }

    /// Everyone except the host, in roster order.
    pub fn co_speakers(&self) -> Vec<&str> {
        let host = &self.host().name;
        self.speakers
            .iter()
            .filter(|s| &s.name != host)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// One `- Name (Role): personality` line per speaker, for system prompts.
    pub fn describe(&self) -> String {
        self.speakers
            .iter()
            .map(|s| format!("- {} ({}): {}", s.name, s.role, s.personality))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Example JSON elements showing every speaker name, for output-format hints.
    pub fn json_format(&self) -> String {
        self.speakers
            .iter()
            .map(|s| {
                let speaker = serde_json::Value::String(s.name.clone());
                format!("{{\"speaker\": {}, \"text\": \"...\"}}", speaker)
            })
            .collect::<Vec<_>>()
            .join(",\n    ")
    }
}
