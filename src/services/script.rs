use crate::core::script::{render_lines, DialogueTurn};
use crate::core::speakers::Roster;
use crate::services::chunker::SourceChunk;
use crate::services::extract::extract_turns;
use crate::services::llm::{ChatMessage, LlmClient};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_TOPIC: &str = "General Discussion";
pub const DEFAULT_TONE: &str = "Fun & Engaging";

const CHUNK_WORDS: &str = "300-450";
const INTRO_WORDS: &str = "50-75";
const OUTRO_WORDS: &str = "30-50";
const BOOKEND_WORDS: &str = "30-50";

/// One prompt/response exchange with the completion service.
pub trait ScriptStage: Sync {
    type Output: Send;

    fn name(&self) -> &'static str;
    fn system_prompt(&self) -> String;
    fn user_prompt(&self) -> String;
    fn parse_response(&self, response: &str) -> Self::Output;
    /// Used when the call fails or times out.
    fn fallback(&self) -> Self::Output;
}

/// Optional caller guidance appended to every dialogue-writing prompt.
#[derive(Debug, Clone, Default)]
pub struct StyleGuide {
    pub tone: Option<String>,
    pub custom_instructions: Option<String>,
}

impl StyleGuide {
    fn apply(&self, mut system: String) -> String {
        let tone = self
            .tone
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TONE);
        system.push_str(&format!("\n\nTone: {}", tone));

        if let Some(extra) = self
            .custom_instructions
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            system.push_str(&format!("\nAdditional instructions: {}", extra));
        }
        system
    }
}

fn output_format(roster: &Roster) -> String {
    format!(
        "**Output Format (JSON):**\n[\n    {}\n]",
        roster.json_format()
    )
}

/// Runs stages against one client, degrading failed calls to each stage's fallback.
pub struct StageRunner {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    last_failure: Mutex<Option<String>>,
}

impl StageRunner {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            llm,
            timeout,
            last_failure: Mutex::new(None),
        }
    }

    pub async fn run<S: ScriptStage>(&self, stage: &S) -> S::Output {
        let messages = vec![
            ChatMessage::system(stage.system_prompt()),
            ChatMessage::user(stage.user_prompt()),
        ];

        match tokio::time::timeout(self.timeout, self.llm.complete(&messages)).await {
            Ok(Ok(response)) => stage.parse_response(&response),
            Ok(Err(e)) => {
                self.record_failure(stage.name(), format!("{:#}", e));
                stage.fallback()
            }
            Err(_) => {
                self.record_failure(stage.name(), format!("timed out after {:?}", self.timeout));
                stage.fallback()
            }
        }
    }

    /// The most recent stage failure, if any stage degraded.
    pub fn last_failure(&self) -> Option<String> {
        self.last_failure.lock().ok().and_then(|f| f.clone())
    }

    fn record_failure(&self, stage: &str, message: String) {
        log::warn!("Stage '{}' failed: {}", stage, message);
        if let Ok(mut last) = self.last_failure.lock() {
            *last = Some(format!("{}: {}", stage, message));
        }
    }
}

// --- Topic ---

pub struct TopicStage<'a> {
    pub chunk: &'a SourceChunk,
}

impl ScriptStage for TopicStage<'_> {
    type Output = String;

    fn name(&self) -> &'static str {
        "topic"
    }

    fn system_prompt(&self) -> String {
        "You are a helpful assistant that extracts main topics from text.".to_string()
    }

    fn user_prompt(&self) -> String {
        format!(
            "Read the following text and extract the main topic or theme in 5-10 words.\n\n\
             Text:\n{}\n\n\
             Respond with ONLY the topic, nothing else.",
            self.chunk.text
        )
    }

    fn parse_response(&self, response: &str) -> String {
        let topic = response
            .lines()
            .map(|l| l.trim().trim_matches(|c: char| c == '"' || c == '*' || c == '#').trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        if topic.is_empty() {
            self.fallback()
        } else {
            topic.to_string()
        }
    }

    fn fallback(&self) -> String {
        DEFAULT_TOPIC.to_string()
    }
}

// --- Chunk dialogue ---

pub struct ChunkDialogueStage<'a> {
    pub chunk: &'a SourceChunk,
    pub topic: &'a str,
    pub roster: &'a Roster,
    pub style: &'a StyleGuide,
}

impl ScriptStage for ChunkDialogueStage<'_> {
    type Output = Vec<DialogueTurn>;

    fn name(&self) -> &'static str {
        "chunk dialogue"
    }

    fn system_prompt(&self) -> String {
        let system = format!(
            "You are a podcast script writer. Create engaging dialogue between these hosts:\n{}\n\n\
             CRITICAL RULES:\n\
             1. Generate {} words of dialogue\n\
             2. DO NOT include any introduction or greeting\n\
             3. DO NOT include any conclusion or sign-off\n\
             4. Jump straight into discussing the topic\n\
             5. Use only these speaker names, spelled exactly: {}\n\
             6. Every speaker must take part over the course of the episode\n\
             7. Output ONLY valid JSON, nothing else",
            self.roster.describe(),
            CHUNK_WORDS,
            self.roster.names().join(", "),
        );
        self.style.apply(system)
    }

    fn user_prompt(&self) -> String {
        format!(
            "Create a {} word dialogue segment about: {}\n\n\
             This is segment {} of {} of the episode.\n\n\
             Based on this content:\n{}\n\n\
             {}\n\n\
             Remember: NO intro, NO outro. Start directly with the topic discussion.",
            CHUNK_WORDS,
            self.topic,
            self.chunk.index + 1,
            self.chunk.total,
            self.chunk.text,
            output_format(self.roster),
        )
    }

    fn parse_response(&self, response: &str) -> Vec<DialogueTurn> {
        extract_turns(response)
    }

    fn fallback(&self) -> Vec<DialogueTurn> {
        Vec::new()
    }
}

// --- Refine ---

pub struct RefineStage<'a> {
    pub turns: &'a [DialogueTurn],
    pub roster: &'a Roster,
    pub style: &'a StyleGuide,
}

impl ScriptStage for RefineStage<'_> {
    type Output = Vec<DialogueTurn>;

    fn name(&self) -> &'static str {
        "refine"
    }

    fn system_prompt(&self) -> String {
        let system = format!(
            "You are a podcast script editor. Rewrite the provided dialogue to make it flow naturally and cohesively.\n\n\
             Speakers:\n{}\n\n\
             CRITICAL RULES:\n\
             1. Maintain the same topics and information\n\
             2. Ensure smooth transitions between topics\n\
             3. Keep the conversational tone and the same speaker names\n\
             4. DO NOT add intro or outro\n\
             5. Keep similar length to original\n\
             6. Output ONLY valid JSON",
            self.roster.describe(),
        );
        self.style.apply(system)
    }

    fn user_prompt(&self) -> String {
        format!(
            "Rewrite this dialogue to flow more naturally:\n\n{}\n\n{}\n\n\
             Make it cohesive but keep the same content and length.",
            render_lines(self.turns),
            output_format(self.roster),
        )
    }

    /// An unusable rewrite keeps the original dialogue.
    fn parse_response(&self, response: &str) -> Vec<DialogueTurn> {
        let refined = extract_turns(response);
        if refined.is_empty() {
            log::warn!("Refinement returned no dialogue, keeping the stitched script");
            return self.fallback();
        }
        refined
    }

    fn fallback(&self) -> Vec<DialogueTurn> {
        self.turns.to_vec()
    }
}

// --- Intro / outro ---

pub struct IntroStage<'a> {
    pub preview: &'a [DialogueTurn],
    pub roster: &'a Roster,
    pub podcast_name: &'a str,
    pub style: &'a StyleGuide,
}

impl ScriptStage for IntroStage<'_> {
    type Output = Vec<DialogueTurn>;

    fn name(&self) -> &'static str {
        "intro"
    }

    fn system_prompt(&self) -> String {
        let host = &self.roster.host().name;
        let system = format!(
            "You are a podcast script writer. Create a brief, engaging introduction.\n\n\
             Speakers:\n{}\n\n\
             CRITICAL RULES:\n\
             1. {} words\n\
             2. The Host ({}) MUST start by welcoming listeners to \"{}\".\n\
             3. {} MUST introduce themselves and then introduce the other speakers: {}.\n\
             4. Tease the main topics.\n\
             5. Output ONLY valid JSON.",
            self.roster.describe(),
            INTRO_WORDS,
            host,
            self.podcast_name,
            host,
            self.roster.co_speakers().join(", "),
        );
        self.style.apply(system)
    }

    fn user_prompt(&self) -> String {
        format!(
            "Create a {} word introduction for this podcast episode:\n\n\
             Main topics discussed:\n{}\n\n{}",
            INTRO_WORDS,
            render_lines(self.preview),
            output_format(self.roster),
        )
    }

    fn parse_response(&self, response: &str) -> Vec<DialogueTurn> {
        extract_turns(response)
    }

    fn fallback(&self) -> Vec<DialogueTurn> {
        Vec::new()
    }
}

pub struct OutroStage<'a> {
    pub preview: &'a [DialogueTurn],
    pub roster: &'a Roster,
    pub podcast_name: &'a str,
    pub style: &'a StyleGuide,
}

impl ScriptStage for OutroStage<'_> {
    type Output = Vec<DialogueTurn>;

    fn name(&self) -> &'static str {
        "outro"
    }

    fn system_prompt(&self) -> String {
        let host = &self.roster.host().name;
        let system = format!(
            "You are a podcast script writer. Create a brief, warm conclusion for \"{}\".\n\n\
             Speakers:\n{}\n\n\
             CRITICAL RULES:\n\
             1. {} words only\n\
             2. The Host ({}) MUST summarize key takeaways.\n\
             3. {} MUST thank the other speakers ({}) for joining.\n\
             4. {} signs off the episode.\n\
             5. Output ONLY valid JSON.",
            self.podcast_name,
            self.roster.describe(),
            OUTRO_WORDS,
            host,
            host,
            self.roster.co_speakers().join(", "),
            host,
        );
        self.style.apply(system)
    }

    fn user_prompt(&self) -> String {
        format!(
            "Create a {} word conclusion for this podcast episode:\n\n\
             Topics covered:\n{}\n\n{}",
            OUTRO_WORDS,
            render_lines(self.preview),
            output_format(self.roster),
        )
    }

    fn parse_response(&self, response: &str) -> Vec<DialogueTurn> {
        extract_turns(response)
    }

    fn fallback(&self) -> Vec<DialogueTurn> {
        Vec::new()
    }
}

// --- Single call ---

pub struct SingleCallStage<'a> {
    pub content: &'a str,
    pub duration_minutes: u32,
    pub target_words: usize,
    pub roster: &'a Roster,
    pub podcast_name: &'a str,
    pub style: &'a StyleGuide,
}

impl ScriptStage for SingleCallStage<'_> {
    type Output = Vec<DialogueTurn>;

    fn name(&self) -> &'static str {
        "single call"
    }

    fn system_prompt(&self) -> String {
        let system = format!(
            "You are a podcast script writer. Create engaging dialogue between these hosts:\n{}\n\n\
             Make it conversational, informative, and engaging. \
             Use only these speaker names, spelled exactly: {}. Output ONLY valid JSON.",
            self.roster.describe(),
            self.roster.names().join(", "),
        );
        self.style.apply(system)
    }

    fn user_prompt(&self) -> String {
        let host = &self.roster.host().name;
        format!(
            "Create a {}-minute podcast script for \"{}\" (approximately {} words) based on this content:\n\n\
             {}\n\n\
             Include:\n\
             1. Brief intro ({} words) where {} welcomes listeners to \"{}\" and introduces the other speakers\n\
             2. Main discussion\n\
             3. Brief outro ({} words) where {} thanks the other speakers and signs off\n\n\
             {}",
            self.duration_minutes,
            self.podcast_name,
            self.target_words,
            self.content,
            BOOKEND_WORDS,
            host,
            self.podcast_name,
            BOOKEND_WORDS,
            host,
            output_format(self.roster),
        )
    }

    fn parse_response(&self, response: &str) -> Vec<DialogueTurn> {
        extract_turns(response)
    }

    fn fallback(&self) -> Vec<DialogueTurn> {
        Vec::new()
    }
}

/// Flattens chunk dialogues in order and asks for one cohesion rewrite.
///
/// Nothing to stitch means no call is made.
pub async fn stitch_and_refine(
    runner: &StageRunner,
    chunk_dialogues: &[Vec<DialogueTurn>],
    roster: &Roster,
    style: &StyleGuide,
) -> Vec<DialogueTurn> {
    let combined: Vec<DialogueTurn> = chunk_dialogues
        .iter()
        .filter(|d| !d.is_empty())
        .flat_map(|d| d.iter().cloned())
        .collect();

    if combined.is_empty() {
        log::warn!("No valid dialogues to stitch");
        return combined;
    }

    let refined = runner
        .run(&RefineStage {
            turns: &combined,
            roster,
            style,
        })
        .await;
    log::info!(
        "Refined dialogue: {} turns (from {})",
        refined.len(),
        combined.len()
    );
    refined
}

/// Runs the intro and outro stages against a preview of the main script.
pub async fn generate_intro_outro(
    runner: &StageRunner,
    preview: &[DialogueTurn],
    roster: &Roster,
    podcast_name: &str,
    style: &StyleGuide,
) -> (Vec<DialogueTurn>, Vec<DialogueTurn>) {
    let intro = runner
        .run(&IntroStage {
            preview,
            roster,
            podcast_name,
            style,
        })
        .await;
    log::info!("Generated intro: {} turns", intro.len());

    let outro = runner
        .run(&OutroStage {
            preview,
            roster,
            podcast_name,
            style,
        })
        .await;
    log::info!("Generated outro: {} turns", outro.len());

    (intro, outro)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct MockLlmClient {
        response: Option<String>,
        prompts: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl MockLlmClient {
        fn replying(response: &str) -> Self {
            Self {
                response: Some(response.to_string()),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            self.response.clone().ok_or_else(|| anyhow!("service unavailable"))
        }
    }

    #[derive(Debug)]
    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("[]".to_string())
        }
    }

    fn runner(client: MockLlmClient) -> StageRunner {
        StageRunner::new(Arc::new(client), Duration::from_secs(5))
    }

    fn chunk() -> SourceChunk {
        SourceChunk {
            text: "Rust ownership prevents data races.".to_string(),
            index: 1,
            total: 3,
        }
    }

    const THREE_TURNS: &str = r#"[
        {"speaker": "Alex", "text": "Welcome to Synth-FM, I'm Alex, here with Bailey."},
        {"speaker": "Bailey", "text": "Thanks Alex."},
        {"speaker": "Alex", "text": "Let's get started."}
    ]"#;

    #[tokio::test]
    async fn test_topic_is_trimmed() {
        let runner = runner(MockLlmClient::replying("  \"Memory safety in Rust\"  \n"));
        let topic = runner.run(&TopicStage { chunk: &chunk() }).await;
        assert_eq!(topic, "Memory safety in Rust");
    }

    #[tokio::test]
    async fn test_topic_failure_uses_default_label() {
        let runner = runner(MockLlmClient::failing());
        let topic = runner.run(&TopicStage { chunk: &chunk() }).await;
        assert_eq!(topic, DEFAULT_TOPIC);
        assert!(runner.last_failure().unwrap().contains("service unavailable"));
    }

    #[tokio::test]
    async fn test_blank_topic_uses_default_label() {
        let runner = runner(MockLlmClient::replying("   \n  "));
        let topic = runner.run(&TopicStage { chunk: &chunk() }).await;
        assert_eq!(topic, DEFAULT_TOPIC);
    }

    #[tokio::test]
    async fn test_chunk_dialogue_prompt_contract() {
        let client = MockLlmClient::replying(THREE_TURNS);
        let prompts = client.prompts.clone();
        let runner = runner(client);
        let roster = Roster::resolve(2, None);
        let style = StyleGuide::default();
        let current = chunk();

        let turns = runner
            .run(&ChunkDialogueStage {
                chunk: &current,
                topic: "Ownership",
                roster: &roster,
                style: &style,
            })
            .await;
        assert_eq!(turns.len(), 3);

        let prompts = prompts.lock().unwrap();
        let system = &prompts[0][0];
        let user = &prompts[0][1];
        assert_eq!(system.role, crate::services::llm::Role::System);
        assert!(system.content.contains("DO NOT include any introduction or greeting"));
        assert!(system.content.contains("DO NOT include any conclusion or sign-off"));
        assert!(system.content.contains("Every speaker must take part"));
        assert!(system.content.contains("- Alex (Host)"));
        assert!(system.content.contains("Tone: Fun & Engaging"));
        assert!(user.content.contains("about: Ownership"));
        assert!(user.content.contains("segment 2 of 3"));
        assert!(user.content.contains("Rust ownership prevents data races."));
    }

    #[tokio::test]
    async fn test_chunk_dialogue_timeout_degrades_to_empty() {
        let runner = StageRunner::new(Arc::new(SlowClient), Duration::from_millis(20));
        let roster = Roster::resolve(2, None);
        let style = StyleGuide::default();
        let current = chunk();

        let turns = runner
            .run(&ChunkDialogueStage {
                chunk: &current,
                topic: "Ownership",
                roster: &roster,
                style: &style,
            })
            .await;
        assert!(turns.is_empty());
        assert!(runner.last_failure().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_style_guide_reaches_prompts() {
        let client = MockLlmClient::replying(THREE_TURNS);
        let prompts = client.prompts.clone();
        let runner = runner(client);
        let roster = Roster::resolve(2, None);
        let style = StyleGuide {
            tone: Some("Calm & Academic".to_string()),
            custom_instructions: Some("Mention the sponsor once.".to_string()),
        };

        runner
            .run(&SingleCallStage {
                content: "Some content.",
                duration_minutes: 3,
                target_words: 450,
                roster: &roster,
                podcast_name: "Synth-FM",
                style: &style,
            })
            .await;

        let prompts = prompts.lock().unwrap();
        assert!(prompts[0][0].content.contains("Tone: Calm & Academic"));
        assert!(prompts[0][0]
            .content
            .contains("Additional instructions: Mention the sponsor once."));
        assert!(prompts[0][1].content.contains("3-minute podcast script"));
        assert!(prompts[0][1].content.contains("approximately 450 words"));
    }

    #[tokio::test]
    async fn test_stitch_without_dialogue_makes_no_call() {
        let client = MockLlmClient::replying(THREE_TURNS);
        let prompts = client.prompts.clone();
        let runner = runner(client);
        let roster = Roster::resolve(2, None);

        let result =
            stitch_and_refine(&runner, &[vec![], vec![]], &roster, &StyleGuide::default()).await;
        assert!(result.is_empty());
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stitch_keeps_original_when_refinement_unusable() {
        let runner = runner(MockLlmClient::replying("I could not do that."));
        let roster = Roster::resolve(2, None);
        let chunks = vec![
            vec![DialogueTurn::new("Alex", "One")],
            vec![],
            vec![DialogueTurn::new("Bailey", "Two"), DialogueTurn::new("Alex", "Three")],
        ];

        let result = stitch_and_refine(&runner, &chunks, &roster, &StyleGuide::default()).await;
        assert_eq!(
            result,
            vec![
                DialogueTurn::new("Alex", "One"),
                DialogueTurn::new("Bailey", "Two"),
                DialogueTurn::new("Alex", "Three"),
            ]
        );
    }

    #[tokio::test]
    async fn test_stitch_keeps_original_when_refinement_fails() {
        let runner = runner(MockLlmClient::failing());
        let roster = Roster::resolve(2, None);
        let chunks = vec![vec![DialogueTurn::new("Alex", "One")]];

        let result = stitch_and_refine(&runner, &chunks, &roster, &StyleGuide::default()).await;
        assert_eq!(result, vec![DialogueTurn::new("Alex", "One")]);
    }

    #[tokio::test]
    async fn test_stitch_sends_flattened_lines_in_order() {
        let client = MockLlmClient::replying(THREE_TURNS);
        let prompts = client.prompts.clone();
        let runner = runner(client);
        let roster = Roster::resolve(2, None);
        let chunks = vec![
            vec![DialogueTurn::new("Alex", "One")],
            vec![DialogueTurn::new("Bailey", "Two")],
        ];

        let result = stitch_and_refine(&runner, &chunks, &roster, &StyleGuide::default()).await;
        assert_eq!(result.len(), 3);
        let prompts = prompts.lock().unwrap();
        assert!(prompts[0][1].content.contains("Alex: One\nBailey: Two"));
    }

    #[tokio::test]
    async fn test_intro_outro_role_obligations() {
        let client = MockLlmClient::replying(
            r#"[{"speaker": "Nova", "text": "Welcome to Deep Dive! I'm Nova, here with Bailey and Casey."},
                {"speaker": "Bailey", "text": "Happy to be here."},
                {"speaker": "Casey", "text": "Let's question everything."}]"#,
        );
        let prompts = client.prompts.clone();
        let runner = runner(client);
        let custom = vec!["Nova".to_string()];
        let roster = Roster::resolve(3, Some(&custom));
        let preview = vec![DialogueTurn::new("Bailey", "Ownership matters.")];

        let (intro, outro) =
            generate_intro_outro(&runner, &preview, &roster, "Deep Dive", &StyleGuide::default())
                .await;
        assert_eq!(intro.len(), 3);
        assert_eq!(outro.len(), 3);
        assert_eq!(intro[0].speaker, roster.host().name);
        assert!(intro[0].text.contains("Deep Dive"));
        assert!(roster.co_speakers().iter().all(|name| intro[0].text.contains(name)));

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        let intro_system = &prompts[0][0].content;
        assert!(intro_system.contains("The Host (Nova) MUST start by welcoming listeners to \"Deep Dive\""));
        assert!(intro_system.contains("introduce the other speakers: Bailey, Casey"));
        let outro_system = &prompts[1][0].content;
        assert!(outro_system.contains("Nova MUST thank the other speakers (Bailey, Casey)"));
        assert!(outro_system.contains("Nova signs off the episode"));
        assert!(prompts[0][1].content.contains("Bailey: Ownership matters."));
    }

    #[tokio::test]
    async fn test_intro_outro_failures_degrade_independently() {
        let runner = runner(MockLlmClient::failing());
        let roster = Roster::resolve(2, None);
        let (intro, outro) =
            generate_intro_outro(&runner, &[], &roster, "Synth-FM", &StyleGuide::default()).await;
        assert!(intro.is_empty());
        assert!(outro.is_empty());
    }
}
