use crate::core::config::ScriptConfig;
use crate::core::content::SourceContent;
use crate::core::script::{DialogueTurn, Script, ScriptDocument};
use crate::core::speakers::Roster;
use crate::services::chunker::{split_into_chunks, SourceChunk};
use crate::services::llm::LlmClient;
use crate::services::script::{
    generate_intro_outro, stitch_and_refine, ChunkDialogueStage, SingleCallStage, StageRunner,
    StyleGuide, TopicStage,
};
use anyhow::{anyhow, Result};
use futures_util::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SingleCall,
    Chunked,
}

pub fn route(word_count: usize, threshold: usize) -> Route {
    if word_count <= threshold {
        Route::SingleCall
    } else {
        Route::Chunked
    }
}

/// A validated generation request.
#[derive(Debug, Clone)]
pub struct ScriptJob {
    pub content: SourceContent,
    pub duration_minutes: u32,
    pub roster: Arc<Roster>,
    pub podcast_name: String,
    pub style: StyleGuide,
}

/// Dialogue produced for one chunk, tagged with the chunk's position.
#[derive(Debug, Clone)]
pub struct ChunkDialogue {
    pub index: usize,
    pub topic: String,
    pub turns: Vec<DialogueTurn>,
}

pub struct ScriptWorkflow {
    llm: Arc<dyn LlmClient>,
    config: ScriptConfig,
    timeout: Duration,
}

impl ScriptWorkflow {
    pub fn new(llm: Arc<dyn LlmClient>, config: ScriptConfig, timeout: Duration) -> Self {
        Self {
            llm,
            config,
            timeout,
        }
    }

    /// Runs the whole pipeline. Never returns an error or panics outward:
    /// any failure comes back as [`ScriptDocument::Failure`].
    pub async fn generate(&self, job: &ScriptJob) -> ScriptDocument {
        match AssertUnwindSafe(self.try_generate(job)).catch_unwind().await {
            Ok(Ok(script)) => ScriptDocument::Script(script),
            Ok(Err(e)) => {
                log::error!("Error in script generation: {:#}", e);
                ScriptDocument::failure(format!("Script generation failed: {:#}", e))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Script generation panicked: {}", message);
                ScriptDocument::failure(format!("Script generation failed: {}", message))
            }
        }
    }

    async fn try_generate(&self, job: &ScriptJob) -> Result<Script> {
        let content = &job.content.combined_text;
        let word_count = job.content.total_word_count;
        let runner = StageRunner::new(self.llm.clone(), self.timeout);

        log::info!("=== Script Generation Started ===");
        log::info!("Content word count: {}", word_count);
        log::info!("Target duration: {} minutes", job.duration_minutes);
        log::info!("Speakers: {:?}", job.roster.names());
        log::info!("Podcast name: {}", job.podcast_name);

        let dialogue = match route(word_count, self.config.chunk_threshold) {
            Route::SingleCall => {
                log::info!("Using single call approach (small content)");
                self.single_call(&runner, job, content).await
            }
            Route::Chunked => {
                log::info!("Using multi-chunk approach (large content)");
                self.chunked(&runner, job, content).await
            }
        };

        if dialogue.is_empty() {
            return Err(match runner.last_failure() {
                Some(cause) => anyhow!("no dialogue was produced (last error: {})", cause),
                None => anyhow!("no dialogue was produced"),
            });
        }

        let script = Script {
            title: format!("{} Podcast", job.podcast_name),
            dialogue,
        };

        let unknown = script.unknown_speakers(&job.roster);
        if !unknown.is_empty() {
            log::warn!("Script contains speakers outside the roster: {:?}", unknown);
        }

        log::info!("=== Script Generation Complete ===");
        log::info!("Total dialogue turns: {}", script.dialogue.len());
        Ok(script)
    }

    async fn single_call(
        &self,
        runner: &StageRunner,
        job: &ScriptJob,
        content: &str,
    ) -> Vec<DialogueTurn> {
        let target_words = job.duration_minutes as usize * self.config.words_per_minute;
        let dialogue = runner
            .run(&SingleCallStage {
                content,
                duration_minutes: job.duration_minutes,
                target_words,
                roster: &job.roster,
                podcast_name: &job.podcast_name,
                style: &job.style,
            })
            .await;
        log::info!("Generated single-call script: {} turns", dialogue.len());
        dialogue
    }

    async fn chunked(
        &self,
        runner: &StageRunner,
        job: &ScriptJob,
        content: &str,
    ) -> Vec<DialogueTurn> {
        let chunks = split_into_chunks(content, self.config.chunk_max_words);
        log::info!("Created {} chunks", chunks.len());

        let chunk_dialogues = self.process_chunks(runner, job, &chunks).await;
        let chunk_turns: Vec<Vec<DialogueTurn>> =
            chunk_dialogues.into_iter().map(|c| c.turns).collect();

        log::info!("Stitching and refining all chunks...");
        let main_script = stitch_and_refine(runner, &chunk_turns, &job.roster, &job.style).await;

        log::info!("Generating intro and outro...");
        let preview_len = self.config.preview_turns.min(main_script.len());
        let (intro, outro) = generate_intro_outro(
            runner,
            &main_script[..preview_len],
            &job.roster,
            &job.podcast_name,
            &job.style,
        )
        .await;

        let mut dialogue = intro;
        dialogue.extend(main_script);
        dialogue.extend(outro);
        dialogue
    }

    /// Runs topic then dialogue for every chunk, up to `chunk_concurrency` chunks
    /// at a time, and returns the results in chunk order.
    pub async fn process_chunks(
        &self,
        runner: &StageRunner,
        job: &ScriptJob,
        chunks: &[SourceChunk],
    ) -> Vec<ChunkDialogue> {
        let concurrency = self.config.chunk_concurrency.max(1);
        let roster: &Roster = &job.roster;
        let style = &job.style;

        let pending: Vec<_> = chunks
            .iter()
            .map(|chunk| process_chunk(runner, roster, style, chunk))
            .collect();

        let mut results: Vec<ChunkDialogue> = futures_util::stream::iter(pending)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.sort_by_key(|c| c.index);
        results
    }
}

async fn process_chunk(
    runner: &StageRunner,
    roster: &Roster,
    style: &StyleGuide,
    chunk: &SourceChunk,
) -> ChunkDialogue {
    log::info!("Processing chunk {}/{}", chunk.index + 1, chunk.total);
    let topic = runner.run(&TopicStage { chunk }).await;
    log::info!("Chunk {} topic: {}", chunk.index + 1, topic);

    let turns = runner
        .run(&ChunkDialogueStage {
            chunk,
            topic: &topic,
            roster,
            style,
        })
        .await;
    log::info!("Chunk {} produced {} turns", chunk.index + 1, turns.len());
    ChunkDialogue {
        index: chunk.index,
        topic,
        turns,
    }
}
