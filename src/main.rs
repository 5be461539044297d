use anyhow::{bail, Context, Result};
use std::sync::Arc;
use synthcast::core::config::{Config, DEFAULT_CONFIG_PATH};
use synthcast::core::content::{aggregate, ExtractedSource};
use synthcast::core::speakers::Roster;
use synthcast::server::{self, AppState};
use synthcast::services::llm::{stage_timeout, ClientFactory, LlmSettings, ProviderFactory};
use synthcast::services::script::StyleGuide;
use synthcast::services::workflow::{ScriptJob, ScriptWorkflow};

const USAGE: &str = "Usage:
  synthcast [serve]
  synthcast generate <output.json> <input.txt>...
  synthcast init-config [path]";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("serve");

    if command == "init-config" {
        let path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CONFIG_PATH);
        if std::path::Path::new(path).exists() {
            bail!("{} already exists", path);
        }
        Config::default().save_to(path)?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Run 'synthcast init-config' to create one.");
            return Err(e);
        }
    };

    match command {
        "serve" => serve(config).await,
        "generate" => {
            if args.len() < 3 {
                bail!("{}", USAGE);
            }
            generate(config, &args[1], &args[2..]).await
        }
        _ => bail!("Unknown command '{}'\n{}", command, USAGE),
    }
}

async fn serve(config: Config) -> Result<()> {
    let clients: Arc<dyn ClientFactory> = Arc::new(ProviderFactory::from_config(&config.llm));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = server::router(AppState::new(config, clients));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    log::info!("Synthcast listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn generate(config: Config, output: &str, inputs: &[String]) -> Result<()> {
    let mut sources = Vec::new();
    for path in inputs {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path))?;
        let title = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        sources.push(ExtractedSource { title, content });
    }

    let content = aggregate(&sources, config.script.min_source_words);
    if !content.valid {
        bail!(
            "{}",
            content.error.unwrap_or_else(|| "Content is invalid".to_string())
        );
    }

    let settings = LlmSettings::from_config(&config.llm)?;
    let llm = ProviderFactory::from_config(&config.llm).create(&settings)?;
    let workflow = ScriptWorkflow::new(
        llm,
        config.script.clone(),
        stage_timeout(&config.llm),
    );

    let job = ScriptJob {
        content,
        duration_minutes: config.script.default_duration_minutes.max(1),
        roster: Arc::new(Roster::resolve(config.script.default_num_speakers, None)),
        podcast_name: config.script.default_podcast_name.clone(),
        style: StyleGuide::default(),
    };

    let document = workflow.generate(&job).await;
    tokio::fs::write(output, server::document_json(&document)?)
        .await
        .with_context(|| format!("Failed to write {}", output))?;

    match document.error() {
        Some(error) => bail!("Script generation failed: {}", error),
        None => {
            log::info!("Script written to {}", output);
            Ok(())
        }
    }
}
