use crate::core::config::Config;
use crate::core::content::SourceContent;
use crate::core::error::ScriptError;
use crate::core::script::ScriptDocument;
use crate::core::speakers::Roster;
use crate::services::llm::{stage_timeout, ClientFactory, LlmSettings, Provider};
use crate::services::script::StyleGuide;
use crate::services::workflow::{ScriptJob, ScriptWorkflow};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clients: Arc<dyn ClientFactory>,
}

impl AppState {
    pub fn new(config: Config, clients: Arc<dyn ClientFactory>) -> Self {
        Self {
            config: Arc::new(config),
            clients,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ScriptRequest {
    pub content: String,
    pub duration: u32,
    #[serde(default = "default_num_speakers")]
    pub num_speakers: usize,
    #[serde(default)]
    pub podcast_name: String,
    #[serde(default)]
    pub speaker_names: Vec<String>,
    pub provider: String,
    pub api_key: Option<String>,
    #[serde(default)]
    pub model_name: String,
    pub tone: Option<String>,
    pub custom_instructions: Option<String>,
}

fn default_num_speakers() -> usize {
    2
}

impl ScriptRequest {
    /// Checks everything that can be rejected before any model is called.
    pub fn validate(&self, has_local_model: bool) -> Result<LlmSettings, ScriptError> {
        let content = SourceContent::from_text(self.content.as_str());
        if !content.valid {
            return Err(ScriptError::InvalidContent(
                content.error.unwrap_or_else(|| "Content is empty".to_string()),
            ));
        }
        if self.duration < 1 {
            return Err(ScriptError::InvalidDuration(self.duration));
        }

        let settings = LlmSettings {
            provider: self.provider.parse()?,
            model: self.model_name.clone(),
            api_key: self.api_key.clone(),
        };
        match settings.provider {
            Provider::Local if !has_local_model => Err(ScriptError::LocalModelUnavailable),
            provider if provider.requires_credential() && settings.credential().is_none() => {
                Err(ScriptError::MissingCredential(provider))
            }
            _ => Ok(settings),
        }
    }

    fn into_job(self, default_podcast_name: &str) -> ScriptJob {
        let podcast_name = match self.podcast_name.trim() {
            "" => default_podcast_name.to_string(),
            name => name.to_string(),
        };
        ScriptJob {
            roster: Arc::new(Roster::resolve(self.num_speakers, Some(self.speaker_names.as_slice()))),
            content: SourceContent::from_text(self.content),
            duration_minutes: self.duration,
            podcast_name,
            style: StyleGuide {
                tone: self.tone,
                custom_instructions: self.custom_instructions,
            },
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/script/generate-script", post(generate_script))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Synthcast backend is running" }))
}

async fn generate_script(
    State(state): State<AppState>,
    Json(request): Json<ScriptRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let settings = match request.validate(state.clients.has_local_model()) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Rejected script request: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            );
        }
    };

    let llm = match state.clients.create(&settings) {
        Ok(llm) => llm,
        Err(e) => {
            log::error!("Failed to create {} client: {:#}", settings.provider, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": format!("{:#}", e) })),
            );
        }
    };

    let workflow = ScriptWorkflow::new(
        llm,
        state.config.script.clone(),
        stage_timeout(&state.config.llm),
    );
    let job = request.into_job(&state.config.script.default_podcast_name);

    let document = workflow.generate(&job).await;
    let status = if document.is_failure() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    match serde_json::to_value(&document) {
        Ok(body) => (status, Json(body)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

/// Serializes a finished document; the same shape the HTTP endpoint returns.
pub fn document_json(document: &ScriptDocument) -> serde_json::Result<String> {
    serde_json::to_string_pretty(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::{ChatMessage, LlmClient};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Debug)]
    struct ScriptedLlm {
        reply: Option<String>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            self.reply
                .clone()
                .ok_or_else(|| anyhow!("service unavailable"))
        }
    }

    struct MockFactory {
        reply: Option<String>,
        local: bool,
        created: Arc<Mutex<Vec<LlmSettings>>>,
    }

    impl ClientFactory for MockFactory {
        fn create(&self, settings: &LlmSettings) -> Result<Arc<dyn LlmClient>> {
            self.created.lock().unwrap().push(settings.clone());
            Ok(Arc::new(ScriptedLlm {
                reply: self.reply.clone(),
            }))
        }

        fn has_local_model(&self) -> bool {
            self.local
        }
    }

    fn app(reply: Option<&str>, local: bool) -> (Router, Arc<Mutex<Vec<LlmSettings>>>) {
        let created = Arc::new(Mutex::new(Vec::new()));
        let factory = MockFactory {
            reply: reply.map(str::to_string),
            local,
            created: created.clone(),
        };
        let state = AppState::new(Config::default(), Arc::new(factory));
        (router(state), created)
    }

    fn request_body(provider: &str, api_key: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "content": "Rust is a systems programming language. It focuses on safety.",
            "duration": 2,
            "num_speakers": 2,
            "podcast_name": "Deep Dive",
            "speaker_names": ["Nova", ""],
            "provider": provider,
            "api_key": api_key,
            "model_name": "test-model",
        })
    }

    async fn post_json(app: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("POST")
            .uri("/api/script/generate-script")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_root_reports_running() {
        let (app, _) = app(None, false);
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["message"], "Synthcast backend is running");
    }

    #[tokio::test]
    async fn test_generate_returns_script() {
        let reply = r#"[{"speaker": "Nova", "text": "Welcome to Deep Dive."}, {"speaker": "Bailey", "text": "Thanks."}]"#;
        let (app, created) = app(Some(reply), false);
        let (status, json) = post_json(app, request_body("gemini", Some("key"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["title"], "Deep Dive Podcast");
        assert_eq!(json["dialogue"][0]["speaker"], "Nova");
        assert_eq!(json["dialogue"].as_array().unwrap().len(), 2);
        assert!(json.get("error").is_none());

        let created = created.lock().unwrap();
        assert_eq!(created[0].provider, Provider::Gemini);
        assert_eq!(created[0].model, "test-model");
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected_before_generation() {
        let (app, created) = app(Some("[]"), false);
        let (status, json) = post_json(app, request_body("openai", Some("  "))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "OpenAI API key is required");
        assert!(created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_provider_needs_loaded_model() {
        let (without_model, _) = app(Some("[]"), false);
        let (status, json) = post_json(without_model, request_body("local", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Local model is not initialized");

        let reply = r#"[{"speaker": "Nova", "text": "Local hello."}]"#;
        let (with_model, _) = app(Some(reply), true);
        let (status, _) = post_json(with_model, request_body("local", None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_provider_and_bad_duration() {
        let (app_a, _) = app(None, false);
        let (status, json) = post_json(app_a, request_body("anthropic", Some("key"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Unknown provider: anthropic");

        let (app_b, _) = app(None, false);
        let mut body = request_body("gemini", Some("key"));
        body["duration"] = serde_json::json!(0);
        let (status, _) = post_json(app_b, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generation_failure_is_500_with_error() {
        let (app, _) = app(None, false);
        let (status, json) = post_json(app, request_body("gemini", Some("key"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("service unavailable"));
        assert!(json.get("dialogue").is_none());
    }

    #[test]
    fn test_blank_podcast_name_uses_default() {
        let mut request: ScriptRequest =
            serde_json::from_value(request_body("gemini", Some("key"))).unwrap();
        request.podcast_name = "  ".to_string();
        let job = request.into_job("Synth-FM");
        assert_eq!(job.podcast_name, "Synth-FM");
        assert_eq!(job.roster.names(), vec!["Nova", "Bailey"]);
    }
}
