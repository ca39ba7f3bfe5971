pub mod config;
mod errors;

use self::{
    config::{get_config, AppConfig},
    errors::AppError,
};
use cityrag::{
    ingest,
    orchestrator::Orchestrator,
    providers::ai::{gemini::GeminiProvider, local::LocalAiProvider, AiProvider},
    tools::ToolRegistry,
    AnswerResponse, KnowledgeStore, MemoryIndex, PipelineConfig,
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use tracing_subscriber::FmtSubscriber;

/// The shared application state.
///
/// Holds the AI provider, the knowledge store, and the query orchestrator,
/// shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub ai_provider: Box<dyn AiProvider>,
    pub store: KnowledgeStore,
    pub orchestrator: Arc<Orchestrator>,
    pub data_dir: PathBuf,
    pub pipeline: PipelineConfig,
}

/// Builds the shared application state from the configuration.
pub fn build_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    let ai_provider: Box<dyn AiProvider> = match config.ai_provider.as_str() {
        "gemini" => {
            let api_key = config
                .ai_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("AI_API_KEY is required for the gemini provider"))?;
            Box::new(GeminiProvider::new(config.ai_api_url.clone(), api_key)?)
        }
        "local" => Box::new(LocalAiProvider::new(
            config.ai_api_url.clone(),
            config.ai_api_key.clone(),
            config.ai_model.clone(),
        )?),
        _ => {
            return Err(anyhow::anyhow!(
                "Unsupported AI provider: {}",
                config.ai_provider
            ))
        }
    };

    let pipeline = config.pipeline.resolve();
    let data_dir = PathBuf::from(&config.data_dir);
    let store = KnowledgeStore::new(Arc::new(MemoryIndex::new()), pipeline.index_batch_size);
    let orchestrator = Orchestrator::new(
        ai_provider.clone(),
        store.clone(),
        ToolRegistry::new(&data_dir),
        pipeline.clone(),
    );

    Ok(AppState {
        ai_provider,
        store,
        orchestrator: Arc::new(orchestrator),
        data_dir,
        pipeline,
    })
}

/// Creates the Axum router with all the application routes.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ingest", post(ingest_handler))
        .route("/ask", post(ask_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

/// The root handler.
async fn root() -> &'static str {
    "cityrag server is running."
}

/// The health check handler.
async fn health_check() -> &'static str {
    "OK"
}

/// The response body for the `/ingest` endpoint.
#[derive(Serialize)]
struct IngestResponse {
    message: String,
    files_processed: usize,
    files_skipped: usize,
    records_indexed: usize,
    failures: Vec<IngestFailure>,
}

#[derive(Serialize)]
struct IngestFailure {
    filename: String,
    error: String,
}

/// The handler for the `/ingest` endpoint.
///
/// Scans the configured data directory and indexes every supported file.
async fn ingest_handler(
    State(app_state): State<AppState>,
) -> Result<Json<IngestResponse>, AppError> {
    info!("Received ingest request for {}", app_state.data_dir.display());

    let report = ingest::ingest_directory(
        &app_state.data_dir,
        &*app_state.ai_provider,
        &app_state.store,
        &app_state.pipeline,
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to scan data directory: {e}"))?;

    Ok(Json(IngestResponse {
        message: "Ingestion complete".to_string(),
        files_processed: report.files_processed,
        files_skipped: report.files_skipped,
        records_indexed: report.records_indexed,
        failures: report
            .failures
            .into_iter()
            .map(|(filename, error)| IngestFailure { filename, error })
            .collect(),
    }))
}

/// The request body for the `/ask` endpoint.
#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

/// The handler for the `/ask` endpoint.
///
/// Routes the question through the orchestration pipeline and returns the
/// cited answer.
async fn ask_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    info!("Received question: '{}'", payload.question);
    let answer = app_state.orchestrator.answer(&payload.question).await?;
    Ok(Json(answer))
}

/// The main entry point for running the server.
pub async fn run(listener: tokio::net::TcpListener, config: AppConfig) -> anyhow::Result<()> {
    debug!(?config, "Server configuration loaded");

    let app_state = build_app_state(config)?;
    let app = create_router(app_state);

    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
#[cfg_attr(test, allow(dead_code))]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = get_config(None)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);
    run(listener, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    /// Spawns the app on a random port against an empty data directory.
    /// No AI call is made by these tests, so the local provider needs no
    /// backend.
    async fn spawn_app() -> (String, TempDir) {
        let data_dir = TempDir::new().expect("Failed to create data dir");
        let config = AppConfig {
            port: 0,
            data_dir: data_dir.path().display().to_string(),
            ai_provider: "local".to_string(),
            ai_api_url: "http://127.0.0.1:9999/v1/chat/completions".to_string(),
            ai_api_key: None,
            ai_model: None,
            pipeline: Default::default(),
        };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let port = listener.local_addr().unwrap().port();
        let address = format!("http://127.0.0.1:{port}");

        tokio::spawn(async move {
            if let Err(e) = run(listener, config).await {
                eprintln!("Server error: {e}");
            }
        });

        (address, data_dir)
    }

    #[tokio::test]
    async fn health_check_works() {
        let (address, _data_dir) = spawn_app().await;
        let client = Client::new();

        let response = client
            .get(format!("{address}/health"))
            .send()
            .await
            .expect("Failed to execute request");

        assert!(response.status().is_success());
        assert_eq!(response.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn ingest_of_an_empty_directory_reports_zero_files() {
        let (address, _data_dir) = spawn_app().await;
        let client = Client::new();

        let response = client
            .post(format!("{address}/ingest"))
            .send()
            .await
            .expect("Failed to execute request");
        assert!(response.status().is_success());

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["files_processed"], 0);
        assert_eq!(body["records_indexed"], 0);
    }

    #[tokio::test]
    async fn ask_against_an_empty_corpus_refuses() {
        let (address, _data_dir) = spawn_app().await;
        let client = Client::new();

        let response = client
            .post(format!("{address}/ask"))
            .json(&json!({ "question": "What is the paving budget?" }))
            .send()
            .await
            .expect("Failed to execute request");
        assert!(response.status().is_success());

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["response"], cityrag::NO_RELEVANT_DATA);
        assert_eq!(body["sources"], json!([]));
    }
}
