use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use munje_contracts::events::{EventLog, EventPayload};
use munje_contracts::generation::{
    GenerationOutcome, GenerationReport, GENERIC_FAILURE_MESSAGE, MISSING_API_KEY_MESSAGE,
    MISSING_IMAGE_MESSAGE,
};
use munje_engine::{
    error_chain_text, ConfigError, GeminiProvider, GeminiSettings, Generator, GeneratorConfig,
    ImagePayload, VisionProvider,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;
const IMAGE_FIELD: &str = "image";
const DETAILS_MAX_CHARS: usize = 2000;

/// Builds the upstream client for one request. Called on the blocking pool.
pub type ProviderFactory =
    Arc<dyn Fn(&GeminiSettings) -> Result<Box<dyn VisionProvider>, ConfigError> + Send + Sync>;

pub struct AppState {
    settings: GeminiSettings,
    config: GeneratorConfig,
    factory: ProviderFactory,
    events_path: Option<PathBuf>,
    body_limit: usize,
}

impl AppState {
    pub fn new(settings: GeminiSettings, config: GeneratorConfig) -> Self {
        Self {
            settings,
            config,
            factory: Arc::new(|settings: &GeminiSettings| {
                GeminiProvider::new(settings)
                    .map(|provider| Box::new(provider) as Box<dyn VisionProvider>)
            }),
            events_path: None,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_events_path(mut self, path: Option<PathBuf>) -> Self {
        self.events_path = path;
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/api/generate", post(generate))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(Arc::new(state))
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = build_app(state);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "munje server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;
    info!("munje server stopped");
    Ok(())
}

async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn generate(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let image = match read_image_field(multipart).await {
        Ok(Some(image)) if !image.is_empty() => image,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, MISSING_IMAGE_MESSAGE, None),
        Err(details) => {
            warn!(details = %details, "failed to read upload");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                GENERIC_FAILURE_MESSAGE,
                Some(&details),
            );
        }
    };

    if !state.settings.has_api_key() {
        warn!("generation requested without an API key configured");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            MISSING_API_KEY_MESSAGE,
            None,
        );
    }

    let worker_state = Arc::clone(&state);
    let joined =
        tokio::task::spawn_blocking(move || run_generation(&worker_state, &image)).await;

    match joined {
        Ok(Ok(report)) => outcome_response(&report.outcome),
        Ok(Err(err)) => {
            warn!(error = %err, "provider construction failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                MISSING_API_KEY_MESSAGE,
                None,
            )
        }
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            GENERIC_FAILURE_MESSAGE,
            Some(&err.to_string()),
        ),
    }
}

/// `Ok(None)` when the form has no image field.
async fn read_image_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Option<ImagePayload>, String> {
    let mut multipart = multipart.map_err(|err| err.body_text())?;
    while let Some(field) = multipart.next_field().await.map_err(|err| err.body_text())? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await.map_err(|err| err.body_text())?;
        return Ok(Some(ImagePayload::new(bytes.to_vec(), mime_type)));
    }
    Ok(None)
}

fn run_generation(
    state: &AppState,
    image: &ImagePayload,
) -> Result<GenerationReport, ConfigError> {
    let provider = (state.factory)(&state.settings)?;
    let events = state
        .events_path
        .as_ref()
        .map(|path| EventLog::new(path, Uuid::new_v4().to_string()));

    if let Some(events) = events.as_ref() {
        let mut payload = EventPayload::new();
        payload.insert("image_digest".to_string(), json!(image.digest()));
        payload.insert("image_bytes".to_string(), json!(image.len()));
        payload.insert("mime_type".to_string(), json!(image.mime_type));
        payload.insert(
            "candidates".to_string(),
            json!(state.config.candidates.names()),
        );
        if let Err(err) = events.emit("generation_started", payload) {
            warn!(error = %error_chain_text(&err, 400), "failed to write event log");
        }
    }

    let generator = Generator::new(state.config.clone(), provider);
    let report = generator.generate(image);

    if let Some(events) = events.as_ref() {
        if let Err(err) = events.record_report(&report) {
            warn!(error = %error_chain_text(&err, 400), "failed to write event log");
        }
    }
    Ok(report)
}

fn outcome_response(outcome: &GenerationOutcome) -> Response {
    match outcome {
        GenerationOutcome::ProblemSet { problems, model } => (
            StatusCode::OK,
            Json(json!({ "questions": problems, "model": model })),
        )
            .into_response(),
        GenerationOutcome::NotMathProblem { message } => (
            StatusCode::OK,
            Json(json!({ "notMathProblem": true, "message": message })),
        )
            .into_response(),
        GenerationOutcome::Failure(failure) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            failure.user_message(),
            Some(&failure.diagnostic),
        ),
    }
}

fn error_response(status: StatusCode, message: &str, details: Option<&str>) -> Response {
    let mut body = json!({ "error": message });
    if let (Some(details), Value::Object(map)) = (details, &mut body) {
        map.insert(
            "details".to_string(),
            json!(munje_engine::truncate_text(details, DETAILS_MAX_CHARS)),
        );
    }
    (status, Json(body)).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
