use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, State},
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    generation_log::{GenerationLog, LogEntry, preview},
    model::{GenerateRequest, GenerateResponse, InferenceEngine, ModelInfo},
};

const DEFAULT_LOG_LINES: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    pub log: Arc<GenerationLog>,
}

/// JSON body extractor whose rejections render as `{"detail": ...}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ServiceError))]
pub struct AppJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ServiceError))]
pub struct AppQuery<T>(pub T);

#[derive(Serialize)]
struct ServiceInfo {
    message: &'static str,
    version: &'static str,
    endpoints: Endpoints,
}

#[derive(Serialize)]
struct Endpoints {
    generate: &'static str,
    health: &'static str,
    logs: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_info: ModelInfo,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    lines: Option<usize>,
}

#[derive(Serialize)]
struct LogsResponse {
    logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    showing: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

pub fn build_router(
    config: Arc<AppConfig>,
    engine: Arc<InferenceEngine>,
    log: Arc<GenerationLog>,
) -> Router {
    let cors = cors_layer(&config.cors_origins);
    let state = AppState { engine, log };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/logs", get(logs))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

fn now_iso() -> String {
    Local::now().to_rfc3339()
}

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: "Local AI Writer API",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: Endpoints {
            generate: "/generate",
            health: "/health",
            logs: "/logs",
        },
    })
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ServiceError> {
    if let Err(err) = state.engine.ready().await {
        error!(error = %err, "health check failed");
        return Err(ServiceError::Unhealthy(err.to_string()));
    }

    Ok(Json(HealthResponse {
        status: "healthy",
        model_info: state.engine.model_info(),
        timestamp: now_iso(),
    }))
}

async fn generate(
    State(state): State<AppState>,
    AppJson(request): AppJson<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ServiceError> {
    info!(prompt = %preview(&request.prompt, 50), "generating text");

    let started = Instant::now();
    let outcome = state.engine.generate(&request).await.map_err(|err| {
        error!(error = %err, "error during generation");
        ServiceError::GenerationFailed(err.to_string())
    })?;
    let time_taken = started.elapsed().as_secs_f64();
    let output = outcome.render();

    let entry = LogEntry {
        timestamp: Local::now(),
        prompt: &request.prompt,
        temperature: request.temperature,
        time_taken,
        output: &output,
    };
    match state.log.append(&entry) {
        Ok(()) => info!(path = %state.log.path().display(), "logged generation"),
        Err(err) => warn!(error = %err, "failed to append generation log"),
    }

    info!(time_taken, status = ?outcome.status(), "generation completed");

    Ok(Json(GenerateResponse {
        status: outcome.status(),
        output,
        time_taken,
        prompt: request.prompt,
        temperature: request.temperature,
        max_new_tokens: request.max_new_tokens,
        timestamp: now_iso(),
    }))
}

async fn logs(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<LogsQuery>,
) -> Result<Json<LogsResponse>, ServiceError> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    let tail = state.log.tail(lines).map_err(|err| {
        error!(error = %err, "error reading logs");
        ServiceError::LogRead(err.to_string())
    })?;

    let response = match tail {
        None => LogsResponse {
            logs: Vec::new(),
            total_entries: None,
            showing: None,
            message: Some("No logs found"),
        },
        Some(tail) => LogsResponse {
            showing: Some(tail.entries.len()),
            total_entries: Some(tail.total_entries),
            logs: tail.entries,
            message: None,
        },
    };
    Ok(Json(response))
}
