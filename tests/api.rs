use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use local_ai_writer::{
    AppConfig, GenerationLog, InferenceEngine, ServiceError, build_router,
    model::{LanguageModel, ModelDetails, ModelLoader, RawCompletion, SamplingParams},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::util::ServiceExt;

#[derive(Clone, Copy)]
enum Script {
    Reply,
    FailGeneration,
    PanicGeneration,
    FailLoad,
}

struct ScriptedModel {
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl LanguageModel for ScriptedModel {
    fn details(&self) -> ModelDetails {
        ModelDetails {
            model_name: "scripted-llama".into(),
            device: "cpu".into(),
            parameters: 8_000,
            memory_usage: 16_000,
            eos_token_id: Some(128_009),
            pad_token_id: Some(128_009),
        }
    }

    fn generate(
        &self,
        input: &str,
        params: &SamplingParams,
    ) -> Result<RawCompletion, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::FailGeneration => Err(ServiceError::Inference("CUDA out of memory".into())),
            Script::PanicGeneration => panic!("multinomial: invalid probability distribution"),
            _ => Ok(RawCompletion {
                full_text: format!("{input}Reply at temperature {:?}", params.temperature),
                continuation: String::new(),
                tokens_generated: 5,
            }),
        }
    }
}

struct ScriptedLoader {
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl ModelLoader for ScriptedLoader {
    fn load(&self) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        match self.script {
            Script::FailLoad => Err(ServiceError::ModelLoad("weights not found".into())),
            script => Ok(Arc::new(ScriptedModel {
                script,
                calls: self.calls.clone(),
            })),
        }
    }
}

struct Harness {
    app: Router,
    generations: Arc<AtomicUsize>,
    log: Arc<GenerationLog>,
    _dir: TempDir,
}

fn harness(script: Script) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("logs/output_log.txt");
    harness_with_log(script, dir, log_file)
}

fn harness_with_log(script: Script, dir: TempDir, log_file: PathBuf) -> Harness {
    let config = Arc::new(AppConfig {
        log_file,
        ..AppConfig::default()
    });
    let generations = Arc::new(AtomicUsize::new(0));
    let loader = Arc::new(ScriptedLoader {
        script,
        calls: generations.clone(),
    });
    let engine = Arc::new(InferenceEngine::new(loader, &config));
    let log = Arc::new(GenerationLog::open(config.log_file.clone()).unwrap());

    Harness {
        app: build_router(config, engine, log.clone()),
        generations,
        log,
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_generate(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn root_lists_endpoints() {
    let h = harness(Script::Reply);
    let (status, body) = send(&h.app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Local AI Writer API");
    assert_eq!(body["version"], "1.0.0");
    assert_eq!(body["endpoints"]["generate"], "/generate");
    assert_eq!(body["endpoints"]["health"], "/health");
}

#[tokio::test]
async fn health_reports_loaded_model() {
    let h = harness(Script::Reply);
    let (status, body) = send(&h.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_info"]["status"], "loaded");
    assert_eq!(body["model_info"]["model_name"], "scripted-llama");
    assert_eq!(body["model_info"]["parameters"], 8_000);

    let timestamp = body["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
}

#[tokio::test]
async fn health_fails_when_model_cannot_load() {
    let h = harness(Script::FailLoad);
    let (status, body) = send(&h.app, get("/health")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Service unhealthy:"));
    assert!(detail.contains("weights not found"));
}

#[tokio::test]
async fn generate_echoes_request_and_logs() {
    let h = harness(Script::Reply);
    let (status, body) = send(
        &h.app,
        post_generate(json!({
            "prompt": "Write a haiku about rust",
            "temperature": 0.3,
            "max_new_tokens": 64,
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "Reply at temperature 0.3");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["prompt"], "Write a haiku about rust");
    assert_eq!(body["temperature"], 0.3);
    assert_eq!(body["max_new_tokens"], 64);
    assert!(body["time_taken"].as_f64().unwrap() >= 0.0);
    assert!(chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap()).is_ok());

    let tail = h.log.tail(10).unwrap().unwrap();
    assert_eq!(tail.total_entries, 1);
    let fields: Vec<&str> = tail.entries[0].split(" | ").collect();
    assert_eq!(fields.len(), 5);
    assert_eq!(fields[1], "Write a haiku about rust");
    assert_eq!(fields[2], "0.3");
    assert!(fields[3].ends_with('s'));
    assert_eq!(fields[4], "Reply at temperature 0.3");
}

#[tokio::test]
async fn invalid_requests_never_reach_the_model() {
    let h = harness(Script::Reply);
    let cases = [
        json!({ "prompt": "" }),
        json!({ "prompt": "x".repeat(1001) }),
        json!({ "prompt": "hi", "temperature": 1.01 }),
        json!({ "prompt": "hi", "temperature": -0.5 }),
        json!({ "prompt": "hi", "max_new_tokens": 9 }),
        json!({ "prompt": "hi", "max_new_tokens": 501 }),
        json!({ "temperature": 0.5 }),
    ];

    for case in cases {
        let (status, body) = send(&h.app, post_generate(case.clone())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "case {case}");
        assert!(body["detail"].is_string(), "case {case}");
    }

    assert_eq!(h.generations.load(Ordering::SeqCst), 0);
    assert_eq!(h.log.tail(10).unwrap(), None);
}

#[tokio::test]
async fn backend_failure_is_reported_in_band() {
    let h = harness(Script::FailGeneration);
    let (status, body) = send(&h.app, post_generate(json!({ "prompt": "hello" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(
        body["output"],
        "Error generating text: model execution failed: CUDA out of memory"
    );
    assert_eq!(h.log.tail(10).unwrap().unwrap().total_entries, 1);
}

#[tokio::test]
async fn backend_panic_is_reported_in_band() {
    let h = harness(Script::PanicGeneration);
    let (status, body) = send(&h.app, post_generate(json!({ "prompt": "hello" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    let output = body["output"].as_str().unwrap();
    assert!(output.starts_with("Error generating text:"));
    assert!(output.contains("multinomial: invalid probability distribution"));
}

#[tokio::test]
async fn unwritable_log_does_not_fail_generation() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the log file should be makes every append fail.
    let log_file = dir.path().join("output_log.txt");
    std::fs::create_dir(&log_file).unwrap();
    let h = harness_with_log(Script::Reply, dir, log_file);

    let (status, body) = send(&h.app, post_generate(json!({ "prompt": "hello" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["output"], "Reply at temperature 0.7");
    assert_eq!(h.generations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn load_failure_surfaces_as_server_error() {
    let h = harness(Script::FailLoad);
    let (status, body) = send(&h.app, post_generate(json!({ "prompt": "hello" }))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().starts_with("Generation failed:"));
    assert_eq!(h.log.tail(10).unwrap(), None);
}

#[tokio::test]
async fn logs_without_file_explains_itself() {
    let h = harness(Script::Reply);
    let (status, body) = send(&h.app, get("/logs")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["logs"], json!([]));
    assert_eq!(body["message"], "No logs found");
}

#[tokio::test]
async fn logs_return_latest_entries_in_order() {
    let h = harness(Script::Reply);
    for i in 0..4 {
        let (status, _) = send(&h.app, post_generate(json!({ "prompt": format!("prompt {i}") }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&h.app, get("/logs?lines=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_entries"], 4);
    assert_eq!(body["showing"], 2);
    let logs = body["logs"].as_array().unwrap();
    assert!(logs[0].as_str().unwrap().contains("prompt 2"));
    assert!(logs[1].as_str().unwrap().contains("prompt 3"));

    let (_, body) = send(&h.app, get("/logs?lines=10")).await;
    assert_eq!(body["showing"], 4);
    assert!(body["logs"][0].as_str().unwrap().contains("prompt 0"));

    let (_, body) = send(&h.app, get("/logs")).await;
    assert_eq!(body["showing"], 4);
}

#[tokio::test]
async fn logs_reject_malformed_line_count() {
    let h = harness(Script::Reply);
    let (status, body) = send(&h.app, get("/logs?lines=many")).await;

    assert!(status.is_client_error());
    assert!(body["detail"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generations_write_one_line_each() {
    let h = harness(Script::Reply);
    let mut handles = Vec::new();
    for i in 0..24 {
        let app = h.app.clone();
        handles.push(tokio::spawn(async move {
            let request = post_generate(json!({
                "prompt": format!("concurrent request {i}\nwith a second line"),
                "temperature": 0.0,
            }));
            send(&app, request).await.0
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    let raw = std::fs::read_to_string(h.log.path()).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 24);
    assert!(lines.iter().all(|line| line.split(" | ").count() == 5));
    assert_eq!(h.generations.load(Ordering::SeqCst), 24);
}
