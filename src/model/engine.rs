use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use once_cell::sync::OnceCell;
use tokio::task;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        GenerateRequest, GenerationOutcome, ModelInfo, SamplingParams,
        loader::{LanguageModel, ModelLoader},
        prompt::{extract_reply, format_prompt},
    },
};

/// Owns the single model instance shared by every request.
///
/// The model is loaded on first use. A failed load leaves the cell empty, so
/// the next caller tries again.
pub struct InferenceEngine {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<Arc<dyn LanguageModel>>,
    loading: AtomicBool,
    top_p: f64,
    repetition_penalty: f64,
}

impl InferenceEngine {
    pub fn new(loader: Arc<dyn ModelLoader>, config: &AppConfig) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            loading: AtomicBool::new(false),
            top_p: config.top_p,
            repetition_penalty: config.repetition_penalty,
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        match self.model.get() {
            Some(model) => ModelInfo::Loaded(model.details()),
            None if self.loading.load(Ordering::Acquire) => ModelInfo::Loading,
            None => ModelInfo::NotLoaded,
        }
    }

    /// Returns the loaded model, loading it on the blocking pool if needed.
    pub async fn ready(self: &Arc<Self>) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        if let Some(model) = self.model.get() {
            return Ok(model.clone());
        }

        let engine = self.clone();
        task::spawn_blocking(move || engine.load_blocking())
            .await
            .map_err(|err| ServiceError::ModelLoad(format!("load task failed: {err}")))?
    }

    fn load_blocking(&self) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        self.model
            .get_or_try_init(|| {
                let _loading = LoadingFlag::raise(&self.loading);
                info!("loading model");
                let loaded = self.loader.load();
                match &loaded {
                    Ok(model) => {
                        let details = model.details();
                        info!(
                            model = %details.model_name,
                            device = %details.device,
                            parameters = details.parameters,
                            "model loaded"
                        );
                    }
                    Err(err) => warn!(error = %err, "model load failed"),
                }
                loaded
            })
            .cloned()
    }

    pub fn sampling_params(&self, request: &GenerateRequest) -> SamplingParams {
        SamplingParams {
            temperature: request.temperature,
            max_new_tokens: request.max_new_tokens,
            top_p: self.top_p,
            repetition_penalty: self.repetition_penalty,
        }
    }

    /// Runs one generation.
    ///
    /// Errors raised by the backend while generating are reported as
    /// [`GenerationOutcome::Failed`]; only load and task failures are `Err`.
    pub async fn generate(
        self: &Arc<Self>,
        request: &GenerateRequest,
    ) -> Result<GenerationOutcome, ServiceError> {
        let model = self.ready().await?;
        let params = self.sampling_params(request);
        let formatted = format_prompt(&request.prompt);

        let joined = task::spawn_blocking(move || {
            model.generate(&formatted, &params).map(|completion| {
                (
                    extract_reply(&formatted, &completion),
                    completion.tokens_generated,
                )
            })
        })
        .await;

        // A panic inside the backend is still a backend failure.
        let result = match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(ServiceError::Inference(format!(
                "backend panicked: {}",
                panic_message(err.into_panic().as_ref())
            ))),
            Err(err) => {
                return Err(ServiceError::Inference(format!(
                    "inference task failed: {err}"
                )));
            }
        };

        Ok(match result {
            Ok((reply, tokens_generated)) => {
                info!(
                    tokens_generated,
                    chars = reply.chars().count(),
                    "generated reply"
                );
                GenerationOutcome::Completed(reply)
            }
            Err(err) => {
                warn!(error = %err, "generation failed");
                GenerationOutcome::Failed(err.to_string())
            }
        })
    }
}

/// Holds the `loading` flag up until dropped, including on unwind.
struct LoadingFlag<'a>(&'a AtomicBool);

impl<'a> LoadingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
