//! Fetches the tokenizer and TorchScript export from the Hugging Face Hub and
//! checks that the result can actually generate text.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use hf_hub::api::sync::{Api, ApiBuilder};
use tracing::info;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{GenerateRequest, GenerationOutcome, InferenceEngine, load_tokenizer},
};

pub const SMOKE_TEST_PROMPT: &str = "Hello, how are you?";

pub const TROUBLESHOOTING: &[&str] = &[
    "Check your internet connection",
    "Ensure you have enough disk space (>10GB)",
    "For gated models, set HF_TOKEN to a Hugging Face access token",
    "Or log in once with: huggingface-cli login",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    AlreadyPresent(PathBuf),
    Downloaded(PathBuf),
}

impl Fetched {
    pub fn path(&self) -> &Path {
        match self {
            Fetched::AlreadyPresent(path) | Fetched::Downloaded(path) => path,
        }
    }
}

/// Hub client for one model repository. Files that already exist locally are
/// never fetched again.
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    model_id: String,
    token: Option<String>,
}

impl ModelDownloader {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model_id: config.model_id.clone(),
            token: config.hf_token.clone(),
        }
    }

    fn api(&self) -> Result<Api, ServiceError> {
        ApiBuilder::new()
            .with_token(self.token.clone())
            .build()
            .map_err(|err| ServiceError::Download(err.to_string()))
    }

    /// Copies `file_name` from the repository to `target` unless `target`
    /// already exists.
    pub fn fetch(&self, file_name: &str, target: &Path) -> Result<Fetched, ServiceError> {
        if target.exists() {
            return Ok(Fetched::AlreadyPresent(target.to_path_buf()));
        }

        info!(model = %self.model_id, file = file_name, "downloading");
        let cached = self
            .api()?
            .model(self.model_id.clone())
            .get(file_name)
            .map_err(|err| {
                ServiceError::Download(format!("{}/{file_name}: {err}", self.model_id))
            })?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&cached, target)?;
        Ok(Fetched::Downloaded(target.to_path_buf()))
    }

    /// Fetches `tokenizer.json` and rejects it if it does not parse.
    pub fn ensure_tokenizer(&self, target: &Path) -> Result<Fetched, ServiceError> {
        let fetched = self.fetch("tokenizer.json", target)?;
        load_tokenizer(fetched.path())?;
        Ok(fetched)
    }

    pub fn ensure_model(&self, file_name: &str, target: &Path) -> Result<Fetched, ServiceError> {
        self.fetch(file_name, target)
    }
}

/// Generates a short reply through the same engine the server uses.
pub async fn smoke_test(engine: &Arc<InferenceEngine>) -> Result<String, ServiceError> {
    let request = GenerateRequest {
        prompt: SMOKE_TEST_PROMPT.to_string(),
        temperature: 0.7,
        max_new_tokens: 20,
    };
    match engine.generate(&request).await? {
        GenerationOutcome::Completed(text) => Ok(text),
        GenerationOutcome::Failed(reason) => Err(ServiceError::Inference(reason)),
    }
}
