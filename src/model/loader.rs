use std::{path::Path, sync::Arc};

use tokenizers::Tokenizer;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{ModelDetails, RawCompletion, SamplingParams},
};

/// A loaded model able to turn a fully formatted prompt into tokens and back.
///
/// Implementations block; callers run them on the blocking thread pool.
pub trait LanguageModel: Send + Sync {
    fn details(&self) -> ModelDetails;

    fn generate(&self, input: &str, params: &SamplingParams)
    -> Result<RawCompletion, ServiceError>;
}

/// Produces the tokenizer/model pair. Called at most once per successful load.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn LanguageModel>, ServiceError>;
}

/// Picks the backend compiled into this build.
pub fn default_loader(config: &AppConfig) -> Arc<dyn ModelLoader> {
    #[cfg(feature = "tch-backend")]
    {
        Arc::new(super::tch_backend::TorchModelLoader::from_config(config))
    }
    #[cfg(not(feature = "tch-backend"))]
    {
        Arc::new(UnavailableLoader {
            model_id: config.model_id.clone(),
        })
    }
}

/// Stand-in used when no inference backend feature is enabled.
pub struct UnavailableLoader {
    pub model_id: String,
}

impl ModelLoader for UnavailableLoader {
    fn load(&self) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        Err(ServiceError::ModelLoad(format!(
            "no inference backend compiled in for {}; rebuild with --features tch-backend",
            self.model_id
        )))
    }
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer, ServiceError> {
    if !path.exists() {
        return Err(ServiceError::ModelLoad(format!(
            "tokenizer missing: {}",
            path.display()
        )));
    }
    Tokenizer::from_file(path).map_err(|e| ServiceError::Tokenizer(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Every id that ends generation, in configured order.
    pub eos: Vec<u32>,
    pub pad: u32,
}

impl SpecialTokens {
    /// Resolves the end-of-sequence ids; the first one doubles as padding when
    /// the tokenizer defines none.
    pub fn resolve(tokenizer: &Tokenizer, eos_tokens: &[String]) -> Result<Self, ServiceError> {
        let eos: Vec<u32> = eos_tokens
            .iter()
            .filter_map(|token| tokenizer.token_to_id(token))
            .collect();
        let first = *eos.first().ok_or_else(|| {
            ServiceError::Tokenizer(format!(
                "none of the end-of-sequence tokens {eos_tokens:?} are in the vocabulary"
            ))
        })?;
        let pad = tokenizer
            .get_padding()
            .map(|padding| padding.pad_id)
            .unwrap_or(first);

        Ok(Self { eos, pad })
    }

    pub fn is_eos(&self, id: u32) -> bool {
        self.eos.contains(&id)
    }
}
