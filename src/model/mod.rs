mod engine;
mod loader;
mod prompt;
mod types;

#[cfg(feature = "tch-backend")]
pub mod tch_backend;

pub use engine::InferenceEngine;
pub use loader::{
    LanguageModel, ModelLoader, SpecialTokens, UnavailableLoader, default_loader, load_tokenizer,
};
pub use prompt::{ASSISTANT_MARKER, extract_reply, format_prompt};
pub use types::{
    GenerateRequest, GenerateResponse, GenerationOutcome, GenerationStatus, ModelDetails,
    ModelInfo, RawCompletion, SamplingParams,
};
