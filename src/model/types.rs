use serde::{Deserialize, Serialize};

pub const PROMPT_MAX_CHARS: usize = 1000;
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=1.0;
pub const MAX_NEW_TOKENS_RANGE: std::ops::RangeInclusive<i64> = 10..=500;

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_NEW_TOKENS: i64 = 200;

/// A validated generation request. Out-of-range values fail deserialization,
/// so handlers only ever see requests within bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawGenerateRequest")]
pub struct GenerateRequest {
    pub prompt: String,
    pub temperature: f64,
    pub max_new_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct RawGenerateRequest {
    prompt: String,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default = "default_max_new_tokens")]
    max_new_tokens: i64,
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_max_new_tokens() -> i64 {
    DEFAULT_MAX_NEW_TOKENS
}

impl TryFrom<RawGenerateRequest> for GenerateRequest {
    type Error = String;

    fn try_from(raw: RawGenerateRequest) -> Result<Self, Self::Error> {
        let chars = raw.prompt.chars().count();
        if chars == 0 || chars > PROMPT_MAX_CHARS {
            return Err(format!(
                "prompt must be between 1 and {PROMPT_MAX_CHARS} characters, got {chars}"
            ));
        }
        if !TEMPERATURE_RANGE.contains(&raw.temperature) {
            return Err(format!(
                "temperature must be within [0.0, 1.0], got {}",
                raw.temperature
            ));
        }
        if !MAX_NEW_TOKENS_RANGE.contains(&raw.max_new_tokens) {
            return Err(format!(
                "max_new_tokens must be within [10, 500], got {}",
                raw.max_new_tokens
            ));
        }

        Ok(Self {
            prompt: raw.prompt,
            temperature: raw.temperature,
            max_new_tokens: raw.max_new_tokens as usize,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub output: String,
    pub status: GenerationStatus,
    pub time_taken: f64,
    pub prompt: String,
    pub temperature: f64,
    pub max_new_tokens: usize,
    pub timestamp: String,
}

/// Result of a generation call that reached the backend. A backend failure is
/// kept apart from genuine model text instead of being returned as content.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed(String),
    Failed(String),
}

impl GenerationOutcome {
    pub fn status(&self) -> GenerationStatus {
        match self {
            GenerationOutcome::Completed(_) => GenerationStatus::Completed,
            GenerationOutcome::Failed(_) => GenerationStatus::Failed,
        }
    }

    /// Text placed in the response `output` field.
    pub fn render(&self) -> String {
        match self {
            GenerationOutcome::Completed(text) => text.clone(),
            GenerationOutcome::Failed(reason) => format!("Error generating text: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_new_tokens: usize,
    pub top_p: f64,
    pub repetition_penalty: f64,
}

impl SamplingParams {
    pub fn do_sample(&self) -> bool {
        self.temperature > 0.0
    }
}

/// Raw decoder output handed back by a backend.
#[derive(Debug, Clone, Default)]
pub struct RawCompletion {
    /// The whole sequence, prompt included, decoded in one pass.
    pub full_text: String,
    /// Only the newly generated tokens.
    pub continuation: String,
    pub tokens_generated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDetails {
    pub model_name: String,
    pub device: String,
    pub parameters: u64,
    pub memory_usage: u64,
    pub eos_token_id: Option<u32>,
    pub pad_token_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelInfo {
    NotLoaded,
    Loading,
    Loaded(ModelDetails),
}
