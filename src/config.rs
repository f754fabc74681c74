use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub model_id: String,
    pub model_path: PathBuf,
    /// File name of the TorchScript export inside the `model_id` repository.
    pub model_file: String,
    pub hf_token: Option<String>,
    pub tokenizer_path: PathBuf,
    /// `auto`, `cpu`, or `cuda[:N]`.
    pub device: String,
    pub log_file: PathBuf,
    pub top_p: f64,
    pub repetition_penalty: f64,
    pub max_input_tokens: usize,
    pub eos_tokens: Vec<String>,
    pub cors_origins: Vec<String>,
    pub preload_model: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
            model_id: "meta-llama/Meta-Llama-3-8B-Instruct".to_string(),
            model_path: PathBuf::from("models/llama3_8b_instruct.ts"),
            model_file: "llama3_8b_instruct.ts".to_string(),
            hf_token: None,
            tokenizer_path: PathBuf::from("models/tokenizer.json"),
            device: "auto".to_string(),
            log_file: PathBuf::from("logs/output_log.txt"),
            top_p: 0.9,
            repetition_penalty: 1.1,
            max_input_tokens: 512,
            eos_tokens: vec!["<|eot_id|>".to_string(), "<|end_of_text|>".to_string()],
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            preload_model: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = env::var("SERVER_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listen_addr);

        let model_id = env::var("MODEL_ID").unwrap_or(defaults.model_id);
        let model_path = env::var("MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_path);
        let model_file = env::var("MODEL_FILE").unwrap_or(defaults.model_file);
        let hf_token = env::var("HF_TOKEN").ok().filter(|t| !t.is_empty());
        let tokenizer_path = env::var("TOKENIZER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.tokenizer_path);
        let device = env::var("DEVICE").unwrap_or(defaults.device);
        let log_file = env::var("LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_file);

        let top_p = env::var("TOP_P")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.top_p);
        let repetition_penalty = env::var("REPETITION_PENALTY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.repetition_penalty);
        let max_input_tokens = env::var("MAX_INPUT_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_input_tokens);

        let eos_tokens = env::var("EOS_TOKENS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.eos_tokens);
        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| split_list(&v))
            .unwrap_or(defaults.cors_origins);
        let preload_model = env::var("PRELOAD_MODEL")
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.preload_model);

        if !(0.0..=1.0).contains(&top_p) {
            anyhow::bail!("TOP_P must be within [0, 1], got {top_p}");
        }
        if repetition_penalty <= 0.0 {
            anyhow::bail!("REPETITION_PENALTY must be positive, got {repetition_penalty}");
        }
        if max_input_tokens == 0 {
            anyhow::bail!("MAX_INPUT_TOKENS must be at least 1");
        }

        Ok(Self {
            listen_addr,
            model_id,
            model_path,
            model_file,
            hf_token,
            tokenizer_path,
            device,
            log_file,
            top_p,
            repetition_penalty,
            max_input_tokens,
            eos_tokens,
            cors_origins,
            preload_model,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
