use std::{process::ExitCode, sync::Arc};

use local_ai_writer::{
    AppConfig, InferenceEngine, ServiceError,
    download::{self, Fetched, ModelDownloader},
    model::default_loader,
};

fn report(what: &str, fetched: &Fetched) {
    match fetched {
        Fetched::AlreadyPresent(path) => println!("✅ {what} already present: {}", path.display()),
        Fetched::Downloaded(path) => println!("✅ {what} saved to {}", path.display()),
    }
}

async fn download_and_verify(config: &AppConfig) -> Result<String, ServiceError> {
    let downloader = ModelDownloader::from_config(config);

    println!("📥 Downloading tokenizer...");
    let tokenizer_path = config.tokenizer_path.clone();
    let fetcher = downloader.clone();
    let tokenizer = tokio::task::spawn_blocking(move || fetcher.ensure_tokenizer(&tokenizer_path))
        .await
        .map_err(|err| ServiceError::Download(err.to_string()))??;
    report("Tokenizer", &tokenizer);

    println!("📥 Downloading model export (several GB)...");
    let model_file = config.model_file.clone();
    let model_path = config.model_path.clone();
    let model = tokio::task::spawn_blocking(move || downloader.ensure_model(&model_file, &model_path))
        .await
        .map_err(|err| ServiceError::Download(err.to_string()))??;
    report("Model", &model);

    println!("🧪 Testing model...");
    let engine = Arc::new(InferenceEngine::new(default_loader(config), config));
    download::smoke_test(&engine).await
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hf_hub=warn".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::from_env()?;

    println!("🚀 Local AI Writer model download");
    println!("{}", "=".repeat(40));
    println!("🔄 Model: {}", config.model_id);

    match download_and_verify(&config).await {
        Ok(reply) => {
            println!("✅ Test successful! Response: {reply}");
            println!("\n🎉 Setup complete! You can now run the application.");
            println!("Next steps:");
            println!("1. Start the API: cargo run --release");
            println!("2. Start the front end: cd frontend && npm start");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            println!("❌ Error preparing model: {err}");
            println!("\nTroubleshooting:");
            for (i, hint) in download::TROUBLESHOOTING.iter().enumerate() {
                println!("{}. {hint}", i + 1);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
