use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use local_ai_writer::{
    AppConfig, GenerationLog, InferenceEngine, build_router, model::default_loader,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(model = %config.model_id, device = %config.device, "starting Local AI Writer API");

    let log = Arc::new(GenerationLog::open(config.log_file.clone())?);
    let engine = Arc::new(InferenceEngine::new(default_loader(&config), &config));

    if config.preload_model {
        if let Err(err) = engine.ready().await {
            tracing::warn!(error = %err, "preloading model failed; will retry on first request");
        }
    }

    let router = build_router(config.clone(), engine, log);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
