pub mod config;
pub mod download;
pub mod error;
pub mod generation_log;
pub mod model;
pub mod server;
pub mod setup_check;

pub use config::AppConfig;
pub use error::ServiceError;
pub use generation_log::{GenerationLog, LogEntry, LogTail};
pub use model::{GenerateRequest, GenerateResponse, InferenceEngine, ModelInfo};
pub use server::build_router;
