pub mod app;
pub mod audio_fetcher;
pub mod audio_preprocessor;
pub mod caption_fetcher;
pub mod chunk_planner;
pub mod config;
pub mod error;
pub mod formatter;
pub mod http_caller;
pub mod orchestrator;
pub mod quota_tier;
pub mod rate_gate;
pub mod segment;
pub mod tracing;
pub mod transcription_engine;
pub mod url;
pub mod webhook;
pub mod zip_packager;

pub use app::{cron::start_cron, server::start_server, AppState};
pub use config::Config;
pub use orchestrator::Services;
