// utils/mod.rs
pub mod error;
pub mod config;
pub mod telemetry;
pub mod helpers;

// Ré-exports pour faciliter l'import
pub use error::{AppError, AppResult, ErrorKind};
pub use config::{BackendConfig, Config, SchedulerConfig, WorkerConfig};
pub use telemetry::setup_tracing;
pub use helpers::{
    format_file_size, generate_job_id, reduction_ratio,
    sanitize_filename, with_timeout,
};
