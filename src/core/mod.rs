// core/mod.rs
pub mod result_channel;
pub mod strategy;
pub mod worker_channel;
pub mod batch_scheduler;

// Ré-exports pour faciliter l'import
pub use result_channel::{OperationId, ResultChannel, Settlement};
pub use strategy::ExecutionStrategy;
pub use worker_channel::{ChannelState, WorkerChannel};
pub use batch_scheduler::{BatchReport, BatchRun, BatchScheduler, JobOutcome};
