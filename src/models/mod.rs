// Modèle: job.rs
pub mod job;
pub use job::{
    BatchJob, InputPayload, InputRef, JobId, JobState,
    OperationKind, Task, TaskParams,
};

// Modèle: result.rs
pub mod result;
pub use result::{
    ExecutionFailure, ExecutionResult, JobProgress, OutcomeRecord,
    OutcomeSink, OutcomeStatus, ProgressCallback, ProgressSink,
    ProgressUpdate, RemoteBatchArchive, RemoteFileReport, TransformOutput,
};

// Modèle: system.rs
pub mod system;
pub use system::{CompressionProfile, HealthStatus};
