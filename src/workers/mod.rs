//! # Workers Module
//!
//! Contextes d'exécution en arrière-plan :
//! - `compression_worker.rs`: traitement des tâches de transformation,
//!   piloté par messages (`process` / `abort`) et répondant par événements
//!   (`ready`, `progress`, `completed`, `error`, `aborted`).
//!
//! Le contexte est une tâche Tokio unique ; la concurrence interne est
//! bornée par un sémaphore.

pub mod compression_worker;

pub use compression_worker::{
    spawn_worker, ContextHandle, PassthroughProcessor, ProgressReporter, TaskProcessor,
    WorkerCommand, WorkerEvent,
};
