// core/strategy.rs
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::job::Task;
use crate::models::result::{ExecutionResult, ProgressCallback};

/// Manière d'exécuter une tâche : contexte local ou backend distant.
///
/// Une exécution se termine toujours par un `ExecutionResult`, jamais par
/// une erreur propagée ; les échecs sont classés via `ErrorKind`.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Nom court utilisé dans les logs et les tentatives
    fn name(&self) -> &str;

    async fn execute(
        &self,
        task: Task,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> ExecutionResult;
}
