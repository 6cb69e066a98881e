// services/fallback.rs
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::strategy::ExecutionStrategy;
use crate::models::job::Task;
use crate::models::result::{ExecutionResult, ProgressCallback};
use crate::utils::error::{AppError, AppResult, ErrorKind};

/// Trace d'une tentative dans une chaîne de repli
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub strategy: String,
    /// `None` si la tentative a réussi
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    pub elapsed: Duration,
}

/// Liste ordonnée de stratégies essayées l'une après l'autre
pub struct FallbackChain {
    strategies: Vec<Arc<dyn ExecutionStrategy>>,
}

impl FallbackChain {
    pub fn new(strategies: Vec<Arc<dyn ExecutionStrategy>>) -> AppResult<Self> {
        if strategies.is_empty() {
            return Err(AppError::Validation(
                "fallback chain needs at least one strategy".to_string(),
            ));
        }
        Ok(Self { strategies })
    }

    /// Un échec de ce type autorise-t-il la stratégie suivante ?
    pub fn allows_fallback(kind: ErrorKind) -> bool {
        matches!(
            kind,
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::NotReady | ErrorKind::ChannelFault
        )
    }

    /// Exécute en renvoyant aussi le détail de chaque tentative
    pub async fn execute_with_attempts(
        &self,
        task: Task,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> (ExecutionResult, Vec<AttemptRecord>) {
        let mut attempts = Vec::with_capacity(self.strategies.len());
        let mut last = None;

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let result = strategy
                .execute(task.clone(), on_progress.clone(), cancel.clone())
                .await;

            let failure = result.error().cloned();
            attempts.push(AttemptRecord {
                strategy: strategy.name().to_string(),
                error_kind: failure.as_ref().map(|f| f.kind),
                message: failure.as_ref().map(|f| f.message.clone()),
                elapsed: started.elapsed(),
            });

            match failure {
                None => return (result, attempts),
                Some(failure) if Self::allows_fallback(failure.kind) => {
                    warn!(
                        "🔁 {} en échec ({}), tentative suivante",
                        strategy.name(),
                        failure.kind
                    );
                    last = Some(result);
                }
                Some(_) => return (result, attempts),
            }
        }

        // Une annulation l'emporte sur l'échec de la dernière tentative
        if cancel.is_cancelled() {
            info!("🛑 Chaîne de repli annulée après {} tentatives", attempts.len());
            return (
                ExecutionResult::failure(ErrorKind::Cancelled, "fallback chain cancelled"),
                attempts,
            );
        }

        let result = last.unwrap_or_else(|| {
            ExecutionResult::failure(ErrorKind::ChannelFault, "fallback chain ran no strategy")
        });
        info!("❌ Chaîne de repli épuisée après {} tentatives", attempts.len());
        (result, attempts)
    }
}

#[async_trait]
impl ExecutionStrategy for FallbackChain {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn execute(
        &self,
        task: Task,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let (result, attempts) = self.execute_with_attempts(task, on_progress, cancel).await;
        if attempts.len() > 1 {
            let path: Vec<String> = attempts
                .iter()
                .map(|a| match a.error_kind {
                    Some(kind) => format!("{}:{}", a.strategy, kind),
                    None => format!("{}:ok", a.strategy),
                })
                .collect();
            info!("Tentatives: {}", path.join(" -> "));
        }
        result
    }
}
