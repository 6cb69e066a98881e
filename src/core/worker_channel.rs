// core/worker_channel.rs
//! Pont entre l'appelant et un contexte d'exécution en arrière-plan.
//!
//! Le canal ne transmet aucune commande tant que le contexte n'a pas
//! signalé `Ready`. Tous les événements sont routés vers le `ResultChannel`
//! par identifiant d'opération.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::result_channel::{OperationId, ResultChannel};
use crate::core::strategy::ExecutionStrategy;
use crate::models::job::Task;
use crate::models::result::{ExecutionResult, ProgressCallback, ProgressUpdate, TransformOutput};
use crate::utils::config::WorkerConfig;
use crate::utils::error::{AppError, AppResult};
use crate::workers::compression_worker::{
    spawn_worker, ContextHandle, TaskProcessor, WorkerCommand, WorkerEvent,
};

/// Cycle de vie du canal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Starting,
    Ready,
    Terminated,
}

struct Inner {
    state: ChannelState,
    commands: Option<mpsc::UnboundedSender<WorkerCommand>>,
    context_task: Option<JoinHandle<()>>,
    router_task: Option<JoinHandle<()>>,
    fault: Option<String>,
}

struct Shared {
    inner: Mutex<Inner>,
    results: ResultChannel,
    state_tx: watch::Sender<ChannelState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_ready(&self) {
        let mut inner = self.lock();
        if inner.state == ChannelState::Starting {
            inner.state = ChannelState::Ready;
            self.state_tx.send_replace(ChannelState::Ready);
            info!("✅ Contexte d'exécution prêt");
        } else {
            debug!("Signal Ready ignoré dans l'état {:?}", inner.state);
        }
    }

    /// Le contexte a disparu sans terminaison explicite
    fn fail(&self, reason: &str) {
        {
            let mut inner = self.lock();
            if inner.state == ChannelState::Terminated {
                return;
            }
            inner.state = ChannelState::Terminated;
            inner.fault = Some(reason.to_string());
            inner.commands = None;
            inner.context_task = None;
            inner.router_task = None;
        }
        self.state_tx.send_replace(ChannelState::Terminated);
        warn!("💥 Contexte d'exécution perdu: {}", reason);

        self.results.reject_all(AppError::ChannelFault(reason.to_string()));
    }

    fn route(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready => self.mark_ready(),
            WorkerEvent::Progress {
                operation_id,
                percent,
                message,
            } => self
                .results
                .deliver_progress(operation_id, ProgressUpdate::new(percent, message)),
            WorkerEvent::Completed {
                operation_id,
                output,
            } => {
                self.results.settle(operation_id, Ok(output));
            }
            WorkerEvent::Error {
                operation_id,
                message,
            } => {
                self.results
                    .settle(operation_id, Err(AppError::ProcessingFailed(message)));
            }
            WorkerEvent::Aborted { operation_id } => {
                self.results.settle(
                    operation_id,
                    Err(AppError::Cancelled("aborted by request".to_string())),
                );
            }
        }
    }
}

async fn route_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        shared.route(event);
    }
    shared.fail("background context exited");
}

/// Canal vers un contexte d'exécution unique
pub struct WorkerChannel {
    shared: Arc<Shared>,
    /// Délai par défaut de `wait_ready`
    ready_timeout: Duration,
}

impl Default for WorkerChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerChannel {
    /// Canal non démarré
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Uninitialized);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ChannelState::Uninitialized,
                    commands: None,
                    context_task: None,
                    router_task: None,
                    fault: None,
                }),
                results: ResultChannel::new(),
                state_tx,
            }),
            ready_timeout: WorkerConfig::default().ready_timeout,
        }
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Démarre un worker local et y attache le canal
    pub fn spawn(processor: Arc<dyn TaskProcessor>, config: WorkerConfig) -> AppResult<Self> {
        let channel = Self::new().with_ready_timeout(config.ready_timeout);
        channel.start(spawn_worker(processor, config))?;
        Ok(channel)
    }

    /// Attache un contexte démarré ; le canal passe en `Starting` jusqu'au `Ready`
    pub fn start(&self, context: ContextHandle) -> AppResult<()> {
        let ContextHandle {
            commands,
            events,
            task,
        } = context;

        let mut inner = self.shared.lock();
        if inner.state != ChannelState::Uninitialized {
            return Err(AppError::Validation(format!(
                "worker channel already started ({:?})",
                inner.state
            )));
        }

        inner.state = ChannelState::Starting;
        inner.commands = Some(commands);
        inner.context_task = task;
        self.shared.state_tx.send_replace(ChannelState::Starting);

        let router = tokio::spawn(route_events(self.shared.clone(), events));
        inner.router_task = Some(router);

        debug!("Contexte d'exécution attaché, en attente du signal Ready");
        Ok(())
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ChannelState::Ready
    }

    pub fn pending_count(&self) -> usize {
        self.shared.results.pending_count()
    }

    /// Attend le signal `Ready`, borné par le délai configuré
    pub async fn wait_ready(&self) -> AppResult<()> {
        self.wait_ready_for(self.ready_timeout).await
    }

    /// Attend le signal `Ready`, borné par `timeout`
    pub async fn wait_ready_for(&self, timeout: Duration) -> AppResult<()> {
        let mut state_rx = self.shared.state_tx.subscribe();

        let wait = async {
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ChannelState::Ready => return Ok(()),
                    ChannelState::Terminated => {
                        let fault = self.shared.lock().fault.clone();
                        return Err(match fault {
                            Some(reason) => AppError::ChannelFault(reason),
                            None => AppError::NotReady("worker channel terminated".to_string()),
                        });
                    }
                    ChannelState::Uninitialized | ChannelState::Starting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(AppError::ChannelFault("state watcher closed".to_string()));
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            AppError::NotReady(format!("background context not ready after {:?}", timeout))
        })?
    }

    /// Soumet une tâche et attend son règlement
    pub async fn dispatch(
        &self,
        task: Task,
        on_progress: Option<ProgressCallback>,
    ) -> AppResult<TransformOutput> {
        self.dispatch_cancellable(task, on_progress, CancellationToken::new())
            .await
    }

    /// Comme `dispatch`, avec demande d'abandon sur annulation du jeton.
    ///
    /// L'annulation est une demande : si le contexte termine avant de la
    /// voir, c'est le résultat `Completed` qui est rendu.
    #[instrument(skip_all, fields(task_kind = %task.operation, file_name = %task.input.file_name))]
    pub async fn dispatch_cancellable(
        &self,
        task: Task,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> AppResult<TransformOutput> {
        let operation_id = Uuid::new_v4();

        // Vérification d'état, enregistrement et envoi sous le même verrou
        let mut settlement = {
            let inner = self.shared.lock();
            let commands = match (&inner.state, &inner.commands) {
                (ChannelState::Ready, Some(commands)) => commands.clone(),
                (state, _) => {
                    return Err(AppError::NotReady(format!(
                        "worker channel is {:?}",
                        state
                    )))
                }
            };

            let settlement = self.shared.results.register(operation_id, on_progress)?;

            let command = WorkerCommand::Process {
                operation_id,
                task_kind: task.operation,
                file_name: task.input.file_name,
                payload: task.input.bytes,
                params: task.params,
            };
            if commands.send(command).is_err() {
                self.shared.results.settle(
                    operation_id,
                    Err(AppError::ChannelFault("background context is gone".to_string())),
                );
            }
            settlement
        };

        debug!("📤 Opération {} envoyée", operation_id);

        tokio::select! {
            outcome = &mut settlement => return outcome,
            _ = cancel.cancelled() => {}
        }

        debug!("🛑 Demande d'abandon pour l'opération {}", operation_id);
        self.request_abort(operation_id);
        settlement.await
    }

    fn request_abort(&self, operation_id: OperationId) {
        let commands = self.shared.lock().commands.clone();
        if let Some(commands) = commands {
            let _ = commands.send(WorkerCommand::Abort { operation_id });
        }
    }

    /// Arrête le contexte et rejette toutes les opérations en vol. Idempotent.
    pub fn terminate(&self) {
        let (context_task, router_task) = {
            let mut inner = self.shared.lock();
            if inner.state == ChannelState::Terminated {
                return;
            }
            inner.state = ChannelState::Terminated;
            inner.commands = None;
            (inner.context_task.take(), inner.router_task.take())
        };
        self.shared.state_tx.send_replace(ChannelState::Terminated);

        if let Some(task) = context_task {
            task.abort();
        }
        if let Some(task) = router_task {
            task.abort();
        }

        let rejected = self
            .shared
            .results
            .reject_all(AppError::Cancelled("worker terminated".to_string()));
        info!("🛑 Canal d'exécution terminé ({} opérations rejetées)", rejected);
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[async_trait]
impl ExecutionStrategy for WorkerChannel {
    fn name(&self) -> &str {
        "worker"
    }

    async fn execute(
        &self,
        task: Task,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        self.dispatch_cancellable(task, on_progress, cancel).await.into()
    }
}
