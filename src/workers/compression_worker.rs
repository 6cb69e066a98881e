// workers/compression_worker.rs
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::models::job::{InputPayload, OperationKind, Task, TaskParams};
use crate::models::result::TransformOutput;
use crate::utils::config::WorkerConfig;
use crate::utils::error::AppResult;

/// Message envoyé au contexte d'exécution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerCommand {
    #[serde(rename_all = "camelCase")]
    Process {
        operation_id: Uuid,
        task_kind: OperationKind,
        file_name: String,
        payload: Vec<u8>,
        params: TaskParams,
    },
    #[serde(rename_all = "camelCase")]
    Abort { operation_id: Uuid },
}

/// Événement émis par le contexte d'exécution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerEvent {
    /// Émis une seule fois, spontanément, après l'initialisation
    Ready,
    #[serde(rename_all = "camelCase")]
    Progress {
        operation_id: Uuid,
        percent: u8,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        operation_id: Uuid,
        output: TransformOutput,
    },
    #[serde(rename_all = "camelCase")]
    Error { operation_id: Uuid, message: String },
    #[serde(rename_all = "camelCase")]
    Aborted { operation_id: Uuid },
}

/// Extrémités d'un contexte d'exécution démarré
pub struct ContextHandle {
    pub commands: mpsc::UnboundedSender<WorkerCommand>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    /// Tâche hébergeant le contexte, interrompue à la terminaison
    pub task: Option<JoinHandle<()>>,
}

/// Remontée de progression pour une opération donnée
#[derive(Clone)]
pub struct ProgressReporter {
    operation_id: Uuid,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl ProgressReporter {
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        let _ = self.events.send(WorkerEvent::Progress {
            operation_id: self.operation_id,
            percent: percent.min(100),
            message: message.into(),
        });
    }
}

/// Capacité de transformation opaque exécutée dans le contexte
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, task: Task, progress: ProgressReporter) -> AppResult<Vec<u8>>;
}

/// Renvoie l'entrée telle quelle en signalant 10/50/90
pub struct PassthroughProcessor;

#[async_trait]
impl TaskProcessor for PassthroughProcessor {
    async fn process(&self, task: Task, progress: ProgressReporter) -> AppResult<Vec<u8>> {
        progress.report(10, "Loading file...");
        progress.report(50, "Processing...");
        progress.report(90, "Finalizing...");
        Ok(task.input.bytes)
    }
}

type InFlight = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Démarre un contexte d'exécution dans une tâche Tokio séparée
pub fn spawn_worker(processor: Arc<dyn TaskProcessor>, config: WorkerConfig) -> ContextHandle {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(run_worker(processor, config, commands_rx, events_tx));

    ContextHandle {
        commands: commands_tx,
        events: events_rx,
        task: Some(task),
    }
}

/// Boucle principale du contexte : une tâche par opération, bornées par un sémaphore
async fn run_worker(
    processor: Arc<dyn TaskProcessor>,
    config: WorkerConfig,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let limiter = Arc::new(Semaphore::new(config.max_parallel_tasks.max(1)));
    let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
    let mut operations = JoinSet::new();

    if events.send(WorkerEvent::Ready).is_err() {
        warn!("⚠️  Canal d'événements fermé avant le démarrage du worker");
        return;
    }
    info!("💼 Worker de traitement prêt ({} tâches simultanées)", config.max_parallel_tasks);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(WorkerCommand::Process { operation_id, task_kind, file_name, payload, params }) => {
                    let token = CancellationToken::new();
                    in_flight
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(operation_id, token.clone());

                    let task = Task {
                        operation: task_kind,
                        input: InputPayload { file_name, bytes: payload },
                        params,
                    };
                    operations.spawn(run_operation(
                        processor.clone(),
                        limiter.clone(),
                        in_flight.clone(),
                        events.clone(),
                        operation_id,
                        task,
                        token,
                    ));
                }
                Some(WorkerCommand::Abort { operation_id }) => {
                    let token = in_flight
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(&operation_id)
                        .cloned();

                    match token {
                        Some(token) => token.cancel(),
                        None => {
                            // Opération inconnue ou déjà terminée
                            let _ = events.send(WorkerEvent::Aborted { operation_id });
                        }
                    }
                }
                None => {
                    debug!("Canal de commandes fermé, arrêt du worker");
                    break;
                }
            },
            Some(joined) = operations.join_next(), if !operations.is_empty() => {
                if let Err(e) = joined {
                    error!("❌ Tâche d'opération interrompue: {}", e);
                }
            }
        }
    }
}

#[instrument(skip_all, fields(operation_id = %operation_id, task_kind = %task.operation))]
async fn run_operation(
    processor: Arc<dyn TaskProcessor>,
    limiter: Arc<Semaphore>,
    in_flight: InFlight,
    events: mpsc::UnboundedSender<WorkerEvent>,
    operation_id: Uuid,
    task: Task,
    token: CancellationToken,
) {
    let original_size = task.input_size();

    let event = tokio::select! {
        permit = limiter.acquire_owned() => match permit {
            Ok(permit) => {
                let reporter = ProgressReporter { operation_id, events: events.clone() };
                let work = AssertUnwindSafe(processor.process(task, reporter)).catch_unwind();

                let event = tokio::select! {
                    outcome = work => match outcome {
                        Ok(Ok(output)) => WorkerEvent::Completed {
                            operation_id,
                            output: TransformOutput::new(output, original_size),
                        },
                        Ok(Err(e)) => WorkerEvent::Error { operation_id, message: e.to_string() },
                        Err(_) => {
                            error!("❌ Le processeur a paniqué");
                            WorkerEvent::Error {
                                operation_id,
                                message: "processor panicked".to_string(),
                            }
                        }
                    },
                    _ = token.cancelled() => WorkerEvent::Aborted { operation_id },
                };
                drop(permit);
                event
            }
            Err(_) => WorkerEvent::Error {
                operation_id,
                message: "worker concurrency limiter closed".to_string(),
            },
        },
        _ = token.cancelled() => WorkerEvent::Aborted { operation_id },
    };

    in_flight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&operation_id);

    let _ = events.send(event);
}
