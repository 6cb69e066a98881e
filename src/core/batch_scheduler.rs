// core/batch_scheduler.rs
//! Planification de lots avec plafond de concurrence.
//!
//! Les jobs démarrent dans l'ordre de soumission, au plus K à la fois.
//! L'échec d'un job n'interrompt jamais les autres : le lot se termine
//! toujours par un rapport complet, job par job.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::strategy::ExecutionStrategy;
use crate::models::job::{BatchJob, JobId, JobState, OperationKind, Task};
use crate::models::result::{
    ExecutionResult, JobProgress, OutcomeRecord, OutcomeSink, OutcomeStatus, ProgressCallback,
    ProgressSink, ProgressUpdate, TransformOutput,
};
use crate::utils::config::SchedulerConfig;
use crate::utils::error::{AppError, AppResult, ErrorKind};

/// Issue d'un job terminé
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub operation_kind: OperationKind,
    pub state: JobState,
    pub result: ExecutionResult,
    pub elapsed: Duration,
}

impl JobOutcome {
    fn to_record(&self) -> Option<OutcomeRecord> {
        let status = OutcomeStatus::from_state(self.state)?;
        let output = self.result.output();

        Some(OutcomeRecord {
            job_id: self.job_id.clone(),
            operation_kind: self.operation_kind,
            original_size: output.map(|o| o.original_size),
            transformed_size: output.map(|o| o.transformed_size),
            ratio: self.result.ratio(),
            status,
            error_kind: self.result.error_kind(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            settled_at: Utc::now(),
        })
    }
}

/// Rapport final d'un lot ; pas de verdict global, seulement le détail par job
#[derive(Debug, Clone)]
pub struct BatchReport {
    order: Vec<JobId>,
    outcomes: HashMap<JobId, JobOutcome>,
    /// Nombre maximal de jobs observés simultanément en cours
    pub peak_running: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn get(&self, job_id: &JobId) -> Option<&JobOutcome> {
        self.outcomes.get(job_id)
    }

    /// Issues dans l'ordre de soumission
    pub fn outcomes(&self) -> impl Iterator<Item = &JobOutcome> {
        self.order.iter().filter_map(|id| self.outcomes.get(id))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    fn count(&self, state: JobState) -> usize {
        self.outcomes.values().filter(|o| o.state == state).count()
    }

    pub fn completed(&self) -> usize {
        self.count(JobState::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(JobState::Failed)
    }

    pub fn aborted(&self) -> usize {
        self.count(JobState::Aborted)
    }

    pub fn into_map(self) -> HashMap<JobId, JobOutcome> {
        self.outcomes
    }
}

struct JobEntry {
    job: BatchJob,
    cancel: Option<CancellationToken>,
    outcome: Option<JobOutcome>,
}

#[derive(Default)]
struct BatchState {
    entries: HashMap<JobId, JobEntry>,
    order: Vec<JobId>,
    queue: VecDeque<JobId>,
    running: usize,
    peak_running: usize,
}

/// Contexte partagé entre le pilote du lot et ses poignées
struct RunContext {
    strategy: Arc<dyn ExecutionStrategy>,
    max_concurrent: usize,
    progress_sink: Option<ProgressSink>,
    outcome_sink: Option<Arc<dyn OutcomeSink>>,
    state: Mutex<BatchState>,
}

impl RunContext {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_progress(&self, job_id: &JobId, percent: u8, message: impl Into<String>) {
        if let Some(sink) = &self.progress_sink {
            sink(JobProgress {
                job_id: job_id.clone(),
                percent,
                message: message.into(),
            });
        }
    }

    fn emit_outcome(&self, outcome: &JobOutcome) {
        if let (Some(sink), Some(record)) = (&self.outcome_sink, outcome.to_record()) {
            sink.record(record);
        }
    }

    /// Annule un job encore dans la file
    fn abort_queued(&self, state: &mut BatchState, job_id: &JobId) -> Option<JobOutcome> {
        let next = JobState::Aborted;
        let entry = state.entries.get_mut(job_id)?;
        if let Err(e) = entry.job.transition(next) {
            error!("❌ {}", e);
            return None;
        }

        let outcome = JobOutcome {
            job_id: job_id.clone(),
            operation_kind: entry.job.operation_kind,
            state: next,
            result: Err::<TransformOutput, AppError>(AppError::Cancelled(
                "cancelled before start".to_string(),
            ))
            .into(),
            elapsed: Duration::ZERO,
        };
        entry.outcome = Some(outcome.clone());
        Some(outcome)
    }

    /// Retire le prochain job de la file et le passe en `Running`
    fn start_next(&self) -> Option<(BatchJob, CancellationToken)> {
        let mut state = self.lock();
        if state.running >= self.max_concurrent {
            return None;
        }

        while let Some(job_id) = state.queue.pop_front() {
            let Some(entry) = state.entries.get_mut(&job_id) else {
                continue;
            };
            if entry.job.transition(JobState::Running).is_err() {
                continue;
            }

            let token = CancellationToken::new();
            entry.cancel = Some(token.clone());
            let job = entry.job.clone();

            state.running += 1;
            state.peak_running = state.peak_running.max(state.running);
            return Some((job, token));
        }

        None
    }

    /// Enregistre l'état terminal d'un job démarré
    fn finish(&self, job_id: &JobId, result: ExecutionResult, elapsed: Duration) -> Option<JobOutcome> {
        let next = match result.error_kind() {
            None => JobState::Completed,
            Some(ErrorKind::Cancelled) => JobState::Aborted,
            Some(_) => JobState::Failed,
        };

        let mut state = self.lock();
        state.running = state.running.saturating_sub(1);

        let entry = state.entries.get_mut(job_id)?;
        entry.cancel = None;
        if let Err(e) = entry.job.transition(next) {
            error!("❌ {}", e);
            return None;
        }

        let outcome = JobOutcome {
            job_id: job_id.clone(),
            operation_kind: entry.job.operation_kind,
            state: next,
            result,
            elapsed,
        };
        entry.outcome = Some(outcome.clone());
        Some(outcome)
    }

    fn cancel(&self, job_id: &JobId) -> bool {
        let mut state = self.lock();
        let current = match state.entries.get(job_id) {
            Some(entry) => entry.job.state(),
            None => return false,
        };
        if current.is_terminal() {
            return false;
        }

        match current {
            JobState::Queued => {
                state.queue.retain(|id| id != job_id);
                let outcome = self.abort_queued(&mut state, job_id);
                drop(state);

                match outcome {
                    Some(outcome) => {
                        info!("🛑 Job {} annulé avant démarrage", job_id);
                        self.emit_outcome(&outcome);
                        true
                    }
                    None => false,
                }
            }
            _ => {
                // Demande seulement : le premier état terminal l'emporte
                if let Some(token) = state.entries.get(job_id).and_then(|e| e.cancel.as_ref()) {
                    token.cancel();
                }
                debug!("Annulation demandée pour le job {} en cours", job_id);
                true
            }
        }
    }

    fn snapshot(&self) -> Vec<(JobId, JobState)> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id).map(|e| (id.clone(), e.job.state())))
            .collect()
    }
}

#[derive(Default)]
struct ProgressGuard {
    last: AtomicU8,
    settled: AtomicBool,
}

/// Exécute un job démarré ; ne renvoie jamais d'erreur, seulement un résultat
#[instrument(skip_all, fields(job_id = %job.job_id, operation = %job.operation_kind))]
async fn run_job(
    context: Arc<RunContext>,
    job: BatchJob,
    cancel: CancellationToken,
    on_progress: ProgressCallback,
) -> (JobId, ExecutionResult, Duration) {
    let started = Instant::now();
    context.emit_progress(&job.job_id, 0, "Starting...");

    // Paramètres invalides : échec sans appel à la stratégie
    if let Err(e) = job.operation_kind.validate_params(&job.params) {
        warn!("❌ Job {} refusé: paramètres invalides", job.job_id);
        return (job.job_id, Err::<TransformOutput, AppError>(e).into(), started.elapsed());
    }

    let result = match job.input_ref.load().await {
        Ok(_) if cancel.is_cancelled() => {
            Err::<TransformOutput, AppError>(AppError::Cancelled("cancelled while loading input".to_string())).into()
        }
        Ok(input) => {
            let task = Task::new(job.operation_kind, input).with_params(job.params.clone());
            context
                .strategy
                .execute(task, Some(on_progress), cancel)
                .await
        }
        Err(e) => Err::<TransformOutput, AppError>(e).into(),
    };

    (job.job_id, result, started.elapsed())
}

/// Boucle du lot : remplit les créneaux libres dans l'ordre FIFO
async fn drive(context: Arc<RunContext>) -> BatchReport {
    let started = Instant::now();
    let mut running = FuturesUnordered::new();
    let mut guards: HashMap<JobId, Arc<ProgressGuardHandle>> = HashMap::new();

    loop {
        while let Some((job, token)) = context.start_next() {
            debug!("▶️  Démarrage du job {}", job.job_id);
            let handle = Arc::new(ProgressGuardHandle::new(&context, &job.job_id));
            guards.insert(job.job_id.clone(), handle.clone());
            running.push(run_job(context.clone(), job, token, handle.callback.clone()));
        }

        let Some((job_id, result, elapsed)) = running.next().await else {
            break;
        };

        if let Some(handle) = guards.remove(&job_id) {
            handle.settle();
        }

        if let Some(outcome) = context.finish(&job_id, result, elapsed) {
            match outcome.state {
                JobState::Completed => {
                    context.emit_progress(&job_id, 100, "Completed");
                    info!("✅ Job {} terminé en {:?}", job_id, elapsed);
                }
                JobState::Aborted => info!("🛑 Job {} annulé", job_id),
                _ => warn!(
                    "❌ Job {} en échec: {}",
                    job_id,
                    outcome
                        .result
                        .error()
                        .map(|f| f.message.as_str())
                        .unwrap_or("unknown error")
                ),
            }
            context.emit_outcome(&outcome);
        }
    }

    let state = context.lock();
    let mut outcomes = HashMap::with_capacity(state.order.len());
    for job_id in &state.order {
        match state.entries.get(job_id).and_then(|e| e.outcome.clone()) {
            Some(outcome) => {
                outcomes.insert(job_id.clone(), outcome);
            }
            None => error!("❌ Job {} sans issue en fin de lot", job_id),
        }
    }

    let report = BatchReport {
        order: state.order.clone(),
        outcomes,
        peak_running: state.peak_running,
        elapsed: started.elapsed(),
    };
    info!(
        "📦 Lot terminé: {} réussis, {} échoués, {} annulés en {:?}",
        report.completed(),
        report.failed(),
        report.aborted(),
        report.elapsed
    );
    report
}

/// Callback de progression non décroissante, plafonnée à 99 avant la fin
struct ProgressGuardHandle {
    guard: Arc<ProgressGuard>,
    callback: ProgressCallback,
}

impl ProgressGuardHandle {
    fn new(context: &Arc<RunContext>, job_id: &JobId) -> Self {
        let guard = Arc::new(ProgressGuard::default());
        let sink_guard = guard.clone();
        let context = context.clone();
        let job_id = job_id.clone();

        let callback: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
            if sink_guard.settled.load(Ordering::SeqCst) {
                return;
            }
            let percent = update.percent.min(99);
            let previous = sink_guard.last.fetch_max(percent, Ordering::SeqCst);
            if percent >= previous {
                context.emit_progress(&job_id, percent, update.message);
            }
        });

        Self { guard, callback }
    }

    /// Plus aucune progression intermédiaire après l'état terminal
    fn settle(&self) {
        self.guard.settled.store(true, Ordering::SeqCst);
    }
}

/// Poignée sur un lot en cours
pub struct BatchRun {
    context: Arc<RunContext>,
    driver: JoinHandle<BatchReport>,
}

impl BatchRun {
    /// Annule un job : retiré de la file s'il attend, signalé s'il tourne.
    /// Renvoie `false` si le job est inconnu ou déjà terminé.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        self.context.cancel(job_id)
    }

    /// Arrête le lot : les jobs en attente sont annulés, ceux en cours signalés
    pub fn cancel_all(&self) -> usize {
        let order = self.context.lock().order.clone();
        let cancelled = order.iter().filter(|id| self.context.cancel(id)).count();
        info!("🛑 Arrêt du lot demandé ({} jobs concernés)", cancelled);
        cancelled
    }

    /// États courants, dans l'ordre de soumission
    pub fn snapshot(&self) -> Vec<(JobId, JobState)> {
        self.context.snapshot()
    }

    pub fn max_concurrent(&self) -> usize {
        self.context.max_concurrent
    }

    /// Attend la fin de tous les jobs démarrés
    pub async fn wait(self) -> AppResult<BatchReport> {
        self.driver
            .await
            .map_err(|e| AppError::Internal(format!("batch driver failed: {}", e)))
    }
}

/// Planificateur de lots sur une stratégie d'exécution unique
pub struct BatchScheduler {
    strategy: Arc<dyn ExecutionStrategy>,
    config: SchedulerConfig,
    progress_sink: Option<ProgressSink>,
    outcome_sink: Option<Arc<dyn OutcomeSink>>,
}

impl BatchScheduler {
    pub fn new(strategy: Arc<dyn ExecutionStrategy>, config: SchedulerConfig) -> AppResult<Self> {
        if config.max_concurrent == 0 {
            return Err(AppError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            strategy,
            config,
            progress_sink: None,
            outcome_sink: None,
        })
    }

    pub fn with_progress_sink(mut self, sink: ProgressSink) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    pub fn with_outcome_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.outcome_sink = Some(sink);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// Soumet un lot et rend la main immédiatement.
    ///
    /// Un lot vide ou contenant deux fois le même identifiant est refusé
    /// sans rien démarrer. Les jobs aux paramètres invalides prennent leur
    /// tour dans la file puis échouent sans appeler la stratégie.
    pub fn submit(&self, jobs: Vec<BatchJob>) -> AppResult<BatchRun> {
        if jobs.is_empty() {
            return Err(AppError::Validation("batch is empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !seen.insert(job.job_id.clone()) {
                return Err(AppError::Validation(format!(
                    "duplicate job id in batch: {}",
                    job.job_id
                )));
            }
            if job.state() != JobState::Queued {
                return Err(AppError::Validation(format!(
                    "job {} is not queued ({:?})",
                    job.job_id,
                    job.state()
                )));
            }
        }

        let context = Arc::new(RunContext {
            strategy: self.strategy.clone(),
            max_concurrent: self.config.max_concurrent,
            progress_sink: self.progress_sink.clone(),
            outcome_sink: self.outcome_sink.clone(),
            state: Mutex::new(BatchState::default()),
        });

        {
            let mut state = context.lock();
            for job in jobs {
                let job_id = job.job_id.clone();
                state.order.push(job_id.clone());
                state.queue.push_back(job_id.clone());
                state.entries.insert(
                    job_id,
                    JobEntry {
                        job,
                        cancel: None,
                        outcome: None,
                    },
                );
            }
        }

        info!(
            "📦 Lot soumis: {} jobs, {} simultanés au plus ({})",
            context.lock().order.len(),
            context.max_concurrent,
            context.strategy.name()
        );

        let driver = tokio::spawn(drive(context.clone()));
        Ok(BatchRun { context, driver })
    }

    /// Soumet puis attend le rapport complet
    pub async fn run(&self, jobs: Vec<BatchJob>) -> AppResult<BatchReport> {
        self.submit(jobs)?.wait().await
    }
}
