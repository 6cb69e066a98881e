// models/result.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::job::{JobId, JobState, OperationKind};
use crate::utils::error::{AppError, AppResult, ErrorKind};
use crate::utils::helpers::reduction_ratio;

/// Sortie d'une transformation réussie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub output: Vec<u8>,
    pub original_size: u64,
    pub transformed_size: u64,
}

impl TransformOutput {
    /// La taille transformée est toujours celle des octets produits
    pub fn new(output: Vec<u8>, original_size: u64) -> Self {
        let transformed_size = output.len() as u64;
        Self {
            output,
            original_size,
            transformed_size,
        }
    }

    /// Ratio dérivé des tailles, peut être négatif
    pub fn ratio(&self) -> f64 {
        reduction_ratio(self.original_size, self.transformed_size)
    }
}

/// Bilan d'un fichier dans un lot compressé côté serveur
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFileReport {
    pub file_name: String,
    pub success: bool,
    pub compression_ratio: Option<f64>,
    pub error: Option<String>,
}

/// Archive ZIP produite par un backend pour un lot de fichiers
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteBatchArchive {
    pub archive: Vec<u8>,
    pub batch_id: Option<String>,
    pub original_size: u64,
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    /// Réduction globale annoncée par le serveur, en pourcentage
    pub overall_compression_ratio: Option<f64>,
    pub files: Vec<RemoteFileReport>,
}

/// Échec normalisé
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<AppError> for ExecutionFailure {
    fn from(err: AppError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Résultat d'une transformation : exactement un des deux cas
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success(TransformOutput),
    Failure(ExecutionFailure),
}

impl ExecutionResult {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExecutionResult::Failure(ExecutionFailure {
            kind,
            message: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    pub fn output(&self) -> Option<&TransformOutput> {
        match self {
            ExecutionResult::Success(output) => Some(output),
            ExecutionResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ExecutionFailure> {
        match self {
            ExecutionResult::Success(_) => None,
            ExecutionResult::Failure(failure) => Some(failure),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(|f| f.kind)
    }

    pub fn ratio(&self) -> Option<f64> {
        self.output().map(TransformOutput::ratio)
    }
}

impl From<AppResult<TransformOutput>> for ExecutionResult {
    fn from(result: AppResult<TransformOutput>) -> Self {
        match result {
            Ok(output) => ExecutionResult::Success(output),
            Err(err) => ExecutionResult::Failure(err.into()),
        }
    }
}

/// Progression d'une opération en cours
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// Callback de progression d'une opération
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Progression d'un job, telle que remontée à l'interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: JobId,
    pub percent: u8,
    pub message: String,
}

/// Callback de progression par job
pub type ProgressSink = Arc<dyn Fn(JobProgress) + Send + Sync>;

/// Statut final d'un job dans un enregistrement d'activité
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Aborted,
}

impl OutcomeStatus {
    pub fn from_state(state: JobState) -> Option<Self> {
        match state {
            JobState::Completed => Some(OutcomeStatus::Completed),
            JobState::Failed => Some(OutcomeStatus::Failed),
            JobState::Aborted => Some(OutcomeStatus::Aborted),
            JobState::Queued | JobState::Running => None,
        }
    }
}

/// Enregistrement émis une fois par job terminé, persisté par l'application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub job_id: JobId,
    pub operation_kind: OperationKind,
    pub original_size: Option<u64>,
    pub transformed_size: Option<u64>,
    pub ratio: Option<f64>,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: u64,
    pub settled_at: DateTime<Utc>,
}

/// Destination des enregistrements d'activité
pub trait OutcomeSink: Send + Sync {
    fn record(&self, record: OutcomeRecord);
}

impl OutcomeSink for mpsc::UnboundedSender<OutcomeRecord> {
    fn record(&self, record: OutcomeRecord) {
        // Récepteur fermé : l'application n'écoute plus, rien à faire
        let _ = self.send(record);
    }
}
