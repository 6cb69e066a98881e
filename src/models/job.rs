// models/job.rs
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::PathBuf;

use crate::utils::error::{AppError, AppResult};
use crate::utils::helpers::generate_job_id;

/// Paramètres propres à une opération (clé/valeur)
pub type TaskParams = Map<String, Value>;

/// Identifiant d'un job dans un lot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Génère un identifiant unique
    pub fn generate() -> Self {
        Self(generate_job_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opération applicable à un fichier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Compress,
    Resize,
    Crop,
    Rotate,
    Filter,
    Convert,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Compress => "compress",
            OperationKind::Resize => "resize",
            OperationKind::Crop => "crop",
            OperationKind::Rotate => "rotate",
            OperationKind::Filter => "filter",
            OperationKind::Convert => "convert",
        }
    }

    /// Paramètres par défaut de l'opération
    pub fn default_params(&self) -> TaskParams {
        let value = match self {
            OperationKind::Compress => json!({ "quality": 0.8, "format": "jpeg" }),
            OperationKind::Resize => json!({ "width": 800, "height": 600, "maintainAspectRatio": true }),
            OperationKind::Crop => json!({ "x": 0, "y": 0, "width": 400, "height": 400 }),
            OperationKind::Rotate => json!({ "angle": 90 }),
            OperationKind::Filter => json!({ "brightness": 0, "contrast": 0, "saturation": 0 }),
            OperationKind::Convert => json!({ "format": "png", "quality": 0.9 }),
        };

        match value {
            Value::Object(map) => map,
            _ => TaskParams::new(),
        }
    }

    /// Valide les paramètres avant tout démarrage
    pub fn validate_params(&self, params: &TaskParams) -> AppResult<()> {
        let invalid = |msg: &str| Err(AppError::InvalidInput(format!("{}: {}", self.as_str(), msg)));

        match self {
            OperationKind::Compress => match params.get("quality") {
                // Qualité numérique (images) ou nom de profil (backends distants)
                Some(Value::Number(n)) => match n.as_f64() {
                    Some(q) if (0.1..=1.0).contains(&q) => Ok(()),
                    _ => invalid("quality must be between 0.1 and 1.0"),
                },
                Some(Value::String(_)) | None => Ok(()),
                Some(_) => invalid("quality must be a number or a profile name"),
            },
            OperationKind::Resize | OperationKind::Crop => {
                let positive = |key: &str| {
                    params
                        .get(key)
                        .and_then(Value::as_f64)
                        .map(|v| v > 0.0)
                        .unwrap_or(false)
                };
                if positive("width") && positive("height") {
                    Ok(())
                } else {
                    invalid("width and height must be positive")
                }
            }
            OperationKind::Rotate => match params.get("angle") {
                Some(Value::Number(_)) => Ok(()),
                _ => invalid("angle must be a number"),
            },
            OperationKind::Filter => Ok(()),
            OperationKind::Convert => match params.get("format").and_then(Value::as_str) {
                Some("png") | Some("jpeg") | Some("webp") => Ok(()),
                _ => invalid("format must be one of png, jpeg, webp"),
            },
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// État d'un job de lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,    // En attente dans la file
    Running,   // En cours d'exécution
    Completed, // Terminé avec succès
    Failed,    // Échec
    Aborted,   // Annulé
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Aborted)
    }

    /// Transitions autorisées : Queued → Running → {Completed, Failed},
    /// Aborted depuis Queued ou Running uniquement. Un job n'échoue
    /// jamais sans avoir démarré.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Aborted)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Aborted)
        )
    }
}

/// Contenu d'un fichier chargé en mémoire
#[derive(Debug, Clone)]
pub struct InputPayload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Référence opaque vers le fichier source
#[derive(Debug, Clone)]
pub enum InputRef {
    Path(PathBuf),
    Memory { name: String, bytes: Vec<u8> },
}

impl InputRef {
    pub fn name(&self) -> String {
        match self {
            InputRef::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            InputRef::Memory { name, .. } => name.clone(),
        }
    }

    /// Charge le fichier en mémoire
    pub async fn load(&self) -> AppResult<InputPayload> {
        match self {
            InputRef::Path(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    AppError::InvalidInput(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Ok(InputPayload {
                    file_name: self.name(),
                    bytes,
                })
            }
            InputRef::Memory { name, bytes } => Ok(InputPayload {
                file_name: name.clone(),
                bytes: bytes.clone(),
            }),
        }
    }
}

/// Tâche transmise à une stratégie d'exécution
#[derive(Debug, Clone)]
pub struct Task {
    pub operation: OperationKind,
    pub input: InputPayload,
    pub params: TaskParams,
}

impl Task {
    pub fn new(operation: OperationKind, input: InputPayload) -> Self {
        Self {
            operation,
            input,
            params: operation.default_params(),
        }
    }

    pub fn with_params(mut self, params: TaskParams) -> Self {
        self.params = params;
        self
    }

    pub fn input_size(&self) -> u64 {
        self.input.bytes.len() as u64
    }
}

/// Unité planifiable dans un lot
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub job_id: JobId,
    pub input_ref: InputRef,
    pub operation_kind: OperationKind,
    pub params: TaskParams,
    state: JobState,
}

impl BatchJob {
    /// Crée un job avec les paramètres par défaut de l'opération
    pub fn new(job_id: impl Into<JobId>, input_ref: InputRef, operation_kind: OperationKind) -> Self {
        Self {
            job_id: job_id.into(),
            input_ref,
            operation_kind,
            params: operation_kind.default_params(),
            state: JobState::Queued,
        }
    }

    pub fn with_params(mut self, params: TaskParams) -> Self {
        self.params = params;
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Réservé au planificateur, seul propriétaire des transitions
    pub(crate) fn transition(&mut self, next: JobState) -> AppResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "invalid transition {:?} -> {:?} for job {}",
                self.state, next, self.job_id
            )));
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_state_machine() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Queued.can_transition_to(JobState::Aborted));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Aborted));
        assert!(!JobState::Aborted.can_transition_to(JobState::Running));
        assert!(!JobState::Queued.can_transition_to(JobState::Completed));
        assert!(!JobState::Queued.can_transition_to(JobState::Failed));
        assert!(JobState::Aborted.is_terminal());
        assert!(!JobState::Running.is_terminal());

        let mut job = BatchJob::new("a", InputRef::Memory { name: "a.png".into(), bytes: vec![1] }, OperationKind::Rotate);
        assert_eq!(job.state(), JobState::Queued);
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Completed).unwrap();
        assert!(job.transition(JobState::Aborted).is_err());
    }

    #[test]
    fn test_default_params_are_valid() {
        for kind in [
            OperationKind::Compress,
            OperationKind::Resize,
            OperationKind::Crop,
            OperationKind::Rotate,
            OperationKind::Filter,
            OperationKind::Convert,
        ] {
            assert!(kind.validate_params(&kind.default_params()).is_ok(), "{}", kind);
        }
    }

    #[test]
    fn test_invalid_params() {
        let mut params = TaskParams::new();
        params.insert("quality".into(), json!(1.5));
        assert!(OperationKind::Compress.validate_params(&params).is_err());

        params.insert("quality".into(), json!("/ebook"));
        assert!(OperationKind::Compress.validate_params(&params).is_ok());

        let mut params = TaskParams::new();
        params.insert("format".into(), json!("bmp"));
        assert!(OperationKind::Convert.validate_params(&params).is_err());

        let mut params = TaskParams::new();
        params.insert("width".into(), json!(0));
        params.insert("height".into(), json!(10));
        assert!(OperationKind::Resize.validate_params(&params).is_err());
    }

    #[tokio::test]
    async fn test_input_ref_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.7 test").unwrap();

        let input = InputRef::Path(file.path().to_path_buf());
        let payload = input.load().await.unwrap();
        assert_eq!(payload.bytes, b"%PDF-1.7 test");

        let missing = InputRef::Path(PathBuf::from("/nonexistent/file.pdf"));
        let err = missing.load().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(missing.name(), "file.pdf");
    }
}
