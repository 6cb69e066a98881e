// utils/error.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Catégorie d'erreur exposée aux appelants (et sérialisée dans les rapports)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Canal d'exécution pas dans un état permettant l'envoi
    NotReady,
    /// Échec réseau vers un backend distant
    Transport,
    /// Backend joignable mais réponse logique en échec
    RemoteRejected,
    /// Opération bornée ayant dépassé son délai
    Timeout,
    /// Annulation explicite
    Cancelled,
    /// Le contexte d'exécution lui-même est tombé
    ChannelFault,
    /// Entrée illisible, trop volumineuse ou paramètres invalides
    InvalidInput,
    /// Le contexte local a signalé un échec de transformation
    ProcessingFailed,
}

impl ErrorKind {
    /// Une nouvelle tentative a-t-elle des chances d'aboutir sans changer l'entrée ?
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotReady => "not-ready",
            ErrorKind::Transport => "transport",
            ErrorKind::RemoteRejected => "remote-rejected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ChannelFault => "channel-fault",
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::ProcessingFailed => "processing-failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
pub enum AppError {
    // Erreurs du canal d'exécution
    #[error("Channel not ready: {0}")]
    NotReady(String),

    #[error("Background context fault: {0}")]
    ChannelFault(String),

    #[error("Operation id already registered: {0}")]
    DuplicateOperation(Uuid),

    // Erreurs externes
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote service rejected the request: {0}")]
    RemoteRejected(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Erreurs de traitement
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    // Erreurs de données
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    // Erreurs système
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Catégorie de l'erreur dans la taxonomie exposée
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotReady(_) => ErrorKind::NotReady,
            AppError::ChannelFault(_) | AppError::Internal(_) => ErrorKind::ChannelFault,
            AppError::Transport(_) => ErrorKind::Transport,
            AppError::RemoteRejected(_) | AppError::ParseError(_) => ErrorKind::RemoteRejected,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::Cancelled(_) => ErrorKind::Cancelled,
            AppError::InvalidInput(_)
            | AppError::Validation(_)
            | AppError::Config(_)
            | AppError::SerializeError(_)
            | AppError::DuplicateOperation(_) => ErrorKind::InvalidInput,
            AppError::ProcessingFailed(_) => ErrorKind::ProcessingFailed,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else if err.is_decode() {
            AppError::ParseError(err.to_string())
        } else {
            AppError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializeError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

// Type de résultat standard
pub type AppResult<T> = std::result::Result<T, AppError>;
