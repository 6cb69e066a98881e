// models/system.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vérification de santé d'un backend distant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub service: String,
    pub status: String, // "healthy", "unhealthy"
    pub version: Option<String>,
    /// Moteur de compression disponible côté serveur
    pub engine_available: Option<bool>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }

    pub fn unhealthy(service: &str, error: impl Into<String>) -> Self {
        Self {
            service: service.to_string(),
            status: "unhealthy".to_string(),
            version: None,
            engine_available: None,
            response_time_ms: None,
            error: Some(error.into()),
            checked_at: Utc::now(),
        }
    }
}

/// Profil de compression proposé par un backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionProfile {
    pub name: String,
    pub description: Option<String>,
}
