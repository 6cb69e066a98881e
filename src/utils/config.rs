// utils/config.rs
use crate::utils::error::{AppError, AppResult};
use dotenv::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration d'un backend de compression distant
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    /// Chemin de soumission (phase 1)
    pub submit_path: String,
    /// Gabarit du chemin de récupération (phase 2), `{id}` est remplacé
    pub result_path: String,
    /// Chemin de soumission d'un lot de fichiers (archive ZIP en retour)
    pub batch_path: String,
    pub health_timeout: Duration,
    pub submit_timeout: Duration,
    pub download_timeout: Duration,
    pub batch_download_timeout: Duration,
    pub max_upload_bytes: u64,
}

impl BackendConfig {
    /// Backend principal (soumission puis téléchargement par identifiant)
    pub fn primary(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            submit_path: "/submit".to_string(),
            result_path: "/result/{id}".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
            ..Self::timeouts_only()
        }
    }

    /// Backend secondaire à profils (l'URL de téléchargement est fournie par la réponse)
    pub fn secondary(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            submit_path: "/compress".to_string(),
            result_path: "/download/{id}".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            ..Self::timeouts_only()
        }
    }

    fn timeouts_only() -> Self {
        Self {
            base_url: String::new(),
            submit_path: String::new(),
            result_path: String::new(),
            batch_path: "/compress-batch".to_string(),
            health_timeout: Duration::from_secs(5),
            submit_timeout: Duration::from_secs(300),
            download_timeout: Duration::from_secs(30),
            batch_download_timeout: Duration::from_secs(60),
            max_upload_bytes: 0,
        }
    }

    /// URL absolue pour un chemin relatif au backend, avec ou sans `/` initial
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn from_env(prefix: &str, mut defaults: Self) -> AppResult<Self> {
        if let Ok(url) = env::var(format!("{}_API_URL", prefix)) {
            defaults.base_url = url;
        }
        if let Ok(path) = env::var(format!("{}_SUBMIT_PATH", prefix)) {
            defaults.submit_path = path;
        }
        if let Ok(path) = env::var(format!("{}_RESULT_PATH", prefix)) {
            defaults.result_path = path;
        }
        if let Ok(path) = env::var(format!("{}_BATCH_PATH", prefix)) {
            defaults.batch_path = path;
        }

        defaults.health_timeout = Duration::from_millis(parse_var(
            &format!("{}_HEALTH_TIMEOUT_MS", prefix),
            defaults.health_timeout.as_millis() as u64,
        )?);
        defaults.submit_timeout = Duration::from_millis(parse_var(
            &format!("{}_SUBMIT_TIMEOUT_MS", prefix),
            defaults.submit_timeout.as_millis() as u64,
        )?);
        defaults.download_timeout = Duration::from_millis(parse_var(
            &format!("{}_DOWNLOAD_TIMEOUT_MS", prefix),
            defaults.download_timeout.as_millis() as u64,
        )?);
        defaults.batch_download_timeout = Duration::from_millis(parse_var(
            &format!("{}_BATCH_DOWNLOAD_TIMEOUT_MS", prefix),
            defaults.batch_download_timeout.as_millis() as u64,
        )?);
        let max_upload_mb: u64 = parse_var(
            &format!("{}_MAX_UPLOAD_MB", prefix),
            defaults.max_upload_bytes / (1024 * 1024),
        )?;
        defaults.max_upload_bytes = max_upload_mb * 1024 * 1024;

        Ok(defaults)
    }
}

/// Configuration du planificateur de lots
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Plafond de concurrence K
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent: 3 }
    }
}

/// Configuration du contexte d'exécution en arrière-plan
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Nombre de tâches traitées simultanément dans le contexte
    pub max_parallel_tasks: usize,
    /// Délai d'attente du signal `ready`
    pub ready_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 2,
            ready_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub primary: BackendConfig,
    pub secondary: BackendConfig,

    // Monitoring
    pub log_level: String,
    pub logging_format: String,
}

impl Config {
    /// Charger la configuration depuis les variables d'environnement
    pub fn from_env() -> AppResult<Self> {
        // Charger le fichier .env si présent
        let _ = dotenv().ok();

        let max_concurrent: usize = parse_var("PROCESSING_MAX_CONCURRENT", 3)?;
        if max_concurrent == 0 {
            return Err(AppError::Config(
                "PROCESSING_MAX_CONCURRENT must be at least 1".to_string(),
            ));
        }

        let max_parallel_tasks: usize = parse_var("WORKER_MAX_PARALLEL_TASKS", 2)?;
        if max_parallel_tasks == 0 {
            return Err(AppError::Config(
                "WORKER_MAX_PARALLEL_TASKS must be at least 1".to_string(),
            ));
        }

        let config = Config {
            scheduler: SchedulerConfig { max_concurrent },
            worker: WorkerConfig {
                max_parallel_tasks,
                ready_timeout: Duration::from_millis(parse_var("WORKER_READY_TIMEOUT_MS", 5000)?),
            },
            primary: BackendConfig::from_env(
                "PRIMARY",
                BackendConfig::primary("http://localhost:5000"),
            )?,
            secondary: BackendConfig::from_env(
                "SECONDARY",
                BackendConfig::secondary("http://localhost:8000"),
            )?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            logging_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(config)
    }
}

/// Lire une variable d'environnement numérique avec valeur par défaut
fn parse_var<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a number", key))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_defaults() {
        let primary = BackendConfig::primary("http://api.local/");
        assert_eq!(primary.submit_path, "/submit");
        assert_eq!(primary.url("/health"), "http://api.local/health");
        assert_eq!(primary.url("download/x"), "http://api.local/download/x");
        assert_eq!(primary.max_upload_bytes, 50 * 1024 * 1024);
        assert!(primary.health_timeout < primary.download_timeout);
        assert!(primary.download_timeout < primary.submit_timeout);

        let secondary = BackendConfig::secondary("http://oracle.local");
        assert_eq!(secondary.submit_path, "/compress");
        assert_eq!(secondary.max_upload_bytes, 100 * 1024 * 1024);
        assert_eq!(secondary.batch_path, "/compress-batch");
        assert_eq!(secondary.batch_download_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_from_env_defaults() {
        let config = Config::from_env().unwrap();
        assert!(config.scheduler.max_concurrent >= 1);
        assert!(config.worker.max_parallel_tasks >= 1);
        assert!(config.primary.result_path.contains("{id}"));
        assert!(config.secondary.max_upload_bytes >= config.primary.max_upload_bytes);
    }

    #[test]
    fn test_parse_var() {
        env::set_var("FPC_TEST_PARSE_OK", "7");
        env::set_var("FPC_TEST_PARSE_BAD", "seven");

        assert_eq!(parse_var::<usize>("FPC_TEST_PARSE_OK", 1).unwrap(), 7);
        assert_eq!(parse_var::<usize>("FPC_TEST_PARSE_MISSING", 3).unwrap(), 3);
        assert!(matches!(
            parse_var::<usize>("FPC_TEST_PARSE_BAD", 1),
            Err(AppError::Config(_))
        ));
    }
}
