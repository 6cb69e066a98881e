// services/external.rs
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{multipart, Client as HttpClient};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::strategy::ExecutionStrategy;
use crate::models::job::{InputPayload, OperationKind, Task, TaskParams};
use crate::models::result::{
    ExecutionResult, ProgressCallback, ProgressUpdate, RemoteBatchArchive, RemoteFileReport,
    TransformOutput,
};
use crate::models::system::{CompressionProfile, HealthStatus};
use crate::utils::config::BackendConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::helpers::{format_file_size, sanitize_filename, with_timeout};

/// Profils de qualité reconnus par les backends PDF
const QUALITY_PROFILES: [&str; 4] = ["screen", "ebook", "printer", "prepress"];

/// Réponse de la phase de soumission
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    success: bool,
    #[serde(default, alias = "resultId", alias = "download_id")]
    result_id: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default, alias = "compressed_size")]
    transformed_size: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchFileResponse {
    #[serde(default, alias = "original_filename")]
    file_name: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    compression_ratio: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Réponse de soumission d'un lot
#[derive(Debug, Deserialize)]
struct BatchSubmitResponse {
    success: bool,
    #[serde(default)]
    batch_id: Option<String>,
    #[serde(default, alias = "download_batch_url")]
    download_url: Option<String>,
    #[serde(default)]
    total_files: Option<usize>,
    #[serde(default, alias = "successful_compressions")]
    successful: Option<usize>,
    #[serde(default, alias = "failed_compressions")]
    failed: Option<usize>,
    #[serde(default, alias = "average_compression_ratio")]
    overall_compression_ratio: Option<f64>,
    #[serde(default)]
    individual_results: Vec<BatchFileResponse>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    ghostscript_available: Option<bool>,
    #[serde(default)]
    ghostscript_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfilesResponse {
    success: bool,
    #[serde(default)]
    profiles: serde_json::Map<String, Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Choisit le profil de qualité à partir des paramètres de la tâche
fn quality_profile(params: &TaskParams) -> AppResult<&'static str> {
    match params.get("profile").or_else(|| params.get("quality")) {
        None => Ok("screen"),
        Some(Value::String(name)) => {
            let name = name.trim_start_matches('/');
            QUALITY_PROFILES
                .iter()
                .find(|profile| **profile == name)
                .copied()
                .ok_or_else(|| AppError::InvalidInput(format!("unknown quality profile '{}'", name)))
        }
        // Qualité numérique (0.1 - 1.0) ramenée au profil le plus proche
        Some(Value::Number(n)) => match n.as_f64() {
            Some(q) if q < 0.4 => Ok("screen"),
            Some(q) if q < 0.7 => Ok("ebook"),
            Some(q) if q < 0.9 => Ok("printer"),
            Some(_) => Ok("prepress"),
            None => Err(AppError::InvalidInput("quality is not a finite number".to_string())),
        },
        Some(_) => Err(AppError::InvalidInput(
            "quality must be a profile name or a number".to_string(),
        )),
    }
}

/// Extrait un message d'erreur lisible d'un corps de réponse
fn remote_error(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string));

    match from_json {
        Some(message) => message,
        None => body.chars().take(200).collect(),
    }
}

fn report(on_progress: &Option<ProgressCallback>, percent: u8, message: &str) {
    if let Some(callback) = on_progress {
        callback(ProgressUpdate::new(percent, message));
    }
}

/// Transport HTTP commun aux adaptateurs
struct RemoteBackend {
    service: &'static str,
    http_client: Arc<HttpClient>,
    config: BackendConfig,
}

impl RemoteBackend {
    fn new(service: &'static str, config: BackendConfig) -> AppResult<Self> {
        // Pas de timeout global : chaque phase a son propre budget
        let http_client = HttpClient::builder()
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            service,
            http_client: Arc::new(http_client),
            config,
        })
    }

    fn check_size(&self, task: &Task) -> AppResult<()> {
        let size = task.input_size();
        if size > self.config.max_upload_bytes {
            return Err(AppError::InvalidInput(format!(
                "{} exceeds the {} limit of {}",
                format_file_size(size),
                self.service,
                format_file_size(self.config.max_upload_bytes)
            )));
        }
        Ok(())
    }

    /// Phase 1 : envoi multipart et validation de la réponse
    async fn submit(&self, task: &Task, fields: &[(&'static str, String)]) -> AppResult<SubmitResponse> {
        let part = multipart::Part::bytes(task.input.bytes.clone())
            .file_name(sanitize_filename(&task.input.file_name));
        let mut form = multipart::Form::new().part("file", part);
        for (name, value) in fields {
            form = form.text(*name, value.clone());
        }

        let parsed: SubmitResponse = self.post_form(&self.config.submit_path, form).await?;

        if !parsed.success {
            return Err(AppError::RemoteRejected(
                parsed
                    .error
                    .unwrap_or_else(|| "remote service reported failure".to_string()),
            ));
        }

        Ok(parsed)
    }

    /// Envoi multipart ; statut non 2xx ou corps illisible → rejet distant
    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: multipart::Form,
    ) -> AppResult<T> {
        let url = self.config.url(path);
        debug!("📤 Soumission à {}", url);

        let response = self.http_client.post(&url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AppError::RemoteRejected(format!(
                "HTTP {}: {}",
                status.as_u16(),
                remote_error(&body)
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| AppError::RemoteRejected(format!("malformed response: {}", e)))
    }

    /// URL absolue ou relative au backend
    fn resolve_url(&self, download_url: &str) -> String {
        if download_url.starts_with("http://") || download_url.starts_with("https://") {
            download_url.to_string()
        } else {
            self.config.url(download_url)
        }
    }

    /// URL de la phase 2 : `download_url` fourni, sinon gabarit par identifiant
    fn result_url(&self, response: &SubmitResponse) -> AppResult<String> {
        if let Some(download_url) = &response.download_url {
            return Ok(self.resolve_url(download_url));
        }

        match &response.result_id {
            Some(id) => {
                let path = self
                    .config
                    .result_path
                    .replace("{id}", &urlencoding::encode(id));
                Ok(self.config.url(&path))
            }
            None => Err(AppError::RemoteRejected(
                "response carries neither result id nor download url".to_string(),
            )),
        }
    }

    /// Phase 2 : récupération des octets transformés
    async fn download(&self, url: &str) -> AppResult<Vec<u8>> {
        debug!("📥 Téléchargement depuis {}", url);
        let response = self.http_client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(AppError::RemoteRejected(format!(
                "download failed: HTTP {}",
                status.as_u16()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn two_phase(
        &self,
        task: Task,
        fields: Vec<(&'static str, String)>,
        on_progress: Option<ProgressCallback>,
    ) -> AppResult<TransformOutput> {
        self.check_size(&task)?;
        let original_size = task.input_size();

        report(&on_progress, 10, "Uploading...");
        let response = with_timeout(self.submit(&task, &fields), self.config.submit_timeout).await?;

        report(&on_progress, 60, "Downloading result...");
        let url = self.result_url(&response)?;
        let bytes = with_timeout(self.download(&url), self.config.download_timeout).await?;

        if let Some(announced) = response.transformed_size {
            if announced != bytes.len() as u64 {
                debug!(
                    "Taille annoncée {} différente de la taille reçue {}",
                    announced,
                    bytes.len()
                );
            }
        }

        report(&on_progress, 95, "Finalizing...");
        Ok(TransformOutput::new(bytes, original_size))
    }

    /// Exécution complète ; l'annulation abandonne la requête en vol sans prévenir le serveur
    #[instrument(skip_all, fields(service = self.service, file_name = %task.input.file_name))]
    async fn run(
        &self,
        task: Task,
        fields: Vec<(&'static str, String)>,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();

        let outcome = tokio::select! {
            outcome = self.two_phase(task, fields, on_progress) => outcome,
            _ = cancel.cancelled() => Err(AppError::Cancelled(
                "stopped waiting for remote service".to_string(),
            )),
        };

        match &outcome {
            Ok(output) => info!(
                "✅ {} : {} -> {} ({:.1}% de réduction) en {:?}",
                self.service,
                format_file_size(output.original_size),
                format_file_size(output.transformed_size),
                output.ratio() * 100.0,
                started.elapsed()
            ),
            Err(e) => warn!("❌ {} : {} ({})", self.service, e, e.kind()),
        }

        outcome.into()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let url = self.config.url(path);
        let request = async {
            let response = self
                .http_client
                .get(&url)
                .header("Accept", "application/json")
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AppError::RemoteRejected(format!("HTTP {}", status.as_u16())));
            }
            Ok::<T, AppError>(response.json::<T>().await?)
        };

        with_timeout(request, self.config.health_timeout).await
    }

    async fn health(&self) -> HealthStatus {
        let started = Instant::now();

        match self.get_json::<HealthResponse>("/health").await {
            Ok(body) => HealthStatus {
                service: self.service.to_string(),
                status: body.status.unwrap_or_else(|| "healthy".to_string()),
                version: body.version.or(body.ghostscript_version),
                engine_available: body.ghostscript_available,
                response_time_ms: Some(started.elapsed().as_millis() as u64),
                error: None,
                checked_at: Utc::now(),
            },
            Err(e) => {
                warn!("⚠️  Health check {} en échec: {}", self.service, e);
                HealthStatus::unhealthy(self.service, e.to_string())
            }
        }
    }
}

/// Seules les compressions passent par les backends distants
fn ensure_compress(task: &Task, service: &str) -> AppResult<()> {
    if task.operation != OperationKind::Compress {
        return Err(AppError::InvalidInput(format!(
            "{} does not support operation '{}'",
            service, task.operation
        )));
    }
    Ok(())
}

/// Client du service de compression principal
pub struct PrimaryCompressionClient {
    backend: RemoteBackend,
}

impl PrimaryCompressionClient {
    pub fn new(config: BackendConfig) -> AppResult<Self> {
        Ok(Self {
            backend: RemoteBackend::new("primary", config)?,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.backend.config
    }

    /// Vérifier l'état du service (jamais en erreur, `unhealthy` le cas échéant)
    pub async fn health(&self) -> HealthStatus {
        self.backend.health().await
    }

    fn form_fields(&self, task: &Task) -> AppResult<Vec<(&'static str, String)>> {
        ensure_compress(task, self.backend.service)?;
        Ok(vec![("quality", quality_profile(&task.params)?.to_string())])
    }
}

#[async_trait]
impl ExecutionStrategy for PrimaryCompressionClient {
    fn name(&self) -> &str {
        self.backend.service
    }

    async fn execute(
        &self,
        task: Task,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        match self.form_fields(&task) {
            Ok(fields) => self.backend.run(task, fields, on_progress, cancel).await,
            Err(e) => Err::<TransformOutput, _>(e).into(),
        }
    }
}

/// Client du service secondaire à profils (`/screen`, `/ebook`, ...)
pub struct ProfileCompressionClient {
    backend: RemoteBackend,
}

impl ProfileCompressionClient {
    pub fn new(config: BackendConfig) -> AppResult<Self> {
        Ok(Self {
            backend: RemoteBackend::new("secondary", config)?,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.backend.config
    }

    pub async fn health(&self) -> HealthStatus {
        self.backend.health().await
    }

    /// Profils proposés par le service, triés par nom
    pub async fn profiles(&self) -> AppResult<Vec<CompressionProfile>> {
        let response: ProfilesResponse = self.backend.get_json("/profiles").await?;

        if !response.success {
            return Err(AppError::RemoteRejected(
                response
                    .error
                    .unwrap_or_else(|| "failed to get profiles".to_string()),
            ));
        }

        let mut profiles: Vec<CompressionProfile> = response
            .profiles
            .into_iter()
            .map(|(name, details)| {
                let description = match &details {
                    Value::String(text) => Some(text.clone()),
                    other => other
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                };
                CompressionProfile { name, description }
            })
            .collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(profiles)
    }

    fn form_fields(&self, task: &Task) -> AppResult<Vec<(&'static str, String)>> {
        ensure_compress(task, self.backend.service)?;
        Ok(vec![("quality", format!("/{}", quality_profile(&task.params)?))])
    }

    /// Compresse plusieurs fichiers en un seul appel et récupère l'archive ZIP.
    ///
    /// La soumission dispose du double du budget habituel, le téléchargement
    /// de l'archive de son propre délai. Les erreurs sont normalisées comme
    /// pour un fichier seul ; l'annulation abandonne l'attente.
    #[instrument(skip_all, fields(service = self.backend.service, files = files.len()))]
    pub async fn execute_batch(
        &self,
        files: Vec<InputPayload>,
        params: &TaskParams,
        cancel: CancellationToken,
    ) -> AppResult<RemoteBatchArchive> {
        let started = Instant::now();

        let outcome = tokio::select! {
            outcome = self.batch_two_phase(files, params) => outcome,
            _ = cancel.cancelled() => Err(AppError::Cancelled(
                "stopped waiting for remote batch".to_string(),
            )),
        };

        match &outcome {
            Ok(archive) => info!(
                "📦 {} : lot de {} fichiers ({} réussis, {} échoués), archive de {} en {:?}",
                self.backend.service,
                archive.total_files,
                archive.successful,
                archive.failed,
                format_file_size(archive.archive.len() as u64),
                started.elapsed()
            ),
            Err(e) => warn!("❌ {} : lot en échec: {} ({})", self.backend.service, e, e.kind()),
        }

        outcome
    }

    async fn batch_two_phase(
        &self,
        files: Vec<InputPayload>,
        params: &TaskParams,
    ) -> AppResult<RemoteBatchArchive> {
        let config = &self.backend.config;
        if files.is_empty() {
            return Err(AppError::InvalidInput("no files provided".to_string()));
        }

        let original_size: u64 = files.iter().map(|f| f.bytes.len() as u64).sum();
        if original_size > config.max_upload_bytes {
            return Err(AppError::InvalidInput(format!(
                "batch of {} exceeds the {} limit of {}",
                format_file_size(original_size),
                self.backend.service,
                format_file_size(config.max_upload_bytes)
            )));
        }

        let quality = format!("/{}", quality_profile(params)?);
        let mut form = multipart::Form::new().text("quality", quality);
        for file in &files {
            let part = multipart::Part::bytes(file.bytes.clone())
                .file_name(sanitize_filename(&file.file_name));
            form = form.part("files[]", part);
        }

        let submit = async {
            let response: BatchSubmitResponse =
                self.backend.post_form(&config.batch_path, form).await?;
            if !response.success {
                return Err(AppError::RemoteRejected(
                    response
                        .error
                        .unwrap_or_else(|| "batch compression failed".to_string()),
                ));
            }
            Ok::<BatchSubmitResponse, AppError>(response)
        };
        let response = with_timeout(submit, config.submit_timeout * 2).await?;

        let url = match &response.download_url {
            Some(download_url) => self.backend.resolve_url(download_url),
            None => {
                return Err(AppError::RemoteRejected(
                    "batch response carries no download url".to_string(),
                ))
            }
        };
        let archive = with_timeout(self.backend.download(&url), config.batch_download_timeout).await?;

        let files_report: Vec<RemoteFileReport> = response
            .individual_results
            .into_iter()
            .map(|f| RemoteFileReport {
                file_name: f.file_name,
                success: f.success,
                compression_ratio: f.compression_ratio,
                error: f.error,
            })
            .collect();
        let successful = response
            .successful
            .unwrap_or_else(|| files_report.iter().filter(|f| f.success).count());

        Ok(RemoteBatchArchive {
            archive,
            batch_id: response.batch_id,
            original_size,
            total_files: response.total_files.unwrap_or(files.len()),
            successful,
            failed: response.failed.unwrap_or(files.len().saturating_sub(successful)),
            overall_compression_ratio: response.overall_compression_ratio,
            files: files_report,
        })
    }
}

#[async_trait]
impl ExecutionStrategy for ProfileCompressionClient {
    fn name(&self) -> &str {
        self.backend.service
    }

    async fn execute(
        &self,
        task: Task,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        match self.form_fields(&task) {
            Ok(fields) => self.backend.run(task, fields, on_progress, cancel).await,
            Err(e) => Err::<TransformOutput, _>(e).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::InputPayload;
    use crate::utils::error::ErrorKind;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pdf_task(bytes: &[u8]) -> Task {
        Task::new(
            OperationKind::Compress,
            InputPayload {
                file_name: "report.pdf".to_string(),
                bytes: bytes.to_vec(),
            },
        )
    }

    fn primary(server: &MockServer) -> PrimaryCompressionClient {
        PrimaryCompressionClient::new(BackendConfig::primary(server.uri())).unwrap()
    }

    async fn run(strategy: &dyn ExecutionStrategy, task: Task) -> ExecutionResult {
        strategy.execute(task, None, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_primary_two_phase_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(body_string_contains("printer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "resultId": "abc 1",
                "ratio": 0.6,
                "original_size": 10,
                "compressed_size": 4
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/result/abc%201"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3, 4]))
            .expect(1)
            .mount(&server)
            .await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |update: ProgressUpdate| {
            sink.lock().unwrap().push(update.percent);
        });

        let client = primary(&server);
        let result = client
            .execute(pdf_task(&[0; 10]), Some(callback), CancellationToken::new())
            .await;

        let output = result.output().expect("success");
        assert_eq!(output.output, vec![1, 2, 3, 4]);
        assert_eq!(output.original_size, 10);
        assert_eq!(output.transformed_size, 4);
        assert!((result.ratio().unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(*seen.lock().unwrap(), vec![10, 60, 95]);
    }

    #[tokio::test]
    async fn test_success_false_is_remote_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "Only PDF files are allowed"
            })))
            .mount(&server)
            .await;

        let result = run(&primary(&server), pdf_task(b"not a pdf")).await;
        let failure = result.error().unwrap();
        assert_eq!(failure.kind, ErrorKind::RemoteRejected);
        assert!(failure.message.contains("Only PDF files are allowed"));
    }

    #[tokio::test]
    async fn test_http_error_and_malformed_body_are_remote_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "success": false, "error": "gs crashed" })),
            )
            .mount(&server)
            .await;

        let result = run(&primary(&server), pdf_task(b"%PDF")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RemoteRejected));
        assert!(result.error().unwrap().message.contains("gs crashed"));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
            .mount(&server)
            .await;

        let result = run(&primary(&server), pdf_task(b"%PDF")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RemoteRejected));
    }

    #[tokio::test]
    async fn test_download_failure_is_remote_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "resultId": "gone"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/result/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = run(&primary(&server), pdf_task(b"%PDF")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RemoteRejected));
    }

    #[tokio::test]
    async fn test_unresponsive_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "resultId": "x" }))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let mut config = BackendConfig::primary(server.uri());
        config.submit_timeout = Duration::from_millis(100);
        let client = PrimaryCompressionClient::new(config).unwrap();

        let started = Instant::now();
        let result = run(&client, pdf_task(b"%PDF")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport() {
        let client = PrimaryCompressionClient::new(BackendConfig::primary("http://127.0.0.1:1")).unwrap();
        let result = run(&client, pdf_task(b"%PDF")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Transport));
        assert!(result.error_kind().unwrap().is_retryable());
    }

    #[tokio::test]
    async fn test_oversized_input_is_rejected_before_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = BackendConfig::primary(server.uri());
        config.max_upload_bytes = 4;
        let client = PrimaryCompressionClient::new(config).unwrap();

        let result = run(&client, pdf_task(&[0; 10])).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_unsupported_operation_and_profile() {
        let server = MockServer::start().await;
        let client = primary(&server);

        let rotate = Task::new(
            OperationKind::Rotate,
            InputPayload {
                file_name: "a.png".into(),
                bytes: vec![1],
            },
        );
        assert_eq!(run(&client, rotate).await.error_kind(), Some(ErrorKind::InvalidInput));

        let mut params = TaskParams::new();
        params.insert("quality".into(), json!("/ultra"));
        let task = pdf_task(b"%PDF").with_params(params);
        assert_eq!(run(&client, task).await.error_kind(), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let client = primary(&server);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = client.execute(pdf_task(b"%PDF"), None, cancel).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_secondary_uses_profile_and_download_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/compress"))
            .and(body_string_contains("/ebook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "download_id": "d-42",
                "download_url": "/download/d-42",
                "compressed_size": 2
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/d-42"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7, 7]))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProfileCompressionClient::new(BackendConfig::secondary(server.uri())).unwrap();
        let mut params = TaskParams::new();
        params.insert("quality".into(), json!("/ebook"));

        let result = run(&client, pdf_task(b"%PDF-1.4").with_params(params)).await;
        assert_eq!(result.output().unwrap().output, vec![7, 7]);
        assert_eq!(client.name(), "secondary");
    }

    #[tokio::test]
    async fn test_health_and_profiles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "healthy",
                "version": "2.0",
                "ghostscript_available": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "profiles": {
                    "screen": { "description": "72 dpi" },
                    "ebook": { "description": "150 dpi" }
                }
            })))
            .mount(&server)
            .await;

        let client = ProfileCompressionClient::new(BackendConfig::secondary(server.uri())).unwrap();
        let health = client.health().await;
        assert!(health.is_healthy());
        assert_eq!(health.version.as_deref(), Some("2.0"));
        assert_eq!(health.engine_available, Some(true));

        let profiles = client.profiles().await.unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name, "ebook");
        assert_eq!(profiles[0].description.as_deref(), Some("150 dpi"));

        let down = PrimaryCompressionClient::new(BackendConfig::primary("http://127.0.0.1:1")).unwrap();
        let health = down.health().await;
        assert!(!health.is_healthy());
        assert!(health.error.is_some());
    }

    #[tokio::test]
    async fn test_relative_download_url_without_slash() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/compress"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "download_url": "download/rel-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/rel-1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5]))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProfileCompressionClient::new(BackendConfig::secondary(server.uri())).unwrap();
        let result = run(&client, pdf_task(b"%PDF")).await;
        assert_eq!(result.output().unwrap().output, vec![5]);
    }

    fn pdf(name: &str, bytes: &[u8]) -> InputPayload {
        InputPayload {
            file_name: name.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_batch_submit_then_zip_download() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/compress-batch"))
            .and(body_string_contains("files[]"))
            .and(body_string_contains("/ebook"))
            .and(body_string_contains("b.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "batch_id": "batch-7",
                "total_files": 2,
                "successful_compressions": 1,
                "failed_compressions": 1,
                "overall_compression_ratio": 42.5,
                "individual_results": [
                    { "original_filename": "a.pdf", "success": true, "compression_ratio": 42.5 },
                    { "original_filename": "b.pdf", "success": false, "error": "encrypted" }
                ],
                "download_batch_url": "/download-batch/batch-7"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download-batch/batch-7"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProfileCompressionClient::new(BackendConfig::secondary(server.uri())).unwrap();
        let mut params = TaskParams::new();
        params.insert("quality".into(), json!(0.5));

        let archive = client
            .execute_batch(
                vec![pdf("a.pdf", b"%PDF-a"), pdf("b.pdf", b"%PDF-bb")],
                &params,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(archive.archive, b"PK\x03\x04".to_vec());
        assert_eq!(archive.batch_id.as_deref(), Some("batch-7"));
        assert_eq!(archive.original_size, 13);
        assert_eq!((archive.total_files, archive.successful, archive.failed), (2, 1, 1));
        assert_eq!(archive.overall_compression_ratio, Some(42.5));
        assert_eq!(archive.files[1].error.as_deref(), Some("encrypted"));
    }

    #[tokio::test]
    async fn test_batch_failures_are_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/compress-batch"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "error": "No valid PDF files found"
            })))
            .mount(&server)
            .await;

        let client = ProfileCompressionClient::new(BackendConfig::secondary(server.uri())).unwrap();
        let err = client
            .execute_batch(vec![pdf("a.txt", b"hello")], &TaskParams::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteRejected);
        assert!(err.to_string().contains("No valid PDF files found"));

        let err = client
            .execute_batch(vec![], &TaskParams::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_batch_archive_download_has_its_own_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/compress-batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "download_url": "/download-batch/slow"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download-batch/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0])
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let mut config = BackendConfig::secondary(server.uri());
        config.batch_download_timeout = Duration::from_millis(100);
        let client = ProfileCompressionClient::new(config).unwrap();

        let started = Instant::now();
        let err = client
            .execute_batch(vec![pdf("a.pdf", b"%PDF")], &TaskParams::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected_before_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = BackendConfig::secondary(server.uri());
        config.max_upload_bytes = 8;
        let client = ProfileCompressionClient::new(config).unwrap();

        let err = client
            .execute_batch(
                vec![pdf("a.pdf", &[0; 5]), pdf("b.pdf", &[0; 5])],
                &TaskParams::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_quality_profile_mapping() {
        let mut params = TaskParams::new();
        assert_eq!(quality_profile(&params).unwrap(), "screen");
        params.insert("quality".into(), json!(0.8));
        assert_eq!(quality_profile(&params).unwrap(), "printer");
        params.insert("quality".into(), json!("prepress"));
        assert_eq!(quality_profile(&params).unwrap(), "prepress");
        params.insert("profile".into(), json!("/ebook"));
        assert_eq!(quality_profile(&params).unwrap(), "ebook");
    }
}
