// utils/helpers.rs
use crate::utils::error::{AppError, AppResult};
use chrono::Utc;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Générer un identifiant de job de lot (`batch_<millis>_<aléatoire>`)
pub fn generate_job_id() -> String {
    let random_part: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();

    format!("batch_{}_{}", Utc::now().timestamp_millis(), random_part)
}

/// Formatter une taille en octets lisible
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let base = 1024_f64;
    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.log10() / base.log10()).floor() as i32;
    let unit_index = exponent.clamp(0, 4) as usize;

    let size = bytes_f64 / base.powi(unit_index as i32);

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Ratio de réduction `(original - transformé) / original`, négatif si la sortie grossit
pub fn reduction_ratio(original_size: u64, transformed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    (original_size as f64 - transformed_size as f64) / original_size as f64
}

/// Nettoyer une chaîne pour un nom de fichier
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | ' ' => c,
            _ => '_',
        })
        .collect();

    if cleaned.trim().is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned
    }
}

/// Exécuter avec timeout
pub async fn with_timeout<F, T>(future: F, timeout: Duration) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| AppError::Timeout(format!("after {:?}", timeout)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_job_id_is_unique() {
        let a = generate_job_id();
        let b = generate_job_id();
        assert!(a.starts_with("batch_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_reduction_ratio() {
        assert!((reduction_ratio(1000, 250) - 0.75).abs() < f64::EPSILON);
        // Sortie plus grande que l'entrée : ratio négatif, non borné
        assert!((reduction_ratio(100, 150) + 0.5).abs() < f64::EPSILON);
        assert_eq!(reduction_ratio(0, 10), 0.0);
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512.00 B");
        assert_eq!(format_file_size(2048), "2.00 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("rapport final.pdf"), "rapport final.pdf");
        assert_eq!(sanitize_filename("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_filename(""), "upload.bin");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: AppResult<()> = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_millis(50),
        )
        .await;

        assert!(matches!(&result, Err(AppError::Timeout(msg)) if msg == "after 50ms"));
        assert_eq!(
            result.unwrap_err().to_string(),
            "Operation timed out: after 50ms"
        );
    }
}
