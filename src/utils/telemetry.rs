// utils/telemetry.rs
use crate::utils::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Configure le tracing pour le logging structuré
///
/// `log_level` fixe le niveau (info si illisible), `logging_format` choisit
/// entre `json` et un format compact lisible. Sans effet si un subscriber
/// global est déjà installé.
pub fn setup_tracing(config: &Config) {
    let log_level = config
        .log_level
        .parse()
        .unwrap_or(tracing::Level::INFO);

    let log_format = config.logging_format.as_str();

    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_level.into()),
        )
        .with(if log_format == "json" {
            Box::new(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(true),
            ) as Box<dyn tracing_subscriber::Layer<_> + Send + Sync>
        } else {
            Box::new(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_line_number(true)
                    .with_file(true),
            ) as Box<dyn tracing_subscriber::Layer<_> + Send + Sync>
        });

    if subscriber.try_init().is_err() {
        tracing::debug!("Subscriber déjà installé, configuration ignorée");
    }
}
