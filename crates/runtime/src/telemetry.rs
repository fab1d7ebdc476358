//! Log and metrics setup for a service process.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};
use crate::{Result, RuntimeError};

/// Installs the global tracing subscriber and, when `METRICS_ADDR` is set,
/// the Prometheus recorder with its own HTTP listener.
///
/// Must be called once, from within a tokio runtime.
pub fn init(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| RuntimeError::Telemetry(format!("invalid log filter: {e}")))?;

    let (json, pretty) = match config.log_format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            ),
            None,
        ),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer().pretty())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .try_init()
        .map_err(|e| RuntimeError::Telemetry(e.to_string()))?;

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| RuntimeError::Telemetry(e.to_string()))?;
        tracing::info!(%addr, "prometheus exporter listening");
    }

    Ok(())
}
