//! saga-tap: subscribes to the bus and logs every saga message it sees.

use std::process::ExitCode;
use std::sync::Arc;

use broker::AmqpConnector;
use common::format_error;
use runtime::{Config, ServiceRuntime, TapHandler, shutdown_signal, telemetry};
use tracing::Instrument;

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // 2. Initialize tracing and metrics
    if let Err(e) = telemetry::init(&config) {
        eprintln!("failed to initialize telemetry: {e}");
        return ExitCode::FAILURE;
    }

    let span = tracing::info_span!("service", service = %config.service_id());
    async move {
        // 3. Connect, subscribe, and run until SIGINT/SIGTERM
        let started = ServiceRuntime::builder(
            config.service_id(),
            Arc::new(AmqpConnector::new(config.rabbitmq_url.clone())),
        )
        .retry(config.retry_policy())
        .handler(Arc::new(TapHandler::new()))
        .start()
        .await;

        let runtime = match started {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %format_error(&e), "failed to start service");
                return ExitCode::FAILURE;
            }
        };

        match runtime.run_until(shutdown_signal()).await {
            Ok(()) => tracing::info!("service shut down gracefully"),
            Err(e) => tracing::warn!(
                error = %format_error(&e),
                "service shut down with close errors"
            ),
        }
        ExitCode::SUCCESS
    }
    .instrument(span)
    .await
}
