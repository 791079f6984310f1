//! Telemetry logic.
//! Support logging and metrics.

use metrics::Unit;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Telemetry;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_FILTER: &str = "info";

fn ressources() -> Resource {
    Resource::builder().with_service_name("ispyb-auth").build()
}

/// Create OLTP exporter for logs.
pub fn setup_logging(
    endpoint: &str,
) -> Result<
    (
        OpenTelemetryTracingBridge<SdkLoggerProvider, SdkLogger>,
        SdkLoggerProvider,
    ),
    BoxError,
> {
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider: SdkLoggerProvider = SdkLoggerProvider::builder()
        .with_resource(ressources())
        .with_batch_exporter(exporter)
        .build();

    Ok((OpenTelemetryTracingBridge::new(&provider), provider))
}

/// Describe every metric recorded by the backends.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "auth_attempts_total",
        Unit::Count,
        "Authentication attempts by backend and outcome."
    );
    metrics::describe_histogram!(
        "auth_duration_seconds",
        Unit::Seconds,
        "Duration of one authentication attempt."
    );
}

/// Install the global `tracing` subscriber.
///
/// Returns the logger provider when logs are exported, so that the caller
/// can flush it on exit.
pub fn init(config: Option<&Telemetry>) -> Result<Option<SdkLoggerProvider>, BoxError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    describe_metrics();

    match config.and_then(|c| c.otlp_endpoint.as_deref()) {
        Some(endpoint) => {
            let (bridge, provider) = setup_logging(endpoint)?;
            registry.with(bridge).try_init()?;
            tracing::debug!(%endpoint, "exporting logs over OTLP");
            Ok(Some(provider))
        },
        None => {
            registry.try_init()?;
            Ok(None)
        },
    }
}
