//! Logging, metrics export and optional span export.
//!
//! Logs always go to stderr through `tracing-subscriber`. With the
//! `prometheus` feature a scrape endpoint is started when
//! `telemetry.prometheus_addr` is set; with the `otel` feature spans are
//! shipped over OTLP when `telemetry.opentelemetry` is set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

#[cfg(feature = "otel")]
use std::sync::OnceLock;
#[cfg(feature = "otel")]
static TRACER_PROVIDER: OnceLock<opentelemetry_sdk::trace::SdkTracerProvider> = OnceLock::new();

type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Flushes exported spans when dropped.
///
/// Hold it in `main` until the agent has stopped.
#[must_use = "telemetry is flushed when the guard is dropped"]
#[derive(Debug)]
pub struct TelemetryGuard {
    _private: (),
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        shutdown();
    }
}

/// Install the global subscriber and exporters.
///
/// `RUST_LOG` overrides `telemetry.log_level` when set.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard, InitError> {
    let filter = log_filter(config)?;
    install_subscriber(config, filter)?;

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        use metrics_exporter_prometheus::PrometheusBuilder;

        PrometheusBuilder::new().with_http_listener(addr).install()?;
        crate::metrics::describe();
        tracing::info!(%addr, "Prometheus metrics exporter started");
    }

    #[cfg(not(feature = "prometheus"))]
    if let Some(addr) = config.prometheus_addr {
        tracing::warn!(%addr, "prometheus_addr set but the prometheus feature is disabled");
    }

    Ok(TelemetryGuard { _private: () })
}

fn log_filter(config: &TelemetryConfig) -> Result<EnvFilter, InitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.log_level)?),
    }
}

fn install_subscriber(config: &TelemetryConfig, filter: EnvFilter) -> Result<(), InitError> {
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    #[cfg(feature = "otel")]
    if let Some(otel) = &config.opentelemetry {
        use opentelemetry::trace::TracerProvider;

        let provider = otlp_provider(otel)?;
        let tracer = provider.tracer("etcd-autobind");
        let _ = TRACER_PROVIDER.set(provider);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt)
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
        tracing::info!(endpoint = %otel.endpoint, "OpenTelemetry tracing enabled");
        return Ok(());
    }

    #[cfg(not(feature = "otel"))]
    if config.opentelemetry.is_some() {
        eprintln!("telemetry.opentelemetry set but the otel feature is disabled");
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .try_init()?;
    Ok(())
}

#[cfg(feature = "otel")]
fn otlp_provider(
    otel: &crate::config::OpenTelemetryConfig,
) -> Result<opentelemetry_sdk::trace::SdkTracerProvider, InitError> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;
    use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otel.endpoint)
        .build()?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new(SERVICE_NAME, otel.service_name.clone()),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ])
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// Flush and stop the span exporter. A no-op without the `otel` feature.
pub fn shutdown() {
    #[cfg(feature = "otel")]
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "failed to shut down tracer provider");
        }
    }
}
