use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::constants::{DEFAULT_LOG_FILTER, TRACER_NAME};
use crate::util::env::Config;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

/// Console logging, plus OTLP export of traces, logs and metrics when a collector endpoint is
/// configured
#[derive(Debug)]
pub struct Telemetry {
    pub service_name: String,
    exporters: Option<Exporters>,
}

#[derive(Debug)]
struct Exporters {
    collector_url: String,
    logger_provider: SdkLoggerProvider,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    pub fn new(config: &Config) -> Result<Telemetry> {
        let exporters = match config.otel_exporter_otlp_endpoint.as_deref() {
            Some(collector_url) => {
                let resource = base_attrs(&config.service_name, env!("CARGO_PKG_VERSION"));
                Some(Exporters::build(collector_url, resource)?)
            }
            None => None,
        };

        Ok(Self {
            service_name: config.service_name.clone(),
            exporters,
        })
    }

    pub fn register(self) -> Self {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        let (trace_layer, log_layer, meter_layer) = match &self.exporters {
            Some(exporters) => {
                global::set_tracer_provider(exporters.tracer_provider.clone());
                let tracer = global::tracer(TRACER_NAME);

                (
                    Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                    Some(OpenTelemetryTracingBridge::new(&exporters.logger_provider)),
                    Some(tracing_opentelemetry::MetricsLayer::new(
                        exporters.meter_provider.clone(),
                    )),
                )
            }
            None => (None, None, None),
        };

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(log_layer)
            .with(meter_layer)
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        match &self.exporters {
            Some(exporters) => tracing::info!(
                service_name = self.service_name,
                collector_url = exporters.collector_url,
                "telemetry export enabled"
            ),
            None => tracing::debug!("no collector configured, logging to console only"),
        }

        self
    }

    pub fn shutdown(self) {
        let Some(exporters) = self.exporters else {
            return;
        };

        if let Err(e) = exporters.meter_provider.shutdown() {
            eprintln!("error during metering shutdown: {e:?}");
        }

        if let Err(e) = exporters.logger_provider.shutdown() {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Err(e) = exporters.tracer_provider.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

impl Exporters {
    fn build(collector_url: &str, resource: Resource) -> Result<Self> {
        let timeout = Duration::from_secs(5);

        let log_exporter = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(Endpoint::Logs.to_url(collector_url))
            .with_timeout(timeout)
            .build()?;

        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(Endpoint::Traces.to_url(collector_url))
            .with_timeout(timeout)
            .build()?;

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_protocol(Protocol::Grpc)
            .with_endpoint(Endpoint::Metrics.to_url(collector_url))
            .with_timeout(timeout)
            .build()?;

        Ok(Self {
            collector_url: collector_url.to_string(),
            logger_provider: SdkLoggerProvider::builder()
                .with_batch_exporter(log_exporter)
                .with_resource(resource.clone())
                .build(),
            tracer_provider: SdkTracerProvider::builder()
                .with_batch_exporter(span_exporter)
                .with_resource(resource.clone())
                .build(),
            meter_provider: SdkMeterProvider::builder()
                .with_periodic_exporter(metric_exporter)
                .with_resource(resource)
                .build(),
        })
    }
}

fn base_attrs(name: &str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name.to_string()),
            KeyValue::new("service.version", version),
        ])
        .build()
}

enum Endpoint {
    Logs,
    Traces,
    Metrics,
}

impl Endpoint {
    pub fn to_url(&self, collector_endpoint: &str) -> String {
        let location: &str = match self {
            Endpoint::Logs => "/v1/logs",
            Endpoint::Traces => "/v1/traces",
            Endpoint::Metrics => "/v1/metrics",
        };
        format!("{}{location}", collector_endpoint.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        assert_eq!(
            Endpoint::Traces.to_url("http://collector:4317/"),
            "http://collector:4317/v1/traces"
        );
        assert_eq!(
            Endpoint::Metrics.to_url("http://collector:4317"),
            "http://collector:4317/v1/metrics"
        );
    }

    #[test]
    fn test_no_collector_builds_console_only() {
        let config: Config = crate::util::env::from_iter(Vec::<(String, String)>::new()).unwrap();
        let telemetry = Telemetry::new(&config).unwrap();

        assert!(telemetry.exporters.is_none());
        assert_eq!(telemetry.service_name, "edugame-server");
    }
}
