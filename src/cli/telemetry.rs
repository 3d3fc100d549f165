//! Log output, plus OTLP trace export when a collector is configured.

use anyhow::{anyhow, Context, Result};
use base64ct::{Base64, Encoding};
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{Tracer, TracerProvider},
    Resource,
};
use std::{env::var, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceLock<TracerProvider> = OnceLock::new();

/// Collector settings read from the standard `OTEL_*` variables.
#[derive(Debug, PartialEq, Eq)]
struct Collector {
    endpoint: String,
    headers: Vec<(String, String)>,
    instance_id: String,
}

impl Collector {
    fn from_env() -> Option<Self> {
        let endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
        Some(Self::new(
            &endpoint,
            &var("OTEL_EXPORTER_OTLP_HEADERS").unwrap_or_default(),
            var("OTEL_SERVICE_INSTANCE_ID").ok(),
        ))
    }

    fn new(endpoint: &str, headers: &str, instance_id: Option<String>) -> Self {
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint.trim_end_matches('/'))
        };

        // key1=value1,key2=value2; pairs without '=' are skipped
        let headers = headers
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();

        Self {
            endpoint,
            headers,
            instance_id: instance_id.unwrap_or_else(|| Ulid::new().to_string()),
        }
    }

    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")?
            .split(['/', ':'])
            .next()
            .filter(|host| !host.is_empty())
    }

    /// gRPC metadata; `-bin` keys carry base64 encoded values.
    fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            if key.ends_with("-bin") {
                let bytes = Base64::decode_vec(value)
                    .map_err(|err| anyhow!("header {key}: invalid base64: {err}"))?;
                let key = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                    .map_err(|err| anyhow!("header {key}: {err}"))?;
                metadata.insert_bin(key, MetadataValue::from_bytes(&bytes));
            } else {
                let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                    .map_err(|err| anyhow!("header {key}: {err}"))?;
                let value: MetadataValue<Ascii> = value
                    .parse()
                    .map_err(|err| anyhow!("header {key}: {err}"))?;
                metadata.insert(name, value);
            }
        }
        Ok(metadata)
    }

    fn install(self) -> Result<Tracer> {
        let mut exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_timeout(EXPORT_TIMEOUT);
        if let Some(domain) = self.tls_domain() {
            exporter =
                exporter.with_tls_config(ClientTlsConfig::new().domain_name(domain.to_string()));
        }
        if !self.headers.is_empty() {
            exporter = exporter.with_metadata(self.metadata()?);
        }
        let exporter = exporter
            .build()
            .with_context(|| format!("Failed to build OTLP exporter for {}", self.endpoint))?;

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_resource(Resource::new(vec![
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id),
            ]))
            .build();

        global::set_text_map_propagator(TraceContextPropagator::new());
        global::set_tracer_provider(provider.clone());
        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
        let _ = TRACER_PROVIDER.set(provider);

        Ok(tracer)
    }
}

/// Install the global subscriber. Spans are also exported over OTLP/gRPC
/// when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// # Errors
/// Returns an error if the exporter or the subscriber cannot be installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let fmt_layer = fmt::layer().with_target(false);
    let registry = Registry::default().with(fmt_layer);

    match Collector::from_env() {
        Some(collector) => {
            let tracer = collector.install()?;
            tracing::subscriber::set_global_default(
                registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .with(filter),
            )?;
        }
        None => tracing::subscriber::set_global_default(registry.with(filter))?,
    }

    Ok(())
}

/// Flush pending spans; a no-op when nothing was exported.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_headers() {
        let collector = Collector::new(
            "http://localhost:4317",
            "Authorization = Bearer abc , malformed, x-key=a=b",
            Some("node-1".to_string()),
        );
        assert_eq!(
            collector.headers,
            vec![
                ("authorization".to_string(), "Bearer abc".to_string()),
                ("x-key".to_string(), "a=b".to_string()),
            ]
        );
        assert_eq!(collector.instance_id, "node-1");
        assert_eq!(collector.metadata().unwrap().len(), 2);
    }

    #[test]
    fn binary_headers_are_base64() {
        // "binary data"
        let collector = Collector::new("localhost:4317", "trace-bin=YmluYXJ5IGRhdGE=", None);
        assert_eq!(collector.metadata().unwrap().len(), 1);

        let collector = Collector::new("localhost:4317", "trace-bin=not-base64!!!", None);
        let err = collector.metadata().unwrap_err();
        assert!(err.to_string().contains("invalid base64"));
    }

    #[test]
    fn endpoints_default_to_tls() {
        let collector = Collector::new("http://localhost:4317", "", None);
        assert_eq!(collector.endpoint, "http://localhost:4317");
        assert_eq!(collector.tls_domain(), None);

        let collector = Collector::new("collector.example.com:4317/", "", None);
        assert_eq!(collector.endpoint, "https://collector.example.com:4317");
        assert_eq!(collector.tls_domain(), Some("collector.example.com"));
        assert!(collector.headers.is_empty());
    }

    #[test]
    fn shutdown_without_exporter() {
        shutdown_tracer();
    }
}
