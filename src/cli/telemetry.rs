//! Subscriber setup: pretty or JSON log lines, plus OTLP span export over gRPC
//! when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//!
//! `OTEL_EXPORTER_OTLP_HEADERS` (`k=v,k2=v2`) become request metadata; keys
//! ending in `-bin` carry base64 values.

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;
use url::Url;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// Targets that are too chatty at the service's own level.
const QUIET_TARGETS: [&str; 5] = [
    "hyper=error",
    "h2=error",
    "tokio=error",
    "sqlx=warn",
    "opentelemetry_sdk=warn",
];

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    #[must_use]
    pub fn from_arg(value: Option<&str>) -> Self {
        match value {
            Some("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Collector settings taken from the standard `OTEL_*` variables.
#[derive(Debug)]
struct OtlpSettings {
    endpoint: String,
    metadata: MetadataMap,
    instance_id: String,
}

impl OtlpSettings {
    /// `None` when no collector endpoint is configured.
    fn from_env() -> Result<Option<Self>> {
        let Ok(endpoint) = var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
            return Ok(None);
        };
        let metadata = match var("OTEL_EXPORTER_OTLP_HEADERS") {
            Ok(raw) => metadata_from_headers(&raw)?,
            Err(_) => MetadataMap::new(),
        };
        Ok(Some(Self {
            endpoint: endpoint_url(&endpoint),
            metadata,
            instance_id: var("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|_| Ulid::new().to_string()),
        }))
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
            ])
            .build()
    }

    /// Build the exporter, register the global provider and propagators.
    fn install(self) -> Result<Tracer> {
        let resource = self.resource();

        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_compression(Compression::Gzip)
            .with_timeout(EXPORT_TIMEOUT);
        if let Some(tls) = tls_config(&self.endpoint) {
            builder = builder.with_tls_config(tls);
        }
        if !self.metadata.is_empty() {
            builder = builder.with_metadata(self.metadata);
        }
        let exporter = builder.build().context("Failed to build OTLP exporter")?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        let _ = TRACER_PROVIDER.set(provider.clone());
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// Pairs without `=` or with an empty key are skipped.
fn metadata_from_headers(raw: &str) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();

    for (key, value) in raw.split(',').filter_map(|pair| pair.split_once('=')) {
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }

        if key.ends_with("-bin") {
            let bytes = general_purpose::STANDARD
                .decode(value)
                .with_context(|| format!("failed to base64-decode value for key {key}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid binary metadata key {key}"))?;
            metadata.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid metadata key {key}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .with_context(|| format!("invalid metadata value for key {key}"))?;
            metadata.insert(name, value);
        }
    }

    Ok(metadata)
}

/// Scheme-less endpoints are assumed to be TLS.
fn endpoint_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

fn tls_config(endpoint: &str) -> Option<ClientTlsConfig> {
    let url = Url::parse(endpoint).ok()?;
    if url.scheme() != "https" {
        return None;
    }
    let host = url.host_str()?;
    Some(
        ClientTlsConfig::new()
            .domain_name(host.to_string())
            .with_native_roots(),
    )
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    QUIET_TARGETS.iter().try_fold(
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
        |filter, directive| Ok(filter.add_directive(directive.parse()?)),
    )
}

/// Install the global subscriber. `RUST_LOG` directives override `verbosity_level`.
///
/// # Errors
///
/// Returns an error if the exporter or the subscriber cannot be installed.
pub fn init(verbosity_level: Option<Level>, format: LogFormat) -> Result<()> {
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .pretty()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    let otel_layer = OtlpSettings::from_env()?
        .map(OtlpSettings::install)
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(env_filter(verbosity_level.unwrap_or(Level::ERROR))?);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush and stop the exporter; a no-op when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}
