//! Tracing subscriber and optional Jaeger export setup.

use opentelemetry::KeyValue;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Key/value tags attached to every span exported to Jaeger.
pub type TracingTags = Vec<KeyValue>;

/// Builds the standard set of tags (raw git version, crate version) attached
/// to every exported span.
pub fn default_tracing_tags(git_version: &str, cargo_version: &str) -> TracingTags {
    vec![
        KeyValue::new("git.version", git_version.to_string()),
        KeyValue::new("crate.version", cargo_version.to_string()),
    ]
}

/// Initialise the global tracing subscriber.
///
/// Always installs an `EnvFilter` + fmt layer. When `jaeger` is `Some`, also
/// installs an OpenTelemetry layer exporting spans to the given Jaeger
/// collector endpoint, tagged with `tags` and the given `service_name`.
pub fn init_tracing(service_name: &str, tags: TracingTags, jaeger: Option<String>) {
    let fmt_layer = tracing_subscriber::fmt::layer();
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer);

    match jaeger {
        Some(endpoint) => {
            let tracer = opentelemetry_jaeger::new_agent_pipeline()
                .with_endpoint(endpoint)
                .with_service_name(service_name.to_string())
                .with_trace_config(
                    opentelemetry_sdk::trace::config().with_resource(
                        opentelemetry_sdk::Resource::new(tags),
                    ),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)
                .expect("failed to build the jaeger pipeline");

            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            registry.with(otel_layer).init();
        }
        None => {
            registry.init();
        }
    }
}

/// Flush any pending spans before the process exits.
pub fn flush_traces() {
    opentelemetry::global::shutdown_tracer_provider();
}
