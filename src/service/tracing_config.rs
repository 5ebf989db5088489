// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    metrics::{
        reader::{DefaultAggregationSelector, DefaultTemporalitySelector},
        MeterProviderBuilder, PeriodicReader, SdkMeterProvider,
    },
    runtime,
    trace::{BatchConfigBuilder, RandomIdGenerator, Sampler, SpanLimits, Tracer},
    Resource,
};
use opentelemetry_semantic_conventions::{
    resource::{SERVICE_NAME, SERVICE_VERSION},
    SCHEMA_URL,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::{AppError, AppResult, TracingConfig};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn resource() -> Resource {
    Resource::from_schema_url(
        [
            KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ],
        SCHEMA_URL,
    )
}

fn init_meter_provider(endpoint: &str) -> AppResult<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_metrics_exporter(
            Box::new(DefaultAggregationSelector::new()),
            Box::new(DefaultTemporalitySelector::new()),
        )
        .map_err(|e| AppError::TracingSetup(format!("otlp metrics exporter: {}", e)))?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(Duration::from_secs(30))
        .build();

    let meter_provider = MeterProviderBuilder::default()
        .with_resource(resource())
        .with_reader(reader)
        .build();
    global::set_meter_provider(meter_provider.clone());
    Ok(meter_provider)
}

fn init_tracer(endpoint: &str) -> AppResult<Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_scheduled_delay(Duration::from_secs(5))
                .build(),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    1.0,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_span_limits(SpanLimits::default())
                .with_resource(resource()),
        )
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .install_batch(runtime::Tokio)
        .map_err(|e| AppError::TracingSetup(format!("otlp tracer: {}", e)))
}

/// Keeps the log writer and the OpenTelemetry exporters alive; flushes them on drop.
pub struct TracingGuard {
    meter_provider: Option<SdkMeterProvider>,
    _worker_guard: WorkerGuard,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(meter_provider) = self.meter_provider.take() {
            if let Err(err) = meter_provider.shutdown() {
                eprintln!("{err:?}");
            }
            global::shutdown_tracer_provider();
            tracing::info!("shutdown otel tracer provider");
        }
    }
}

/// Console-only logging for tests and ad-hoc tools, filtered by `RUST_LOG`.
pub fn setup_local_tracing() -> AppResult<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_test_writer();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .try_init()?;
    Ok(())
}

/// Daily rolling log file plus stderr, and OTLP export of spans and
/// `monotonic_counter.*` events when an endpoint is configured.
///
/// `RUST_LOG` takes precedence over `config.level`. Must run inside a tokio runtime.
pub async fn setup_tracing(config: &TracingConfig) -> AppResult<TracingGuard> {
    let file_appender =
        tracing_appender::rolling::daily(&config.log_dir, concat!(env!("CARGO_PKG_NAME"), ".log"));
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
    // stdout carries command output
    let writer = non_blocking.and(std::io::stderr);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(writer);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::TracingSetup(format!("log filter `{}`: {}", config.level, e)))?;

    let (meter_provider, tracer) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => (
            Some(init_meter_provider(endpoint)?),
            Some(init_tracer(endpoint)?),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(meter_provider.clone().map(MetricsLayer::new))
        .with(tracer.map(OpenTelemetryLayer::new))
        .with(filter)
        .try_init()?;

    Ok(TracingGuard {
        meter_provider,
        _worker_guard: worker_guard,
    })
}
