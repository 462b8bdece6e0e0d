//! Relay metrics.
//!
//! The recording functions are always available. They only do something when
//! the `metrics` Cargo feature is enabled, in which case they feed
//! OpenTelemetry instruments that [`init_metrics`] exports over OTLP.

#[cfg(feature = "metrics")]
mod otel {
    use std::sync::OnceLock;

    use opentelemetry::KeyValue;
    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Histogram};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};

    /// Errors that can occur during metrics / tracing pipeline initialisation.
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsError {
        /// Failed to build an OTLP exporter.
        #[error("failed to build OTLP exporter: {0}")]
        ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

        /// Failed during `OTel` SDK shutdown or flush.
        #[error("OpenTelemetry SDK error: {0}")]
        Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
    }

    /// Opaque handle that keeps the `OpenTelemetry` providers alive.
    ///
    /// When dropped, the providers are **not** shut down automatically -- call
    /// [`MetricsGuard::shutdown`] for a graceful flush before exiting.
    pub struct MetricsGuard {
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
    }

    impl MetricsGuard {
        pub fn tracer(&self) -> SdkTracer {
            self.tracer_provider.tracer("keel-telegram-relay")
        }

        /// Gracefully shut down both providers, flushing any buffered telemetry.
        pub fn shutdown(self) -> Result<(), MetricsError> {
            self.tracer_provider.shutdown()?;
            self.meter_provider.shutdown()?;
            Ok(())
        }
    }

    /// Initialise the OTLP pipeline for traces and metrics.
    ///
    /// * `endpoint` -- OTLP receiver URL, e.g. `"http://localhost:4317"` (gRPC).
    pub fn init_metrics(endpoint: &str) -> Result<MetricsGuard, MetricsError> {
        let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;
        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(trace_exporter)
            .build();
        global::set_tracer_provider(tracer_provider.clone());

        let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;
        let meter_provider = SdkMeterProvider::builder()
            .with_periodic_exporter(metric_exporter)
            .build();
        global::set_meter_provider(meter_provider.clone());

        Ok(MetricsGuard {
            tracer_provider,
            meter_provider,
        })
    }

    pub(super) struct Instruments {
        pub new_pending: Counter<u64>,
        pub notifications: Counter<u64>,
        pub approval_actions: Counter<u64>,
        pub edit_failures: Counter<u64>,
        pub tick_seconds: Histogram<f64>,
    }

    pub(super) fn instruments() -> &'static Instruments {
        static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();
        INSTRUMENTS.get_or_init(|| {
            let meter = global::meter("keel-telegram-relay");
            Instruments {
                new_pending: meter
                    .u64_counter("keel_new_pending_approvals")
                    .with_description("New pending approvals recognized by the relay")
                    .build(),
                notifications: meter
                    .u64_counter("keel_notifications")
                    .with_description("Webhook notifications received from Keel")
                    .build(),
                approval_actions: meter
                    .u64_counter("keel_approval_actions")
                    .with_description("Approve/reject/delete actions issued from chat")
                    .build(),
                edit_failures: meter
                    .u64_counter("keel_message_edit_failures")
                    .with_description("Failed edits of approval notification messages")
                    .build(),
                tick_seconds: meter
                    .f64_histogram("keel_sync_tick_seconds")
                    .with_description("Duration of one approval sync tick")
                    .with_unit("s")
                    .build(),
            }
        })
    }

    pub(super) fn action_attrs(action: &str) -> [KeyValue; 1] {
        [KeyValue::new("action", action.to_string())]
    }
}

#[cfg(feature = "metrics")]
pub use otel::{MetricsError, MetricsGuard, init_metrics};

/// Count approvals that newly appeared in a poll.
pub fn record_new_pending(count: u64) {
    #[cfg(feature = "metrics")]
    otel::instruments().new_pending.add(count, &[]);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Count one inbound webhook notification.
pub fn record_notification() {
    #[cfg(feature = "metrics")]
    otel::instruments().notifications.add(1, &[]);
}

/// Count one chat-issued action (`approve`, `reject`, `delete`).
pub fn record_approval_action(action: &str) {
    #[cfg(feature = "metrics")]
    otel::instruments()
        .approval_actions
        .add(1, &otel::action_attrs(action));
    #[cfg(not(feature = "metrics"))]
    let _ = action;
}

/// Count one failed message edit.
pub fn record_edit_failure() {
    #[cfg(feature = "metrics")]
    otel::instruments().edit_failures.add(1, &[]);
}

/// Record the wall time of a sync tick.
pub fn record_tick_duration(seconds: f64) {
    #[cfg(feature = "metrics")]
    otel::instruments().tick_seconds.record(seconds, &[]);
    #[cfg(not(feature = "metrics"))]
    let _ = seconds;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_pipeline_does_not_panic() {
        record_new_pending(2);
        record_notification();
        record_approval_action("approve");
        record_edit_failure();
        record_tick_duration(0.25);
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn init_metrics_does_not_panic() {
        // The exporter only fails at send time without a collector.
        let guard = init_metrics("http://localhost:4317").unwrap();
        guard.shutdown().unwrap();
    }
}
