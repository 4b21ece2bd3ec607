//! In-memory exporters for tests.
//!
//! Enable the `testing` feature to use [`InMemoryExporterFactory`] from
//! outside this crate:
//!
//! ```
//! # #[cfg(feature = "testing")]
//! # {
//! use std::sync::Arc;
//! use telemetryflow_sdk::testing::InMemoryExporterFactory;
//! use telemetryflow_sdk::{Client, Credentials, TelemetryConfig, TelemetryHandler};
//!
//! let factory = InMemoryExporterFactory::default();
//! let handler = Arc::new(TelemetryHandler::new(factory.clone()));
//! let credentials = Credentials::new("tfk_id", "tfs_secret").unwrap();
//! let config = TelemetryConfig::new(credentials, "localhost:4317", "svc");
//! let client = Client::with_handler(config, handler).unwrap();
//!
//! client.initialize().unwrap();
//! client.increment_counter("requests", 1, vec![]).unwrap();
//! client.flush().unwrap();
//! assert!(!factory.finished_metrics().is_empty());
//! client.shutdown().unwrap();
//! # }
//! ```
use crate::config::Signal;
use crate::error::{Error, Result};
use crate::exporter::{ExporterFactory, ExporterSettings};
use opentelemetry_sdk::logs::in_memory_exporter::LogDataWithResource;
use opentelemetry_sdk::logs::InMemoryLogExporter;
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::InMemoryMetricExporter;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
use std::sync::{Arc, Mutex, PoisonError};

/// An [`ExporterFactory`] whose exporters keep everything in memory.
///
/// Clones share the same storage, so a clone kept by the test sees what the
/// handler exported.
#[derive(Clone, Debug, Default)]
pub struct InMemoryExporterFactory {
    spans: InMemorySpanExporter,
    metrics: InMemoryMetricExporter,
    logs: InMemoryLogExporter,
    requested: Arc<Mutex<Vec<ExporterSettings>>>,
    failing: Option<Signal>,
}

impl InMemoryExporterFactory {
    /// Makes building the exporter for `signal` fail with [`Error::ExportSetup`].
    pub fn failing_on(mut self, signal: Signal) -> Self {
        self.failing = Some(signal);
        self
    }

    /// Every settings value the factory was asked to build an exporter for.
    pub fn requested_settings(&self) -> Vec<ExporterSettings> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spans exported so far.
    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans.get_finished_spans().unwrap_or_default()
    }

    /// Metrics exported so far, one entry per collection.
    pub fn finished_metrics(&self) -> Vec<ResourceMetrics> {
        self.metrics.get_finished_metrics().unwrap_or_default()
    }

    /// Log records exported so far.
    pub fn emitted_logs(&self) -> Vec<LogDataWithResource> {
        self.logs.get_emitted_logs().unwrap_or_default()
    }

    fn record(&self, settings: &ExporterSettings) -> Result<()> {
        self.requested
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(settings.clone());
        if self.failing == Some(settings.signal()) {
            return Err(Error::ExportSetup(format!(
                "no exporter available for {}",
                settings.signal()
            )));
        }
        Ok(())
    }
}

impl ExporterFactory for InMemoryExporterFactory {
    type SpanExporter = InMemorySpanExporter;
    type MetricExporter = InMemoryMetricExporter;
    type LogExporter = InMemoryLogExporter;

    fn span_exporter(&self, settings: &ExporterSettings) -> Result<Self::SpanExporter> {
        self.record(settings)?;
        Ok(self.spans.clone())
    }

    fn metric_exporter(&self, settings: &ExporterSettings) -> Result<Self::MetricExporter> {
        self.record(settings)?;
        Ok(self.metrics.clone())
    }

    fn log_exporter(&self, settings: &ExporterSettings) -> Result<Self::LogExporter> {
        self.record(settings)?;
        Ok(self.logs.clone())
    }
}
