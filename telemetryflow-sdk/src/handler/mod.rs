//! Command handling on top of the OpenTelemetry SDK.
//!
//! [`TelemetryHandler`] owns one SDK provider per enabled signal. Providers
//! are created on [`Command::InitializeSdk`] from exporters built by an
//! [`ExporterFactory`] and torn down on [`Command::ShutdownSdk`]. Spans are
//! started and ended through separate commands, so open spans are kept in
//! a registry keyed by their hex encoded span id.
use crate::command::{
    AddSpanEvent, Command, EmitLog, EndSpan, RecordCounter, RecordGauge, RecordHistogram,
    RecordMetric, Response, StartSpan,
};
use crate::config::{Signal, TelemetryConfig};
use crate::error::{Error, Result};
use crate::exporter::{ExporterFactory, ExporterSettings, OtlpExporterFactory};
use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _};
use opentelemetry::metrics::{Gauge, Meter, MeterProvider as _};
use opentelemetry::trace::{
    Span as _, SpanId, Status, TraceContextExt as _, TraceFlags, TraceId, Tracer as _,
    TracerProvider as _,
};
use opentelemetry::{Context, InstrumentationScope, Value};
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::logs::{BatchLogProcessor, SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{BatchSpanProcessor, SdkTracer, SdkTracerProvider};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

mod resource;
mod spans;

use self::resource::build_resource;
use self::spans::SpanRegistry;

const INSTRUMENTATION_SCOPE: &str = "telemetryflow-sdk";

/// Executes the [`Command`]s dispatched by a [`Client`](crate::Client).
///
/// Implementations must be safe to call from several threads at once.
pub trait CommandHandler: Send + Sync + Debug {
    /// Executes `command`, returning [`Response::SpanStarted`] for
    /// [`Command::StartSpan`] and [`Response::Done`] otherwise.
    fn handle(&self, command: Command) -> Result<Response>;
}

/// The [`CommandHandler`] backing [`Client::new`](crate::Client::new).
#[derive(Debug)]
pub struct TelemetryHandler<F: ExporterFactory = OtlpExporterFactory> {
    factory: F,
    providers: RwLock<Option<Providers>>,
    spans: SpanRegistry,
}

impl<F: ExporterFactory + Default> Default for TelemetryHandler<F> {
    fn default() -> Self {
        TelemetryHandler::new(F::default())
    }
}

impl<F: ExporterFactory> TelemetryHandler<F> {
    /// Creates an uninitialized handler building exporters with `factory`.
    pub fn new(factory: F) -> Self {
        TelemetryHandler {
            factory,
            providers: RwLock::new(None),
            spans: SpanRegistry::default(),
        }
    }

    /// The factory exporters are built with.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Number of spans started and not ended yet.
    pub fn active_spans(&self) -> usize {
        self.spans.len()
    }

    fn initialize(&self, config: Arc<TelemetryConfig>) -> Result<Response> {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        // Resolve every signal first so an invalid combination never leaves
        // half of the pipeline running.
        let settings = config
            .enabled_signals()
            .map(|signal| ExporterSettings::for_signal(&config, signal))
            .collect::<Result<Vec<_>>>()?;

        let resource = build_resource(&config);
        let batch = config.batch_settings();
        let scope = InstrumentationScope::builder(INSTRUMENTATION_SCOPE)
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();

        let mut handles = ProviderHandles::default();
        for settings in &settings {
            match settings.signal() {
                Signal::Traces => {
                    let exporter = self.factory.span_exporter(settings)?;
                    let batch_config = opentelemetry_sdk::trace::BatchConfigBuilder::default()
                        .with_max_export_batch_size(batch.max_size)
                        .with_scheduled_delay(batch.timeout)
                        .build();
                    let processor = BatchSpanProcessor::builder(exporter)
                        .with_batch_config(batch_config)
                        .build();
                    handles.tracer = Some(
                        SdkTracerProvider::builder()
                            .with_span_processor(processor)
                            .with_resource(resource.clone())
                            .build(),
                    );
                }
                Signal::Metrics => {
                    let exporter = self.factory.metric_exporter(settings)?;
                    let reader = PeriodicReader::builder(exporter)
                        .with_interval(batch.timeout)
                        .build();
                    handles.meter = Some(
                        SdkMeterProvider::builder()
                            .with_reader(reader)
                            .with_resource(resource.clone())
                            .build(),
                    );
                }
                Signal::Logs => {
                    let exporter = self.factory.log_exporter(settings)?;
                    let batch_config = opentelemetry_sdk::logs::BatchConfigBuilder::default()
                        .with_max_export_batch_size(batch.max_size)
                        .with_scheduled_delay(batch.timeout)
                        .build();
                    let processor = BatchLogProcessor::builder(exporter)
                        .with_batch_config(batch_config)
                        .build();
                    handles.logger = Some(
                        SdkLoggerProvider::builder()
                            .with_log_processor(processor)
                            .with_resource(resource.clone())
                            .build(),
                    );
                }
            }
        }

        *providers = Some(Providers {
            tracer: handles
                .tracer
                .as_ref()
                .map(|provider| provider.tracer_with_scope(scope.clone())),
            meter: handles
                .meter
                .as_ref()
                .map(|provider| provider.meter_with_scope(scope.clone())),
            logger: handles
                .logger
                .as_ref()
                .map(|provider| provider.logger_with_scope(scope.clone())),
            gauges: Mutex::new(HashMap::new()),
            handles,
        });

        tracing::debug!(
            name: "TelemetryHandlerInitialized",
            service_name = config.service_name(),
            signals = ?config.enabled_signals().collect::<Vec<_>>(),
        );
        Ok(Response::Done)
    }

    fn shutdown(&self, timeout: Duration) -> Result<Response> {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(active) = providers.as_ref() else {
            return Ok(Response::Done);
        };

        let ended = self.spans.end_all();
        if ended > 0 {
            tracing::debug!(name: "OpenSpansEnded", count = ended);
        }

        let handles = active.handles.clone();
        run_bounded("shutdown", timeout, move || handles.shutdown())?;

        *providers = None;
        tracing::debug!(name: "TelemetryHandlerShutdown", "providers shut down");
        Ok(Response::Done)
    }

    fn flush(&self, timeout: Duration) -> Result<Response> {
        let handles = self.with_providers(|providers| Ok(providers.handles.clone()))?;
        run_bounded("flush", timeout, move || handles.force_flush())?;
        Ok(Response::Done)
    }

    fn start_span(&self, command: StartSpan) -> Result<Response> {
        self.with_providers(|providers| {
            let tracer = providers.tracer()?;
            let parent = match &command.parent_id {
                Some(parent_id) => {
                    Context::new().with_remote_span_context(self.spans.span_context(parent_id)?)
                }
                None => Context::new(),
            };
            let span = tracer
                .span_builder(command.name)
                .with_kind(command.kind)
                .with_attributes(command.attributes)
                .start_with_context(tracer, &parent);
            Ok(Response::SpanStarted(self.spans.insert(span)))
        })
    }

    fn end_span(&self, command: EndSpan) -> Result<Response> {
        self.with_providers(|providers| {
            providers.tracer()?;
            let mut span = self.spans.remove(&command.span_id)?;
            if let Some(description) = command.error {
                span.set_status(Status::error(description));
            }
            span.end();
            Ok(Response::Done)
        })
    }

    fn add_span_event(&self, command: AddSpanEvent) -> Result<Response> {
        self.with_providers(|providers| {
            providers.tracer()?;
            self.spans.with_span(&command.span_id, |span| {
                span.add_event_with_timestamp(command.name, command.timestamp, command.attributes)
            })?;
            Ok(Response::Done)
        })
    }

    fn with_providers<T>(&self, f: impl FnOnce(&Providers) -> Result<T>) -> Result<T> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        match providers.as_ref() {
            Some(providers) => f(providers),
            None => Err(Error::NotInitialized),
        }
    }
}

impl<F: ExporterFactory> CommandHandler for TelemetryHandler<F> {
    fn handle(&self, command: Command) -> Result<Response> {
        match command {
            Command::InitializeSdk(command) => self.initialize(command.config),
            Command::ShutdownSdk(command) => self.shutdown(command.timeout),
            Command::FlushTelemetry(command) => self.flush(command.timeout),
            Command::RecordMetric(RecordMetric {
                name,
                value,
                unit,
                attributes,
                ..
            }) => self.with_providers(|providers| {
                providers
                    .gauge(name, Some(unit))?
                    .record(value, &attributes);
                Ok(Response::Done)
            }),
            Command::RecordCounter(RecordCounter {
                name,
                value,
                attributes,
            }) => self.with_providers(|providers| {
                providers
                    .meter()?
                    .u64_counter(name)
                    .build()
                    .add(value, &attributes);
                Ok(Response::Done)
            }),
            Command::RecordGauge(RecordGauge {
                name,
                value,
                attributes,
            }) => self.with_providers(|providers| {
                providers.gauge(name, None)?.record(value, &attributes);
                Ok(Response::Done)
            }),
            Command::RecordHistogram(RecordHistogram {
                name,
                value,
                unit,
                attributes,
            }) => self.with_providers(|providers| {
                providers
                    .meter()?
                    .f64_histogram(name)
                    .with_unit(unit)
                    .build()
                    .record(value, &attributes);
                Ok(Response::Done)
            }),
            Command::EmitLog(log) => self.with_providers(|providers| {
                emit_log(providers.logger()?, log)?;
                Ok(Response::Done)
            }),
            Command::EmitBatchLogs(batch) => self.with_providers(|providers| {
                let logger = providers.logger()?;
                for log in batch.logs {
                    emit_log(logger, log)?;
                }
                Ok(Response::Done)
            }),
            Command::StartSpan(command) => self.start_span(command),
            Command::EndSpan(command) => self.end_span(command),
            Command::AddSpanEvent(command) => self.add_span_event(command),
        }
    }
}

struct Providers {
    handles: ProviderHandles,
    tracer: Option<SdkTracer>,
    meter: Option<Meter>,
    logger: Option<SdkLogger>,
    // Gauges by name with the unit fixed on first use.
    gauges: Mutex<HashMap<String, (String, Gauge<f64>)>>,
}

impl Providers {
    fn tracer(&self) -> Result<&SdkTracer> {
        self.tracer.as_ref().ok_or_else(|| disabled(Signal::Traces))
    }

    fn meter(&self) -> Result<&Meter> {
        self.meter.as_ref().ok_or_else(|| disabled(Signal::Metrics))
    }

    fn logger(&self) -> Result<&SdkLogger> {
        self.logger.as_ref().ok_or_else(|| disabled(Signal::Logs))
    }

    /// Returns the gauge registered under `name`, creating it on first use.
    ///
    /// `None` accepts whatever unit the gauge already has. A different
    /// explicit unit is rejected with [`Error::InvalidArgument`].
    fn gauge(&self, name: String, unit: Option<String>) -> Result<Gauge<f64>> {
        let meter = self.meter()?;
        let mut gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((known_unit, gauge)) = gauges.get(&name) {
            return match unit {
                Some(unit) if unit != *known_unit => Err(Error::InvalidArgument(format!(
                    "gauge '{name}' is recorded in '{known_unit}', got '{unit}'"
                ))),
                _ => Ok(gauge.clone()),
            };
        }

        let unit = unit.unwrap_or_default();
        let gauge = meter
            .f64_gauge(name.clone())
            .with_unit(unit.clone())
            .build();
        gauges.insert(name, (unit, gauge.clone()));
        Ok(gauge)
    }
}

impl Debug for Providers {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Providers")
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

fn disabled(signal: Signal) -> Error {
    Error::ExportSetup(format!("the {signal} signal is disabled"))
}

#[derive(Clone, Debug, Default)]
struct ProviderHandles {
    tracer: Option<SdkTracerProvider>,
    meter: Option<SdkMeterProvider>,
    logger: Option<SdkLoggerProvider>,
}

impl ProviderHandles {
    // An already shut down provider counts as success so a shutdown that
    // timed out earlier can be retried.
    fn shutdown(&self) -> Result<()> {
        let results = [
            self.tracer.as_ref().map(SdkTracerProvider::shutdown),
            self.meter.as_ref().map(SdkMeterProvider::shutdown),
            self.logger.as_ref().map(SdkLoggerProvider::shutdown),
        ];
        first_failure(
            "shutdown",
            results
                .into_iter()
                .flatten()
                .map(|result| match result {
                    Err(OTelSdkError::AlreadyShutdown) => Ok(()),
                    other => other,
                }),
        )
    }

    fn force_flush(&self) -> Result<()> {
        let results = [
            self.tracer.as_ref().map(SdkTracerProvider::force_flush),
            self.meter.as_ref().map(SdkMeterProvider::force_flush),
            self.logger.as_ref().map(SdkLoggerProvider::force_flush),
        ];
        first_failure("flush", results.into_iter().flatten())
    }
}

fn first_failure(
    operation: &'static str,
    results: impl Iterator<Item = OTelSdkResult>,
) -> Result<()> {
    let mut first = None;
    for result in results {
        if let Err(err) = result {
            tracing::warn!(name: "ProviderOperationFailed", operation, error = %err);
            first.get_or_insert(err);
        }
    }
    match first {
        None => Ok(()),
        Some(OTelSdkError::Timeout(timeout)) => Err(Error::Timeout { operation, timeout }),
        Some(err) => Err(Error::Transport(Box::new(err))),
    }
}

/// Runs `task` on a helper thread and waits at most `timeout` for it.
///
/// On timeout the thread is left to finish on its own.
fn run_bounded<T>(operation: &'static str, timeout: Duration, task: T) -> Result<()>
where
    T: FnOnce() -> Result<()> + Send + 'static,
{
    let (result_tx, result_rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("telemetryflow-{operation}"))
        .spawn(move || {
            let _ = result_tx.send(task());
        })
        .map_err(|err| Error::Transport(Box::new(err)))?;

    match result_rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(name: "ProviderOperationTimedOut", operation, timeout = ?timeout);
            Err(Error::Timeout { operation, timeout })
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::Transport(
            format!("{operation} thread exited without a result").into(),
        )),
    }
}

fn emit_log(logger: &SdkLogger, log: EmitLog) -> Result<()> {
    let trace_context = match (&log.trace_id, &log.span_id) {
        (Some(trace_id), Some(span_id)) => Some((
            TraceId::from_hex(trace_id)
                .map_err(|_| Error::InvalidArgument(format!("invalid trace id '{trace_id}'")))?,
            SpanId::from_hex(span_id)
                .map_err(|_| Error::InvalidArgument(format!("invalid span id '{span_id}'")))?,
        )),
        _ => None,
    };

    let mut record = logger.create_log_record();
    record.set_timestamp(log.timestamp);
    record.set_observed_timestamp(SystemTime::now());
    record.set_severity_number(log.severity.into());
    record.set_severity_text(log.severity.as_str());
    record.set_body(AnyValue::from(log.message));
    for attribute in log.attributes {
        record.add_attribute(attribute.key, any_value(attribute.value));
    }
    if let Some((trace_id, span_id)) = trace_context {
        record.set_trace_context(trace_id, span_id, Some(TraceFlags::SAMPLED));
    }
    logger.emit(record);
    Ok(())
}

fn any_value(value: Value) -> AnyValue {
    match value {
        Value::Bool(value) => AnyValue::Boolean(value),
        Value::I64(value) => AnyValue::Int(value),
        Value::F64(value) => AnyValue::Double(value),
        Value::String(value) => AnyValue::String(value),
        other => AnyValue::String(other.to_string().into()),
    }
}
