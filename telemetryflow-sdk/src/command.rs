//! Commands dispatched from the [`Client`] to a [`CommandHandler`].
//!
//! Every public client call is turned into exactly one [`Command`] value.
//! Commands only carry data; all behavior lives in the handler.
//!
//! [`Client`]: crate::Client
//! [`CommandHandler`]: crate::CommandHandler
use crate::config::TelemetryConfig;
use opentelemetry::trace::SpanKind;
use opentelemetry::KeyValue;
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Severity of a log record.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "lowercase"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogSeverity {
    /// Fine-grained diagnostics.
    Trace,
    /// Debugging information.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected that did not fail the operation.
    Warn,
    /// A failed operation.
    Error,
    /// The process cannot continue.
    Fatal,
}

impl LogSeverity {
    /// Upper-case severity text attached to emitted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Trace => "TRACE",
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO",
            LogSeverity::Warn => "WARN",
            LogSeverity::Error => "ERROR",
            LogSeverity::Fatal => "FATAL",
        }
    }
}

impl From<LogSeverity> for opentelemetry::logs::Severity {
    fn from(severity: LogSeverity) -> Self {
        use opentelemetry::logs::Severity;
        match severity {
            LogSeverity::Trace => Severity::Trace,
            LogSeverity::Debug => Severity::Debug,
            LogSeverity::Info => Severity::Info,
            LogSeverity::Warn => Severity::Warn,
            LogSeverity::Error => Severity::Error,
            LogSeverity::Fatal => Severity::Fatal,
        }
    }
}

/// Sets up the export pipeline.
#[derive(Clone, Debug)]
pub struct InitializeSdk {
    /// Configuration the pipeline is built from.
    pub config: Arc<TelemetryConfig>,
}

/// Flushes and tears down the export pipeline.
#[derive(Clone, Debug)]
pub struct ShutdownSdk {
    /// Upper bound for the whole shutdown.
    pub timeout: Duration,
}

/// Exports everything buffered so far.
#[derive(Clone, Debug)]
pub struct FlushTelemetry {
    /// Upper bound for the flush.
    pub timeout: Duration,
}

/// A generic measurement, recorded as a gauge with a unit.
///
/// The unit of a gauge is fixed by the first measurement recorded under its
/// name; a later measurement with another unit is rejected.
#[derive(Clone, Debug)]
pub struct RecordMetric {
    /// Instrument name.
    pub name: String,
    /// Measured value.
    pub value: f64,
    /// UCUM unit, e.g. `ms`.
    pub unit: String,
    /// Measurement attributes.
    pub attributes: Vec<KeyValue>,
    /// When the value was observed.
    pub timestamp: SystemTime,
}

/// Adds to a monotonic counter.
#[derive(Clone, Debug)]
pub struct RecordCounter {
    /// Instrument name.
    pub name: String,
    /// Increment.
    pub value: u64,
    /// Measurement attributes.
    pub attributes: Vec<KeyValue>,
}

/// Records the current value of a gauge.
#[derive(Clone, Debug)]
pub struct RecordGauge {
    /// Instrument name, shared with [`RecordMetric`].
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Measurement attributes.
    pub attributes: Vec<KeyValue>,
}

/// Records a value into a histogram.
#[derive(Clone, Debug)]
pub struct RecordHistogram {
    /// Instrument name.
    pub name: String,
    /// Recorded value.
    pub value: f64,
    /// UCUM unit, e.g. `By`.
    pub unit: String,
    /// Measurement attributes.
    pub attributes: Vec<KeyValue>,
}

/// A single log record.
///
/// `trace_id` and `span_id` are hex encoded and only used when both are set.
#[derive(Clone, Debug)]
pub struct EmitLog {
    /// Record severity.
    pub severity: LogSeverity,
    /// Record body.
    pub message: String,
    /// Record attributes.
    pub attributes: Vec<KeyValue>,
    /// When the event happened.
    pub timestamp: SystemTime,
    /// 32 hex characters.
    pub trace_id: Option<String>,
    /// 16 hex characters.
    pub span_id: Option<String>,
}

impl EmitLog {
    /// A record stamped with the current time and no trace correlation.
    pub fn new(severity: LogSeverity, message: impl Into<String>, attributes: Vec<KeyValue>) -> Self {
        EmitLog {
            severity,
            message: message.into(),
            attributes,
            timestamp: SystemTime::now(),
            trace_id: None,
            span_id: None,
        }
    }

    /// Correlates the record with a span.
    pub fn with_trace_context(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }
}

/// Several log records emitted in order.
#[derive(Clone, Debug)]
pub struct EmitBatchLogs {
    /// The records, in emission order.
    pub logs: Vec<EmitLog>,
}

/// Starts a span, answered with [`Response::SpanStarted`].
#[derive(Clone, Debug)]
pub struct StartSpan {
    /// Span name.
    pub name: String,
    /// Span kind.
    pub kind: SpanKind,
    /// Attributes set at start.
    pub attributes: Vec<KeyValue>,
    /// Id of an open span to use as parent.
    pub parent_id: Option<String>,
}

/// Ends an open span.
#[derive(Clone, Debug)]
pub struct EndSpan {
    /// Id returned when the span was started.
    pub span_id: String,
    /// Marks the span as failed with this description.
    pub error: Option<String>,
}

/// Adds a timestamped event to an open span.
#[derive(Clone, Debug)]
pub struct AddSpanEvent {
    /// Id returned when the span was started.
    pub span_id: String,
    /// Event name.
    pub name: String,
    /// Event attributes.
    pub attributes: Vec<KeyValue>,
    /// When the event happened.
    pub timestamp: SystemTime,
}

/// Every operation the client can ask a handler to perform.
#[derive(Clone, Debug)]
pub enum Command {
    /// See [`InitializeSdk`].
    InitializeSdk(InitializeSdk),
    /// See [`ShutdownSdk`].
    ShutdownSdk(ShutdownSdk),
    /// See [`FlushTelemetry`].
    FlushTelemetry(FlushTelemetry),
    /// See [`RecordMetric`].
    RecordMetric(RecordMetric),
    /// See [`RecordCounter`].
    RecordCounter(RecordCounter),
    /// See [`RecordGauge`].
    RecordGauge(RecordGauge),
    /// See [`RecordHistogram`].
    RecordHistogram(RecordHistogram),
    /// See [`EmitLog`].
    EmitLog(EmitLog),
    /// See [`EmitBatchLogs`].
    EmitBatchLogs(EmitBatchLogs),
    /// See [`StartSpan`].
    StartSpan(StartSpan),
    /// See [`EndSpan`].
    EndSpan(EndSpan),
    /// See [`AddSpanEvent`].
    AddSpanEvent(AddSpanEvent),
}

impl Command {
    /// Stable name of the command kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::InitializeSdk(_) => "InitializeSdk",
            Command::ShutdownSdk(_) => "ShutdownSdk",
            Command::FlushTelemetry(_) => "FlushTelemetry",
            Command::RecordMetric(_) => "RecordMetric",
            Command::RecordCounter(_) => "RecordCounter",
            Command::RecordGauge(_) => "RecordGauge",
            Command::RecordHistogram(_) => "RecordHistogram",
            Command::EmitLog(_) => "EmitLog",
            Command::EmitBatchLogs(_) => "EmitBatchLogs",
            Command::StartSpan(_) => "StartSpan",
            Command::EndSpan(_) => "EndSpan",
            Command::AddSpanEvent(_) => "AddSpanEvent",
        }
    }
}

/// What a handler returns for a successfully handled [`Command`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// The command completed and produced no value.
    Done,
    /// A span was started and registered under this id.
    SpanStarted(String),
}
