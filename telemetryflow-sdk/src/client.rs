//! The public client facade and its lifecycle state machine.
use crate::command::{
    AddSpanEvent, Command, EmitBatchLogs, EmitLog, EndSpan, FlushTelemetry, InitializeSdk,
    LogSeverity, RecordCounter, RecordGauge, RecordHistogram, RecordMetric, Response, ShutdownSdk,
    StartSpan,
};
use crate::config::TelemetryConfig;
use crate::error::{Error, Result};
use crate::exporter::OtlpExporterFactory;
use crate::handler::{CommandHandler, TelemetryHandler};
use opentelemetry::trace::SpanKind;
use opentelemetry::KeyValue;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

/// Bound applied to [`Client::shutdown`].
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound applied to [`Client::flush`].
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle state of a [`Client`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    /// Created, or shut down.
    Uninitialized,
    /// The export pipeline is running.
    Initialized,
}

/// Entry point for emitting telemetry.
///
/// A client starts [`Uninitialized`](LifecycleState::Uninitialized).
/// [`initialize`](Client::initialize) sets up the export pipeline and every
/// emission call requires it; [`shutdown`](Client::shutdown) must be called
/// explicitly to flush and release the pipeline. The client can be shared
/// between threads, e.g. behind an [`Arc`].
///
/// ```no_run
/// use opentelemetry::trace::SpanKind;
/// use opentelemetry::KeyValue;
/// use telemetryflow_sdk::TelemetryBuilder;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), telemetryflow_sdk::Error> {
/// let client = TelemetryBuilder::new().with_auto_configuration().build()?;
/// client.initialize()?;
///
/// let span_id = client.start_span("charge", SpanKind::Internal, vec![])?;
/// client.increment_counter("payments.processed", 1, vec![KeyValue::new("currency", "EUR")])?;
/// client.end_span(&span_id, None)?;
///
/// client.shutdown()?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Arc<TelemetryConfig>,
    state: RwLock<LifecycleState>,
    handler: Arc<dyn CommandHandler>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Creates a client that exports through OTLP.
    pub fn new(config: TelemetryConfig) -> Result<Self> {
        let handler = TelemetryHandler::new(OtlpExporterFactory::default());
        Self::with_handler(config, Arc::new(handler))
    }

    /// Creates a client that dispatches every command to `handler`.
    pub fn with_handler(config: TelemetryConfig, handler: Arc<dyn CommandHandler>) -> Result<Self> {
        config.validate()?;
        Ok(Client {
            config: Arc::new(config),
            state: RwLock::new(LifecycleState::Uninitialized),
            handler,
        })
    }

    /// The configuration the client was created with.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shorthand for `state() == LifecycleState::Initialized`.
    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Initialized
    }

    /// Sets up exporters and providers for every enabled signal.
    ///
    /// Fails with [`Error::AlreadyInitialized`] if called twice; on a handler
    /// failure the client stays uninitialized.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == LifecycleState::Initialized {
            return Err(Error::AlreadyInitialized);
        }

        self.handler
            .handle(Command::InitializeSdk(InitializeSdk {
                config: Arc::clone(&self.config),
            }))
            .map_err(|err| Error::lifecycle("initialize", err))?;

        *state = LifecycleState::Initialized;
        tracing::debug!(
            name: "ClientInitialized",
            service_name = self.config.service_name(),
            endpoint = self.config.endpoint(),
            protocol = %self.config.protocol(),
        );
        Ok(())
    }

    /// Flushes and tears down the export pipeline.
    ///
    /// A no-op when not initialized. If the handler fails the client stays
    /// initialized, so the shutdown can be retried.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == LifecycleState::Uninitialized {
            return Ok(());
        }

        self.handler
            .handle(Command::ShutdownSdk(ShutdownSdk {
                timeout: SHUTDOWN_TIMEOUT,
            }))
            .map_err(|err| {
                tracing::warn!(name: "ClientShutdownFailed", error = %err);
                Error::lifecycle("shutdown", err)
            })?;

        *state = LifecycleState::Uninitialized;
        tracing::debug!(name: "ClientShutdown", "client shut down");
        Ok(())
    }

    /// Exports everything buffered so far.
    pub fn flush(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.handler
            .handle(Command::FlushTelemetry(FlushTelemetry {
                timeout: FLUSH_TIMEOUT,
            }))
            .map(|_| ())
            .map_err(|err| Error::lifecycle("flush", err))
    }

    /// Records a generic measurement with a unit.
    ///
    /// The measurement goes to the gauge named `name`. Its unit is fixed on
    /// first use, so a different `unit` later on fails with
    /// [`Error::InvalidArgument`].
    pub fn record_metric(
        &self,
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        attributes: Vec<KeyValue>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.dispatch(Command::RecordMetric(RecordMetric {
            name: name.into(),
            value,
            unit: unit.into(),
            attributes,
            timestamp: SystemTime::now(),
        }))
    }

    /// Adds `value` to the counter `name`.
    pub fn increment_counter(
        &self,
        name: impl Into<String>,
        value: u64,
        attributes: Vec<KeyValue>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.dispatch(Command::RecordCounter(RecordCounter {
            name: name.into(),
            value,
            attributes,
        }))
    }

    /// Records the current value of the gauge `name`.
    pub fn record_gauge(
        &self,
        name: impl Into<String>,
        value: f64,
        attributes: Vec<KeyValue>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.dispatch(Command::RecordGauge(RecordGauge {
            name: name.into(),
            value,
            attributes,
        }))
    }

    /// Records `value` into the histogram `name`.
    pub fn record_histogram(
        &self,
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        attributes: Vec<KeyValue>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.dispatch(Command::RecordHistogram(RecordHistogram {
            name: name.into(),
            value,
            unit: unit.into(),
            attributes,
        }))
    }

    /// Emits a log record stamped with the current time.
    pub fn log(
        &self,
        severity: LogSeverity,
        message: impl Into<String>,
        attributes: Vec<KeyValue>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.dispatch(Command::EmitLog(EmitLog::new(severity, message, attributes)))
    }

    /// Emits a [`LogSeverity::Debug`] record.
    pub fn log_debug(&self, message: impl Into<String>, attributes: Vec<KeyValue>) -> Result<()> {
        self.log(LogSeverity::Debug, message, attributes)
    }

    /// Emits a [`LogSeverity::Info`] record.
    pub fn log_info(&self, message: impl Into<String>, attributes: Vec<KeyValue>) -> Result<()> {
        self.log(LogSeverity::Info, message, attributes)
    }

    /// Emits a [`LogSeverity::Warn`] record.
    pub fn log_warn(&self, message: impl Into<String>, attributes: Vec<KeyValue>) -> Result<()> {
        self.log(LogSeverity::Warn, message, attributes)
    }

    /// Emits a [`LogSeverity::Error`] record.
    pub fn log_error(&self, message: impl Into<String>, attributes: Vec<KeyValue>) -> Result<()> {
        self.log(LogSeverity::Error, message, attributes)
    }

    /// Emits several records at once, e.g. ones built with [`EmitLog::with_trace_context`].
    pub fn log_batch(&self, logs: Vec<EmitLog>) -> Result<()> {
        self.ensure_initialized()?;
        self.dispatch(Command::EmitBatchLogs(EmitBatchLogs { logs }))
    }

    /// Starts a root span and returns its id.
    pub fn start_span(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Result<String> {
        self.start(StartSpan {
            name: name.into(),
            kind,
            attributes,
            parent_id: None,
        })
    }

    /// Starts a span under the active span `parent_id` and returns its id.
    pub fn start_child_span(
        &self,
        parent_id: impl Into<String>,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Result<String> {
        self.start(StartSpan {
            name: name.into(),
            kind,
            attributes,
            parent_id: Some(parent_id.into()),
        })
    }

    /// Ends the span `span_id`, marking it failed when `error` is set.
    pub fn end_span(&self, span_id: &str, error: Option<&str>) -> Result<()> {
        self.ensure_initialized()?;
        self.dispatch(Command::EndSpan(EndSpan {
            span_id: span_id.to_string(),
            error: error.map(str::to_string),
        }))
    }

    /// Adds an event to the open span `span_id`.
    pub fn add_span_event(
        &self,
        span_id: &str,
        name: impl Into<String>,
        attributes: Vec<KeyValue>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.dispatch(Command::AddSpanEvent(AddSpanEvent {
            span_id: span_id.to_string(),
            name: name.into(),
            attributes,
            timestamp: SystemTime::now(),
        }))
    }

    fn start(&self, command: StartSpan) -> Result<String> {
        self.ensure_initialized()?;
        match self.handler.handle(Command::StartSpan(command))? {
            Response::SpanStarted(span_id) => Ok(span_id),
            Response::Done => Err(Error::ExportSetup(
                "handler did not return a span id".into(),
            )),
        }
    }

    // The lock is released before dispatching: an emission that passed this
    // check may still race a concurrent shutdown.
    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn dispatch(&self, command: Command) -> Result<()> {
        self.handler.handle(command).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingHandler {
        commands: Mutex<Vec<&'static str>>,
        fail_initialize: bool,
        fail_shutdown: Mutex<bool>,
    }

    impl RecordingHandler {
        fn kinds(&self) -> Vec<&'static str> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl CommandHandler for RecordingHandler {
        fn handle(&self, command: Command) -> Result<Response> {
            self.commands.lock().unwrap().push(command.kind());
            match command {
                Command::InitializeSdk(_) if self.fail_initialize => {
                    Err(Error::ExportSetup("collector unreachable".into()))
                }
                Command::ShutdownSdk(ShutdownSdk { timeout }) if *self.fail_shutdown.lock().unwrap() => {
                    Err(Error::Timeout {
                        operation: "shutdown",
                        timeout,
                    })
                }
                Command::StartSpan(_) => Ok(Response::SpanStarted("00f067aa0ba902b7".into())),
                _ => Ok(Response::Done),
            }
        }
    }

    fn config() -> TelemetryConfig {
        TelemetryConfig::new(
            Credentials::new("tfk_x", "tfs_y").unwrap(),
            "localhost:4317",
            "svc",
        )
    }

    fn client(handler: &Arc<RecordingHandler>) -> Client {
        Client::with_handler(config(), handler.clone()).unwrap()
    }

    #[test]
    fn lifecycle_transitions() {
        let handler = Arc::new(RecordingHandler::default());
        let client = client(&handler);
        assert!(!client.is_initialized());

        client.initialize().unwrap();
        assert!(client.is_initialized());

        client.shutdown().unwrap();
        assert!(!client.is_initialized());

        client.initialize().unwrap();
        assert!(client.is_initialized());
        assert_eq!(
            handler.kinds(),
            vec!["InitializeSdk", "ShutdownSdk", "InitializeSdk"]
        );
    }

    #[test]
    fn emission_before_initialize_has_no_side_effect() {
        let handler = Arc::new(RecordingHandler::default());
        let client = client(&handler);

        let results = vec![
            client.record_metric("m", 1.0, "ms", vec![]),
            client.increment_counter("c", 1, vec![]),
            client.record_gauge("g", 1.0, vec![]),
            client.record_histogram("h", 1.0, "ms", vec![]),
            client.log_info("hello", vec![]),
            client.log_warn("hello", vec![]),
            client.log_error("hello", vec![]),
            client.log_batch(vec![EmitLog::new(LogSeverity::Info, "x", vec![])]),
            client.start_span("s", SpanKind::Internal, vec![]).map(|_| ()),
            client.end_span("00f067aa0ba902b7", None),
            client.add_span_event("00f067aa0ba902b7", "e", vec![]),
            client.flush(),
        ];
        for result in results {
            assert!(matches!(result, Err(Error::NotInitialized)));
        }
        assert!(handler.kinds().is_empty());
    }

    #[test]
    fn second_initialize_is_rejected() {
        let handler = Arc::new(RecordingHandler::default());
        let client = client(&handler);
        client.initialize().unwrap();
        assert!(matches!(client.initialize(), Err(Error::AlreadyInitialized)));
        assert!(client.is_initialized());
        assert_eq!(handler.kinds(), vec!["InitializeSdk"]);
    }

    #[test]
    fn shutdown_without_initialize_is_a_noop() {
        let handler = Arc::new(RecordingHandler::default());
        let client = client(&handler);
        assert!(client.shutdown().is_ok());
        assert!(handler.kinds().is_empty());
    }

    #[test]
    fn failed_initialize_keeps_client_uninitialized() {
        let handler = Arc::new(RecordingHandler {
            fail_initialize: true,
            ..Default::default()
        });
        let client = client(&handler);
        let err = client.initialize().unwrap_err();
        assert!(err.to_string().starts_with("failed to initialize SDK"));
        assert!(matches!(err.root_cause(), Error::ExportSetup(_)));
        assert!(!client.is_initialized());
    }

    #[test]
    fn failed_shutdown_can_be_retried() {
        let handler = Arc::new(RecordingHandler::default());
        let client = client(&handler);
        client.initialize().unwrap();

        *handler.fail_shutdown.lock().unwrap() = true;
        let err = client.shutdown().unwrap_err();
        assert!(matches!(
            err.root_cause(),
            Error::Timeout { timeout, .. } if *timeout == SHUTDOWN_TIMEOUT
        ));
        assert!(client.is_initialized());

        *handler.fail_shutdown.lock().unwrap() = false;
        client.shutdown().unwrap();
        assert!(!client.is_initialized());
    }

    #[test]
    fn emissions_dispatch_matching_commands() {
        let handler = Arc::new(RecordingHandler::default());
        let client = client(&handler);
        client.initialize().unwrap();

        let span_id = client.start_span("op", SpanKind::Server, vec![]).unwrap();
        assert_eq!(span_id, "00f067aa0ba902b7");
        client.add_span_event(&span_id, "checkpoint", vec![]).unwrap();
        client.end_span(&span_id, Some("boom")).unwrap();
        client.increment_counter("requests", 1, vec![]).unwrap();
        client.log_info("done", vec![]).unwrap();
        client.flush().unwrap();

        assert_eq!(
            handler.kinds(),
            vec![
                "InitializeSdk",
                "StartSpan",
                "AddSpanEvent",
                "EndSpan",
                "RecordCounter",
                "EmitLog",
                "FlushTelemetry"
            ]
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config();
        config.with_endpoint("");
        let handler = Arc::new(RecordingHandler::default());
        assert!(matches!(
            Client::with_handler(config, handler),
            Err(Error::Configuration(_))
        ));
    }
}
