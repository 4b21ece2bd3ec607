use opentelemetry::trace::SpanKind;
use opentelemetry::KeyValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use telemetryflow_sdk::{
    Client, Command, CommandHandler, EmitLog, Error, LogSeverity, Response, TelemetryBuilder,
};

/// Counts commands per kind and hands out sequential span ids.
#[derive(Debug, Default)]
struct CountingHandler {
    counts: Mutex<HashMap<&'static str, usize>>,
    next_span: AtomicU64,
}

impl CountingHandler {
    fn count(&self, kind: &str) -> usize {
        self.counts.lock().unwrap().get(kind).copied().unwrap_or(0)
    }
}

impl CommandHandler for CountingHandler {
    fn handle(&self, command: Command) -> Result<Response, Error> {
        *self.counts.lock().unwrap().entry(command.kind()).or_default() += 1;
        match command {
            Command::StartSpan(_) => {
                let id = self.next_span.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Response::SpanStarted(format!("{id:016x}")))
            }
            _ => Ok(Response::Done),
        }
    }
}

fn client(handler: &Arc<CountingHandler>) -> Client {
    TelemetryBuilder::new()
        .with_api_key("tfk_integration", "tfs_integration")
        .with_endpoint("localhost:4317")
        .with_service("integration", "0.0.1")
        .with_insecure(true)
        .build_with_handler(handler.clone())
        .unwrap()
}

#[test]
fn full_session() {
    let handler = Arc::new(CountingHandler::default());
    let client = client(&handler);

    client.initialize().unwrap();
    let root = client
        .start_span("handle_request", SpanKind::Server, vec![])
        .unwrap();
    let child = client
        .start_child_span(&root, "query", SpanKind::Client, vec![KeyValue::new("db", "pg")])
        .unwrap();
    assert_ne!(root, child);

    client.add_span_event(&child, "rows", vec![KeyValue::new("count", 3)]).unwrap();
    client.end_span(&child, None).unwrap();
    client.end_span(&root, Some("timeout")).unwrap();
    client.record_metric("latency", 3.5, "ms", vec![]).unwrap();
    client.record_gauge("connections", 4.0, vec![]).unwrap();
    client.log(LogSeverity::Debug, "details", vec![]).unwrap();
    client.log_debug("more details", vec![]).unwrap();
    client
        .log_batch(vec![
            EmitLog::new(LogSeverity::Info, "a", vec![]),
            EmitLog::new(LogSeverity::Warn, "b", vec![]),
        ])
        .unwrap();
    client.flush().unwrap();
    client.shutdown().unwrap();

    assert_eq!(handler.count("StartSpan"), 2);
    assert_eq!(handler.count("EndSpan"), 2);
    assert_eq!(handler.count("EmitLog"), 2);
    assert_eq!(handler.count("EmitBatchLogs"), 1);
    assert_eq!(handler.count("ShutdownSdk"), 1);
}

#[test]
fn concurrent_initialize_succeeds_once() {
    let handler = Arc::new(CountingHandler::default());
    let client = Arc::new(client(&handler));

    let results: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.initialize())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|err| matches!(err, Error::AlreadyInitialized)));
    assert_eq!(handler.count("InitializeSdk"), 1);
}

#[test]
fn concurrent_emission_during_shutdown() {
    let handler = Arc::new(CountingHandler::default());
    let client = Arc::new(client(&handler));
    client.initialize().unwrap();

    let workers: Vec<_> = (0..4_i64)
        .map(|worker| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let mut ok = 0_usize;
                for i in 0..200_i64 {
                    match client.increment_counter(
                        "jobs",
                        1,
                        vec![KeyValue::new("worker", worker), KeyValue::new("i", i)],
                    ) {
                        Ok(()) => ok += 1,
                        Err(Error::NotInitialized) => {}
                        Err(err) => panic!("unexpected error {err}"),
                    }
                }
                ok
            })
        })
        .collect();

    client.shutdown().unwrap();
    let accepted: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

    assert!(!client.is_initialized());
    assert_eq!(handler.count("RecordCounter"), accepted);
    assert_eq!(handler.count("ShutdownSdk"), 1);
}

#[test]
fn builder_reports_missing_credentials() {
    let err = TelemetryBuilder::new()
        .with_endpoint("localhost:4317")
        .with_service("svc", "1.0.0")
        .build_with_handler(Arc::new(CountingHandler::default()))
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn grpc_initialize_without_runtime_fails_cleanly() {
    let client = TelemetryBuilder::new()
        .with_api_key("tfk_integration", "tfs_integration")
        .with_endpoint("localhost:4317")
        .with_service("integration", "0.0.1")
        .with_insecure(true)
        .with_grpc()
        .build()
        .unwrap();

    let err = client.initialize().unwrap_err();
    assert!(matches!(err.root_cause(), Error::ExportSetup(_)), "{err:?}");
    assert!(err.to_string().contains("tokio runtime"), "{err}");
    assert!(!client.is_initialized());
}
