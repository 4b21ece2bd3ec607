//! Exporter construction.
//!
//! A [`TelemetryHandler`](crate::TelemetryHandler) never builds exporters
//! itself. It resolves one [`ExporterSettings`] per enabled signal and asks
//! an [`ExporterFactory`] for the exporter. [`OtlpExporterFactory`] talks
//! OTLP over gRPC or HTTP; tests swap in an in-memory factory.
use crate::config::{Protocol, Signal, TelemetryConfig};
use crate::error::{Error, Result};
use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

mod http;
mod tonic;

pub use self::tonic::AuthInterceptor;

/// Metadata key carrying the API key id on every export request.
pub const KEY_ID_HEADER: &str = "x-telemetryflow-key-id";

const HTTP_SCHEME: &str = "http://";
const HTTPS_SCHEME: &str = "https://";

/// Retry delays derived from the configured [`RetryPolicy`](crate::config::RetryPolicy).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BackoffSettings {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
    /// Total time spent retrying before giving up.
    pub max_elapsed: Duration,
}

/// Fully resolved transport settings for one signal.
///
/// Only obtainable through [`ExporterSettings::for_signal`], so a factory can
/// rely on the endpoint being valid for the protocol.
#[derive(Clone, PartialEq, Eq)]
pub struct ExporterSettings {
    signal: Signal,
    protocol: Protocol,
    endpoint: String,
    timeout: Duration,
    authorization: String,
    key_id: String,
    tls: bool,
    compression: bool,
    retry: Option<BackoffSettings>,
}

impl ExporterSettings {
    /// Resolves the settings used to export `signal`.
    ///
    /// Fails with [`Error::ExportSetup`] when the v2 options cannot be
    /// satisfied by the selected protocol.
    pub fn for_signal(config: &TelemetryConfig, signal: Signal) -> Result<Self> {
        let endpoint = resolve_endpoint(config, signal)?;
        let tls = endpoint.starts_with(HTTPS_SCHEME);
        let retry_policy = config.retry_policy();
        let retry = retry_policy.enabled.then(|| BackoffSettings {
            initial_interval: retry_policy.backoff,
            max_interval: retry_policy.backoff.saturating_mul(2),
            max_elapsed: retry_policy.backoff.saturating_mul(retry_policy.max_retries),
        });

        Ok(ExporterSettings {
            signal,
            protocol: config.protocol(),
            endpoint,
            timeout: config.timeout(),
            authorization: config.credentials().authorization_header(),
            key_id: config.credentials().key_id().to_string(),
            tls,
            compression: config.is_compression_enabled(),
            retry,
        })
    }

    /// Signal the exporter is built for.
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Transport to export over.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The target URL. For HTTP this includes the signal path.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Per-export timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The `authorization` value, `Bearer <key id>:<key secret>`.
    pub fn authorization(&self) -> &str {
        &self.authorization
    }

    /// API key id, also sent as its own header.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Whether the endpoint uses `https`.
    pub fn is_tls_enabled(&self) -> bool {
        self.tls
    }

    /// Whether payloads are gzip compressed.
    pub fn is_compression_enabled(&self) -> bool {
        self.compression
    }

    /// `None` when retries are disabled.
    pub fn retry(&self) -> Option<BackoffSettings> {
        self.retry
    }
}

impl Debug for ExporterSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterSettings")
            .field("signal", &self.signal)
            .field("protocol", &self.protocol)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("key_id", &self.key_id)
            .field("tls", &self.tls)
            .field("compression", &self.compression)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Builds the exporters a [`TelemetryHandler`](crate::TelemetryHandler)
/// attaches to its providers.
pub trait ExporterFactory: Send + Sync + Debug + 'static {
    /// Exporter behind the batch span processor.
    type SpanExporter: opentelemetry_sdk::trace::SpanExporter + 'static;
    /// Exporter behind the periodic metric reader.
    type MetricExporter: opentelemetry_sdk::metrics::exporter::PushMetricExporter;
    /// Exporter behind the batch log processor.
    type LogExporter: opentelemetry_sdk::logs::LogExporter + 'static;

    /// Builds the exporter for [`Signal::Traces`].
    fn span_exporter(&self, settings: &ExporterSettings) -> Result<Self::SpanExporter>;

    /// Builds the exporter for [`Signal::Metrics`].
    fn metric_exporter(&self, settings: &ExporterSettings) -> Result<Self::MetricExporter>;

    /// Builds the exporter for [`Signal::Logs`].
    fn log_exporter(&self, settings: &ExporterSettings) -> Result<Self::LogExporter>;
}

/// Exports over OTLP, using tonic for [`Protocol::Grpc`] and a blocking
/// reqwest client for [`Protocol::Http`].
///
/// Building a gRPC exporter requires a running tokio runtime; without one
/// it fails with [`Error::ExportSetup`](crate::Error::ExportSetup).
#[derive(Clone, Copy, Debug, Default)]
pub struct OtlpExporterFactory;

impl ExporterFactory for OtlpExporterFactory {
    type SpanExporter = opentelemetry_otlp::SpanExporter;
    type MetricExporter = opentelemetry_otlp::MetricExporter;
    type LogExporter = opentelemetry_otlp::LogExporter;

    fn span_exporter(&self, settings: &ExporterSettings) -> Result<Self::SpanExporter> {
        log_exporter_build(settings);
        match settings.protocol {
            Protocol::Grpc => tonic::span_exporter(settings),
            Protocol::Http => http::span_exporter(settings),
        }
    }

    fn metric_exporter(&self, settings: &ExporterSettings) -> Result<Self::MetricExporter> {
        log_exporter_build(settings);
        match settings.protocol {
            Protocol::Grpc => tonic::metric_exporter(settings),
            Protocol::Http => http::metric_exporter(settings),
        }
    }

    fn log_exporter(&self, settings: &ExporterSettings) -> Result<Self::LogExporter> {
        log_exporter_build(settings);
        match settings.protocol {
            Protocol::Grpc => tonic::log_exporter(settings),
            Protocol::Http => http::log_exporter(settings),
        }
    }
}

// opentelemetry-otlp retries with its own fixed policy, the configured
// backoff is only reported here.
fn log_exporter_build(settings: &ExporterSettings) {
    tracing::debug!(
        name: "ExporterBuild",
        signal = settings.signal.as_str(),
        protocol = %settings.protocol,
        endpoint = settings.endpoint.as_str(),
        tls = settings.tls,
        compression = settings.compression,
        retry = ?settings.retry,
    );
}

fn resolve_endpoint(config: &TelemetryConfig, signal: Signal) -> Result<String> {
    let v2 = config.v2();
    if v2.v2_only && !v2.use_v2_api {
        return Err(Error::ExportSetup(
            "v2_only requires the v2 API to be enabled".into(),
        ));
    }

    let base = base_url(config.endpoint(), config.is_insecure());
    match config.protocol() {
        Protocol::Grpc if v2.v2_only => Err(Error::ExportSetup(
            "v2_only is not supported over gRPC".into(),
        )),
        Protocol::Grpc => Ok(base),
        Protocol::Http => {
            let path = if v2.use_v2_api {
                v2.path(signal)
            } else {
                format!("/v1/{signal}")
            };
            Ok(join_path(&base, &path))
        }
    }
}

fn base_url(endpoint: &str, insecure: bool) -> String {
    if endpoint.starts_with(HTTP_SCHEME) || endpoint.starts_with(HTTPS_SCHEME) {
        return endpoint.to_string();
    }
    let scheme = if insecure { HTTP_SCHEME } else { HTTPS_SCHEME };
    format!("{scheme}{endpoint}")
}

fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credentials;
    use rstest::rstest;

    fn config(endpoint: &str) -> TelemetryConfig {
        TelemetryConfig::new(
            Credentials::new("tfk_abc", "tfs_xyz").unwrap(),
            endpoint,
            "svc",
        )
    }

    #[rstest]
    #[case("localhost:4317", false, "https://localhost:4317", true)]
    #[case("localhost:4317", true, "http://localhost:4317", false)]
    #[case("http://collector:4317", false, "http://collector:4317", false)]
    #[case("https://collector:4317", true, "https://collector:4317", true)]
    fn grpc_endpoint_gets_a_scheme(
        #[case] endpoint: &str,
        #[case] insecure: bool,
        #[case] expected: &str,
        #[case] tls: bool,
    ) {
        let mut config = config(endpoint);
        config.with_insecure(insecure);
        let settings = ExporterSettings::for_signal(&config, Signal::Traces).unwrap();
        assert_eq!(settings.endpoint(), expected);
        assert_eq!(settings.is_tls_enabled(), tls);
    }

    #[rstest]
    #[case(Signal::Traces, "http://localhost:4318/v1/traces")]
    #[case(Signal::Metrics, "http://localhost:4318/v1/metrics")]
    #[case(Signal::Logs, "http://localhost:4318/v1/logs")]
    fn http_v1_paths(#[case] signal: Signal, #[case] expected: &str) {
        let mut config = config("localhost:4318");
        config
            .with_protocol(Protocol::Http)
            .with_insecure(true)
            .with_v2_api(false);
        let settings = ExporterSettings::for_signal(&config, signal).unwrap();
        assert_eq!(settings.endpoint(), expected);
    }

    #[test]
    fn http_v2_paths_honor_overrides() {
        let mut config = config("https://collector.example.com/");
        config
            .with_protocol(Protocol::Http)
            .with_v2_api(true)
            .with_v2_endpoint(Signal::Logs, "/ingest/logs");

        let traces = ExporterSettings::for_signal(&config, Signal::Traces).unwrap();
        assert_eq!(traces.endpoint(), "https://collector.example.com/v2/traces");
        let logs = ExporterSettings::for_signal(&config, Signal::Logs).unwrap();
        assert_eq!(logs.endpoint(), "https://collector.example.com/ingest/logs");
    }

    #[test]
    fn v2_only_over_grpc_is_rejected() {
        let mut config = config("localhost:4317");
        config.with_v2_only(true);
        assert!(matches!(
            ExporterSettings::for_signal(&config, Signal::Metrics),
            Err(Error::ExportSetup(_))
        ));
    }

    #[test]
    fn v2_only_without_v2_api_is_rejected() {
        let mut config = config("localhost:4318");
        config
            .with_protocol(Protocol::Http)
            .with_v2_only(true)
            .with_v2_api(false);
        assert!(matches!(
            ExporterSettings::for_signal(&config, Signal::Logs),
            Err(Error::ExportSetup(_))
        ));
    }

    #[test]
    fn retry_policy_translates_to_backoff() {
        let mut config = config("localhost:4317");
        config.with_retry(true, 4, Duration::from_secs(2));
        let settings = ExporterSettings::for_signal(&config, Signal::Traces).unwrap();
        assert_eq!(
            settings.retry(),
            Some(BackoffSettings {
                initial_interval: Duration::from_secs(2),
                max_interval: Duration::from_secs(4),
                max_elapsed: Duration::from_secs(8),
            })
        );

        config.with_retry(false, 4, Duration::from_secs(2));
        let settings = ExporterSettings::for_signal(&config, Signal::Traces).unwrap();
        assert_eq!(settings.retry(), None);
    }

    #[test]
    fn authorization_is_carried_but_not_printed() {
        let settings =
            ExporterSettings::for_signal(&config("localhost:4317"), Signal::Traces).unwrap();
        assert_eq!(settings.authorization(), "Bearer tfk_abc:tfs_xyz");
        assert_eq!(settings.key_id(), "tfk_abc");
        assert!(!format!("{settings:?}").contains("tfs_xyz"));
    }
}
