//! The telemetry configuration aggregate.
//!
//! A [`TelemetryConfig`] is created from validated [`Credentials`] plus the
//! collector endpoint and service name, and then tuned through its `with_*`
//! mutators. Mutators change the configuration in place and return it again
//! so calls can be chained:
//!
//! ```
//! use std::time::Duration;
//! use telemetryflow_sdk::{Credentials, Protocol, TelemetryConfig};
//!
//! let credentials = Credentials::new("tfk_id", "tfs_secret").unwrap();
//! let mut config = TelemetryConfig::new(credentials, "localhost:4318", "checkout");
//! config
//!     .with_protocol(Protocol::Http)
//!     .with_insecure(true)
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert!(config.validate().is_ok());
//! ```
use crate::credentials::Credentials;
use crate::error::{Error, Result};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Default export timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of export retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay between export retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);
/// Default delay between two batch exports.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Default maximum number of items per batch export.
pub const DEFAULT_BATCH_MAX_SIZE: usize = 512;
/// Default number of requests allowed per rate limit window.
pub const DEFAULT_RATE_LIMIT: u32 = 1000;
/// Default service namespace.
pub const DEFAULT_SERVICE_NAMESPACE: &str = "telemetryflow";
/// Default datacenter name.
pub const DEFAULT_DATACENTER: &str = "default";
/// Default deployment environment.
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Transport protocol used to reach the collector.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "lowercase"))]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Protocol {
    /// OTLP over gRPC.
    #[default]
    Grpc,
    /// OTLP over HTTP with protobuf payloads.
    Http,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Grpc => write!(f, "grpc"),
            Protocol::Http => write!(f, "http"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grpc" => Ok(Protocol::Grpc),
            "http" | "http/protobuf" => Ok(Protocol::Http),
            other => Err(Error::ExportSetup(format!("unsupported protocol '{other}'"))),
        }
    }
}

/// One of the three telemetry signals.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "lowercase"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Signal {
    /// Metric data points.
    Metrics,
    /// Log records.
    Logs,
    /// Spans.
    Traces,
}

impl Signal {
    /// Every signal, in export order.
    pub const ALL: [Signal; 3] = [Signal::Traces, Signal::Metrics, Signal::Logs];

    /// The lowercase signal name, also used as the OTLP path segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
            Signal::Traces => "traces",
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry behavior handed to the exporters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Whether failed exports are retried at all.
    pub enabled: bool,
    /// Maximum number of retries per export.
    pub max_retries: u32,
    /// Base delay between retries.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Batching applied by the span/log processors and the metric reader.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchSettings {
    /// Delay between two consecutive exports.
    pub timeout: Duration,
    /// Maximum number of items in one export.
    pub max_size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            timeout: DEFAULT_BATCH_TIMEOUT,
            max_size: DEFAULT_BATCH_MAX_SIZE,
        }
    }
}

/// Client-side request budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimit {
    /// Requests allowed per window.
    pub requests: u32,
    /// Length of the window.
    pub per: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit {
            requests: DEFAULT_RATE_LIMIT,
            per: Duration::from_secs(60),
        }
    }
}

/// Identity of the collector instance this client reports as.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CollectorIdentity {
    /// Collector id.
    pub id: Option<String>,
    /// Human readable collector name.
    pub name: Option<String>,
    /// Free form description.
    pub description: Option<String>,
    /// Host name reported as `host.name`.
    pub hostname: Option<String>,
    /// Additional tags attached to the resource.
    pub tags: BTreeMap<String, String>,
    /// Whether the identity fields are added to the resource at all.
    pub enrich_resources: bool,
}

impl Default for CollectorIdentity {
    fn default() -> Self {
        CollectorIdentity {
            id: None,
            name: None,
            description: None,
            hostname: sysinfo::System::host_name(),
            tags: BTreeMap::new(),
            enrich_resources: true,
        }
    }
}

/// Settings for the collector's v2 endpoint scheme.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct V2Settings {
    /// Target the v2 paths instead of the default ones where possible.
    pub use_v2_api: bool,
    /// Never fall back to the default path scheme.
    pub v2_only: bool,
    /// Per-signal path overrides for the v2 scheme.
    pub endpoints: HashMap<Signal, String>,
}

impl Default for V2Settings {
    fn default() -> Self {
        V2Settings {
            use_v2_api: true,
            v2_only: false,
            endpoints: HashMap::new(),
        }
    }
}

impl V2Settings {
    /// The v2 path for `signal`, honoring overrides.
    pub fn path(&self, signal: Signal) -> String {
        self.endpoints
            .get(&signal)
            .cloned()
            .unwrap_or_else(|| format!("/v2/{signal}"))
    }
}

/// Every setting that controls how telemetry is exported.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    credentials: Credentials,
    endpoint: String,
    service_name: String,
    service_version: String,
    service_namespace: String,
    environment: String,
    datacenter: String,
    protocol: Protocol,
    insecure: bool,
    timeout: Duration,
    retry: RetryPolicy,
    compression: bool,
    signals: HashSet<Signal>,
    batch: BatchSettings,
    rate_limit: RateLimit,
    custom_attributes: BTreeMap<String, String>,
    collector: CollectorIdentity,
    v2: V2Settings,
}

impl TelemetryConfig {
    /// Creates a configuration with default settings.
    pub fn new(
        credentials: Credentials,
        endpoint: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        TelemetryConfig {
            credentials,
            endpoint: endpoint.into(),
            service_name: service_name.into(),
            service_version: String::new(),
            service_namespace: DEFAULT_SERVICE_NAMESPACE.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            datacenter: DEFAULT_DATACENTER.to_string(),
            protocol: Protocol::Grpc,
            insecure: false,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            compression: true,
            signals: Signal::ALL.into_iter().collect(),
            batch: BatchSettings::default(),
            rate_limit: RateLimit::default(),
            custom_attributes: BTreeMap::new(),
            collector: CollectorIdentity::default(),
            v2: V2Settings::default(),
        }
    }

    /// Checks the invariants a client relies on.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::Configuration("endpoint is required".into()));
        }
        if self.service_name.trim().is_empty() {
            return Err(Error::Configuration("service name is required".into()));
        }
        Ok(())
    }

    /// Returns `true` if `signal` will be exported.
    pub fn is_signal_enabled(&self, signal: Signal) -> bool {
        self.signals.contains(&signal)
    }

    /// API key pair.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Collector endpoint as configured, before scheme resolution.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Reported as `service.name`.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Reported as `service.version`.
    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    /// Reported as `service.namespace`.
    pub fn service_namespace(&self) -> &str {
        &self.service_namespace
    }

    /// Reported as `deployment.environment`.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Datacenter name.
    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    /// Export transport.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Whether TLS is disabled for `host:port` endpoints.
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    /// Per-export timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retry settings for failed exports.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Whether payloads are gzip compressed.
    pub fn is_compression_enabled(&self) -> bool {
        self.compression
    }

    /// The enabled signals in export order.
    pub fn enabled_signals(&self) -> impl Iterator<Item = Signal> + '_ {
        Signal::ALL
            .into_iter()
            .filter(|signal| self.signals.contains(signal))
    }

    /// Batch export delay and size.
    pub fn batch_settings(&self) -> BatchSettings {
        self.batch
    }

    /// Configured request rate limit.
    pub fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    /// Extra resource attributes.
    pub fn custom_attributes(&self) -> &BTreeMap<String, String> {
        &self.custom_attributes
    }

    /// Collector identity added to the resource.
    pub fn collector(&self) -> &CollectorIdentity {
        &self.collector
    }

    /// v2 endpoint settings.
    pub fn v2(&self) -> &V2Settings {
        &self.v2
    }

    /// Replaces the API key pair.
    pub fn with_credentials(&mut self, credentials: Credentials) -> &mut Self {
        self.credentials = credentials;
        self
    }

    /// Sets the collector endpoint.
    pub fn with_endpoint(&mut self, endpoint: impl Into<String>) -> &mut Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the service name.
    pub fn with_service_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.service_name = name.into();
        self
    }

    /// Sets the service version.
    pub fn with_service_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.service_version = version.into();
        self
    }

    /// Sets the service namespace.
    pub fn with_service_namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.service_namespace = namespace.into();
        self
    }

    /// Sets the deployment environment.
    pub fn with_environment(&mut self, environment: impl Into<String>) -> &mut Self {
        self.environment = environment.into();
        self
    }

    /// Sets the datacenter name.
    pub fn with_datacenter(&mut self, datacenter: impl Into<String>) -> &mut Self {
        self.datacenter = datacenter.into();
        self
    }

    /// Selects the export transport.
    pub fn with_protocol(&mut self, protocol: Protocol) -> &mut Self {
        self.protocol = protocol;
        self
    }

    /// Disables TLS towards the collector.
    pub fn with_insecure(&mut self, insecure: bool) -> &mut Self {
        self.insecure = insecure;
        self
    }

    /// Sets the per-export timeout.
    pub fn with_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry(&mut self, enabled: bool, max_retries: u32, backoff: Duration) -> &mut Self {
        self.retry = RetryPolicy {
            enabled,
            max_retries,
            backoff,
        };
        self
    }

    /// Enables or disables gzip compression.
    pub fn with_compression(&mut self, enabled: bool) -> &mut Self {
        self.compression = enabled;
        self
    }

    /// Replaces the enabled signal set.
    pub fn with_signals(&mut self, metrics: bool, logs: bool, traces: bool) -> &mut Self {
        self.signals = [
            (Signal::Metrics, metrics),
            (Signal::Logs, logs),
            (Signal::Traces, traces),
        ]
        .into_iter()
        .filter_map(|(signal, enabled)| enabled.then_some(signal))
        .collect();
        self
    }

    /// Sets the batch export delay and maximum batch size.
    pub fn with_batch_settings(&mut self, timeout: Duration, max_size: usize) -> &mut Self {
        self.batch = BatchSettings { timeout, max_size };
        self
    }

    /// Sets the request rate limit.
    pub fn with_rate_limit(&mut self, requests: u32, per: Duration) -> &mut Self {
        self.rate_limit = RateLimit { requests, per };
        self
    }

    /// Adds a resource attribute, replacing any previous value for `key`.
    pub fn with_custom_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the collector id.
    pub fn with_collector_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.collector.id = Some(id.into());
        self
    }

    /// Sets the collector name.
    pub fn with_collector_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.collector.name = Some(name.into());
        self
    }

    /// Sets the collector description.
    pub fn with_collector_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.collector.description = Some(description.into());
        self
    }

    /// Overrides the detected host name.
    pub fn with_collector_hostname(&mut self, hostname: impl Into<String>) -> &mut Self {
        self.collector.hostname = Some(hostname.into());
        self
    }

    /// Adds a collector tag, replacing any previous value for `key`.
    pub fn with_collector_tag(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.collector.tags.insert(key.into(), value.into());
        self
    }

    /// Controls whether the collector identity is added to the resource.
    pub fn with_enrich_resources(&mut self, enrich: bool) -> &mut Self {
        self.collector.enrich_resources = enrich;
        self
    }

    /// Selects the `/v2` HTTP paths.
    pub fn with_v2_api(&mut self, enabled: bool) -> &mut Self {
        self.v2.use_v2_api = enabled;
        self
    }

    /// Restricts exports to the v2 scheme. Enabling it also enables the v2 API.
    pub fn with_v2_only(&mut self, v2_only: bool) -> &mut Self {
        self.v2.v2_only = v2_only;
        if v2_only {
            self.v2.use_v2_api = true;
        }
        self
    }

    /// Overrides the v2 path used for `signal`.
    pub fn with_v2_endpoint(&mut self, signal: Signal, path: impl Into<String>) -> &mut Self {
        self.v2.endpoints.insert(signal, path.into());
        self
    }
}
