//! Fluent construction of a [`Client`] from explicit values and/or the
//! process environment.
//!
//! Loaders that read a variable with no sensible default (the API key id and
//! secret) do not fail on their own: the problem is recorded and reported by
//! [`TelemetryBuilder::build`] together with every other missing
//! prerequisite.
use crate::client::Client;
use crate::config::{
    BatchSettings, Protocol, RateLimit, RetryPolicy, Signal, TelemetryConfig, DEFAULT_DATACENTER,
    DEFAULT_ENVIRONMENT, DEFAULT_SERVICE_NAMESPACE,
};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::handler::CommandHandler;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// API key id.
pub const TELEMETRYFLOW_API_KEY_ID: &str = "TELEMETRYFLOW_API_KEY_ID";
/// API key secret.
pub const TELEMETRYFLOW_API_KEY_SECRET: &str = "TELEMETRYFLOW_API_KEY_SECRET";
/// Collector endpoint as `host:port` or a full URL.
pub const TELEMETRYFLOW_ENDPOINT: &str = "TELEMETRYFLOW_ENDPOINT";
/// Default collector endpoint.
pub const TELEMETRYFLOW_ENDPOINT_DEFAULT: &str = "api.telemetryflow.id:4317";
/// Service name.
pub const TELEMETRYFLOW_SERVICE_NAME: &str = "TELEMETRYFLOW_SERVICE_NAME";
/// Default service name.
pub const TELEMETRYFLOW_SERVICE_NAME_DEFAULT: &str = "unknown_service";
/// Service version.
pub const TELEMETRYFLOW_SERVICE_VERSION: &str = "TELEMETRYFLOW_SERVICE_VERSION";
/// Default service version.
pub const TELEMETRYFLOW_SERVICE_VERSION_DEFAULT: &str = "1.0.0";
/// Service namespace.
pub const TELEMETRYFLOW_SERVICE_NAMESPACE: &str = "TELEMETRYFLOW_SERVICE_NAMESPACE";
/// Collector id.
pub const TELEMETRYFLOW_COLLECTOR_ID: &str = "TELEMETRYFLOW_COLLECTOR_ID";
/// Collector name.
pub const TELEMETRYFLOW_COLLECTOR_NAME: &str = "TELEMETRYFLOW_COLLECTOR_NAME";
/// Default collector name.
pub const TELEMETRYFLOW_COLLECTOR_NAME_DEFAULT: &str = "telemetryflow-sdk";
/// Datacenter name.
pub const TELEMETRYFLOW_DATACENTER: &str = "TELEMETRYFLOW_DATACENTER";
/// Transport protocol, `grpc` or `http`.
pub const TELEMETRYFLOW_PROTOCOL: &str = "TELEMETRYFLOW_PROTOCOL";
/// Disables TLS when `true`.
pub const TELEMETRYFLOW_INSECURE: &str = "TELEMETRYFLOW_INSECURE";
/// Deployment environment, checked first.
pub const ENV: &str = "ENV";
/// Deployment environment, checked when [`ENV`] is unset.
pub const ENVIRONMENT: &str = "ENVIRONMENT";

/// Builder for a TelemetryFlow [`Client`].
///
/// ```no_run
/// use telemetryflow_sdk::TelemetryBuilder;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), telemetryflow_sdk::Error> {
/// let client = TelemetryBuilder::new()
///     .with_api_key("tfk_abc", "tfs_xyz")
///     .with_endpoint("localhost:4317")
///     .with_service("checkout", "1.4.2")
///     .with_insecure(true)
///     .build()?;
/// client.initialize()?;
/// # Ok(())
/// # }
/// ```
#[must_use = "builders do nothing unless .build() is called"]
pub struct TelemetryBuilder {
    api_key_id: Option<String>,
    api_key_secret: Option<String>,
    endpoint: Option<String>,
    service_name: Option<String>,
    service_version: Option<String>,
    service_namespace: String,
    environment: String,
    datacenter: String,
    protocol: Protocol,
    insecure: bool,
    timeout: Option<Duration>,
    retry: RetryPolicy,
    compression: bool,
    signals: (bool, bool, bool),
    batch: BatchSettings,
    rate_limit: RateLimit,
    custom_attributes: BTreeMap<String, String>,
    collector_id: Option<String>,
    collector_name: Option<String>,
    collector_description: Option<String>,
    collector_hostname: Option<String>,
    collector_tags: BTreeMap<String, String>,
    enrich_resources: bool,
    use_v2_api: bool,
    v2_only: bool,
    v2_endpoints: HashMap<Signal, String>,
    errors: Vec<Error>,
}

impl fmt::Debug for TelemetryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryBuilder")
            .field("api_key_id", &self.api_key_id)
            .field("api_key_secret", &self.api_key_secret.as_ref().map(|_| "****"))
            .field("endpoint", &self.endpoint)
            .field("service_name", &self.service_name)
            .field("service_version", &self.service_version)
            .field("environment", &self.environment)
            .field("protocol", &self.protocol)
            .field("insecure", &self.insecure)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        TelemetryBuilder {
            api_key_id: None,
            api_key_secret: None,
            endpoint: None,
            service_name: None,
            service_version: None,
            service_namespace: DEFAULT_SERVICE_NAMESPACE.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            datacenter: DEFAULT_DATACENTER.to_string(),
            protocol: Protocol::Grpc,
            insecure: false,
            timeout: None,
            retry: RetryPolicy::default(),
            compression: true,
            signals: (true, true, true),
            batch: BatchSettings::default(),
            rate_limit: RateLimit::default(),
            custom_attributes: BTreeMap::new(),
            collector_id: None,
            collector_name: None,
            collector_description: None,
            collector_hostname: None,
            collector_tags: BTreeMap::new(),
            enrich_resources: true,
            use_v2_api: true,
            v2_only: false,
            v2_endpoints: HashMap::new(),
            errors: Vec::new(),
        }
    }
}

impl TelemetryBuilder {
    /// Creates an empty builder; credentials, endpoint and service name must
    /// still be supplied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every `*_from_env` loader.
    pub fn with_auto_configuration(self) -> Self {
        self.with_api_key_from_env()
            .with_endpoint_from_env()
            .with_service_from_env()
            .with_service_namespace_from_env()
            .with_environment_from_env()
            .with_collector_id_from_env()
            .with_collector_name_from_env()
            .with_datacenter_from_env()
            .with_protocol_from_env()
            .with_insecure_from_env()
    }

    /// Sets the API key id and secret.
    pub fn with_api_key(mut self, key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        self.api_key_id = Some(key_id.into());
        self.api_key_secret = Some(key_secret.into());
        self
    }

    /// Reads [`TELEMETRYFLOW_API_KEY_ID`] and [`TELEMETRYFLOW_API_KEY_SECRET`].
    ///
    /// A missing variable is recorded and reported by [`build`](Self::build).
    pub fn with_api_key_from_env(mut self) -> Self {
        match env_var(TELEMETRYFLOW_API_KEY_ID) {
            Some(key_id) => self.api_key_id = Some(key_id),
            None => self.errors.push(Error::Configuration(format!(
                "{TELEMETRYFLOW_API_KEY_ID} environment variable is not set"
            ))),
        }
        match env_var(TELEMETRYFLOW_API_KEY_SECRET) {
            Some(key_secret) => self.api_key_secret = Some(key_secret),
            None => self.errors.push(Error::Configuration(format!(
                "{TELEMETRYFLOW_API_KEY_SECRET} environment variable is not set"
            ))),
        }
        self
    }

    /// Sets the collector endpoint, as `host:port` or a full URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Reads [`TELEMETRYFLOW_ENDPOINT`], defaulting to [`TELEMETRYFLOW_ENDPOINT_DEFAULT`].
    pub fn with_endpoint_from_env(mut self) -> Self {
        self.endpoint = Some(
            env_var(TELEMETRYFLOW_ENDPOINT)
                .unwrap_or_else(|| TELEMETRYFLOW_ENDPOINT_DEFAULT.to_string()),
        );
        self
    }

    /// Sets the service name and version.
    pub fn with_service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self.service_version = Some(version.into());
        self
    }

    /// Reads [`TELEMETRYFLOW_SERVICE_NAME`] and [`TELEMETRYFLOW_SERVICE_VERSION`].
    pub fn with_service_from_env(mut self) -> Self {
        self.service_name = Some(
            env_var(TELEMETRYFLOW_SERVICE_NAME)
                .unwrap_or_else(|| TELEMETRYFLOW_SERVICE_NAME_DEFAULT.to_string()),
        );
        self.service_version = Some(
            env_var(TELEMETRYFLOW_SERVICE_VERSION)
                .unwrap_or_else(|| TELEMETRYFLOW_SERVICE_VERSION_DEFAULT.to_string()),
        );
        self
    }

    /// Defaults to `telemetryflow`.
    pub fn with_service_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.service_namespace = namespace.into();
        self
    }

    /// Reads [`TELEMETRYFLOW_SERVICE_NAMESPACE`], defaulting to `telemetryflow`.
    pub fn with_service_namespace_from_env(mut self) -> Self {
        self.service_namespace = env_var(TELEMETRYFLOW_SERVICE_NAMESPACE)
            .unwrap_or_else(|| DEFAULT_SERVICE_NAMESPACE.to_string());
        self
    }

    /// Sets the deployment environment. Defaults to `production`.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Reads [`ENV`], then [`ENVIRONMENT`], defaulting to `production`.
    pub fn with_environment_from_env(mut self) -> Self {
        self.environment = env_var(ENV)
            .or_else(|| env_var(ENVIRONMENT))
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        self
    }

    /// Defaults to `default`.
    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = datacenter.into();
        self
    }

    /// Reads [`TELEMETRYFLOW_DATACENTER`], defaulting to `default`.
    pub fn with_datacenter_from_env(mut self) -> Self {
        self.datacenter =
            env_var(TELEMETRYFLOW_DATACENTER).unwrap_or_else(|| DEFAULT_DATACENTER.to_string());
        self
    }

    /// Sets the collector id reported as a resource attribute.
    pub fn with_collector_id(mut self, id: impl Into<String>) -> Self {
        self.collector_id = Some(id.into());
        self
    }

    /// Reads [`TELEMETRYFLOW_COLLECTOR_ID`]; the id stays unset when absent.
    pub fn with_collector_id_from_env(mut self) -> Self {
        if let Some(id) = env_var(TELEMETRYFLOW_COLLECTOR_ID) {
            self.collector_id = Some(id);
        }
        self
    }

    /// Sets the collector name reported as a resource attribute.
    pub fn with_collector_name(mut self, name: impl Into<String>) -> Self {
        self.collector_name = Some(name.into());
        self
    }

    /// Reads [`TELEMETRYFLOW_COLLECTOR_NAME`], defaulting to [`TELEMETRYFLOW_COLLECTOR_NAME_DEFAULT`].
    pub fn with_collector_name_from_env(mut self) -> Self {
        self.collector_name = Some(
            env_var(TELEMETRYFLOW_COLLECTOR_NAME)
                .unwrap_or_else(|| TELEMETRYFLOW_COLLECTOR_NAME_DEFAULT.to_string()),
        );
        self
    }

    /// Sets the collector description.
    pub fn with_collector_description(mut self, description: impl Into<String>) -> Self {
        self.collector_description = Some(description.into());
        self
    }

    /// Overrides the detected host name.
    pub fn with_collector_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.collector_hostname = Some(hostname.into());
        self
    }

    /// Adds a collector tag; a repeated key replaces the earlier value.
    pub fn with_collector_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.collector_tags.insert(key.into(), value.into());
        self
    }

    /// Controls whether collector identity is added to the resource.
    pub fn with_enrich_resources(mut self, enrich: bool) -> Self {
        self.enrich_resources = enrich;
        self
    }

    /// Selects the transport. Defaults to [`Protocol::Grpc`].
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Shorthand for `with_protocol(Protocol::Grpc)`.
    pub fn with_grpc(self) -> Self {
        self.with_protocol(Protocol::Grpc)
    }

    /// Shorthand for `with_protocol(Protocol::Http)`.
    pub fn with_http(self) -> Self {
        self.with_protocol(Protocol::Http)
    }

    /// Reads [`TELEMETRYFLOW_PROTOCOL`]; an unsupported value is recorded as an error.
    pub fn with_protocol_from_env(mut self) -> Self {
        if let Some(value) = env_var(TELEMETRYFLOW_PROTOCOL) {
            match value.parse() {
                Ok(protocol) => self.protocol = protocol,
                Err(err) => self.errors.push(err),
            }
        }
        self
    }

    /// Disables TLS for `host:port` endpoints.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Reads [`TELEMETRYFLOW_INSECURE`]; a value that is not a boolean is recorded as an error.
    pub fn with_insecure_from_env(mut self) -> Self {
        if let Some(value) = env_var(TELEMETRYFLOW_INSECURE) {
            match value.trim().to_ascii_lowercase().parse::<bool>() {
                Ok(insecure) => self.insecure = insecure,
                Err(_) => self.errors.push(Error::Configuration(format!(
                    "{TELEMETRYFLOW_INSECURE} must be 'true' or 'false', got '{value}'"
                ))),
            }
        }
        self
    }

    /// Sets the per-export timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Configures retries of failed exports.
    pub fn with_retry(mut self, enabled: bool, max_retries: u32, backoff: Duration) -> Self {
        self.retry = RetryPolicy {
            enabled,
            max_retries,
            backoff,
        };
        self
    }

    /// Enables gzip compression. On by default.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Selects which signals are exported.
    pub fn with_signals(mut self, metrics: bool, logs: bool, traces: bool) -> Self {
        self.signals = (metrics, logs, traces);
        self
    }

    /// Exports metrics only.
    pub fn with_metrics_only(self) -> Self {
        self.with_signals(true, false, false)
    }

    /// Exports traces only.
    pub fn with_traces_only(self) -> Self {
        self.with_signals(false, false, true)
    }

    /// Exports logs only.
    pub fn with_logs_only(self) -> Self {
        self.with_signals(false, true, false)
    }

    /// Sets the batch export delay and maximum batch size.
    pub fn with_batch_settings(mut self, timeout: Duration, max_size: usize) -> Self {
        self.batch = BatchSettings { timeout, max_size };
        self
    }

    /// Records a request rate limit in the configuration.
    pub fn with_rate_limit(mut self, requests: u32, per: Duration) -> Self {
        self.rate_limit = RateLimit { requests, per };
        self
    }

    /// Adds a resource attribute.
    pub fn with_custom_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }

    /// Selects the `/v2` HTTP paths. On by default.
    pub fn with_v2_api(mut self, enabled: bool) -> Self {
        self.use_v2_api = enabled;
        self
    }

    /// Restricts exports to the v2 endpoint scheme.
    pub fn with_v2_only(mut self) -> Self {
        self.use_v2_api = true;
        self.v2_only = true;
        self
    }

    /// Overrides the v2 path used for `signal`.
    pub fn with_v2_endpoint(mut self, signal: Signal, path: impl Into<String>) -> Self {
        self.v2_endpoints.insert(signal, path.into());
        self
    }

    /// Validates the accumulated settings and assembles a [`TelemetryConfig`].
    pub fn build_config(self) -> Result<TelemetryConfig> {
        if !self.errors.is_empty() {
            return Err(Error::Builder(self.errors));
        }

        let mut missing = Vec::new();
        let has_credentials = self.api_key_id.as_deref().is_some_and(|id| !id.is_empty())
            && self.api_key_secret.as_deref().is_some_and(|s| !s.is_empty());
        if !has_credentials {
            missing.push(Error::Configuration(
                "credentials are required (set an API key id and secret)".into(),
            ));
        }
        let endpoint = self.endpoint.filter(|e| !e.trim().is_empty());
        if endpoint.is_none() {
            missing.push(Error::Configuration("endpoint is required".into()));
        }
        let service_name = self.service_name.filter(|s| !s.trim().is_empty());
        if service_name.is_none() {
            missing.push(Error::Configuration("service name is required".into()));
        }

        let (Some(endpoint), Some(service_name), true) = (endpoint, service_name, missing.is_empty())
        else {
            return Err(if missing.len() == 1 {
                missing.remove(0)
            } else {
                Error::Builder(missing)
            });
        };

        let credentials = Credentials::new(
            self.api_key_id.unwrap_or_default(),
            self.api_key_secret.unwrap_or_default(),
        )?;

        let mut config = TelemetryConfig::new(credentials, endpoint, service_name);
        config
            .with_service_version(self.service_version.unwrap_or_default())
            .with_service_namespace(self.service_namespace)
            .with_environment(self.environment)
            .with_datacenter(self.datacenter)
            .with_protocol(self.protocol)
            .with_insecure(self.insecure)
            .with_retry(self.retry.enabled, self.retry.max_retries, self.retry.backoff)
            .with_compression(self.compression)
            .with_signals(self.signals.0, self.signals.1, self.signals.2)
            .with_batch_settings(self.batch.timeout, self.batch.max_size)
            .with_rate_limit(self.rate_limit.requests, self.rate_limit.per)
            .with_enrich_resources(self.enrich_resources)
            .with_v2_api(self.use_v2_api)
            .with_v2_only(self.v2_only);
        if let Some(timeout) = self.timeout {
            config.with_timeout(timeout);
        }
        for (key, value) in self.custom_attributes {
            config.with_custom_attribute(key, value);
        }
        if let Some(id) = self.collector_id {
            config.with_collector_id(id);
        }
        if let Some(name) = self.collector_name {
            config.with_collector_name(name);
        }
        if let Some(description) = self.collector_description {
            config.with_collector_description(description);
        }
        if let Some(hostname) = self.collector_hostname {
            config.with_collector_hostname(hostname);
        }
        for (key, value) in self.collector_tags {
            config.with_collector_tag(key, value);
        }
        for (signal, path) in self.v2_endpoints {
            config.with_v2_endpoint(signal, path);
        }

        config.validate()?;
        Ok(config)
    }

    /// Builds a [`Client`] that exports through OTLP.
    pub fn build(self) -> Result<Client> {
        Client::new(self.build_config()?)
    }

    /// Builds a [`Client`] that dispatches to `handler`.
    pub fn build_with_handler(self, handler: Arc<dyn CommandHandler>) -> Result<Client> {
        Client::with_handler(self.build_config()?, handler)
    }

    /// Same as [`build`](Self::build), but panics on failure.
    ///
    /// Intended for program start-up code that has no way to recover.
    pub fn must_build(self) -> Client {
        match self.build() {
            Ok(client) => client,
            Err(err) => panic!("failed to build TelemetryFlow client: {err}"),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
