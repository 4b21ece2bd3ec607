use super::{ExporterSettings, KEY_ID_HEADER};
use crate::error::{Error, Result};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::transport::ClientTlsConfig;

const AUTHORIZATION: &str = "authorization";

/// Sets the `authorization` metadata on every outgoing gRPC request.
///
/// The value is marked sensitive, so it is not printed by `Debug`.
#[derive(Clone, Debug)]
pub struct AuthInterceptor {
    authorization: AsciiMetadataValue,
}

impl AuthInterceptor {
    /// Fails with [`Error::ExportSetup`] if `authorization` is not a valid
    /// metadata value.
    pub fn new(authorization: &str) -> Result<Self> {
        Ok(AuthInterceptor {
            authorization: sensitive_value(authorization)?,
        })
    }
}

impl tonic::service::Interceptor for AuthInterceptor {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> std::result::Result<tonic::Request<()>, tonic::Status> {
        request
            .metadata_mut()
            .insert(AUTHORIZATION, self.authorization.clone());
        Ok(request)
    }
}

pub(super) fn span_exporter(settings: &ExporterSettings) -> Result<opentelemetry_otlp::SpanExporter> {
    let builder = configure(opentelemetry_otlp::SpanExporter::builder().with_tonic(), settings)?;
    Ok(builder.build()?)
}

pub(super) fn metric_exporter(
    settings: &ExporterSettings,
) -> Result<opentelemetry_otlp::MetricExporter> {
    let builder = configure(
        opentelemetry_otlp::MetricExporter::builder().with_tonic(),
        settings,
    )?;
    Ok(builder.build()?)
}

pub(super) fn log_exporter(settings: &ExporterSettings) -> Result<opentelemetry_otlp::LogExporter> {
    let builder = configure(opentelemetry_otlp::LogExporter::builder().with_tonic(), settings)?;
    Ok(builder.build()?)
}

fn configure<B>(builder: B, settings: &ExporterSettings) -> Result<B>
where
    B: WithTonicConfig + WithExportConfig,
{
    // tonic creates its lazy channel on the current runtime and panics
    // without one.
    tokio::runtime::Handle::try_current().map_err(|_| {
        Error::ExportSetup("gRPC export requires a running tokio runtime".into())
    })?;

    let mut builder = builder
        .with_endpoint(settings.endpoint())
        .with_timeout(settings.timeout())
        .with_metadata(metadata(settings)?)
        .with_interceptor(AuthInterceptor::new(settings.authorization())?);

    if settings.is_compression_enabled() {
        builder = builder.with_compression(Compression::Gzip);
    }
    if settings.is_tls_enabled() {
        builder = builder.with_tls_config(ClientTlsConfig::new().with_native_roots());
    }
    Ok(builder)
}

fn metadata(settings: &ExporterSettings) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::with_capacity(2);
    metadata.insert(AUTHORIZATION, sensitive_value(settings.authorization())?);
    metadata.insert(
        KEY_ID_HEADER,
        AsciiMetadataValue::try_from(settings.key_id())
            .map_err(|err| Error::ExportSetup(format!("invalid API key id metadata: {err}")))?,
    );
    Ok(metadata)
}

fn sensitive_value(value: &str) -> Result<AsciiMetadataValue> {
    let mut value = AsciiMetadataValue::try_from(value)
        .map_err(|err| Error::ExportSetup(format!("invalid authorization metadata: {err}")))?;
    value.set_sensitive(true);
    Ok(value)
}
