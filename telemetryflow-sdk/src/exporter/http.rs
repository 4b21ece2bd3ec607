use super::{ExporterSettings, KEY_ID_HEADER};
use crate::error::Result;
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithHttpConfig};
use std::collections::HashMap;

pub(super) fn span_exporter(settings: &ExporterSettings) -> Result<opentelemetry_otlp::SpanExporter> {
    let builder = configure(opentelemetry_otlp::SpanExporter::builder().with_http(), settings);
    Ok(builder.build()?)
}

pub(super) fn metric_exporter(
    settings: &ExporterSettings,
) -> Result<opentelemetry_otlp::MetricExporter> {
    let builder = configure(
        opentelemetry_otlp::MetricExporter::builder().with_http(),
        settings,
    );
    Ok(builder.build()?)
}

pub(super) fn log_exporter(settings: &ExporterSettings) -> Result<opentelemetry_otlp::LogExporter> {
    let builder = configure(opentelemetry_otlp::LogExporter::builder().with_http(), settings);
    Ok(builder.build()?)
}

fn configure<B>(builder: B, settings: &ExporterSettings) -> B
where
    B: WithHttpConfig + WithExportConfig,
{
    let builder = builder
        .with_endpoint(settings.endpoint())
        .with_protocol(Protocol::HttpBinary)
        .with_timeout(settings.timeout())
        .with_headers(headers(settings));

    if settings.is_compression_enabled() {
        builder.with_compression(Compression::Gzip)
    } else {
        builder
    }
}

fn headers(settings: &ExporterSettings) -> HashMap<String, String> {
    HashMap::from([
        ("Authorization".to_string(), settings.authorization().to_string()),
        (KEY_ID_HEADER.to_string(), settings.key_id().to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Protocol as TransportProtocol, Signal, TelemetryConfig};
    use crate::credentials::Credentials;

    fn settings(signal: Signal) -> ExporterSettings {
        let mut config = TelemetryConfig::new(
            Credentials::new("tfk_abc", "tfs_xyz").unwrap(),
            "localhost:4318",
            "svc",
        );
        config
            .with_protocol(TransportProtocol::Http)
            .with_insecure(true);
        ExporterSettings::for_signal(&config, signal).unwrap()
    }

    #[test]
    fn headers_carry_credentials() {
        let headers = headers(&settings(Signal::Logs));
        assert_eq!(headers["Authorization"], "Bearer tfk_abc:tfs_xyz");
        assert_eq!(headers[KEY_ID_HEADER], "tfk_abc");
    }

    #[test]
    fn builds_exporters_for_every_signal() {
        assert!(span_exporter(&settings(Signal::Traces)).is_ok());
        assert!(metric_exporter(&settings(Signal::Metrics)).is_ok());
        assert!(log_exporter(&settings(Signal::Logs)).is_ok());
    }
}
