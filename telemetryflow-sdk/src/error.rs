//! Errors returned by the TelemetryFlow client and its export pipeline.
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type used for failures coming from the transport layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized `Result` type for TelemetryFlow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring, initializing or using a [`Client`].
///
/// [`Client`]: crate::Client
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A required configuration field is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every error accumulated by the builder before `build` was called.
    #[error("builder errors: {}", JoinedErrors(.0))]
    Builder(Vec<Error>),

    /// The API key id or secret is malformed.
    #[error("invalid credentials: {0}")]
    CredentialFormat(String),

    /// The client has not been initialized yet.
    #[error("telemetry client is not initialized")]
    NotInitialized,

    /// The client was already initialized.
    #[error("telemetry client is already initialized")]
    AlreadyInitialized,

    /// An exporter or provider could not be set up for the requested signal.
    #[error("export setup failed: {0}")]
    ExportSetup(String),

    /// Failure reported by the underlying OTLP transport or SDK.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// A bounded operation did not complete in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// No active span is registered under the given identifier.
    #[error("unknown span id '{0}'")]
    UnknownSpan(String),

    /// An argument could not be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A handler failure annotated with the lifecycle operation that caused it.
    #[error("failed to {operation} SDK: {source}")]
    Lifecycle {
        /// The lifecycle operation, e.g. `initialize`.
        operation: &'static str,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn lifecycle(operation: &'static str, source: Error) -> Self {
        Error::Lifecycle {
            operation,
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, skipping any lifecycle context.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Lifecycle { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<opentelemetry_otlp::ExporterBuildError> for Error {
    fn from(err: opentelemetry_otlp::ExporterBuildError) -> Self {
        Error::Transport(Box::new(err))
    }
}

struct JoinedErrors<'a>(&'a [Error]);

impl fmt::Display for JoinedErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_error_lists_every_entry() {
        let err = Error::Builder(vec![
            Error::Configuration("TELEMETRYFLOW_API_KEY_ID is not set".into()),
            Error::Configuration("TELEMETRYFLOW_API_KEY_SECRET is not set".into()),
        ]);
        let message = err.to_string();
        assert!(message.contains("TELEMETRYFLOW_API_KEY_ID"));
        assert!(message.contains("TELEMETRYFLOW_API_KEY_SECRET"));
    }

    #[test]
    fn lifecycle_context_wraps_and_unwraps() {
        let err = Error::lifecycle(
            "shutdown",
            Error::Timeout {
                operation: "shutdown",
                timeout: Duration::from_secs(30),
            },
        );
        assert!(err.to_string().starts_with("failed to shutdown SDK: "));
        assert!(matches!(err.root_cause(), Error::Timeout { .. }));
    }
}
