//! # TelemetryFlow SDK
//!
//! Client library for sending metrics, logs and traces to a TelemetryFlow
//! collector over OTLP, using gRPC (default) or HTTP.
//!
//! A [`Client`] is built from a [`TelemetryConfig`], most conveniently via
//! [`TelemetryBuilder`], and must be [initialized](Client::initialize) before
//! use and [shut down](Client::shutdown) explicitly when done. Every client
//! call is turned into a [`Command`] and executed by a [`CommandHandler`];
//! the default [`TelemetryHandler`] drives the OpenTelemetry SDK and builds
//! its exporters through an [`ExporterFactory`].
//!
//! ```no_run
//! use opentelemetry::KeyValue;
//! use telemetryflow_sdk::TelemetryBuilder;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), telemetryflow_sdk::Error> {
//! let client = TelemetryBuilder::new()
//!     .with_api_key("tfk_my_key", "tfs_my_secret")
//!     .with_endpoint("collector.example.com:4317")
//!     .with_service("checkout", "1.4.2")
//!     .with_environment("staging")
//!     .build()?;
//!
//! client.initialize()?;
//! client.log_info("checkout started", vec![KeyValue::new("cart.items", 3)])?;
//! client.record_histogram("checkout.duration", 182.0, "ms", vec![])?;
//! client.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! The gRPC transport is built on tonic and needs a multi-threaded tokio
//! runtime to be running when the client is initialized; without one,
//! [`Client::initialize`] fails with [`Error::ExportSetup`].
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod builder;
pub mod client;
pub mod command;
pub mod config;
pub mod credentials;
pub mod error;
pub mod exporter;
pub mod handler;
#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

pub use crate::builder::{
    TelemetryBuilder, ENV, ENVIRONMENT, TELEMETRYFLOW_API_KEY_ID, TELEMETRYFLOW_API_KEY_SECRET,
    TELEMETRYFLOW_COLLECTOR_ID, TELEMETRYFLOW_COLLECTOR_NAME, TELEMETRYFLOW_DATACENTER,
    TELEMETRYFLOW_ENDPOINT, TELEMETRYFLOW_INSECURE, TELEMETRYFLOW_PROTOCOL,
    TELEMETRYFLOW_SERVICE_NAME, TELEMETRYFLOW_SERVICE_NAMESPACE, TELEMETRYFLOW_SERVICE_VERSION,
};
pub use crate::client::{Client, LifecycleState, FLUSH_TIMEOUT, SHUTDOWN_TIMEOUT};
pub use crate::command::{Command, EmitLog, LogSeverity, Response};
pub use crate::config::{Protocol, Signal, TelemetryConfig};
pub use crate::credentials::Credentials;
pub use crate::error::{Error, Result};
pub use crate::exporter::{BackoffSettings, ExporterFactory, ExporterSettings, OtlpExporterFactory};
pub use crate::handler::{CommandHandler, TelemetryHandler};
