//! Span instrumentation for builds.
//!
//! A [`Tracer`] is built once at process start from a [`TraceConfig`] and
//! handed by reference to whatever opens spans. It wraps an OpenTelemetry
//! SDK tracer provider whose batch processor ships ended spans to an
//! OTLP/HTTP collector as JSON.
//!
//! [`Span`] is a guard: it ends exactly once, either when [`Span::end`] is
//! called or when it goes out of scope, so a span never outlives the
//! operation it measures. [`SpanContext`] carries a parent into spawned
//! tasks. A disabled tracer hands out inert spans.

mod config;

pub use config::{DEFAULT_SERVICE_NAME, TRACES_PATH, TraceConfig};

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use opentelemetry::trace::{Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{self as sdktrace, TracerProvider};

use crate::error::{MultibuildError, Result};

/// Instrumentation scope of every span
pub const INSTRUMENTATION_SCOPE: &str = "multibuild";

/// Timeout for a single export request
pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct Pipeline {
    provider: TracerProvider,
    tracer: sdktrace::Tracer,
}

/// Handle for opening spans. Cheap to clone.
#[derive(Clone, Default)]
pub struct Tracer {
    pipeline: Option<Pipeline>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pipeline {
            Some(_) => f.write_str("Tracer(enabled)"),
            None => f.write_str("Tracer(disabled)"),
        }
    }
}

impl Tracer {
    /// A tracer whose spans record nothing.
    pub fn disabled() -> Self {
        Self { pipeline: None }
    }

    /// Builds the tracer described by `config`.
    ///
    /// Must be called inside a tokio runtime: the batch processor runs as a
    /// background task.
    pub fn from_config(config: &TraceConfig) -> Result<Self> {
        let Some(endpoint) = &config.endpoint else {
            return Ok(Self::disabled());
        };

        let http_client = reqwest::Client::builder()
            .timeout(EXPORT_TIMEOUT)
            .build()
            .map_err(|e| MultibuildError::Trace(format!("failed to build HTTP client: {}", e)))?;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_http_client(http_client)
            .with_protocol(Protocol::HttpJson)
            .with_endpoint(endpoint.clone())
            .with_timeout(EXPORT_TIMEOUT)
            .build()
            .map_err(|e| {
                MultibuildError::Trace(format!("invalid exporter for {}: {}", endpoint, e))
            })?;

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_resource(service_resource(&config.service_name))
            .build();

        log::debug!("Exporting spans to {} as {}", endpoint, config.service_name);
        Ok(Self::from_provider(provider))
    }

    fn from_provider(provider: TracerProvider) -> Self {
        let tracer = provider.tracer(INSTRUMENTATION_SCOPE);
        Self {
            pipeline: Some(Pipeline { provider, tracer }),
        }
    }

    /// A tracer that exports synchronously into memory.
    #[cfg(test)]
    pub(crate) fn in_memory() -> (Self, opentelemetry_sdk::testing::trace::InMemorySpanExporter)
    {
        let exporter = opentelemetry_sdk::testing::trace::InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (Self::from_provider(provider), exporter)
    }

    pub fn is_enabled(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Context for opening root spans.
    pub fn context(&self) -> SpanContext {
        SpanContext {
            tracer: self.pipeline.as_ref().map(|p| p.tracer.clone()),
            cx: Context::new(),
        }
    }

    /// Opens a root span, starting a new trace.
    pub fn span(&self, name: impl Into<Cow<'static, str>>) -> Span {
        self.context().child(name)
    }

    /// Flushes queued spans and stops the batch processor. Call once before
    /// the process exits.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };

        // Provider shutdown blocks until the batch task has drained
        let provider = pipeline.provider.clone();
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .map_err(|e| MultibuildError::Trace(format!("span shutdown task failed: {}", e)))?
            .map_err(|e| MultibuildError::Trace(e.to_string()))
    }
}

/// SDK defaults merged with `service.name`.
fn service_resource(service_name: &str) -> Resource {
    Resource::default().merge(&Resource::new([KeyValue::new(
        "service.name",
        service_name.to_string(),
    )]))
}

/// Identifies a parent span for new children. `Send` and cheap to clone, so
/// it can be moved into spawned tasks.
#[derive(Clone)]
pub struct SpanContext {
    tracer: Option<sdktrace::Tracer>,
    cx: Context,
}

impl fmt::Debug for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanContext")
            .field("span", self.cx.span().span_context())
            .finish()
    }
}

impl SpanContext {
    /// Opens a span under this context.
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> Span {
        let Some(tracer) = &self.tracer else {
            return Span {
                tracer: None,
                cx: None,
            };
        };

        let span = tracer.start_with_context(name, &self.cx);
        Span {
            tracer: Some(tracer.clone()),
            cx: Some(self.cx.with_span(span)),
        }
    }
}

/// An open span. Ends when dropped.
pub struct Span {
    tracer: Option<sdktrace::Tracer>,
    cx: Option<Context>,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cx {
            Some(cx) => f
                .debug_struct("Span")
                .field("context", cx.span().span_context())
                .finish(),
            None => f.write_str("Span(disabled)"),
        }
    }
}

impl Span {
    /// Context for opening children of this span.
    pub fn context(&self) -> SpanContext {
        SpanContext {
            tracer: self.tracer.clone(),
            cx: self.cx.clone().unwrap_or_default(),
        }
    }

    /// Opens a child span.
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> Span {
        self.context().child(name)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(cx) = &self.cx {
            cx.span()
                .set_attribute(KeyValue::new(key.into(), value.into()));
        }
    }

    pub fn set_ok(&mut self) {
        if let Some(cx) = &self.cx {
            cx.span().set_status(Status::Ok);
        }
    }

    pub fn record_error(&mut self, error: &dyn fmt::Display) {
        if let Some(cx) = &self.cx {
            cx.span().set_status(Status::error(error.to_string()));
        }
    }

    /// Ends the span now.
    pub fn end(self) {}
}

impl Drop for Span {
    fn drop(&mut self) {
        if let Some(cx) = self.cx.take() {
            cx.span().end();
        }
    }
}
