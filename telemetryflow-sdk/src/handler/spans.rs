use crate::error::{Error, Result};
use opentelemetry::trace::{Span as _, SpanContext};
use opentelemetry_sdk::trace::Span;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Spans started through the client and not ended yet, keyed by their
/// hex encoded span id.
#[derive(Debug, Default)]
pub(crate) struct SpanRegistry {
    spans: Mutex<HashMap<String, Span>>,
}

impl SpanRegistry {
    /// Registers `span` and returns the id it is reachable under.
    pub(crate) fn insert(&self, span: Span) -> String {
        let id = span.span_context().span_id().to_string();
        self.lock().insert(id.clone(), span);
        id
    }

    pub(crate) fn span_context(&self, id: &str) -> Result<SpanContext> {
        self.lock()
            .get(id)
            .map(|span| span.span_context().clone())
            .ok_or_else(|| Error::UnknownSpan(id.to_string()))
    }

    /// Runs `f` against the registered span without removing it.
    pub(crate) fn with_span<T>(&self, id: &str, f: impl FnOnce(&mut Span) -> T) -> Result<T> {
        let mut spans = self.lock();
        let span = spans
            .get_mut(id)
            .ok_or_else(|| Error::UnknownSpan(id.to_string()))?;
        Ok(f(span))
    }

    pub(crate) fn remove(&self, id: &str) -> Result<Span> {
        self.lock()
            .remove(id)
            .ok_or_else(|| Error::UnknownSpan(id.to_string()))
    }

    /// Ends every registered span and returns how many were open.
    pub(crate) fn end_all(&self) -> usize {
        let spans: Vec<Span> = self.lock().drain().map(|(_, span)| span).collect();
        let count = spans.len();
        for mut span in spans {
            span.end();
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Span>> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
