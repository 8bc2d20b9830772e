use std::sync::Arc;
use xray_tree_protocol::{RawTrace, TraceId};

/// Result of a batch trace lookup
#[derive(Clone, Debug, Default)]
pub struct BatchGetTraces {
    /// Traces the backend knows about; unknown IDs are simply absent
    pub traces: Vec<RawTrace>,
    /// IDs the backend did not get to in this call and expects to be asked again
    pub unprocessed_trace_ids: Vec<TraceId>,
}

/// Tracing backend that serves raw traces by ID.
///
/// This mirrors X-Ray's `BatchGetTraces`: each returned trace carries its
/// segment documents still JSON-encoded.
pub trait TraceSource {
    fn batch_get_traces(&self, trace_ids: &[TraceId]) -> Result<BatchGetTraces, SourceError>;
}

impl<S: TraceSource + ?Sized> TraceSource for &S {
    fn batch_get_traces(&self, trace_ids: &[TraceId]) -> Result<BatchGetTraces, SourceError> {
        (**self).batch_get_traces(trace_ids)
    }
}

impl<S: TraceSource + ?Sized> TraceSource for Arc<S> {
    fn batch_get_traces(&self, trace_ids: &[TraceId]) -> Result<BatchGetTraces, SourceError> {
        (**self).batch_get_traces(trace_ids)
    }
}

impl<S: TraceSource + ?Sized> TraceSource for Box<S> {
    fn batch_get_traces(&self, trace_ids: &[TraceId]) -> Result<BatchGetTraces, SourceError> {
        (**self).batch_get_traces(trace_ids)
    }
}

/// Backend failure unrelated to trace availability (credentials, network, throttling)
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}
