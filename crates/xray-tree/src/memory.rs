use dashmap::DashMap;
use parking_lot::Mutex;
use xray_tree_protocol::{RawSegmentDocument, RawTrace, TraceId};

use crate::source::{BatchGetTraces, SourceError, TraceSource};

/// In-memory tracing backend.
///
/// Segments can be ingested while another thread polls, which makes it a
/// stand-in for X-Ray's eventually consistent storage in tests and fixtures.
#[derive(Default)]
pub struct MemoryTraceSource {
    traces: DashMap<TraceId, StoredTrace>,
    deferred: DashMap<TraceId, usize>,
    failure: Mutex<Option<String>>,
    requests: Mutex<Vec<Vec<TraceId>>>,
}

#[derive(Default)]
struct StoredTrace {
    duration: Option<f64>,
    limit_exceeded: bool,
    segments: Vec<RawSegmentDocument>,
}

impl MemoryTraceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from complete raw traces
    pub fn from_traces(traces: impl IntoIterator<Item = RawTrace>) -> Self {
        let source = Self::new();
        for trace in traces {
            source.insert_trace(trace);
        }
        source
    }

    /// Replace a trace wholesale
    pub fn insert_trace(&self, trace: RawTrace) {
        self.traces.insert(
            TraceId::new(trace.id),
            StoredTrace {
                duration: trace.duration,
                limit_exceeded: trace.limit_exceeded.unwrap_or(false),
                segments: trace.segments,
            },
        );
    }

    /// Ingest segment documents into a trace, creating it if needed.
    ///
    /// A document whose segment ID is already stored replaces the old one,
    /// the way an in-progress segment is later re-sent with its end time.
    pub fn ingest(
        &self,
        trace_id: &TraceId,
        documents: impl IntoIterator<Item = RawSegmentDocument>,
    ) -> usize {
        let mut stored = self.traces.entry(trace_id.clone()).or_default();
        let mut count = 0;

        for document in documents {
            match stored.segments.iter_mut().find(|d| d.id == document.id) {
                Some(existing) => *existing = document,
                None => stored.segments.push(document),
            }
            count += 1;
        }

        count
    }

    pub fn set_limit_exceeded(&self, trace_id: &TraceId, limit_exceeded: bool) {
        if let Some(mut stored) = self.traces.get_mut(trace_id) {
            stored.limit_exceeded = limit_exceeded;
        }
    }

    pub fn set_duration(&self, trace_id: &TraceId, duration: f64) {
        if let Some(mut stored) = self.traces.get_mut(trace_id) {
            stored.duration = Some(duration);
        }
    }

    /// Report `trace_id` as unprocessed for the next `rounds` batch calls that ask for it
    pub fn defer(&self, trace_id: &TraceId, rounds: usize) {
        self.deferred.insert(trace_id.clone(), rounds);
    }

    /// Make every following batch call fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    pub fn remove(&self, trace_id: &TraceId) -> bool {
        self.traces.remove(trace_id).is_some()
    }

    /// Number of batch calls served so far
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// IDs requested by each batch call, oldest first
    pub fn requests(&self) -> Vec<Vec<TraceId>> {
        self.requests.lock().clone()
    }

    fn take_deferral(&self, trace_id: &TraceId) -> bool {
        let Some(mut remaining) = self.deferred.get_mut(trace_id) else {
            return false;
        };
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}

impl TraceSource for MemoryTraceSource {
    fn batch_get_traces(&self, trace_ids: &[TraceId]) -> Result<BatchGetTraces, SourceError> {
        self.requests.lock().push(trace_ids.to_vec());

        if let Some(message) = self.failure.lock().clone() {
            return Err(SourceError::new(message));
        }

        let mut output = BatchGetTraces::default();
        for trace_id in trace_ids {
            if self.take_deferral(trace_id) {
                output.unprocessed_trace_ids.push(trace_id.clone());
                continue;
            }

            if let Some(stored) = self.traces.get(trace_id) {
                output.traces.push(RawTrace {
                    id: trace_id.as_str().to_string(),
                    duration: stored.duration,
                    limit_exceeded: Some(stored.limit_exceeded),
                    segments: stored.segments.clone(),
                });
            }
        }

        Ok(output)
    }
}
