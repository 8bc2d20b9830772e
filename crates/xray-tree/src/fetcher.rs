use std::collections::BTreeMap;
use xray_tree_protocol::{Trace, TraceId};

use crate::error::{Error, Result};
use crate::source::TraceSource;

/// Fetcher configuration
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// How many batch calls to make while the backend keeps reporting
    /// unprocessed IDs before giving up on them
    pub max_unprocessed_rounds: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_unprocessed_rounds: 10,
        }
    }
}

/// Fetches and normalizes traces from a [`TraceSource`]
pub struct TraceFetcher<S> {
    source: S,
    config: FetchConfig,
}

impl<S: TraceSource> TraceFetcher<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, FetchConfig::default())
    }

    pub fn with_config(source: S, config: FetchConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch several traces at once.
    ///
    /// IDs the backend has no record of are absent from the result. IDs that
    /// stay unprocessed for more than `max_unprocessed_rounds` calls are
    /// treated the same way.
    pub fn fetch_traces(&self, trace_ids: &[TraceId]) -> Result<BTreeMap<TraceId, Trace>> {
        let mut traces = BTreeMap::new();
        let mut pending: Vec<TraceId> = Vec::with_capacity(trace_ids.len());
        for id in trace_ids {
            if !pending.contains(id) {
                pending.push(id.clone());
            }
        }

        let mut rounds = 0;
        while !pending.is_empty() && rounds < self.config.max_unprocessed_rounds {
            let batch = self.source.batch_get_traces(&pending)?;
            rounds += 1;

            for raw in batch.traces {
                let trace_id = TraceId::new(raw.id.clone());
                if traces.contains_key(&trace_id) {
                    continue;
                }
                let trace = Trace::from_raw(raw).map_err(|source| Error::Decode {
                    trace_id: trace_id.clone(),
                    source,
                })?;
                traces.insert(trace_id, trace);
            }

            pending = batch
                .unprocessed_trace_ids
                .into_iter()
                .filter(|id| !traces.contains_key(id))
                .collect();

            if !pending.is_empty() {
                tracing::debug!(round = rounds, unprocessed = pending.len(), "backend deferred trace ids");
            }
        }

        if !pending.is_empty() {
            tracing::debug!(?pending, "giving up on unprocessed trace ids");
        }

        Ok(traces)
    }

    /// Fetch a single trace.
    ///
    /// Fails with [`Error::TraceNotFound`] when the backend has no record of
    /// the ID or has not ingested any of its segments yet.
    pub fn fetch_trace(&self, trace_id: &TraceId) -> Result<Trace> {
        let trace = self
            .fetch_traces(std::slice::from_ref(trace_id))?
            .remove(trace_id)
            .filter(|trace| !trace.segments.is_empty());

        trace.ok_or_else(|| Error::TraceNotFound {
            trace_id: trace_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTraceSource;
    use crate::segment_builder::SegmentBuilder;
    use xray_tree_protocol::RawSegmentDocument;

    fn source_with(trace_id: &str) -> MemoryTraceSource {
        let source = MemoryTraceSource::new();
        source.ingest(
            &TraceId::new(trace_id),
            [SegmentBuilder::new("a").origin("AWS::Lambda").into_document()],
        );
        source
    }

    #[test]
    fn fetches_known_trace() {
        let fetcher = TraceFetcher::new(source_with("1-abc-123"));
        let trace = fetcher.fetch_trace(&TraceId::new("1-abc-123")).unwrap();
        assert_eq!(trace.segments.len(), 1);
        assert_eq!(trace.segments[0].origin.as_deref(), Some("AWS::Lambda"));
    }

    #[test]
    fn unknown_trace_is_not_found() {
        let fetcher = TraceFetcher::new(source_with("1-abc-123"));
        let err = fetcher.fetch_trace(&TraceId::new("nonexistent")).unwrap_err();
        assert!(matches!(err, Error::TraceNotFound { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn empty_trace_is_not_found() {
        let source = MemoryTraceSource::new();
        source.ingest(&TraceId::new("1-abc-123"), Vec::<RawSegmentDocument>::new());
        let fetcher = TraceFetcher::new(source);
        let err = fetcher.fetch_trace(&TraceId::new("1-abc-123")).unwrap_err();
        assert!(matches!(err, Error::TraceNotFound { .. }));
    }

    #[test]
    fn keeps_asking_for_unprocessed_ids() {
        let source = source_with("1-abc-123");
        source.defer(&TraceId::new("1-abc-123"), 2);
        let fetcher = TraceFetcher::new(&source);

        let trace = fetcher.fetch_trace(&TraceId::new("1-abc-123")).unwrap();
        assert_eq!(trace.id.as_str(), "1-abc-123");
        assert_eq!(source.request_count(), 3);
    }

    #[test]
    fn gives_up_after_max_rounds() {
        let source = source_with("1-abc-123");
        source.defer(&TraceId::new("1-abc-123"), 100);
        let fetcher = TraceFetcher::with_config(
            &source,
            FetchConfig {
                max_unprocessed_rounds: 3,
            },
        );

        let err = fetcher.fetch_trace(&TraceId::new("1-abc-123")).unwrap_err();
        assert!(matches!(err, Error::TraceNotFound { .. }));
        assert_eq!(source.request_count(), 3);
    }

    #[test]
    fn backend_failures_are_fatal() {
        let source = source_with("1-abc-123");
        source.fail_with("AccessDeniedException: not authorized to perform xray:BatchGetTraces");
        let fetcher = TraceFetcher::new(&source);

        let err = fetcher.fetch_trace(&TraceId::new("1-abc-123")).unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("AccessDeniedException"));
    }

    #[test]
    fn undecodable_documents_are_fatal() {
        let source = MemoryTraceSource::new();
        source.ingest(
            &TraceId::new("1-abc-123"),
            [RawSegmentDocument {
                id: "a".to_string(),
                document: "{\"id\": 42".to_string(),
            }],
        );
        let fetcher = TraceFetcher::new(source);
        let err = fetcher.fetch_trace(&TraceId::new("1-abc-123")).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
        assert!(!err.is_transient());
    }
}
