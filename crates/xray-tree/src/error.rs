use xray_tree_protocol::{DocumentError, HeaderError, TraceId};

use crate::retry::{InvalidTimeout, RetryError, Transient};
use crate::source::SourceError;

/// Errors produced while fetching and assembling trace trees.
///
/// Variants for which [`Error::is_transient`] is true describe data that has
/// not finished arriving in the backend; the polling helpers retry those and
/// abort on everything else.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid tracing header: {0}")]
    MalformedHeader(#[from] HeaderError),

    #[error("trace {trace_id} not found")]
    TraceNotFound { trace_id: TraceId },

    #[error("no root segment found in trace {trace_id}")]
    RootNotFound { trace_id: TraceId },

    #[error("segment {segment_id} in trace {trace_id} references parent {parent_id} which has not been ingested yet")]
    ParentNotIngested {
        trace_id: TraceId,
        segment_id: String,
        parent_id: String,
    },

    #[error("found a segment {segment_id} with no parent {parent_id} in trace {trace_id}")]
    OrphanedSegment {
        trace_id: TraceId,
        segment_id: String,
        parent_id: String,
    },

    #[error("leaf segment {segment_id} in trace {trace_id} is still in progress")]
    SegmentInProgress { trace_id: TraceId, segment_id: String },

    #[error("child trace {trace_id} links back into the active chain {}", display_chain(.chain))]
    LinkCycleDetected { trace_id: TraceId, chain: Vec<TraceId> },

    #[error("timeout must be a non-negative number of seconds, got {0}")]
    InvalidTimeout(f64),

    #[error("failed to load trace {trace_id}: {source}")]
    Decode {
        trace_id: TraceId,
        #[source]
        source: DocumentError,
    },

    #[error("trace backend error: {0}")]
    Backend(#[from] SourceError),
}

fn display_chain(chain: &[TraceId]) -> String {
    chain
        .iter()
        .map(TraceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl Error {
    /// Whether retrying later could succeed because more data may have arrived
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TraceNotFound { .. }
                | Error::RootNotFound { .. }
                | Error::ParentNotIngested { .. }
                | Error::SegmentInProgress { .. }
        )
    }
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        Error::is_transient(self)
    }
}

impl From<InvalidTimeout> for Error {
    fn from(err: InvalidTimeout) -> Self {
        Error::InvalidTimeout(err.0)
    }
}

impl From<RetryError<Error>> for Error {
    fn from(err: RetryError<Error>) -> Self {
        match err {
            RetryError::InvalidTimeout(secs) => Error::InvalidTimeout(secs),
            RetryError::Fatal(err) => err,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
