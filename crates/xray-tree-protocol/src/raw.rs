//! Raw documents as returned by the tracing backend.
//!
//! Every field of a segment document is optional on the wire, and absent,
//! `null` and empty values all show up in practice. [`Trace::from_raw`] is the
//! one place where that gets normalized; nothing downstream looks at raw
//! documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::segment::*;
use crate::trace_context::TraceId;

/// One trace from a batch lookup, segments still JSON-encoded
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawTrace {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(default, alias = "Duration")]
    pub duration: Option<f64>,
    #[serde(default, alias = "LimitExceeded", alias = "limitExceeded")]
    pub limit_exceeded: Option<bool>,
    #[serde(default, alias = "Segments")]
    pub segments: Vec<RawSegmentDocument>,
}

/// A segment document keyed by its segment ID
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSegmentDocument {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "Document")]
    pub document: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to decode segment document {segment_id}: {source}")]
    Json {
        segment_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("segment document {segment_id} is missing required field `{field}`")]
    MissingField {
        segment_id: String,
        field: &'static str,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSegment {
    id: Option<String>,
    name: Option<String>,
    trace_id: Option<String>,
    start_time: Option<f64>,
    end_time: Option<f64>,
    in_progress: Option<bool>,
    parent_id: Option<String>,
    origin: Option<String>,
    namespace: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    service: Option<Service>,
    user: Option<String>,
    error: Option<bool>,
    fault: Option<bool>,
    throttle: Option<bool>,
    traced: Option<bool>,
    precursor_ids: Option<Vec<String>>,
    cause: Option<Cause>,
    http: Option<Http>,
    sql: Option<Sql>,
    aws: Option<Value>,
    annotations: Option<BTreeMap<String, Value>>,
    metadata: Option<BTreeMap<String, Value>>,
    subsegments: Option<Vec<RawSegment>>,
    links: Option<Vec<RawLink>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLink {
    trace_id: Option<String>,
    id: Option<String>,
    attributes: Option<BTreeMap<String, Value>>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

impl RawSegment {
    fn normalize(self, document_id: &str, inherited: &TraceId) -> Result<Segment, DocumentError> {
        let id = non_empty(self.id).ok_or_else(|| DocumentError::MissingField {
            segment_id: document_id.to_string(),
            field: "id",
        })?;
        let trace_id = non_empty(self.trace_id)
            .map(TraceId::new)
            .unwrap_or_else(|| inherited.clone());

        let subsegments = self
            .subsegments
            .unwrap_or_default()
            .into_iter()
            .map(|sub| sub.normalize(document_id, &trace_id))
            .collect::<Result<Vec<_>, _>>()?;

        let links = self
            .links
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawLink::normalize)
            .collect();

        let cause = match self.cause {
            Some(Cause::ExceptionId(id)) if id.is_empty() => None,
            other => other,
        };

        Ok(Segment {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            trace_id,
            start_time: self.start_time.map(Timestamp::from).unwrap_or_default(),
            end_time: self.end_time.map(Timestamp::from),
            in_progress: self.in_progress.unwrap_or(false),
            parent_id: non_empty(self.parent_id),
            origin: non_empty(self.origin),
            namespace: self.namespace.as_deref().and_then(Namespace::parse),
            kind: non_empty(self.kind),
            service: self.service,
            user: non_empty(self.user),
            error: self.error.unwrap_or(false),
            fault: self.fault.unwrap_or(false),
            throttle: self.throttle.unwrap_or(false),
            traced: self.traced.unwrap_or(false),
            precursor_ids: self.precursor_ids.unwrap_or_default(),
            cause,
            http: self.http,
            sql: self.sql,
            aws: self.aws.filter(|v| !v.is_null()),
            annotations: self.annotations.unwrap_or_default(),
            metadata: self.metadata.unwrap_or_default(),
            subsegments,
            links,
        })
    }
}

impl RawLink {
    /// Links without a target trace or with an unknown reference type carry
    /// no traversal information and are dropped
    fn normalize(self) -> Option<Link> {
        let trace_id = non_empty(self.trace_id)?;
        let reference_type = self
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get(ReferenceType::ATTRIBUTE))
            .and_then(Value::as_str)
            .and_then(ReferenceType::parse)?;
        Some(Link {
            trace_id: TraceId::new(trace_id),
            id: self.id.unwrap_or_default(),
            reference_type,
        })
    }
}

impl Segment {
    /// Decode a single segment document belonging to `trace_id`.
    ///
    /// The document's own `trace_id` wins when present; subsegments without
    /// one inherit it from their parent.
    pub fn from_document(document: &RawSegmentDocument, trace_id: &TraceId) -> Result<Self, DocumentError> {
        let raw: RawSegment =
            serde_json::from_str(&document.document).map_err(|source| DocumentError::Json {
                segment_id: document.id.clone(),
                source,
            })?;
        raw.normalize(&document.id, trace_id)
    }
}

impl Trace {
    /// Normalize a raw trace, decoding every segment document
    pub fn from_raw(raw: RawTrace) -> Result<Self, DocumentError> {
        let id = TraceId::new(raw.id);
        let segments = raw
            .segments
            .iter()
            .map(|doc| Segment::from_document(doc, &id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            duration: raw.duration,
            limit_exceeded: raw.limit_exceeded.unwrap_or(false),
            segments,
        })
    }
}
