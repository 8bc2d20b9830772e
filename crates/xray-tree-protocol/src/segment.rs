use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::trace_context::TraceId;

/// Timestamp in nanoseconds since UNIX epoch
///
/// X-Ray reports epoch seconds as floating point; those are converted once at
/// ingestion and written back out as seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Negative and NaN inputs clamp to the epoch
    pub fn from_epoch_secs(secs: f64) -> Self {
        Self((secs * 1e9).round() as u64)
    }

    pub fn as_epoch_secs(self) -> f64 {
        self.0 as f64 / 1e9
    }

    pub fn to_offset_datetime(self) -> Option<time::OffsetDateTime> {
        time::OffsetDateTime::from_unix_timestamp_nanos(self.0 as i128).ok()
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Self::from_epoch_secs(secs)
    }
}

impl From<Timestamp> for f64 {
    fn from(ts: Timestamp) -> Self {
        ts.as_epoch_secs()
    }
}

/// A segment or subsegment: one unit of work in a distributed trace.
///
/// Segments and subsegments share this shape. Two segments are equal when
/// their `(id, trace_id)` pairs are equal, regardless of the other fields.
#[derive(Clone, Debug, Serialize)]
pub struct Segment {
    pub id: String,
    pub name: String,
    pub trace_id: TraceId,
    pub start_time: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    #[serde(skip_serializing_if = "is_false")]
    pub in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Type of AWS resource that recorded the segment, e.g. `AWS::Lambda`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    /// Subsegment `type` field (`"subsegment"` for independently sent subsegments)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub error: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub fault: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub throttle: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub traced: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub precursor_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Cause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<Http>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<Sql>,
    /// AWS resource metadata, kept as the backend reported it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws: Option<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subsegments: Vec<Segment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Segment {
    /// A segment is in progress until it has an end time
    pub fn is_in_progress(&self) -> bool {
        self.in_progress || self.end_time.is_none()
    }

    pub fn duration_nanos(&self) -> Option<u64> {
        self.end_time
            .map(|end| end.0.saturating_sub(self.start_time.0))
    }

    /// Depth-first iterator over every nested subsegment, excluding `self`
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.subsegments.iter().rev().collect(),
        }
    }

    /// Links of the given type recorded on this segment or any of its subsegments
    pub fn links_of_type(&self, reference_type: ReferenceType) -> impl Iterator<Item = &Link> + '_ {
        self.links
            .iter()
            .chain(self.descendants().flat_map(|sub| sub.links.iter()))
            .filter(move |link| link.reference_type == reference_type)
    }

    /// Whether this segment or any subsegment recorded an error, fault or throttle
    pub fn has_errors(&self) -> bool {
        let flagged = |s: &Segment| s.error || s.fault || s.throttle;
        flagged(self) || self.descendants().any(flagged)
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.trace_id == other.trace_id
    }
}

impl Eq for Segment {}

pub struct Descendants<'a> {
    stack: Vec<&'a Segment>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.subsegments.iter().rev());
        Some(next)
    }
}

/// Kind of downstream call a subsegment records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// AWS SDK call
    Aws,
    /// Any other downstream call
    Remote,
}

impl Namespace {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aws" => Some(Self::Aws),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Non-owning edge from a segment to another trace
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Link {
    pub trace_id: TraceId,
    pub id: String,
    pub reference_type: ReferenceType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    /// The linked trace caused this one
    Parent,
    /// The linked trace was caused by this one
    Child,
}

impl ReferenceType {
    /// Link attribute holding the reference type
    pub const ATTRIBUTE: &'static str = "aws.xray.reserved.reference_type";

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parent" => Some(Self::Parent),
            "child" => Some(Self::Child),
            _ => None,
        }
    }
}

/// Segment cause: either the ID of an exception recorded elsewhere in the
/// trace, or the exception details themselves
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cause {
    ExceptionId(String),
    Details(CauseDetails),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CauseDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    pub paths: Vec<String>,
    pub exceptions: Vec<Exception>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exception {
    pub id: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub remote: bool,
    pub truncated: Option<u32>,
    pub skipped: Option<u32>,
    /// ID of the exception that caused this one
    pub cause: Option<String>,
    pub stack: Vec<StackFrame>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackFrame {
    pub path: Option<String>,
    pub line: Option<u32>,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    pub request: Option<HttpRequest>,
    pub response: Option<HttpResponse>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    pub method: Option<String>,
    pub client_ip: Option<String>,
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub x_forwarded_for: Option<bool>,
    pub traced: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpResponse {
    pub status: Option<u16>,
    pub content_length: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sql {
    pub connection_string: Option<String>,
    pub url: Option<String>,
    pub sanitized_query: Option<String>,
    pub database_type: Option<String>,
    pub database_version: Option<String>,
    pub driver_version: Option<String>,
    pub user: Option<String>,
    pub preparation: Option<String>,
}

/// All segments sharing a trace ID, as currently visible in the backend
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trace {
    pub id: TraceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Set when the backend dropped segments because the trace grew too large;
    /// a tree assembled from such a trace may be incomplete
    pub limit_exceeded: bool,
    /// Top-level segments, not necessarily a single connected fragment
    pub segments: Vec<Segment>,
}

impl Trace {
    /// Find a segment or subsegment by ID
    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segments
            .iter()
            .flat_map(|s| std::iter::once(s).chain(s.descendants()))
            .find(|s| s.id == id)
    }

    /// Number of segments and subsegments in the trace
    pub fn segment_count(&self) -> usize {
        self.segments
            .iter()
            .map(|s| 1 + s.descendants().count())
            .sum()
    }

    pub fn has_errors(&self) -> bool {
        self.segments.iter().any(Segment::has_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: &str, subsegments: Vec<Segment>) -> Segment {
        Segment {
            id: id.to_string(),
            name: id.to_string(),
            trace_id: TraceId::new("1-abc-123"),
            start_time: Timestamp(0),
            end_time: Some(Timestamp(10)),
            in_progress: false,
            parent_id: None,
            origin: None,
            namespace: None,
            kind: None,
            service: None,
            user: None,
            error: false,
            fault: false,
            throttle: false,
            traced: false,
            precursor_ids: vec![],
            cause: None,
            http: None,
            sql: None,
            aws: None,
            annotations: BTreeMap::new(),
            metadata: BTreeMap::new(),
            subsegments,
            links: vec![],
        }
    }

    #[test]
    fn timestamp_converts_epoch_seconds() {
        let ts = Timestamp::from_epoch_secs(1.692291184114e9);
        assert!((ts.0 as i128 - 1_692_291_184_114_000_000_i128).abs() < 1_000);
        assert!((ts.as_epoch_secs() - 1.692291184114e9).abs() < 1e-3);
        assert_eq!(Timestamp::from_epoch_secs(-4.0), Timestamp(0));
        assert_eq!(Timestamp::from_epoch_secs(f64::NAN), Timestamp(0));
    }

    #[test]
    fn equality_uses_id_and_trace_id_only() {
        let a = segment("a", vec![]);
        let mut b = segment("a", vec![]);
        b.name = "renamed".to_string();
        b.error = true;
        assert_eq!(a, b);

        b.trace_id = TraceId::new("1-abc-456");
        assert_ne!(a, b);
    }

    #[test]
    fn descendants_walk_depth_first_in_order() {
        let root = segment(
            "root",
            vec![
                segment("s1", vec![segment("s1a", vec![]), segment("s1b", vec![])]),
                segment("s2", vec![]),
            ],
        );
        let ids: Vec<&str> = root.descendants().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["s1", "s1a", "s1b", "s2"]);
    }

    #[test]
    fn child_links_are_collected_from_subsegments() {
        let mut nested = segment("s1a", vec![]);
        nested.links.push(Link {
            trace_id: TraceId::new("1-child-1"),
            id: "l1".to_string(),
            reference_type: ReferenceType::Child,
        });
        let mut root = segment("root", vec![segment("s1", vec![nested])]);
        root.links.push(Link {
            trace_id: TraceId::new("1-parent-1"),
            id: "l0".to_string(),
            reference_type: ReferenceType::Parent,
        });

        let children: Vec<&str> = root
            .links_of_type(ReferenceType::Child)
            .map(|l| l.trace_id.as_str())
            .collect();
        assert_eq!(children, ["1-child-1"]);
    }

    #[test]
    fn errors_bubble_up_from_subsegments() {
        let mut faulty = segment("s1", vec![]);
        faulty.fault = true;
        let root = segment("root", vec![faulty]);
        assert!(root.has_errors());
        assert!(!segment("clean", vec![]).has_errors());
    }

    #[test]
    fn trace_lookup_searches_nested_subsegments() {
        let trace = Trace {
            id: TraceId::new("1-abc-123"),
            duration: Some(1.5),
            limit_exceeded: false,
            segments: vec![
                segment("a", vec![segment("a1", vec![segment("a1x", vec![])])]),
                segment("b", vec![]),
            ],
        };
        assert_eq!(trace.segment("a1x").map(|s| s.id.as_str()), Some("a1x"));
        assert!(trace.segment("missing").is_none());
        assert_eq!(trace.segment_count(), 4);
    }
}
