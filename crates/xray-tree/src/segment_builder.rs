use serde_json::{json, Map, Value};
use xray_tree_protocol::{RawSegmentDocument, ReferenceType, TraceId};

/// Builder for raw segment documents, the way a tracing backend stores them.
///
/// Segments start out complete with zero-length timing; use [`timing`] or
/// [`in_progress`] to change that.
///
/// [`timing`]: SegmentBuilder::timing
/// [`in_progress`]: SegmentBuilder::in_progress
#[derive(Clone, Debug)]
pub struct SegmentBuilder {
    fields: Map<String, Value>,
    subsegments: Vec<SegmentBuilder>,
    links: Vec<Value>,
}

impl SegmentBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::String(id.clone()));
        fields.insert("id".to_string(), Value::String(id));
        fields.insert("start_time".to_string(), json!(0.0));
        fields.insert("end_time".to_string(), json!(0.0));
        Self {
            fields,
            subsegments: Vec::new(),
            links: Vec::new(),
        }
    }

    fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.set("name", name.into())
    }

    pub fn trace_id(self, trace_id: &TraceId) -> Self {
        self.set("trace_id", trace_id.as_str())
    }

    pub fn origin(self, origin: impl Into<String>) -> Self {
        self.set("origin", origin.into())
    }

    pub fn parent(self, parent_id: impl Into<String>) -> Self {
        self.set("parent_id", parent_id.into())
    }

    /// Start and end time in epoch seconds
    pub fn timing(mut self, start: f64, end: f64) -> Self {
        self.fields.remove("in_progress");
        self.set("start_time", start).set("end_time", end)
    }

    pub fn start_time(self, start: f64) -> Self {
        self.set("start_time", start)
    }

    /// Mark the segment as started but not yet closed
    pub fn in_progress(mut self) -> Self {
        self.fields.remove("end_time");
        self.set("in_progress", true)
    }

    pub fn namespace(self, namespace: impl Into<String>) -> Self {
        self.set("namespace", namespace.into())
    }

    pub fn error(self) -> Self {
        self.set("error", true)
    }

    pub fn fault(self) -> Self {
        self.set("fault", true)
    }

    pub fn throttle(self) -> Self {
        self.set("throttle", true)
    }

    /// Reference an exception recorded elsewhere in the trace
    pub fn cause_id(self, exception_id: impl Into<String>) -> Self {
        self.set("cause", exception_id.into())
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let annotations = self
            .fields
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = annotations {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let metadata = self
            .fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = metadata {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_aws(self, aws: Value) -> Self {
        self.set("aws", aws)
    }

    pub fn subsegment(mut self, subsegment: SegmentBuilder) -> Self {
        self.subsegments.push(subsegment);
        self
    }

    /// Link to a trace this segment caused
    pub fn child_link(self, trace_id: &TraceId) -> Self {
        self.link(trace_id, ReferenceType::Child)
    }

    /// Link to the trace that caused this segment
    pub fn parent_link(self, trace_id: &TraceId) -> Self {
        self.link(trace_id, ReferenceType::Parent)
    }

    fn link(mut self, trace_id: &TraceId, reference_type: ReferenceType) -> Self {
        let id = format!("{}-link-{}", self.id(), self.links.len());
        self.links.push(json!({
            "trace_id": trace_id.as_str(),
            "id": id,
            "attributes": { ReferenceType::ATTRIBUTE: reference_type },
        }));
        self
    }

    pub fn id(&self) -> &str {
        self.fields
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        if !self.subsegments.is_empty() {
            let subsegments = self
                .subsegments
                .into_iter()
                .map(SegmentBuilder::into_value)
                .collect();
            fields.insert("subsegments".to_string(), Value::Array(subsegments));
        }
        if !self.links.is_empty() {
            fields.insert("links".to_string(), Value::Array(self.links));
        }
        Value::Object(fields)
    }

    /// Encode as a top-level segment document
    pub fn into_document(self) -> RawSegmentDocument {
        RawSegmentDocument {
            id: self.id().to_string(),
            document: self.into_value().to_string(),
        }
    }
}
