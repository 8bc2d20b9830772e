use serde::Serialize;
use std::collections::BTreeMap;
use xray_tree_protocol::{Segment, Trace, TraceId};

/// Index of a node in a [`Tree`]'s arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A segment placed in the tree, with its children in traversal order.
///
/// Children from the segment's own trace come first, followed by the roots of
/// any child traces spliced in through links.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub segment: Segment,
    pub children: Vec<NodeId>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// What to do with a segment whose `parent_id` is nowhere in its trace
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Drop the segment and its subtree
    #[default]
    Prune,
    /// Fail with [`Error::ParentNotIngested`](crate::Error::ParentNotIngested),
    /// which polling retries
    Retry,
    /// Fail with [`Error::OrphanedSegment`](crate::Error::OrphanedSegment),
    /// which aborts polling
    Fail,
}

/// Tree assembly options
#[derive(Clone, Debug)]
pub struct TreeOptions {
    /// Follow `child` links into other traces and splice them in
    pub fetch_child_traces: bool,
    /// How many levels of child traces to follow before giving up
    pub max_link_depth: usize,
    pub orphan_policy: OrphanPolicy,
    /// Accept paths that end in a segment without an end time
    pub allow_in_progress_leaves: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            fetch_child_traces: false,
            max_link_depth: 5,
            orphan_policy: OrphanPolicy::Prune,
            allow_in_progress_leaves: false,
        }
    }
}

impl TreeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_child_traces(mut self, fetch_child_traces: bool) -> Self {
        self.fetch_child_traces = fetch_child_traces;
        self
    }

    pub fn with_max_link_depth(mut self, max_link_depth: usize) -> Self {
        self.max_link_depth = max_link_depth;
        self
    }

    pub fn with_orphan_policy(mut self, orphan_policy: OrphanPolicy) -> Self {
        self.orphan_policy = orphan_policy;
        self
    }

    pub fn with_in_progress_leaves(mut self, allow: bool) -> Self {
        self.allow_in_progress_leaves = allow;
        self
    }
}

/// Why a child link was left unresolved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The linked trace is not in the backend (yet)
    NotFound,
    /// Following it would exceed `max_link_depth`
    DepthLimit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnresolvedLink {
    /// Segment holding the link
    pub segment_id: String,
    pub trace_id: TraceId,
    pub reason: UnresolvedReason,
}

/// A trace (plus any linked child traces) assembled into a rooted tree.
///
/// Nodes live in an arena and refer to each other by [`NodeId`]. The tree is
/// built fresh for every fetch and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Tree {
    pub(crate) nodes: Vec<TreeNode>,
    pub(crate) root: NodeId,
    pub(crate) paths: Vec<Vec<NodeId>>,
    pub(crate) source_trace: Trace,
    pub(crate) child_traces: BTreeMap<TraceId, Trace>,
    pub(crate) link_limit_exceeded: bool,
    pub(crate) unresolved_links: Vec<UnresolvedLink>,
}

impl Tree {
    pub fn root(&self) -> &Segment {
        &self.nodes[self.root.0].segment
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Segment> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .map(|child| &self.nodes[child.0].segment)
    }

    /// The trace containing the root segment
    pub fn source_trace(&self) -> &Trace {
        &self.source_trace
    }

    /// Every child trace visited through links, keyed by trace ID
    pub fn child_traces(&self) -> &BTreeMap<TraceId, Trace> {
        &self.child_traces
    }

    /// Whether link traversal stopped at the depth cap somewhere
    pub fn link_limit_exceeded(&self) -> bool {
        self.link_limit_exceeded
    }

    pub fn unresolved_links(&self) -> &[UnresolvedLink] {
        &self.unresolved_links
    }

    /// Root-to-leaf paths as node IDs
    pub fn path_ids(&self) -> &[Vec<NodeId>] {
        &self.paths
    }

    /// Root-to-leaf paths as segments
    pub fn paths(&self) -> Vec<Vec<&Segment>> {
        self.paths
            .iter()
            .map(|path| path.iter().map(|id| &self.nodes[id.0].segment).collect())
            .collect()
    }

    /// Origin of every segment along every path
    pub fn path_origins(&self) -> Vec<Vec<Option<&str>>> {
        self.paths
            .iter()
            .map(|path| {
                path.iter()
                    .map(|id| self.nodes[id.0].segment.origin.as_deref())
                    .collect()
            })
            .collect()
    }

    /// Segment ID of every segment along every path
    pub fn path_segment_ids(&self) -> Vec<Vec<&str>> {
        self.paths
            .iter()
            .map(|path| {
                path.iter()
                    .map(|id| self.nodes[id.0].segment.id.as_str())
                    .collect()
            })
            .collect()
    }

    pub fn leaf_count(&self) -> usize {
        self.paths.len()
    }

    /// Whether any trace in the tree was truncated by the backend
    pub fn is_possibly_incomplete(&self) -> bool {
        self.link_limit_exceeded
            || self.source_trace.limit_exceeded
            || self.child_traces.values().any(|t| t.limit_exceeded)
    }

    /// Serializable view of the tree
    pub fn output(&self) -> TreeOutput<'_> {
        TreeOutput {
            root: self.root(),
            paths: self.paths(),
            source_trace: &self.source_trace,
            child_traces: &self.child_traces,
            link_limit_exceeded: self.link_limit_exceeded,
        }
    }
}

/// JSON shape of an assembled tree
#[derive(Debug, Serialize)]
pub struct TreeOutput<'a> {
    pub root: &'a Segment,
    pub paths: Vec<Vec<&'a Segment>>,
    pub source_trace: &'a Trace,
    pub child_traces: &'a BTreeMap<TraceId, Trace>,
    pub link_limit_exceeded: bool,
}
