use std::collections::{BTreeMap, HashMap};
use xray_tree_protocol::{ReferenceType, Segment, Trace, TraceId, TracingHeader};

use crate::error::{Error, Result};
use crate::fetcher::TraceFetcher;
use crate::paths;
use crate::source::TraceSource;
use crate::tree::{NodeId, OrphanPolicy, Tree, TreeNode, TreeOptions, UnresolvedLink, UnresolvedReason};

/// Fetch the trace named by `header` and assemble it into a [`Tree`].
///
/// Runs exactly once: errors that polling would retry (see
/// [`Error::is_transient`]) are returned as-is.
pub fn build_tree<S: TraceSource>(
    fetcher: &TraceFetcher<S>,
    header: &TracingHeader,
    options: &TreeOptions,
) -> Result<Tree> {
    let source_trace = fetcher.fetch_trace(&header.root)?;
    if source_trace.limit_exceeded {
        tracing::warn!(trace_id = %source_trace.id, "trace exceeded backend size limits, tree may be incomplete");
    }

    let mut assembler = Assembler {
        fetcher,
        options,
        nodes: Vec::new(),
        child_traces: BTreeMap::new(),
        chain: Vec::new(),
        link_limit_exceeded: false,
        unresolved_links: Vec::new(),
    };
    let root = assembler.splice(&source_trace, 0, header.parent.as_deref())?;
    let paths = paths::enumerate(&assembler.nodes, root);

    if !options.allow_in_progress_leaves {
        for path in &paths {
            let leaf = path.last().map(|id| &assembler.nodes[id.0].segment);
            if let Some(leaf) = leaf.filter(|leaf| leaf.is_in_progress()) {
                return Err(Error::SegmentInProgress {
                    trace_id: leaf.trace_id.clone(),
                    segment_id: leaf.id.clone(),
                });
            }
        }
    }

    tracing::debug!(
        trace_id = %source_trace.id,
        nodes = assembler.nodes.len(),
        paths = paths.len(),
        child_traces = assembler.child_traces.len(),
        "assembled trace tree"
    );

    Ok(Tree {
        nodes: assembler.nodes,
        root,
        paths,
        source_trace,
        child_traces: assembler.child_traces,
        link_limit_exceeded: assembler.link_limit_exceeded,
        unresolved_links: assembler.unresolved_links,
    })
}

struct Assembler<'a, S> {
    fetcher: &'a TraceFetcher<S>,
    options: &'a TreeOptions,
    nodes: Vec<TreeNode>,
    child_traces: BTreeMap<TraceId, Trace>,
    /// Traces currently being spliced, outermost first
    chain: Vec<TraceId>,
    link_limit_exceeded: bool,
    unresolved_links: Vec<UnresolvedLink>,
}

impl<S: TraceSource> Assembler<'_, S> {
    /// Place `trace` into the arena and return the node of its root segment
    fn splice(&mut self, trace: &Trace, depth: usize, designated_parent: Option<&str>) -> Result<NodeId> {
        self.chain.push(trace.id.clone());
        let result = self.splice_inner(trace, depth, designated_parent);
        self.chain.pop();
        result
    }

    fn splice_inner(&mut self, trace: &Trace, depth: usize, designated_parent: Option<&str>) -> Result<NodeId> {
        let layout = Layout::new(trace, designated_parent, self.options.orphan_policy)?;

        let root = self.push_node(&trace.segments[layout.root]);
        let mut placed = vec![(root, layout.root)];
        let mut stack = vec![(root, layout.root)];

        while let Some((node, index)) = stack.pop() {
            for &child_index in &layout.children[index] {
                let child = self.push_node(&trace.segments[child_index]);
                self.nodes[node.0].children.push(child);
                placed.push((child, child_index));
                stack.push((child, child_index));
            }
        }

        if self.options.fetch_child_traces {
            for (node, index) in placed {
                let segment = &trace.segments[index];
                let mut followed: Vec<&TraceId> = Vec::new();
                for link in segment.links_of_type(ReferenceType::Child) {
                    if followed.contains(&&link.trace_id) {
                        continue;
                    }
                    followed.push(&link.trace_id);
                    self.follow_link(node, segment, &link.trace_id, depth)?;
                }
            }
        }

        Ok(root)
    }

    fn push_node(&mut self, segment: &Segment) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            segment: segment.clone(),
            children: Vec::new(),
        });
        id
    }

    fn follow_link(&mut self, holder: NodeId, segment: &Segment, target: &TraceId, depth: usize) -> Result<()> {
        if self.chain.contains(target) {
            return Err(Error::LinkCycleDetected {
                trace_id: target.clone(),
                chain: self.chain.clone(),
            });
        }

        if depth >= self.options.max_link_depth {
            tracing::warn!(
                segment_id = %segment.id,
                linked_trace = %target,
                max_depth = self.options.max_link_depth,
                "child trace link depth limit reached"
            );
            self.link_limit_exceeded = true;
            self.unresolved(segment, target, UnresolvedReason::DepthLimit);
            return Ok(());
        }

        let trace = match self.child_traces.get(target) {
            Some(trace) => trace.clone(),
            None => match self.fetcher.fetch_trace(target) {
                Ok(trace) => {
                    self.child_traces.insert(target.clone(), trace.clone());
                    trace
                }
                Err(Error::TraceNotFound { .. }) => {
                    tracing::debug!(segment_id = %segment.id, linked_trace = %target, "child trace not found yet");
                    self.unresolved(segment, target, UnresolvedReason::NotFound);
                    return Ok(());
                }
                Err(err) => return Err(err),
            },
        };

        let child_root = self.splice(&trace, depth + 1, None)?;
        self.nodes[holder.0].children.push(child_root);
        Ok(())
    }

    fn unresolved(&mut self, segment: &Segment, target: &TraceId, reason: UnresolvedReason) {
        self.unresolved_links.push(UnresolvedLink {
            segment_id: segment.id.clone(),
            trace_id: target.clone(),
            reason,
        });
    }
}

/// Parent/child structure of one trace's top-level segments, by index
struct Layout {
    root: usize,
    children: Vec<Vec<usize>>,
}

impl Layout {
    fn new(trace: &Trace, designated_parent: Option<&str>, orphan_policy: OrphanPolicy) -> Result<Self> {
        let segments = &trace.segments;

        // Stable sort: fetch order breaks start time ties
        let mut order: Vec<usize> = (0..segments.len()).collect();
        order.sort_by_key(|&i| segments[i].start_time);

        // Segment or subsegment ID -> index of the top-level segment owning it.
        // The first copy of a duplicated top-level segment wins.
        let mut owners: HashMap<&str, usize> = HashMap::new();
        let mut unique = Vec::with_capacity(order.len());
        for &i in &order {
            if owners.contains_key(segments[i].id.as_str()) {
                tracing::debug!(trace_id = %trace.id, segment_id = %segments[i].id, "skipping duplicate segment");
                continue;
            }
            owners.insert(segments[i].id.as_str(), i);
            unique.push(i);
        }
        for &i in &unique {
            for sub in segments[i].descendants() {
                owners.entry(sub.id.as_str()).or_insert(i);
            }
        }

        let is_root_candidate = |segment: &Segment| match segment.parent_id.as_deref() {
            None => true,
            Some(parent) => designated_parent == Some(parent),
        };

        let root = unique
            .iter()
            .copied()
            .filter(|&i| is_root_candidate(&segments[i]))
            .min_by(|&a, &b| {
                segments[a]
                    .start_time
                    .cmp(&segments[b].start_time)
                    .then_with(|| segments[a].id.cmp(&segments[b].id))
            })
            .ok_or_else(|| Error::RootNotFound {
                trace_id: trace.id.clone(),
            })?;

        let mut children = vec![Vec::new(); segments.len()];
        for &i in &unique {
            if i == root {
                continue;
            }
            let segment = &segments[i];

            let Some(parent) = segment.parent_id.as_deref() else {
                tracing::debug!(trace_id = %trace.id, segment_id = %segment.id, "pruning disconnected root fragment");
                continue;
            };

            if let Some(&owner) = owners.get(parent) {
                if owner == i {
                    tracing::debug!(trace_id = %trace.id, segment_id = %segment.id, "pruning segment parented to itself");
                } else {
                    children[owner].push(i);
                }
                continue;
            }

            if designated_parent == Some(parent) {
                tracing::debug!(trace_id = %trace.id, segment_id = %segment.id, "pruning disconnected root fragment");
                continue;
            }

            match orphan_policy {
                OrphanPolicy::Prune => {
                    tracing::debug!(
                        trace_id = %trace.id,
                        segment_id = %segment.id,
                        parent_id = %parent,
                        "pruning segment whose parent is missing"
                    );
                }
                OrphanPolicy::Retry => {
                    return Err(Error::ParentNotIngested {
                        trace_id: trace.id.clone(),
                        segment_id: segment.id.clone(),
                        parent_id: parent.to_string(),
                    });
                }
                OrphanPolicy::Fail => {
                    return Err(Error::OrphanedSegment {
                        trace_id: trace.id.clone(),
                        segment_id: segment.id.clone(),
                        parent_id: parent.to_string(),
                    });
                }
            }
        }

        Ok(Self { root, children })
    }
}
