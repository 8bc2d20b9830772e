use crate::tree::{NodeId, TreeNode};

/// Enumerate every root-to-leaf path, depth-first with children in order.
///
/// Structurally distinct leaves always produce distinct paths, even when the
/// segments along them look the same.
pub(crate) fn enumerate(nodes: &[TreeNode], root: NodeId) -> Vec<Vec<NodeId>> {
    let mut paths = Vec::new();
    let mut path = Vec::new();
    // (node, depth of node in the current path)
    let mut stack = vec![(root, 0usize)];

    while let Some((id, depth)) = stack.pop() {
        path.truncate(depth);
        path.push(id);

        let node = &nodes[id.0];
        if node.is_leaf() {
            paths.push(path.clone());
            continue;
        }

        stack.extend(node.children.iter().rev().map(|&child| (child, depth + 1)));
    }

    paths
}
