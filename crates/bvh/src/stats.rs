use crate::node::NodeKind;
use crate::tree::Tree;

/// Tree health snapshot.
///
/// Plain data with stable meaning, suitable for logs and debug UI. A
/// `balance_factor` above 2.0 is the signal to `rebuild`.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeStats {
    pub node_count: usize,
    pub leaf_count: usize,
    /// Deepest node; root is 0.
    pub max_depth: usize,
    /// Deepest node over the depth of a balanced tree with the same leaf
    /// count, clamped to >= 1.0.
    pub balance_factor: f64,
}

impl TreeStats {
    fn empty() -> Self {
        Self {
            node_count: 0,
            leaf_count: 0,
            max_depth: 0,
            balance_factor: 1.0,
        }
    }
}

/// `ceil(log2(n))` for `n >= 1`.
fn ceil_log2(n: usize) -> u32 {
    usize::BITS - (n - 1).leading_zeros()
}

impl<T> Tree<T> {
    /// Walks the tree and reports its shape.
    pub fn stats(&self) -> TreeStats {
        let Some(root) = self.root else {
            return TreeStats::empty();
        };

        let mut node_count = 0usize;
        let mut leaf_count = 0usize;
        let mut max_depth = 0usize;

        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            node_count += 1;
            max_depth = max_depth.max(node.depth as usize);
            match &node.kind {
                NodeKind::Leaf { .. } => leaf_count += 1,
                NodeKind::Internal { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }

        let balance_factor = if leaf_count <= 1 {
            1.0
        } else {
            let ideal = ceil_log2(leaf_count).max(1) as f64;
            (max_depth as f64 / ideal).max(1.0)
        };

        TreeStats {
            node_count,
            leaf_count,
            max_depth,
            balance_factor,
        }
    }

    /// Checks every structural invariant; `true` means the tree is sound.
    ///
    /// Verified per node: child/parent links agree, depths increase by one,
    /// internal bounds contain both children, leaf buckets are non-empty and
    /// contained in their leaf's bounds. Verified globally: reachable nodes
    /// account for the whole arena, the leaf buckets partition the live id
    /// set, and no node exceeds the configured depth ceiling.
    pub fn validate(&self) -> bool {
        let Some(root) = self.root else {
            return self.live == 0 && self.nodes.is_empty();
        };

        let Some(root_node) = self.nodes.get(root) else {
            return false;
        };
        if root_node.parent.is_some() || root_node.depth != 0 {
            return false;
        }

        let mut visited = 0usize;
        let mut bucketed_ids = 0usize;

        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            let Some(node) = self.nodes.get(idx) else {
                return false;
            };
            visited += 1;
            if node.depth as usize > self.config.max_depth {
                return false;
            }

            match &node.kind {
                NodeKind::Internal { left, right } => {
                    let (Some(left_node), Some(right_node)) =
                        (self.nodes.get(*left), self.nodes.get(*right))
                    else {
                        return false;
                    };
                    for child in [left_node, right_node] {
                        if child.parent != Some(idx) || child.depth != node.depth + 1 {
                            return false;
                        }
                    }
                    if !node
                        .bounds
                        .contains_aabb(left_node.bounds.union(right_node.bounds))
                    {
                        return false;
                    }
                    stack.push(*right);
                    stack.push(*left);
                }
                NodeKind::Leaf { items } => {
                    if items.is_empty() {
                        return false;
                    }
                    for &id in items {
                        let Some((bounds, _)) = self.payload_and_bounds(id) else {
                            return false;
                        };
                        if self.slot_leaf(id) != Some(idx) {
                            return false;
                        }
                        if !node.bounds.contains_aabb(bounds) {
                            return false;
                        }
                        bucketed_ids += 1;
                    }
                }
            }
        }

        visited == self.nodes.len() && bucketed_ids == self.live
    }
}
