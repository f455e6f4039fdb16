use geom::precision::stable_total_cmp_f64;
use geom::{Aabb, Axis};
use tracing::debug;

use crate::config::{BuildStrategy, TreeConfig};
use crate::node::{Node, NodeIndex};
use crate::tree::{ObjectId, Tree};

/// Bulk construction of a [`Tree`] from `(bounds, payload)` items.
///
/// All strategies share one recursion: compute the combined bounds, pick a
/// split (or decide on a leaf), partition, recurse. They differ only in how
/// the split is picked. Ties are stable in input order.
#[derive(Debug, Default, Copy, Clone)]
pub struct Builder {
    config: TreeConfig,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self { config }
    }

    pub fn build<T>(&self, items: Vec<(Aabb, T)>, strategy: BuildStrategy) -> Tree<T> {
        let mut tree = Tree::with_config(self.config);
        let mut build_items = Vec::with_capacity(items.len());
        for (bounds, payload) in items {
            let id = tree.alloc_slot(bounds, payload);
            build_items.push((id, bounds));
        }

        if !build_items.is_empty() {
            let root = tree.build_subtree(build_items, strategy);
            tree.root = Some(root);
        }

        let stats = tree.stats();
        debug!(
            ?strategy,
            objects = tree.len(),
            nodes = stats.node_count,
            leaves = stats.leaf_count,
            depth = stats.max_depth,
            "tree built"
        );
        tree
    }
}

impl<T> Tree<T> {
    /// Builds a subtree over live ids and returns its root index.
    ///
    /// Used by [`Builder::build`] and [`Tree::rebuild`]; slots' leaf
    /// back-links are rewritten as leaves are emitted.
    pub(crate) fn build_subtree(
        &mut self,
        mut items: Vec<(ObjectId, Aabb)>,
        strategy: BuildStrategy,
    ) -> NodeIndex {
        self.build_node(&mut items, 0, strategy)
    }

    fn build_node(
        &mut self,
        items: &mut [(ObjectId, Aabb)],
        depth: u32,
        strategy: BuildStrategy,
    ) -> NodeIndex {
        let bounds = combined_bounds(items);

        let split = if (depth as usize) < self.config.max_depth {
            choose_split(items, bounds, &self.config, strategy)
        } else {
            None
        };

        let Some(mid) = split else {
            let ids: Vec<ObjectId> = items.iter().map(|(id, _)| *id).collect();
            let idx = self.nodes.insert(Node::leaf(bounds, None, depth, ids.clone()));
            for id in ids {
                self.set_slot_leaf(id, idx);
            }
            return idx;
        };

        let (left_items, right_items) = items.split_at_mut(mid);
        let left = self.build_node(left_items, depth + 1, strategy);
        let right = self.build_node(right_items, depth + 1, strategy);

        let idx = self
            .nodes
            .insert(Node::internal(bounds, None, depth, left, right));
        self.nodes[left].parent = Some(idx);
        self.nodes[right].parent = Some(idx);
        idx
    }
}

/// Picks a split position, partitioning `items` in place.
///
/// `None` means "emit a leaf". Positions are relative to the (possibly
/// re-sorted) slice.
fn choose_split(
    items: &mut [(ObjectId, Aabb)],
    bounds: Aabb,
    config: &TreeConfig,
    strategy: BuildStrategy,
) -> Option<usize> {
    let n = items.len();
    if n <= 1 {
        return None;
    }

    match strategy {
        BuildStrategy::Equal => (n > config.max_leaf_size).then_some(n / 2),
        BuildStrategy::Median => {
            if n <= config.max_leaf_size {
                return None;
            }
            sort_by_center(items, bounds.longest_axis());
            Some(n / 2)
        }
        BuildStrategy::Sah => match best_sah_split(items, bounds) {
            Some((axis, position, cost)) if cost < n as f64 => {
                sort_by_center(items, axis);
                Some(position)
            }
            // No profitable split; still honor the bucket cap by falling
            // back to a median split (coincident boxes end up here).
            _ if n > config.max_leaf_size => {
                sort_by_center(items, bounds.longest_axis());
                Some(n / 2)
            }
            _ => None,
        },
    }
}

/// Full SAH sweep: every axis, every split position.
///
/// `cost(i) = 1 + (SA(Bl)·i + SA(Br)·(n−i)) / SA(B)`, the probability-
/// weighted intersection count of the two children. Works on copies so the
/// caller's slice keeps its input order until a split is committed.
fn best_sah_split(items: &[(ObjectId, Aabb)], bounds: Aabb) -> Option<(Axis, usize, f64)> {
    let n = items.len();
    let total_area = bounds.surface_area();
    if total_area <= 0.0 {
        return None;
    }

    let mut best: Option<(Axis, usize, f64)> = None;
    let mut right_area = vec![0.0; n];

    for axis in Axis::ALL {
        let mut sorted = items.to_vec();
        sort_by_center(&mut sorted, axis);

        let mut acc: Option<Aabb> = None;
        for i in (1..n).rev() {
            acc = Some(match acc {
                Some(b) => b.union(sorted[i].1),
                None => sorted[i].1,
            });
            right_area[i] = match acc {
                Some(b) => b.surface_area(),
                None => 0.0,
            };
        }

        let mut left: Option<Aabb> = None;
        for i in 1..n {
            left = Some(match left {
                Some(b) => b.union(sorted[i - 1].1),
                None => sorted[i - 1].1,
            });
            let left_area = match left {
                Some(b) => b.surface_area(),
                None => 0.0,
            };
            let cost =
                1.0 + (left_area * i as f64 + right_area[i] * (n - i) as f64) / total_area;
            let better = match best {
                None => true,
                Some((_, _, best_cost)) => stable_total_cmp_f64(cost, best_cost).is_lt(),
            };
            if better {
                best = Some((axis, i, cost));
            }
        }
    }

    best
}

/// Stable sort by box center along `axis`; ties keep input order.
fn sort_by_center(items: &mut [(ObjectId, Aabb)], axis: Axis) {
    let a = axis.index();
    items.sort_by(|x, y| stable_total_cmp_f64(x.1.center().axis(a), y.1.center().axis(a)));
}

fn combined_bounds(items: &[(ObjectId, Aabb)]) -> Aabb {
    items
        .iter()
        .map(|(_, bounds)| *bounds)
        .reduce(Aabb::union)
        .unwrap_or(Aabb::point(geom::Vec3::ZERO))
}

#[cfg(test)]
mod tests {
    use geom::{Aabb, Vec3};
    use pretty_assertions::assert_eq;

    use super::Builder;
    use crate::config::{BuildStrategy, TreeConfig};

    fn cube(x: f64, y: f64, z: f64, half: f64) -> Aabb {
        let c = Vec3::new(x, y, z);
        Aabb::new(c - Vec3::splat(half), c + Vec3::splat(half))
    }

    fn line_of(n: usize, spacing: f64) -> Vec<(Aabb, usize)> {
        (0..n)
            .map(|i| (cube(i as f64 * spacing, 0.0, 0.0, 0.5), i))
            .collect()
    }

    #[test]
    fn empty_input_builds_an_empty_tree() {
        let tree = Builder::new().build(Vec::<(Aabb, ())>::new(), BuildStrategy::Sah);
        assert!(tree.is_empty());
        assert!(tree.validate());
        assert_eq!(tree.stats().node_count, 0);
    }

    #[test]
    fn small_input_becomes_a_single_bucket_under_median() {
        let tree = Builder::new().build(line_of(3, 10.0), BuildStrategy::Median);
        let stats = tree.stats();
        assert_eq!(stats.leaf_count, 1);
        assert_eq!(stats.max_depth, 0);
        assert!(tree.validate());
    }

    #[test]
    fn median_splits_past_the_bucket_cap() {
        let config = TreeConfig {
            max_leaf_size: 2,
            ..TreeConfig::default()
        };
        let tree = Builder::with_config(config).build(line_of(8, 10.0), BuildStrategy::Median);
        let stats = tree.stats();
        assert_eq!(stats.leaf_count, 4);
        assert_eq!(stats.max_depth, 2);
        assert!(tree.validate());
    }

    #[test]
    fn sah_separates_scattered_boxes_into_singleton_leaves() {
        let items = vec![
            (cube(0.0, 0.0, 0.0, 0.5), "a"),
            (cube(100.0, 0.0, 0.0, 0.5), "b"),
            (cube(0.0, 100.0, 0.0, 0.5), "c"),
            (cube(0.0, 0.0, 100.0, 0.5), "d"),
        ];
        let tree = Builder::new().build(items, BuildStrategy::Sah);
        let stats = tree.stats();
        assert_eq!(stats.leaf_count, 4);
        assert!(tree.validate());
    }

    #[test]
    fn sah_keeps_coincident_boxes_bucketed() {
        let items: Vec<(Aabb, usize)> =
            (0..6).map(|i| (cube(1.0, 2.0, 3.0, 0.5), i)).collect();
        let tree = Builder::new().build(items, BuildStrategy::Sah);
        let stats = tree.stats();
        assert_eq!(stats.leaf_count, 1);
        assert!(tree.validate());
    }

    #[test]
    fn sah_coincident_boxes_past_the_cap_fall_back_to_median() {
        let config = TreeConfig {
            max_leaf_size: 4,
            ..TreeConfig::default()
        };
        let items: Vec<(Aabb, usize)> =
            (0..10).map(|i| (cube(1.0, 2.0, 3.0, 0.5), i)).collect();
        let tree = Builder::with_config(config).build(items, BuildStrategy::Sah);
        let stats = tree.stats();
        assert!(stats.leaf_count >= 3);
        assert!(tree.validate());
    }

    #[test]
    fn equal_splits_in_input_order() {
        let config = TreeConfig {
            max_leaf_size: 1,
            ..TreeConfig::default()
        };
        // Interleaved positions: Equal ignores geometry, so the first two
        // inputs land in the left subtree no matter where they sit.
        let items = vec![
            (cube(0.0, 0.0, 0.0, 0.5), "far-left"),
            (cube(30.0, 0.0, 0.0, 0.5), "far-right"),
            (cube(10.0, 0.0, 0.0, 0.5), "mid-left"),
            (cube(20.0, 0.0, 0.0, 0.5), "mid-right"),
        ];
        let tree = Builder::with_config(config).build(items, BuildStrategy::Equal);
        assert_eq!(tree.stats().leaf_count, 4);
        assert!(tree.validate());
    }

    #[test]
    fn strategies_agree_on_query_results() {
        let items = line_of(32, 3.0);
        let query = Aabb::new(Vec3::new(10.0, -1.0, -1.0), Vec3::new(40.0, 1.0, 1.0));

        let mut results = Vec::new();
        for strategy in [BuildStrategy::Sah, BuildStrategy::Median, BuildStrategy::Equal] {
            let tree = Builder::new().build(items.clone(), strategy);
            assert!(tree.validate());
            let ids: Vec<usize> = tree
                .intersect_bounds(query)
                .into_iter()
                .map(|(_, payload)| *payload)
                .collect();
            results.push(ids);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[test]
    fn rebuild_twice_is_stable() {
        let mut tree = Builder::new().build(line_of(16, 4.0), BuildStrategy::Median);
        tree.rebuild(BuildStrategy::Sah);
        let first = tree.stats();
        tree.rebuild(BuildStrategy::Sah);
        assert_eq!(tree.stats(), first);
        assert!(tree.validate());
    }

    #[test]
    fn depth_ceiling_bounds_the_build() {
        let config = TreeConfig {
            max_leaf_size: 1,
            max_depth: 3,
            enable_sah: true,
        };
        let tree = Builder::with_config(config).build(line_of(64, 5.0), BuildStrategy::Median);
        let stats = tree.stats();
        assert!(stats.max_depth <= 3);
        assert_eq!(tree.len(), 64);
        assert!(tree.validate());
    }
}
