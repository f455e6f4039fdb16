use geom::{Aabb, Arena};
use geom::precision::stable_total_cmp_f64;
use tracing::{debug, warn};

use crate::config::{BuildStrategy, TreeConfig};
use crate::node::{Node, NodeIndex, NodeKind};

/// Identifier of an inserted object.
///
/// Handed out by [`Tree::insert`], monotonically increasing, never reused
/// while the object is live. Retired by [`Tree::remove`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct ObjectSlot<T> {
    /// The leaf whose bucket currently holds this object.
    leaf: NodeIndex,
    bounds: Aabb,
    payload: T,
}

/// Append to an unfull bucket only while the union stays below this
/// surface-area inflation; beyond it the leaf is split instead.
const BUCKET_ENLARGE_LIMIT: f64 = 2.0;

/// After a structural update, re-insert the payload when the refit leaf's
/// surface area exceeds this multiple of its sibling's.
const REINSERT_RATIO: f64 = 2.0;

/// A bounding volume hierarchy over `Aabb`-bounded payloads.
///
/// Nodes live in a slot arena and reference each other by index; per-object
/// bounds and payloads live in an id-indexed slot map, so leaf buckets carry
/// ids only. Queries take `&self`, mutations `&mut self`; callers serialize
/// access externally.
#[derive(Debug, Clone)]
pub struct Tree<T> {
    pub(crate) nodes: Arena<Node>,
    pub(crate) root: Option<NodeIndex>,
    pub(crate) config: TreeConfig,
    slots: Vec<Option<ObjectSlot<T>>>,
    next_id: u32,
    pub(crate) live: usize,
    depth_warned: bool,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Tree<T> {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    /// Builds an empty tree with `config`.
    ///
    /// Zero limits are normalized to one.
    pub fn with_config(config: TreeConfig) -> Self {
        let config = TreeConfig {
            max_leaf_size: config.max_leaf_size.max(1),
            max_depth: config.max_depth.max(1),
            enable_sah: config.enable_sah,
        };
        Self {
            nodes: Arena::new(),
            root: None,
            config,
            slots: Vec::new(),
            next_id: 0,
            live: 0,
            depth_warned: false,
        }
    }

    pub fn config(&self) -> TreeConfig {
        self.config
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, id: ObjectId) -> Option<&T> {
        self.slot(id).map(|slot| &slot.payload)
    }

    /// The exact bounds the object was inserted (or last updated) with.
    pub fn bounds(&self, id: ObjectId) -> Option<Aabb> {
        self.slot(id).map(|slot| slot.bounds)
    }

    /// Iterates live objects in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            slot.as_ref()
                .map(|slot| (ObjectId::new(idx as u32), &slot.payload))
        })
    }

    /// Inserts `payload` with `bounds` and returns its id.
    ///
    /// Descends from the root towards the child whose enlargement cost is
    /// smaller, then either appends to the reached bucket or splits it.
    pub fn insert(&mut self, bounds: Aabb, payload: T) -> ObjectId {
        let id = self.alloc_slot(bounds, payload);
        self.insert_id(id, bounds);
        id
    }

    /// Moves an object to `new_bounds`.
    ///
    /// Returns `false` for unknown ids. Bounds contained in the owning
    /// leaf's box are a cheap slot-only update; anything else shrink-refits
    /// the leaf and its ancestors, and re-inserts the object when the leaf
    /// has outgrown its sibling.
    pub fn update(&mut self, id: ObjectId, new_bounds: Aabb) -> bool {
        let Some(slot) = self
            .slots
            .get_mut(id.index() as usize)
            .and_then(|slot| slot.as_mut())
        else {
            return false;
        };
        slot.bounds = new_bounds;
        let leaf = slot.leaf;

        if self.nodes[leaf].bounds.contains_aabb(new_bounds) {
            return true;
        }

        let shrunk = self.bucket_bounds(leaf);
        self.nodes[leaf].bounds = shrunk;
        let parent = self.nodes[leaf].parent;
        self.recompute_up(parent);

        if let Some(parent) = parent {
            let sibling = self.sibling_of(parent, leaf);
            if shrunk.surface_area() > REINSERT_RATIO * self.nodes[sibling].bounds.surface_area() {
                self.detach(id);
                self.insert_id(id, new_bounds);
            }
        }
        true
    }

    /// Removes an object and retires its id.
    ///
    /// Returns `false` for unknown ids. An emptied leaf is unlinked and its
    /// parent collapses into the sibling; node indices are recycled.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        let idx = id.index() as usize;
        if self.slots.get(idx).is_none_or(|slot| slot.is_none()) {
            return false;
        }
        self.detach(id);
        self.slots[idx] = None;
        self.live -= 1;
        true
    }

    /// Bottom-up recomputation of every node's bounds, topology unchanged.
    ///
    /// Leaf bounds are rebuilt from their buckets' exact object bounds,
    /// internal bounds from their children. Idempotent.
    pub fn refit(&mut self) {
        let Some(root) = self.root else { return };
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            if let Some((left, right)) = self.nodes[idx].children() {
                stack.push(left);
                stack.push(right);
            }
        }
        for idx in order.into_iter().rev() {
            let bounds = match &self.nodes[idx].kind {
                NodeKind::Leaf { .. } => self.bucket_bounds(idx),
                NodeKind::Internal { left, right } => {
                    self.nodes[*left].bounds.union(self.nodes[*right].bounds)
                }
            };
            self.nodes[idx].bounds = bounds;
        }
    }

    /// Discards the node graph and rebuilds it from the live objects with
    /// the given strategy. Ids are stable across a rebuild.
    pub fn rebuild(&mut self, strategy: BuildStrategy) {
        let items: Vec<(ObjectId, Aabb)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref().map(|slot| (ObjectId::new(idx as u32), slot.bounds))
            })
            .collect();

        self.nodes.clear();
        self.root = None;
        self.depth_warned = false;

        if !items.is_empty() {
            let root = self.build_subtree(items, strategy);
            self.root = Some(root);
        }

        let stats = self.stats();
        debug!(
            ?strategy,
            nodes = stats.node_count,
            leaves = stats.leaf_count,
            depth = stats.max_depth,
            "tree rebuilt"
        );
    }

    /// Drops every node and object.
    pub fn clear(&mut self) {
        let dropped = self.live;
        self.nodes.clear();
        self.root = None;
        self.slots.clear();
        self.live = 0;
        self.depth_warned = false;
        // The id counter stays monotonic so ids from before the clear can
        // never alias ids handed out after it.
        debug!(dropped, "tree cleared");
    }

    // --- slot map ---

    /// Allocates an id and slot without touching the node graph.
    pub(crate) fn alloc_slot(&mut self, bounds: Aabb, payload: T) -> ObjectId {
        let id = ObjectId::new(self.next_id);
        self.next_id += 1;
        let idx = id.index() as usize;
        if self.slots.len() <= idx {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(ObjectSlot {
            leaf: 0,
            bounds,
            payload,
        });
        self.live += 1;
        id
    }

    fn slot(&self, id: ObjectId) -> Option<&ObjectSlot<T>> {
        self.slots.get(id.index() as usize)?.as_ref()
    }

    pub(crate) fn payload_and_bounds(&self, id: ObjectId) -> Option<(Aabb, &T)> {
        self.slot(id).map(|slot| (slot.bounds, &slot.payload))
    }

    pub(crate) fn slot_leaf(&self, id: ObjectId) -> Option<NodeIndex> {
        self.slot(id).map(|slot| slot.leaf)
    }

    pub(crate) fn set_slot_leaf(&mut self, id: ObjectId, leaf: NodeIndex) {
        if let Some(slot) = self
            .slots
            .get_mut(id.index() as usize)
            .and_then(|slot| slot.as_mut())
        {
            slot.leaf = leaf;
        }
    }

    // --- node graph ---

    /// Places a live id into the node graph.
    fn insert_id(&mut self, id: ObjectId, bounds: Aabb) {
        let Some(root) = self.root else {
            let idx = self.nodes.insert(Node::leaf(bounds, None, 0, vec![id]));
            self.root = Some(idx);
            self.set_slot_leaf(id, idx);
            return;
        };

        let mut leaf = root;
        while let Some((left, right)) = self.nodes[leaf].children() {
            leaf = self.cheaper_child(left, right, bounds);
        }

        let leaf_depth = self.nodes[leaf].depth;
        let can_split = (leaf_depth as usize) < self.config.max_depth;
        let old_bounds = self.nodes[leaf].bounds;
        let enlarged = old_bounds.union(bounds);
        let has_room = self.bucket_len(leaf) < self.config.max_leaf_size;
        let fits = enlarged.surface_area() <= old_bounds.surface_area() * BUCKET_ENLARGE_LIMIT;

        if (has_room && fits) || !can_split {
            if !can_split && !has_room {
                self.note_depth_degradation();
            }
            if let NodeKind::Leaf { items } = &mut self.nodes[leaf].kind {
                items.push(id);
            }
            self.nodes[leaf].bounds = enlarged;
            self.union_up(self.nodes[leaf].parent, bounds);
            self.set_slot_leaf(id, leaf);
        } else {
            let parent = self.nodes[leaf].parent;
            let child_depth = leaf_depth + 1;
            self.nodes[leaf].depth = child_depth;
            let new_leaf = self
                .nodes
                .insert(Node::leaf(bounds, None, child_depth, vec![id]));
            let internal = self
                .nodes
                .insert(Node::internal(enlarged, parent, leaf_depth, leaf, new_leaf));
            self.nodes[leaf].parent = Some(internal);
            self.nodes[new_leaf].parent = Some(internal);
            match parent {
                None => self.root = Some(internal),
                Some(parent) => self.replace_child(parent, leaf, internal),
            }
            self.union_up(parent, bounds);
            self.set_slot_leaf(id, new_leaf);
        }
    }

    /// Takes a live id out of the node graph, leaving its slot untouched.
    fn detach(&mut self, id: ObjectId) {
        let Some(leaf) = self.slot_leaf(id) else { return };

        let mut emptied = false;
        if let NodeKind::Leaf { items } = &mut self.nodes[leaf].kind {
            items.retain(|&item| item != id);
            emptied = items.is_empty();
        }

        if !emptied {
            let shrunk = self.bucket_bounds(leaf);
            self.nodes[leaf].bounds = shrunk;
            self.recompute_up(self.nodes[leaf].parent);
            return;
        }

        let parent = self.nodes[leaf].parent;
        self.nodes.remove(leaf);
        let Some(parent) = parent else {
            self.root = None;
            return;
        };

        let sibling = self.sibling_of(parent, leaf);
        let grand = self.nodes[parent].parent;
        self.nodes.remove(parent);
        self.nodes[sibling].parent = grand;
        match grand {
            None => {
                self.root = Some(sibling);
                self.assign_depths(sibling, 0);
            }
            Some(grand) => {
                self.replace_child(grand, parent, sibling);
                let depth = self.nodes[grand].depth + 1;
                self.assign_depths(sibling, depth);
                self.recompute_up(Some(grand));
            }
        }
    }

    /// The child of `left`/`right` that is cheaper to receive `bounds`.
    ///
    /// Cost is surface-area enlargement (volume enlargement when SAH is
    /// disabled); ties go to the smaller child, then to the left one.
    fn cheaper_child(&self, left: NodeIndex, right: NodeIndex, bounds: Aabb) -> NodeIndex {
        let (cost_left, size_left) = self.enlargement_cost(left, bounds);
        let (cost_right, size_right) = self.enlargement_cost(right, bounds);
        let order = stable_total_cmp_f64(cost_left, cost_right)
            .then(stable_total_cmp_f64(size_left, size_right));
        if order.is_gt() { right } else { left }
    }

    fn enlargement_cost(&self, child: NodeIndex, bounds: Aabb) -> (f64, f64) {
        let child_bounds = self.nodes[child].bounds;
        let union = child_bounds.union(bounds);
        if self.config.enable_sah {
            let size = child_bounds.surface_area();
            (union.surface_area() - size, size)
        } else {
            let size = child_bounds.volume();
            (union.volume() - size, size)
        }
    }

    fn bucket_len(&self, leaf: NodeIndex) -> usize {
        match &self.nodes[leaf].kind {
            NodeKind::Leaf { items } => items.len(),
            NodeKind::Internal { .. } => 0,
        }
    }

    /// Minimum union of a bucket's exact object bounds.
    pub(crate) fn bucket_bounds(&self, leaf: NodeIndex) -> Aabb {
        let node = &self.nodes[leaf];
        let NodeKind::Leaf { items } = &node.kind else {
            return node.bounds;
        };
        items
            .iter()
            .filter_map(|&id| self.slot(id).map(|slot| slot.bounds))
            .reduce(Aabb::union)
            .unwrap_or(node.bounds)
    }

    fn sibling_of(&self, parent: NodeIndex, child: NodeIndex) -> NodeIndex {
        match self.nodes[parent].kind {
            NodeKind::Internal { left, right } => {
                if left == child {
                    right
                } else {
                    left
                }
            }
            NodeKind::Leaf { .. } => child,
        }
    }

    fn replace_child(&mut self, parent: NodeIndex, old: NodeIndex, new: NodeIndex) {
        if let NodeKind::Internal { left, right } = &mut self.nodes[parent].kind {
            if *left == old {
                *left = new;
            } else if *right == old {
                *right = new;
            }
        }
    }

    /// Grows ancestor bounds by `bounds`, root-ward.
    fn union_up(&mut self, mut idx: Option<NodeIndex>, bounds: Aabb) {
        while let Some(i) = idx {
            let node = &mut self.nodes[i];
            node.bounds = node.bounds.union(bounds);
            idx = node.parent;
        }
    }

    /// Recomputes ancestor bounds from their children, root-ward.
    ///
    /// Unlike [`Tree::union_up`] this can shrink.
    fn recompute_up(&mut self, mut idx: Option<NodeIndex>) {
        while let Some(i) = idx {
            if let Some((left, right)) = self.nodes[i].children() {
                self.nodes[i].bounds = self.nodes[left].bounds.union(self.nodes[right].bounds);
            }
            idx = self.nodes[i].parent;
        }
    }

    /// Rewrites depths across a subtree after it moved up a level.
    fn assign_depths(&mut self, root: NodeIndex, depth: u32) {
        let mut stack = vec![(root, depth)];
        while let Some((idx, depth)) = stack.pop() {
            self.nodes[idx].depth = depth;
            if let Some((left, right)) = self.nodes[idx].children() {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
    }

    fn note_depth_degradation(&mut self) {
        if !self.depth_warned {
            self.depth_warned = true;
            warn!(
                max_depth = self.config.max_depth,
                "depth ceiling reached, appending to oversized leaf bucket"
            );
        }
    }
}
