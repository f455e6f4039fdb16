use std::cmp::Reverse;
use std::collections::BinaryHeap;

use geom::precision::{stable_total_cmp_f64, StableF64};
use geom::{Aabb, Ray, Vec3};

use crate::node::{NodeIndex, NodeKind};
use crate::tree::{ObjectId, Tree};

/// One raycast hit.
///
/// `t` is the entry distance along the (unit-length) ray into the object's
/// AABB, `point` the entry point, `normal` the outward normal of the entered
/// face.
#[derive(Debug)]
pub struct Hit<'a, T> {
    pub id: ObjectId,
    pub t: f64,
    pub point: Vec3,
    pub normal: Vec3,
    pub payload: &'a T,
}

/// Result of a nearest-neighbor query.
#[derive(Debug)]
pub struct NearestHit<'a, T> {
    pub id: ObjectId,
    /// Distance from the query point to the object's AABB (zero inside).
    pub distance: f64,
    pub payload: &'a T,
}

impl<T> Tree<T> {
    /// Collects every object whose AABB the ray enters within `max_t`.
    ///
    /// Traversal is near-first (children are visited in order of slab entry
    /// distance), and hits are reported in traversal order, not sorted by
    /// distance. Callers that need sorted hits sort the result.
    pub fn raycast(&self, ray: &Ray, max_t: f64) -> Vec<Hit<'_, T>> {
        let mut hits = Vec::new();
        if let Some(root) = self.root
            && self.nodes[root].bounds.ray_entry(ray, 0.0, max_t).is_some()
        {
            self.raycast_rec(root, ray, max_t, &mut hits);
        }
        hits
    }

    fn raycast_rec<'a>(
        &'a self,
        idx: NodeIndex,
        ray: &Ray,
        max_t: f64,
        hits: &mut Vec<Hit<'a, T>>,
    ) {
        match &self.nodes[idx].kind {
            NodeKind::Leaf { items } => {
                for &id in items {
                    let Some((bounds, payload)) = self.payload_and_bounds(id) else {
                        continue;
                    };
                    if let Some((t, normal)) = bounds.ray_entry_with_normal(ray, 0.0, max_t) {
                        hits.push(Hit {
                            id,
                            t,
                            point: ray.at(t),
                            normal,
                            payload,
                        });
                    }
                }
            }
            NodeKind::Internal { left, right } => {
                let (left, right) = (*left, *right);
                let t_left = self.nodes[left].bounds.ray_entry(ray, 0.0, max_t);
                let t_right = self.nodes[right].bounds.ray_entry(ray, 0.0, max_t);
                match (t_left, t_right) {
                    (Some(a), Some(b)) => {
                        if stable_total_cmp_f64(a, b).is_le() {
                            self.raycast_rec(left, ray, max_t, hits);
                            self.raycast_rec(right, ray, max_t, hits);
                        } else {
                            self.raycast_rec(right, ray, max_t, hits);
                            self.raycast_rec(left, ray, max_t, hits);
                        }
                    }
                    (Some(_), None) => self.raycast_rec(left, ray, max_t, hits),
                    (None, Some(_)) => self.raycast_rec(right, ray, max_t, hits),
                    (None, None) => {}
                }
            }
        }
    }

    /// Collects every object whose AABB touches the sphere.
    ///
    /// Ordering contract: results are in ascending id order.
    pub fn query_range(&self, center: Vec3, radius: f64) -> Vec<(ObjectId, &T)> {
        let mut out = Vec::new();
        let Some(root) = self.root else { return out };
        let radius_sq = radius * radius;

        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.bounds.distance_squared_to_point(center) > radius_sq {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf { items } => {
                    for &id in items {
                        let Some((bounds, payload)) = self.payload_and_bounds(id) else {
                            continue;
                        };
                        if bounds.distance_squared_to_point(center) <= radius_sq {
                            out.push((id, payload));
                        }
                    }
                }
                NodeKind::Internal { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }

        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Best-first nearest-neighbor lookup.
    ///
    /// Subtrees are expanded in order of their AABB's distance to `point`;
    /// the search stops once the nearest unexplored subtree cannot beat the
    /// best candidate. Equidistant objects tie-break towards the lower id.
    pub fn find_nearest(&self, point: Vec3, max_dist: f64) -> Option<NearestHit<'_, T>> {
        let root = self.root?;
        let mut limit_sq = if max_dist.is_finite() {
            max_dist * max_dist
        } else {
            f64::INFINITY
        };
        let mut best: Option<(f64, ObjectId)> = None;

        let mut heap: BinaryHeap<Reverse<(StableF64, NodeIndex)>> = BinaryHeap::new();
        let root_dist = self.nodes[root].bounds.distance_squared_to_point(point);
        if root_dist <= limit_sq {
            heap.push(Reverse((StableF64(root_dist), root)));
        }

        while let Some(Reverse((StableF64(dist_sq), idx))) = heap.pop() {
            if dist_sq > limit_sq {
                break;
            }
            if let Some((best_sq, _)) = best
                && dist_sq > best_sq
            {
                break;
            }
            match &self.nodes[idx].kind {
                NodeKind::Leaf { items } => {
                    for &id in items {
                        let Some((bounds, _)) = self.payload_and_bounds(id) else {
                            continue;
                        };
                        let dist_sq = bounds.distance_squared_to_point(point);
                        if dist_sq > limit_sq {
                            continue;
                        }
                        let better = match best {
                            None => true,
                            Some((best_sq, best_id)) => stable_total_cmp_f64(dist_sq, best_sq)
                                .then_with(|| id.cmp(&best_id))
                                .is_lt(),
                        };
                        if better {
                            best = Some((dist_sq, id));
                            limit_sq = limit_sq.min(dist_sq);
                        }
                    }
                }
                NodeKind::Internal { left, right } => {
                    for child in [*left, *right] {
                        let child_dist = self.nodes[child].bounds.distance_squared_to_point(point);
                        if child_dist <= limit_sq {
                            heap.push(Reverse((StableF64(child_dist), child)));
                        }
                    }
                }
            }
        }

        let (dist_sq, id) = best?;
        let payload = self.get(id)?;
        Some(NearestHit {
            id,
            distance: dist_sq.sqrt(),
            payload,
        })
    }

    /// Collects every object whose AABB intersects `query`.
    ///
    /// Ordering contract: results are in ascending id order.
    pub fn intersect_bounds(&self, query: Aabb) -> Vec<(ObjectId, &T)> {
        let mut out = Vec::new();
        let Some(root) = self.root else { return out };

        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if !node.bounds.intersects(query) {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf { items } => {
                    for &id in items {
                        let Some((bounds, payload)) = self.payload_and_bounds(id) else {
                            continue;
                        };
                        if bounds.intersects(query) {
                            out.push((id, payload));
                        }
                    }
                }
                NodeKind::Internal { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }

        out.sort_by_key(|(id, _)| *id);
        out
    }
}
