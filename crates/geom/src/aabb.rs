use crate::ray::Ray;
use crate::vec::Vec3;

/// Rays closer than this to axis-parallel contribute no slab constraint.
const PARALLEL_EPSILON: f64 = 1e-12;

/// Coordinate axis, in the fixed X/Y/Z order used for splits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Axis-aligned bounding box.
///
/// `new` normalizes inputs so `min.k <= max.k` holds on every axis.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Builds a box from two corner points.
    ///
    /// Swapped components are normalized, so any two opposite corners are
    /// accepted.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// A degenerate box containing exactly `p`.
    pub fn point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// Returns the smallest box containing `self` and `other`.
    pub fn union(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Returns the smallest box containing `self` and `p`.
    pub fn union_point(self, p: Vec3) -> Self {
        Self {
            min: self.min.min(p),
            max: self.max.max(p),
        }
    }

    pub fn intersects(self, other: Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn contains_aabb(self, other: Self) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    pub fn center(self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(self) -> Vec3 {
        self.max - self.min
    }

    pub fn surface_area(self) -> f64 {
        let e = self.extent();
        2.0 * (e.x * e.y + e.x * e.z + e.y * e.z)
    }

    pub fn volume(self) -> f64 {
        let e = self.extent();
        e.x * e.y * e.z
    }

    /// The axis with the largest extent.
    ///
    /// Deterministic tie-break: prefer X, then Y, then Z.
    pub fn longest_axis(self) -> Axis {
        let e = self.extent();
        if e.x >= e.y && e.x >= e.z {
            Axis::X
        } else if e.y >= e.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    /// The point of the box closest to `p` (equal to `p` when inside).
    pub fn closest_point(self, p: Vec3) -> Vec3 {
        p.max(self.min).min(self.max)
    }

    pub fn distance_squared_to_point(self, p: Vec3) -> f64 {
        let d = p - self.closest_point(p);
        d.length_squared()
    }

    /// Slab test returning the entry distance of `ray` into the box.
    ///
    /// The returned `t` is clipped to `[t_min, t_max]`; `None` means the ray
    /// misses the box (or only touches it outside the interval). An origin
    /// inside the box yields `t_min`.
    pub fn ray_entry(self, ray: &Ray, t_min: f64, t_max: f64) -> Option<f64> {
        self.ray_entry_with_normal(ray, t_min, t_max).map(|(t, _)| t)
    }

    /// Like [`Aabb::ray_entry`], additionally returning the outward normal of
    /// the face the ray enters through.
    ///
    /// An origin inside the box reports the face behind the origin.
    pub fn ray_entry_with_normal(
        self,
        ray: &Ray,
        mut t_min: f64,
        mut t_max: f64,
    ) -> Option<(f64, Vec3)> {
        let floor = t_min;
        let mut entry_axis = self.longest_axis();
        let mut entry_t = f64::NEG_INFINITY;

        for axis in Axis::ALL {
            let a = axis.index();
            let o = ray.origin.axis(a);
            let d = ray.dir().axis(a);
            let min = self.min.axis(a);
            let max = self.max.axis(a);

            if d.abs() < PARALLEL_EPSILON {
                if o < min || o > max {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let mut t1 = (min - o) * inv;
            let mut t2 = (max - o) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }

            if t1 > entry_t {
                entry_t = t1;
                entry_axis = axis;
            }

            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_max < t_min {
                return None;
            }
        }

        let sign = if ray.dir().axis(entry_axis.index()) > 0.0 {
            -1.0
        } else {
            1.0
        };
        let mut normal = Vec3::ZERO;
        match entry_axis {
            Axis::X => normal.x = sign,
            Axis::Y => normal.y = sign,
            Axis::Z => normal.z = sign,
        }

        Some((t_min.max(floor), normal))
    }
}
