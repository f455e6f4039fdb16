pub mod aabb;
pub mod arena;
pub mod precision;
pub mod ray;
pub mod vec;

// Geometry crate: small, well-tested primitives only.
pub use aabb::*;
pub use arena::*;
pub use ray::*;
pub use vec::*;
