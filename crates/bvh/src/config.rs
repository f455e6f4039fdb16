/// Tuning knobs for a [`crate::Tree`].
///
/// Accepted at construction and kept for the tree's lifetime; `rebuild` uses
/// the same configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeConfig {
    /// Upper bound on payloads per leaf bucket.
    ///
    /// Larger buckets give a shallower tree and faster builds at the price of
    /// slower per-query refinement.
    pub max_leaf_size: usize,
    /// Hard ceiling on node depth (root is depth 0).
    ///
    /// Bounds stack usage against pathological input; at the ceiling new
    /// payloads are appended to the deepest reachable bucket instead of
    /// splitting it.
    pub max_depth: usize,
    /// When true, on-line insertion descends by surface-area enlargement
    /// cost; when false, by volume enlargement.
    pub enable_sah: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_leaf_size: 8,
            max_depth: 32,
            enable_sah: true,
        }
    }
}

/// Split-selection strategy for bulk construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuildStrategy {
    /// Surface Area Heuristic sweep over all three axes.
    ///
    /// Best query performance, highest build cost.
    Sah,
    /// Median split on the longest axis of the combined bounds.
    ///
    /// Well-balanced trees, cheap to build.
    Median,
    /// Split the input order in half, no sorting.
    ///
    /// Cheapest build; only worthwhile for spatially coherent input.
    Equal,
}
