/// Offset applied to secondary ray origins to keep them off the surface they leave.
pub const EPSILON: f32 = 0.00001;

/// Number of equal-width buckets used by the SAH split search.
pub const SAH_BUCKETS: usize = 8;

/// Below this many primitives a BVH query just scans the primitive array.
pub const LINEAR_SCAN_THRESHOLD: usize = 8;

pub const DEFAULT_MAX_LEAF_SIZE: usize = 4;
