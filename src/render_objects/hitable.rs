use ultraviolet::Vec3;

use crate::primatives::{Aabb, Ray};

/// Index into the scene's material table.
pub type MaterialId = usize;

/// Anything the BVH can index: a bounded shape that answers nearest-hit queries.
pub trait Hittable {
    fn bbox(&self) -> Aabb;
    fn hit(&self, ray: &Ray) -> Option<Hit>;
}

/// A confirmed ray/surface intersection. Misses are `None` at the query site.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub pos: Vec3,
    /// Unit surface normal.
    pub norm: Vec3,
    pub material: MaterialId,
}

impl Hit {
    pub fn new(t: f32, pos: Vec3, norm: Vec3) -> Self {
        Self {
            t,
            pos,
            norm,
            material: 0,
        }
    }

    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = material;
        self
    }

    /// Earliest of two query results. A hit beats a miss; on equal `t` the
    /// first argument is kept.
    #[inline]
    pub fn nearest(a: Option<Hit>, b: Option<Hit>) -> Option<Hit> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.t < a.t { b } else { a }),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }
}
