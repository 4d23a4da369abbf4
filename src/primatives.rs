use std::sync::Arc;

use ultraviolet::{Mat4, Vec3};

use crate::render_objects::Hit;

/// A ray with a parametric validity interval and a remaining bounce budget.
///
/// The direction is not required to be unit length; `t` is always measured in
/// multiples of `direction`.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Only hits with `time_bounds[0] < t < time_bounds[1]` count.
    pub time_bounds: [f32; 2],
    pub depth: u32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            time_bounds: [0.0, f32::INFINITY],
            depth: 0,
        }
    }

    pub fn with_time_bounds(mut self, t0: f32, t1: f32) -> Self {
        self.time_bounds = [t0, t1];
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    #[inline]
    pub fn within_bounds(&self, t: f32) -> bool {
        t > self.time_bounds[0] && t < self.time_bounds[1]
    }
}

/// Axis-aligned bounding box.
///
/// The empty box has `min = +inf` and `max = -inf`, so enclosing anything into
/// it yields exactly that thing's bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vec3::broadcast(f32::INFINITY),
            max: Vec3::broadcast(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn enclose_point(&mut self, point: Vec3) {
        self.min = self.min.min_by_component(point);
        self.max = self.max.max_by_component(point);
    }

    pub fn enclose(&mut self, other: &Aabb) {
        self.min = self.min.min_by_component(other.min);
        self.max = self.max.max_by_component(other.max);
    }

    pub fn union(mut self, other: &Aabb) -> Aabb {
        self.enclose(other);
        self
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::zero()
        } else {
            self.max - self.min
        }
    }

    pub fn largest_axis(&self) -> usize {
        let extent = self.extent();
        if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        }
    }

    pub fn surface_area(&self) -> f32 {
        let e = self.extent();
        2.0 * (e.x * e.y + e.y * e.z + e.z * e.x)
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min, self.max);
        [0, 1, 2, 3, 4, 5, 6, 7].map(|v| {
            Vec3::new(
                if v % 2 == 0 { min.x } else { max.x },
                if (v / 2) % 2 == 0 { min.y } else { max.y },
                if (v / 4) % 2 == 0 { min.z } else { max.z },
            )
        })
    }

    /// Bounds of this box after an affine transform.
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::empty();
        for corner in self.corners() {
            out.enclose_point(transform.transform_point3(corner));
        }
        out
    }

    /// Slab test.
    ///
    /// On success `times` is narrowed to the part of the ray inside the box,
    /// clipped against both the incoming `times` and `ray.time_bounds`. On
    /// failure the contents of `times` are left unspecified.
    ///
    /// Zero direction components produce infinities through plain IEEE
    /// division, which leaves that axis unconstrained when the origin lies
    /// within the slab and rejects the ray otherwise.
    pub fn hit(&self, ray: &Ray, times: &mut [f32; 2]) -> bool {
        if self.is_empty() {
            return false;
        }

        let mut entry = f32::NEG_INFINITY;
        let mut exit = f32::INFINITY;

        for axis in 0..3 {
            // Adding +0 turns -0 into +0, so both zeros divide the same way.
            let direction = ray.direction[axis] + 0.0;
            let mut t_near = (self.min[axis] - ray.origin[axis]) / direction;
            let mut t_far = (self.max[axis] - ray.origin[axis]) / direction;
            if t_near > t_far {
                std::mem::swap(&mut t_near, &mut t_far);
            }

            // f32::max/min drop a NaN operand, so 0/0 leaves the axis open.
            entry = entry.max(t_near);
            exit = exit.min(t_far);
            if entry > exit {
                return false;
            }
        }

        let lo = entry.max(times[0]).max(ray.time_bounds[0]);
        let hi = exit.min(times[1]).min(ray.time_bounds[1]);
        if lo > hi {
            return false;
        }

        *times = [lo, hi];
        true
    }
}

/// Sphere of the given radius centred on its local origin.
#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub radius: f32,
}

impl Sphere {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    pub fn bbox(&self) -> Aabb {
        Aabb::new(Vec3::broadcast(-self.radius), Vec3::broadcast(self.radius))
    }

    pub fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let a = ray.direction.mag_sq();
        let b = 2.0 * ray.origin.dot(ray.direction);
        let c = ray.origin.mag_sq() - self.radius * self.radius;
        let descrim = b * b - 4.0 * a * c;

        if descrim < 0.0 {
            return None;
        }

        let desc_sqrt = descrim.sqrt();
        let t1 = (-b - desc_sqrt) / (2.0 * a);
        let t2 = (-b + desc_sqrt) / (2.0 * a);
        let valid = |t: f32| t > 0.0 && ray.within_bounds(t);

        let t = if valid(t1) {
            t1
        } else if valid(t2) {
            t2
        } else {
            return None;
        };

        let pos = ray.at(t);
        Some(Hit::new(t, pos, pos.normalized()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self { position, normal }
    }
}

/// A triangle indexing three vertices of a vertex buffer shared with the rest
/// of its mesh.
#[derive(Clone, Debug)]
pub struct Triangle {
    vertices: Arc<[MeshVertex]>,
    indices: [u32; 3],
}

impl Triangle {
    /// Callers guarantee every index is in range for `vertices`.
    pub fn new(vertices: Arc<[MeshVertex]>, indices: [u32; 3]) -> Self {
        Self { vertices, indices }
    }

    fn corners(&self) -> [&MeshVertex; 3] {
        self.indices.map(|i| &self.vertices[i as usize])
    }

    pub fn bbox(&self) -> Aabb {
        let mut bbox = Aabb::empty();
        for vertex in self.corners() {
            bbox.enclose_point(vertex.position);
        }
        bbox
    }

    pub fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let [v0, v1, v2] = self.corners();

        let edge1 = v1.position - v0.position;
        let edge2 = v2.position - v0.position;
        let h = ray.direction.cross(edge2);
        let a = edge1.dot(h);
        if a == 0.0 {
            // This ray is parallel to this triangle.
            return None;
        }

        let f = 1.0 / a;
        let s = ray.origin - v0.position;
        let u = f * s.dot(h);
        let q = s.cross(edge1);
        let v = f * ray.direction.dot(q);
        let w = 1.0 - u - v;

        let inside = |x: f32| (0.0..=1.0).contains(&x);
        if !(inside(u) && inside(v) && inside(w)) {
            return None;
        }

        let t = f * edge2.dot(q);
        if !ray.within_bounds(t) {
            return None;
        }

        let pos = v0.position * w + v1.position * u + v2.position * v;
        let mut norm = v0.normal * w + v1.normal * u + v2.normal * v;
        if norm.mag_sq() == 0.0 {
            norm = edge1.cross(edge2);
        }
        norm.normalize();

        // Always report the side facing the incoming ray.
        if norm.dot(ray.direction) > 0.0 {
            norm = -norm;
        }

        Some(Hit::new(t, pos, norm))
    }
}
