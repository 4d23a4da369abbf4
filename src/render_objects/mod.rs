use std::sync::Arc;

use ultraviolet::{Mat4, Vec3};

use crate::{error::SceneError, primatives::*};

pub use self::bvh::{Bvh, BvhNode};
pub use self::hitable::{Hit, Hittable, MaterialId};

pub mod bvh;
pub mod hitable;

impl Hittable for Sphere {
    fn bbox(&self) -> Aabb {
        Sphere::bbox(self)
    }

    fn hit(&self, ray: &Ray) -> Option<Hit> {
        self.intersect(ray)
    }
}

impl Hittable for Triangle {
    fn bbox(&self) -> Aabb {
        Triangle::bbox(self)
    }

    fn hit(&self, ray: &Ray) -> Option<Hit> {
        self.intersect(ray)
    }
}

/// Triangle mesh indexed by its own BVH.
#[derive(Clone, Debug)]
pub struct TriMesh {
    triangles: Bvh<Triangle>,
}

impl TriMesh {
    /// Builds a mesh from a vertex buffer and a flat list of triangle indices.
    pub fn new(
        vertices: Vec<MeshVertex>,
        indices: &[u32],
        max_leaf_size: usize,
    ) -> Result<Self, SceneError> {
        if indices.len() % 3 != 0 {
            return Err(SceneError::IncompleteTriangle(indices.len()));
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(SceneError::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }

        let vertices: Arc<[MeshVertex]> = Arc::from(vertices);
        let triangles = indices
            .chunks_exact(3)
            .map(|tri| Triangle::new(vertices.clone(), [tri[0], tri[1], tri[2]]))
            .collect();

        Ok(Self {
            triangles: Bvh::build(triangles, max_leaf_size),
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

impl Hittable for TriMesh {
    fn bbox(&self) -> Aabb {
        self.triangles.bbox()
    }

    fn hit(&self, ray: &Ray) -> Option<Hit> {
        self.triangles.hit(ray)
    }
}

#[derive(Clone, Debug)]
pub enum Shape {
    Mesh(TriMesh),
    Sphere(Sphere),
}

impl Shape {
    fn bbox(&self) -> Aabb {
        match self {
            Shape::Mesh(mesh) => mesh.bbox(),
            Shape::Sphere(sphere) => Hittable::bbox(sphere),
        }
    }

    fn hit(&self, ray: &Ray) -> Option<Hit> {
        match self {
            Shape::Mesh(mesh) => mesh.hit(ray),
            Shape::Sphere(sphere) => sphere.intersect(ray),
        }
    }
}

/// A placed shape with a material: the unit the scene-level BVH indexes.
///
/// Rays are carried into object space without renormalizing the direction,
/// so hit times need no conversion on the way back out.
#[derive(Clone, Debug)]
pub struct Object {
    shape: Shape,
    material: MaterialId,
    inverse: Mat4,
    normal_matrix: Mat4,
    bbox: Aabb,
}

impl Object {
    pub fn new(shape: Shape, material: MaterialId) -> Self {
        let bbox = shape.bbox();
        Self {
            shape,
            material,
            inverse: Mat4::identity(),
            normal_matrix: Mat4::identity(),
            bbox,
        }
    }

    /// Places the object with an invertible affine object-to-world transform.
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.inverse = transform.inversed();
        self.normal_matrix = self.inverse.transposed();
        self.bbox = self.shape.bbox().transformed(&transform);
        self
    }

    pub fn material(&self) -> MaterialId {
        self.material
    }
}

impl Hittable for Object {
    fn bbox(&self) -> Aabb {
        self.bbox
    }

    fn hit(&self, ray: &Ray) -> Option<Hit> {
        let local = Ray {
            origin: self.inverse.transform_point3(ray.origin),
            direction: self.inverse.transform_vec3(ray.direction),
            ..*ray
        };

        let hit = self.shape.hit(&local)?;
        let norm: Vec3 = self.normal_matrix.transform_vec3(hit.norm).normalized();

        Some(Hit {
            t: hit.t,
            pos: ray.at(hit.t),
            norm,
            material: self.material,
        })
    }
}
