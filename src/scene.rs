//! Scene assembly and the built-in demo scenes.

use ultraviolet::{Mat4, Vec3};

use crate::camera::Camera;
use crate::error::SceneError;
use crate::lights::{DirectionalLight, EnvironmentLight, Light, RectLight, Sky};
use crate::materials::{Bsdf, Lambertian, Mirror};
use crate::primatives::{MeshVertex, Sphere};
use crate::render_objects::{MaterialId, Object, Shape, TriMesh};

/// Everything a [`Pathtracer`](crate::pathtracer::Pathtracer) needs, before
/// the scene hierarchy is built.
pub struct Scene {
    pub objects: Vec<Object>,
    pub materials: Vec<Box<dyn Bsdf + Send + Sync>>,
    pub lights: Vec<Box<dyn Light + Send + Sync>>,
    pub environment: Option<Box<dyn EnvironmentLight + Send + Sync>>,
    pub camera: Camera,
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self {
            objects: Vec::new(),
            materials: Vec::new(),
            lights: Vec::new(),
            environment: None,
            camera,
        }
    }

    pub fn add_material<B: Bsdf + Send + Sync + 'static>(&mut self, bsdf: B) -> MaterialId {
        self.materials.push(Box::new(bsdf));
        self.materials.len() - 1
    }

    pub fn add_object(&mut self, object: Object) {
        self.objects.push(object);
    }

    pub fn add_light<L: Light + Send + Sync + 'static>(&mut self, light: L) {
        self.lights.push(Box::new(light));
    }

    pub fn set_environment<E: EnvironmentLight + Send + Sync + 'static>(&mut self, environment: E) {
        self.environment = Some(Box::new(environment));
    }
}

pub const SCENE_NAMES: &[&str] = &["cornell", "spheres"];

pub fn by_name(name: &str, aspect: f32, max_leaf_size: usize) -> Result<Scene, SceneError> {
    match name {
        "cornell" => cornell_box(aspect, max_leaf_size),
        "spheres" => random_spheres(aspect, max_leaf_size),
        _ => Err(SceneError::UnknownScene(name.to_string())),
    }
}

fn push_quad(
    vertices: &mut Vec<MeshVertex>,
    indices: &mut Vec<u32>,
    corner: Vec3,
    edge_u: Vec3,
    edge_v: Vec3,
) {
    let normal = edge_u.cross(edge_v).normalized();
    let base = vertices.len() as u32;
    for position in [corner, corner + edge_u, corner + edge_u + edge_v, corner + edge_v] {
        vertices.push(MeshVertex::new(position, normal));
    }
    indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
}

/// Flat parallelogram facing `edge_u x edge_v`.
pub fn quad(
    corner: Vec3,
    edge_u: Vec3,
    edge_v: Vec3,
    max_leaf_size: usize,
) -> Result<TriMesh, SceneError> {
    let mut vertices = Vec::with_capacity(4);
    let mut indices = Vec::with_capacity(6);
    push_quad(&mut vertices, &mut indices, corner, edge_u, edge_v);
    TriMesh::new(vertices, &indices, max_leaf_size)
}

/// Axis-aligned box of the given size centred on the origin, with outward
/// facing flat normals.
pub fn cuboid(size: Vec3, max_leaf_size: usize) -> Result<TriMesh, SceneError> {
    let h = size * 0.5;
    let (dx, dy, dz) = (
        Vec3::new(size.x, 0.0, 0.0),
        Vec3::new(0.0, size.y, 0.0),
        Vec3::new(0.0, 0.0, size.z),
    );
    let faces = [
        (Vec3::new(h.x, -h.y, -h.z), dy, dz),
        (Vec3::new(-h.x, -h.y, -h.z), dz, dy),
        (Vec3::new(-h.x, h.y, -h.z), dz, dx),
        (Vec3::new(-h.x, -h.y, -h.z), dx, dz),
        (Vec3::new(-h.x, -h.y, h.z), dx, dy),
        (Vec3::new(-h.x, -h.y, -h.z), dy, dx),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (corner, edge_u, edge_v) in faces {
        push_quad(&mut vertices, &mut indices, corner, edge_u, edge_v);
    }
    TriMesh::new(vertices, &indices, max_leaf_size)
}

/// Closed box two units wide with coloured side walls, an area light under
/// the ceiling, a rotated block and a mirror ball. The open side faces +Z.
pub fn cornell_box(aspect: f32, max_leaf_size: usize) -> Result<Scene, SceneError> {
    let camera = Camera::look_at(
        Vec3::new(0.0, 1.0, 3.4),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::unit_y(),
        40.0,
        aspect,
    );
    let mut scene = Scene::new(camera);

    let white = scene.add_material(Lambertian::new(Vec3::new(0.73, 0.73, 0.73)));
    let red = scene.add_material(Lambertian::new(Vec3::new(0.65, 0.05, 0.05)));
    let green = scene.add_material(Lambertian::new(Vec3::new(0.12, 0.45, 0.15)));
    let mirror = scene.add_material(Mirror::new(Vec3::new(0.9, 0.9, 0.9)));

    let walls = [
        // floor, ceiling, back
        (Vec3::new(-1.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 2.0), Vec3::new(2.0, 0.0, 0.0), white),
        (Vec3::new(-1.0, 2.0, -1.0), Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 2.0), white),
        (Vec3::new(-1.0, 0.0, -1.0), Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0), white),
        // left, right
        (Vec3::new(-1.0, 0.0, -1.0), Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, 0.0, 2.0), red),
        (Vec3::new(1.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 2.0, 0.0), green),
    ];
    for (corner, edge_u, edge_v, material) in walls {
        let mesh = quad(corner, edge_u, edge_v, max_leaf_size)?;
        scene.add_object(Object::new(Shape::Mesh(mesh), material));
    }

    let block = cuboid(Vec3::new(0.6, 1.2, 0.6), max_leaf_size)?;
    scene.add_object(
        Object::new(Shape::Mesh(block), white).with_transform(
            Mat4::from_translation(Vec3::new(-0.35, 0.6, -0.3))
                * Mat4::from_rotation_y(15f32.to_radians()),
        ),
    );
    scene.add_object(
        Object::new(Shape::Sphere(Sphere::new(0.35)), mirror)
            .with_transform(Mat4::from_translation(Vec3::new(0.4, 0.35, 0.3))),
    );

    scene.add_light(RectLight {
        corner: Vec3::new(-0.25, 1.99, -0.25),
        edge_u: Vec3::new(0.5, 0.0, 0.0),
        edge_v: Vec3::new(0.0, 0.0, 0.5),
        radiance: Vec3::broadcast(15.0),
    });

    Ok(scene)
}

/// A grid of small diffuse and mirror balls on a ground plane under an open
/// sky.
pub fn random_spheres(aspect: f32, max_leaf_size: usize) -> Result<Scene, SceneError> {
    let camera = Camera::look_at(
        Vec3::new(7.0, 2.0, 5.0),
        Vec3::new(0.0, 0.5, 0.0),
        Vec3::unit_y(),
        35.0,
        aspect,
    );
    let mut scene = Scene::new(camera);
    let rng = fastrand::Rng::with_seed(0x5eed);

    let ground = scene.add_material(Lambertian::new(Vec3::broadcast(0.5)));
    let floor = quad(
        Vec3::new(-50.0, 0.0, -50.0),
        Vec3::new(0.0, 0.0, 100.0),
        Vec3::new(100.0, 0.0, 0.0),
        max_leaf_size,
    )?;
    scene.add_object(Object::new(Shape::Mesh(floor), ground));

    for a in -5..5 {
        for b in -5..5 {
            let radius = 0.15 + 0.1 * rng.f32();
            let center = Vec3::new(
                a as f32 + 0.8 * rng.f32(),
                radius,
                b as f32 + 0.8 * rng.f32(),
            );
            if (center - Vec3::new(0.0, radius, 0.0)).mag() < 1.2 {
                continue;
            }

            let material = if rng.f32() < 0.8 {
                let albedo = Vec3::new(rng.f32(), rng.f32(), rng.f32());
                scene.add_material(Lambertian::new(albedo * albedo))
            } else {
                let tint = 0.5 + 0.5 * rng.f32();
                scene.add_material(Mirror::new(Vec3::broadcast(tint)))
            };
            scene.add_object(
                Object::new(Shape::Sphere(Sphere::new(radius)), material)
                    .with_transform(Mat4::from_translation(center)),
            );
        }
    }

    let mirror = scene.add_material(Mirror::new(Vec3::new(0.95, 0.9, 0.85)));
    scene.add_object(
        Object::new(Shape::Sphere(Sphere::new(1.0)), mirror)
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))),
    );

    // The sun is lit by the directional light; the sky keeps only its gradient.
    let sky = Sky {
        sun: Vec3::zero(),
        ..Sky::default()
    };
    scene.add_light(DirectionalLight::new(sky.sun_dir, Vec3::broadcast(1.5)));
    scene.set_environment(sky);

    Ok(scene)
}
