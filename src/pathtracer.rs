//! Monte Carlo radiance estimator: direct light sampling at every hit plus
//! recursive BSDF-sampled bounces cut short by Russian roulette.

use fastrand::Rng;
use tracing::info;
use ultraviolet::{Vec2, Vec3};

use crate::camera::Camera;
use crate::config::RenderSettings;
use crate::constants::EPSILON;
use crate::error::{Result, SceneError};
use crate::lights::{EnvironmentLight, Light};
use crate::materials::{luma, Bsdf, Spectrum};
use crate::primatives::Ray;
use crate::render_objects::{Bvh, Hit, Hittable, Object};
use crate::samplers;
use crate::scene::Scene;

/// Orthonormal basis whose local +Y is the surface normal.
struct Frame {
    x: Vec3,
    y: Vec3,
    z: Vec3,
}

impl Frame {
    fn from_normal(normal: Vec3) -> Self {
        let helper = if normal.x.abs() > 0.9 {
            Vec3::unit_z()
        } else {
            Vec3::unit_x()
        };
        let x = normal.cross(helper).normalized();
        let z = x.cross(normal);
        Self { x, y: normal, z }
    }

    fn to_local(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.x), v.dot(self.y), v.dot(self.z))
    }

    fn to_world(&self, v: Vec3) -> Vec3 {
        self.x * v.x + self.y * v.y + self.z * v.z
    }
}

/// A frozen scene ready to be sampled from many threads.
pub struct Pathtracer {
    scene: Bvh<Object>,
    materials: Vec<Box<dyn Bsdf + Send + Sync>>,
    lights: Vec<Box<dyn Light + Send + Sync>>,
    environment: Option<Box<dyn EnvironmentLight + Send + Sync>>,
    camera: Camera,
    settings: RenderSettings,
}

impl Pathtracer {
    /// Checks material references and builds the scene-level BVH.
    pub fn new(scene: Scene, settings: RenderSettings) -> Result<Self> {
        settings.validate()?;

        let Scene {
            objects,
            materials,
            lights,
            environment,
            camera,
        } = scene;

        for (index, object) in objects.iter().enumerate() {
            if object.material() >= materials.len() {
                return Err(SceneError::UnknownMaterial {
                    object: index,
                    material: object.material(),
                    available: materials.len(),
                }
                .into());
            }
        }

        let scene = Bvh::build(objects, settings.max_leaf_size);
        info!(
            objects = scene.len(),
            nodes = scene.nodes().len(),
            depth = scene.depth(),
            lights = lights.len(),
            "built scene hierarchy"
        );

        Ok(Self {
            scene,
            materials,
            lights,
            environment,
            camera,
            settings,
        })
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn scene(&self) -> &Bvh<Object> {
        &self.scene
    }

    /// Average radiance over `settings.samples` jittered camera rays through
    /// pixel `(x, y)`.
    pub fn trace_pixel(&self, x: usize, y: usize, rng: &Rng) -> Spectrum {
        let xy = Vec2::new(x as f32, y as f32);
        let wh = Vec2::new(self.settings.width as f32, self.settings.height as f32);

        let mut radiance = Vec3::zero();
        for _ in 0..self.settings.samples {
            let offset = samplers::rect_uniform(rng, Vec2::one());
            let screen = (xy + offset) / wh;
            let ray = self
                .camera
                .generate_ray(screen)
                .with_depth(self.settings.max_depth);
            radiance += self.trace_ray(&ray, rng);
        }
        radiance / self.settings.samples as f32
    }

    /// Incoming radiance along `ray`.
    pub fn trace_ray(&self, ray: &Ray, rng: &Rng) -> Spectrum {
        self.radiance(ray, rng, true)
    }

    /// `see_environment` is cleared on bounces whose origin already sampled
    /// the environment as a light, so escaping paths do not count it twice.
    fn radiance(&self, ray: &Ray, rng: &Rng, see_environment: bool) -> Spectrum {
        let Some(hit) = self.scene.hit(ray) else {
            return match &self.environment {
                Some(env) if see_environment => env.radiance(ray.direction),
                _ => Vec3::zero(),
            };
        };

        let frame = Frame::from_normal(hit.norm);
        let out_dir = frame.to_local(-ray.direction.normalized());
        let bsdf = self.materials[hit.material].as_ref();

        let mut radiance = Vec3::zero();

        if !bsdf.is_discrete() {
            for light in &self.lights {
                radiance += self.sample_light(light.as_ref(), &hit, &frame, out_dir, bsdf, rng);
            }
            if let Some(env) = &self.environment {
                radiance += self.sample_light(env.as_ref(), &hit, &frame, out_dir, bsdf, rng);
            }
        }

        if ray.depth > 0 {
            radiance += self.sample_indirect(ray, &hit, &frame, out_dir, bsdf, rng);
        }

        radiance
    }

    fn sample_light<L: Light + ?Sized>(
        &self,
        light: &L,
        hit: &Hit,
        frame: &Frame,
        out_dir: Vec3,
        bsdf: &dyn Bsdf,
        rng: &Rng,
    ) -> Spectrum {
        let samples = if light.is_discrete() {
            1
        } else {
            self.settings.area_samples
        };

        let mut radiance = Vec3::zero();
        for _ in 0..samples {
            let sample = light.sample(hit.pos, rng);
            let in_dir = frame.to_local(sample.direction);

            let cos_theta = in_dir.y;
            if cos_theta <= 0.0 {
                continue;
            }

            let response = bsdf.evaluate(out_dir, in_dir);
            if luma(response) == 0.0 {
                continue;
            }

            let shadow_ray = Ray::new(hit.pos + EPSILON * sample.direction, sample.direction)
                .with_time_bounds(0.0, sample.distance / sample.direction.mag() - EPSILON);
            if self.scene.hit(&shadow_ray).is_none() {
                radiance +=
                    response * sample.radiance * (cos_theta / (samples as f32 * sample.pdf));
            }
        }
        radiance
    }

    fn sample_indirect(
        &self,
        ray: &Ray,
        hit: &Hit,
        frame: &Frame,
        out_dir: Vec3,
        bsdf: &dyn Bsdf,
        rng: &Rng,
    ) -> Spectrum {
        let sample = bsdf.sample(out_dir, rng);
        if sample.pdf <= 0.0 {
            return Vec3::zero();
        }

        let throughput = sample.attenuation * (sample.direction.y.abs() / sample.pdf);
        let survival = luma(throughput).clamp(0.0, 1.0);
        if survival <= 0.0 || rng.f32() >= survival {
            return Vec3::zero();
        }

        let direction = frame.to_world(sample.direction).normalized();
        let bounce = Ray::new(hit.pos + EPSILON * direction, direction).with_depth(ray.depth - 1);

        throughput * self.radiance(&bounce, rng, bsdf.is_discrete()) / survival
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use approx::assert_abs_diff_eq;
    use ultraviolet::Mat4;

    use super::*;
    use crate::lights::{DirectionalLight, PointLight, RectLight, Sky};
    use crate::materials::{Lambertian, Mirror};
    use crate::primatives::Sphere;
    use crate::render_objects::Shape;
    use crate::scene;

    fn settings() -> RenderSettings {
        RenderSettings {
            width: 8,
            height: 8,
            samples: 1,
            area_samples: 1,
            max_depth: 0,
            ..Default::default()
        }
    }

    fn camera() -> Camera {
        Camera::look_at(
            Vec3::new(0.25, 2.0, 0.1),
            Vec3::new(0.25, 0.0, 0.1),
            Vec3::unit_z(),
            1.0,
            1.0,
        )
    }

    /// A large diffuse floor at y = 0, seen from straight above.
    fn floor_scene() -> Scene {
        let mut scene = Scene::new(camera());
        let material = scene.add_material(Lambertian::new(Vec3::broadcast(0.5)));
        let floor = scene::quad(
            Vec3::new(-50.0, 0.0, 50.0),
            Vec3::new(100.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, -100.0),
            4,
        )
        .unwrap();
        scene.add_object(Object::new(Shape::Mesh(floor), material));
        scene
    }

    fn down_ray() -> Ray {
        Ray::new(Vec3::new(0.25, 2.0, 0.1), -Vec3::unit_y())
    }

    #[test]
    fn test_frame_is_orthonormal() {
        for n in [
            Vec3::unit_y(),
            Vec3::unit_x(),
            -Vec3::unit_z(),
            Vec3::new(1.0, 2.0, 3.0).normalized(),
        ] {
            let frame = Frame::from_normal(n);
            assert_abs_diff_eq!(frame.to_local(n).y, 1.0, epsilon = 1e-5);
            let v = Vec3::new(0.3, -0.2, 0.9);
            let back = frame.to_world(frame.to_local(v));
            assert_abs_diff_eq!((back - v).mag(), 0.0, epsilon = 1e-5);
            assert_abs_diff_eq!(frame.x.dot(frame.z), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_rejects_unknown_material() {
        let mut scene = Scene::new(camera());
        scene.add_object(Object::new(Shape::Sphere(Sphere::new(1.0)), 2));
        let err = Pathtracer::new(scene, settings()).err().unwrap();
        assert!(matches!(
            err,
            crate::error::RenderError::Scene(SceneError::UnknownMaterial { material: 2, .. })
        ));
    }

    #[test]
    fn test_miss_returns_environment() {
        let mut scene = Scene::new(camera());
        scene.set_environment(Sky::uniform(Vec3::broadcast(0.3)));
        let tracer = Pathtracer::new(scene, settings()).unwrap();
        let l = tracer.trace_ray(&down_ray(), &Rng::with_seed(0));
        assert_abs_diff_eq!(l.x, 0.3, epsilon = 1e-6);

        let tracer = Pathtracer::new(Scene::new(camera()), settings()).unwrap();
        assert_eq!(tracer.trace_ray(&down_ray(), &Rng::with_seed(0)), Vec3::zero());
    }

    #[test]
    fn test_single_point_light_is_exact() {
        let mut scene = floor_scene();
        let intensity = 4.0;
        scene.add_light(PointLight {
            position: Vec3::new(1.25, 1.0, 0.1),
            intensity: Vec3::broadcast(intensity),
        });
        let tracer = Pathtracer::new(scene, settings()).unwrap();

        let l = tracer.trace_ray(&down_ray(), &Rng::with_seed(3));
        let cos_theta = 1.0 / 2f32.sqrt();
        let expected = (0.5 / PI) * cos_theta * intensity / 2.0;
        assert_abs_diff_eq!(l.x, expected, epsilon = 1e-5);
        assert_abs_diff_eq!(l.y, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_occluded_light_contributes_nothing() {
        let mut scene = floor_scene();
        let blocker = scene.add_material(Lambertian::default());
        scene.add_object(
            Object::new(Shape::Sphere(Sphere::new(0.2)), blocker)
                .with_transform(Mat4::from_translation(Vec3::new(0.75, 0.5, 0.1))),
        );
        scene.add_light(PointLight {
            position: Vec3::new(1.25, 1.0, 0.1),
            intensity: Vec3::broadcast(4.0),
        });
        let tracer = Pathtracer::new(scene, settings()).unwrap();

        let l = tracer.trace_ray(&down_ray(), &Rng::with_seed(3));
        assert_eq!(l, Vec3::zero());
    }

    #[test]
    fn test_light_below_horizon_is_ignored() {
        let mut scene = floor_scene();
        scene.add_light(DirectionalLight::new(-Vec3::unit_y(), Vec3::one()));
        let tracer = Pathtracer::new(scene, settings()).unwrap();
        assert_eq!(tracer.trace_ray(&down_ray(), &Rng::with_seed(0)), Vec3::zero());
    }

    #[test]
    fn test_deterministic_lighting_has_no_variance() {
        let build = |samples| {
            let mut scene = floor_scene();
            scene.add_light(DirectionalLight::new(Vec3::new(0.0, 1.0, 1.0), Vec3::one()));
            Pathtracer::new(
                scene,
                RenderSettings {
                    samples,
                    ..settings()
                },
            )
            .unwrap()
        };

        let rng = Rng::with_seed(5);
        let one = build(1).trace_pixel(3, 4, &rng);
        let many = build(64).trace_pixel(3, 4, &rng);
        assert!(one.x > 0.0);
        assert_abs_diff_eq!(one.x, many.x, epsilon = 1e-5);
        assert_abs_diff_eq!(one.z, many.z, epsilon = 1e-5);
    }

    #[test]
    fn test_area_light_variance_shrinks_with_samples() {
        let build = |samples| {
            let mut scene = floor_scene();
            scene.add_light(RectLight {
                corner: Vec3::new(-1.0, 1.0, -1.0),
                edge_u: Vec3::new(2.0, 0.0, 0.0),
                edge_v: Vec3::new(0.0, 0.0, 2.0),
                radiance: Vec3::broadcast(2.0),
            });
            Pathtracer::new(
                scene,
                RenderSettings {
                    samples,
                    ..settings()
                },
            )
            .unwrap()
        };

        let variance = |tracer: &Pathtracer| {
            let rng = Rng::with_seed(11);
            let estimates = (0..200)
                .map(|_| tracer.trace_pixel(4, 4, &rng).x)
                .collect::<Vec<_>>();
            let mean = estimates.iter().sum::<f32>() / estimates.len() as f32;
            estimates.iter().map(|e| (e - mean).powi(2)).sum::<f32>() / estimates.len() as f32
        };

        let coarse = variance(&build(1));
        let fine = variance(&build(16));
        assert!(coarse > 0.0);
        assert!(fine < coarse);
    }

    /// Mean of `count` single-sample estimates along the camera ray.
    fn mean_radiance(tracer: &Pathtracer, ray: &Ray, count: usize) -> (f32, Vec<f32>) {
        let rng = Rng::with_seed(17);
        let estimates = (0..count)
            .map(|_| tracer.trace_ray(ray, &rng).x)
            .collect::<Vec<_>>();
        let mean = estimates.iter().sum::<f32>() / count as f32;
        (mean, estimates)
    }

    #[test]
    fn test_russian_roulette_is_unbiased() {
        // Survival is luma(0.5) = 0.5; survivors carry 0.25 * 0.5 / 0.5.
        let mut scene = Scene::new(camera());
        let mirror = scene.add_material(Mirror::new(Vec3::broadcast(0.5)));
        let floor = scene::quad(
            Vec3::new(-5.0, 0.0, 5.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, -10.0),
            4,
        )
        .unwrap();
        scene.add_object(Object::new(Shape::Mesh(floor), mirror));
        scene.set_environment(Sky::uniform(Vec3::broadcast(0.25)));
        let tracer = Pathtracer::new(
            scene,
            RenderSettings {
                max_depth: 1,
                ..settings()
            },
        )
        .unwrap();

        let (mean, estimates) = mean_radiance(&tracer, &down_ray().with_depth(1), 10_000);
        assert!(estimates
            .iter()
            .all(|&e| e == 0.0 || (e - 0.25).abs() < 1e-5));
        assert!(estimates.iter().any(|&e| e == 0.0));
        assert_abs_diff_eq!(mean, 0.125, epsilon = 0.01);
    }

    #[test]
    fn test_diffuse_bounce_counts_environment_once() {
        // Direct sampling of a uniform sky over a 0.5 albedo floor gives
        // 0.5 * 0.25. The escaping bounce must not add the sky again.
        let mut scene = floor_scene();
        scene.set_environment(Sky::uniform(Vec3::broadcast(0.25)));
        let tracer = Pathtracer::new(
            scene,
            RenderSettings {
                max_depth: 1,
                ..settings()
            },
        )
        .unwrap();

        let (mean, _) = mean_radiance(&tracer, &down_ray().with_depth(1), 10_000);
        assert_abs_diff_eq!(mean, 0.125, epsilon = 0.01);
    }

    #[test]
    fn test_mirror_skips_light_sampling() {
        let mut scene = Scene::new(camera());
        let mirror = scene.add_material(Mirror::new(Vec3::one()));
        let floor = scene::quad(
            Vec3::new(-5.0, 0.0, 5.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, -10.0),
            4,
        )
        .unwrap();
        scene.add_object(Object::new(Shape::Mesh(floor), mirror));
        scene.add_light(PointLight {
            position: Vec3::new(0.0, 1.0, 0.0),
            intensity: Vec3::one(),
        });
        scene.set_environment(Sky::uniform(Vec3::broadcast(0.25)));

        // Without bounces a mirror sees nothing.
        let tracer = Pathtracer::new(scene, settings()).unwrap();
        assert_eq!(tracer.trace_ray(&down_ray(), &Rng::with_seed(0)), Vec3::zero());
    }

    #[test]
    fn test_mirror_reflects_environment() {
        let mut scene = Scene::new(camera());
        let mirror = scene.add_material(Mirror::new(Vec3::one()));
        let floor = scene::quad(
            Vec3::new(-5.0, 0.0, 5.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, -10.0),
            4,
        )
        .unwrap();
        scene.add_object(Object::new(Shape::Mesh(floor), mirror));
        scene.set_environment(Sky::uniform(Vec3::broadcast(0.25)));

        let tracer = Pathtracer::new(
            scene,
            RenderSettings {
                max_depth: 1,
                ..settings()
            },
        )
        .unwrap();
        let l = tracer.trace_ray(&down_ray().with_depth(1), &Rng::with_seed(0));
        assert_abs_diff_eq!(l.x, 0.25, epsilon = 1e-5);
    }
}
