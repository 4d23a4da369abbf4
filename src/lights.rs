//! Light sources consumed by the integrator's direct-lighting estimator.

use fastrand::Rng;
use ultraviolet::{Lerp, Vec3};

use crate::materials::Spectrum;
use crate::samplers;

/// One light sample as seen from a shading point.
#[derive(Clone, Copy, Debug)]
pub struct LightSample {
    /// Unit direction from the shading point toward the light.
    pub direction: Vec3,
    /// Distance to the sampled point on the light; infinite for lights at
    /// infinity.
    pub distance: f32,
    pub radiance: Spectrum,
    /// Density of `direction`, or 1 for delta lights.
    pub pdf: f32,
}

pub trait Light {
    /// True for delta lights, where every sample is identical.
    fn is_discrete(&self) -> bool;
    fn sample(&self, point: Vec3, rng: &Rng) -> LightSample;
}

/// A light at infinity that also shades rays escaping the scene.
pub trait EnvironmentLight: Light {
    fn radiance(&self, direction: Vec3) -> Spectrum;
}

/// Isotropic point emitter with inverse-square falloff.
#[derive(Clone, Copy, Debug)]
pub struct PointLight {
    pub position: Vec3,
    pub intensity: Spectrum,
}

impl Light for PointLight {
    fn is_discrete(&self) -> bool {
        true
    }

    fn sample(&self, point: Vec3, _rng: &Rng) -> LightSample {
        let offset = self.position - point;
        let distance = offset.mag();
        LightSample {
            direction: offset / distance,
            distance,
            radiance: self.intensity / (distance * distance),
            pdf: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DirectionalLight {
    /// Direction pointing toward the light.
    pub to_light: Vec3,
    pub radiance: Spectrum,
}

impl DirectionalLight {
    pub fn new(to_light: Vec3, radiance: Spectrum) -> Self {
        Self {
            to_light: to_light.normalized(),
            radiance,
        }
    }
}

impl Light for DirectionalLight {
    fn is_discrete(&self) -> bool {
        true
    }

    fn sample(&self, _point: Vec3, _rng: &Rng) -> LightSample {
        LightSample {
            direction: self.to_light,
            distance: f32::INFINITY,
            radiance: self.radiance,
            pdf: 1.0,
        }
    }
}

/// One-sided parallelogram emitter spanned by `edge_u` and `edge_v` from
/// `corner`. It emits on the side of `edge_u x edge_v`.
#[derive(Clone, Copy, Debug)]
pub struct RectLight {
    pub corner: Vec3,
    pub edge_u: Vec3,
    pub edge_v: Vec3,
    pub radiance: Spectrum,
}

impl RectLight {
    fn normal_and_area(&self) -> (Vec3, f32) {
        let cross = self.edge_u.cross(self.edge_v);
        let area = cross.mag();
        (cross / area, area)
    }
}

impl Light for RectLight {
    fn is_discrete(&self) -> bool {
        false
    }

    fn sample(&self, point: Vec3, rng: &Rng) -> LightSample {
        let (normal, area) = self.normal_and_area();
        let on_light = self.corner + self.edge_u * rng.f32() + self.edge_v * rng.f32();

        let offset = on_light - point;
        let distance = offset.mag();
        let direction = offset / distance;
        let cos_light = -direction.dot(normal);

        if cos_light <= 0.0 {
            // Back side: contributes nothing.
            return LightSample {
                direction,
                distance,
                radiance: Vec3::zero(),
                pdf: 1.0,
            };
        }

        LightSample {
            direction,
            distance,
            radiance: self.radiance,
            pdf: distance * distance / (area * cos_light),
        }
    }
}

/// Gradient sky with a sun disc.
#[derive(Clone, Copy, Debug)]
pub struct Sky {
    pub apex: Spectrum,
    pub horizon: Spectrum,
    pub ground: Spectrum,
    pub sun: Spectrum,
    pub sun_dir: Vec3,
    /// Cosine of the sun disc's angular radius.
    pub sun_cos: f32,
}

impl Default for Sky {
    fn default() -> Self {
        Self {
            apex: Vec3::new(0.5, 0.7, 0.8),
            horizon: Vec3::new(1.0, 1.0, 1.0),
            ground: Vec3::new(0.0, 0.0, 0.0),
            sun: Vec3::new(1.0, 0.9, 0.9),
            sun_dir: Vec3::new(0.5, 1.0, 1.0).normalized(),
            sun_cos: 0.99,
        }
    }
}

impl Sky {
    /// Constant radiance from every direction.
    pub fn uniform(radiance: Spectrum) -> Self {
        Self {
            apex: radiance,
            horizon: radiance,
            ground: radiance,
            sun: Vec3::zero(),
            ..Default::default()
        }
    }
}

impl Light for Sky {
    fn is_discrete(&self) -> bool {
        false
    }

    fn sample(&self, _point: Vec3, rng: &Rng) -> LightSample {
        let direction = samplers::sphere_uniform(rng);
        LightSample {
            direction,
            distance: f32::INFINITY,
            radiance: self.radiance(direction),
            pdf: samplers::SPHERE_UNIFORM_PDF,
        }
    }
}

impl EnvironmentLight for Sky {
    fn radiance(&self, direction: Vec3) -> Spectrum {
        let direction = direction.normalized();
        let sky_sample = self
            .horizon
            .lerp(self.apex, direction.y.clamp(0.0, 1.0))
            .lerp(self.ground, (-5.0 * direction.y).clamp(0.0, 1.0).powf(0.5));

        let sun_sample = if direction.dot(self.sun_dir) < self.sun_cos {
            Vec3::zero()
        } else {
            self.sun
        };

        sky_sample + sun_sample
    }
}
