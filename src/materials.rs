//! Surface scattering models.
//!
//! Every direction here is expressed in the local shading frame, where the
//! surface normal is `+Y` and `cos(theta)` is simply the `y` component.

use std::f32::consts::PI;

use fastrand::Rng;
use ultraviolet::Vec3;

use crate::samplers;

/// Tri-channel radiance / reflectance.
pub type Spectrum = Vec3;

/// Rec. 709 luminance.
pub fn luma(s: Spectrum) -> f32 {
    0.2126 * s.x + 0.7152 * s.y + 0.0722 * s.z
}

#[derive(Clone, Copy, Debug)]
pub struct BsdfSample {
    pub direction: Vec3,
    pub attenuation: Spectrum,
    pub pdf: f32,
}

pub trait Bsdf {
    /// True when scattering is a delta distribution (e.g. a perfect mirror).
    fn is_discrete(&self) -> bool;
    fn evaluate(&self, out_dir: Vec3, in_dir: Vec3) -> Spectrum;
    fn sample(&self, out_dir: Vec3, rng: &Rng) -> BsdfSample;
}

/// Ideal diffuse reflector.
#[derive(Clone, Copy, Debug)]
pub struct Lambertian {
    pub albedo: Spectrum,
}

impl Lambertian {
    pub fn new(albedo: Spectrum) -> Self {
        Self { albedo }
    }
}

impl Default for Lambertian {
    fn default() -> Self {
        Lambertian {
            albedo: Vec3::broadcast(0.5),
        }
    }
}

impl Bsdf for Lambertian {
    fn is_discrete(&self) -> bool {
        false
    }

    fn evaluate(&self, _out_dir: Vec3, in_dir: Vec3) -> Spectrum {
        if in_dir.y <= 0.0 {
            return Vec3::zero();
        }
        self.albedo / PI
    }

    fn sample(&self, out_dir: Vec3, rng: &Rng) -> BsdfSample {
        let direction = samplers::hemisphere_cosine(rng);
        BsdfSample {
            direction,
            attenuation: self.evaluate(out_dir, direction),
            pdf: samplers::hemisphere_cosine_pdf(direction),
        }
    }
}

/// Perfect specular reflector.
#[derive(Clone, Copy, Debug)]
pub struct Mirror {
    pub reflectance: Spectrum,
}

impl Mirror {
    pub fn new(reflectance: Spectrum) -> Self {
        Self { reflectance }
    }
}

impl Bsdf for Mirror {
    fn is_discrete(&self) -> bool {
        true
    }

    fn evaluate(&self, _out_dir: Vec3, _in_dir: Vec3) -> Spectrum {
        Vec3::zero()
    }

    fn sample(&self, out_dir: Vec3, _rng: &Rng) -> BsdfSample {
        let direction = Vec3::new(-out_dir.x, out_dir.y, -out_dir.z);
        let cos_theta = direction.y.abs();
        // Cancels the cosine the integrator applies, leaving pure reflectance.
        let attenuation = if cos_theta > 0.0 {
            self.reflectance / cos_theta
        } else {
            Vec3::zero()
        };
        BsdfSample {
            direction,
            attenuation,
            pdf: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_lambertian_evaluate() {
        let bsdf = Lambertian::new(Vec3::new(0.9, 0.5, 0.1));
        let f = bsdf.evaluate(Vec3::unit_y(), Vec3::new(0.0, 1.0, 0.0));
        assert_abs_diff_eq!(f.x, 0.9 / PI, epsilon = 1e-6);
        assert_eq!(bsdf.evaluate(Vec3::unit_y(), -Vec3::unit_y()), Vec3::zero());
        assert!(!bsdf.is_discrete());
    }

    #[test]
    fn test_lambertian_sample_throughput_is_albedo() {
        let bsdf = Lambertian::new(Vec3::broadcast(0.8));
        let rng = Rng::with_seed(5);
        for _ in 0..100 {
            let s = bsdf.sample(Vec3::unit_y(), &rng);
            if s.pdf > 1e-4 {
                let throughput = s.attenuation * s.direction.y / s.pdf;
                assert_abs_diff_eq!(throughput.x, 0.8, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_mirror_reflects() {
        let bsdf = Mirror::new(Vec3::one());
        let out_dir = Vec3::new(0.6, 0.8, 0.0);
        let s = bsdf.sample(out_dir, &Rng::with_seed(0));
        assert_abs_diff_eq!(s.direction.x, -0.6, epsilon = 1e-6);
        assert_abs_diff_eq!(s.direction.y, 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!((s.attenuation * s.direction.y / s.pdf).x, 1.0, epsilon = 1e-5);
        assert!(bsdf.is_discrete());
    }

    #[test]
    fn test_luma_of_white() {
        assert_abs_diff_eq!(luma(Vec3::one()), 1.0, epsilon = 1e-6);
    }
}
