//! Sampling routines. All of them draw from a caller-owned [`Rng`] so each
//! render tile can run its own reproducible stream.

use std::f32::consts::PI;

use fastrand::Rng;
use ultraviolet::{Vec2, Vec3};

/// Uniform point in `[0, size.x) x [0, size.y)`; pdf is `1 / area`.
pub fn rect_uniform(rng: &Rng, size: Vec2) -> Vec2 {
    Vec2::new(rng.f32() * size.x, rng.f32() * size.y)
}

/// Uniform point inside the unit ball, by rejection.
pub fn ball_uniform(rng: &Rng) -> Vec3 {
    loop {
        let x = 2.0 * rng.f32() - 1.0;
        let y = 2.0 * rng.f32() - 1.0;
        let z = 2.0 * rng.f32() - 1.0;
        let random_unit = Vec3::new(x, y, z);
        if random_unit.mag_sq() <= 1.0 && random_unit.mag_sq() > 1e-12 {
            return random_unit;
        }
    }
}

/// Uniform direction on the unit sphere; pdf is [`SPHERE_UNIFORM_PDF`].
pub fn sphere_uniform(rng: &Rng) -> Vec3 {
    ball_uniform(rng).normalized()
}

pub const SPHERE_UNIFORM_PDF: f32 = 1.0 / (4.0 * PI);

/// Cosine-weighted direction in the hemisphere around local +Y.
///
/// Offsetting the pole by a uniform point on the unit sphere yields directions
/// distributed proportionally to `cos(theta)`.
pub fn hemisphere_cosine(rng: &Rng) -> Vec3 {
    loop {
        let dir = Vec3::unit_y() + sphere_uniform(rng);
        if dir.mag_sq() > 1e-8 {
            return dir.normalized();
        }
    }
}

pub fn hemisphere_cosine_pdf(dir: Vec3) -> f32 {
    dir.y.max(0.0) / PI
}
