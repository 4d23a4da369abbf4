use ultraviolet::{Vec2, Vec3};

use crate::primatives::Ray;

/// Pinhole camera with a vertical field of view.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    position: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    half_height: f32,
    half_width: f32,
}

impl Camera {
    pub fn look_at(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        vertical_fov_degrees: f32,
        aspect: f32,
    ) -> Self {
        let forward = (target - position).normalized();
        let right = forward.cross(up).normalized();
        let up = right.cross(forward);

        let half_height = (vertical_fov_degrees.to_radians() * 0.5).tan();

        Self {
            position,
            forward,
            right,
            up,
            half_height,
            half_width: half_height * aspect,
        }
    }

    /// Maps a normalized screen coordinate to a world-space ray. `(0, 0)` is the
    /// top-left corner of the image and `(1, 1)` the bottom-right.
    pub fn generate_ray(&self, screen: Vec2) -> Ray {
        let x = (2.0 * screen.x - 1.0) * self.half_width;
        let y = (1.0 - 2.0 * screen.y) * self.half_height;

        let direction = (self.right * x + self.up * y + self.forward).normalized();
        Ray::new(self.position, direction)
    }
}
