//! CPU path tracer: ray/primitive kernels, a binned-SAH bounding volume
//! hierarchy and a Monte Carlo integrator on top of them.

pub mod camera;
pub mod config;
pub mod constants;
pub mod error;
pub mod lights;
pub mod materials;
pub mod pathtracer;
pub mod primatives;
pub mod render;
pub mod render_objects;
pub mod samplers;
pub mod scene;

pub use crate::config::RenderSettings;
pub use crate::error::{RenderError, SceneError};
pub use crate::pathtracer::Pathtracer;
pub use crate::render::{render_frame, Framebuffer, RenderJob};
