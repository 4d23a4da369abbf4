//! Error types for scene assembly and frame rendering.
//!
//! Ray queries never fail: a miss is an ordinary `None`. These errors only
//! cover building scenes and driving a render.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling a scene.
#[derive(Error, Debug)]
pub enum SceneError {
    /// A triangle references a vertex that does not exist.
    #[error("triangle index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    /// The index buffer cannot be split into triangles.
    #[error("index count {0} is not a multiple of 3")]
    IncompleteTriangle(usize),

    /// An object refers to a material slot that was never registered.
    #[error("object {object} uses material {material} but only {available} materials exist")]
    UnknownMaterial {
        object: usize,
        material: usize,
        available: usize,
    },

    /// No built-in scene goes by this name.
    #[error("unknown scene `{0}`")]
    UnknownScene(String),
}

/// Errors raised while rendering a frame or writing it out.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("invalid render settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error("failed to encode image `{path}`: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("a render worker panicked")]
    WorkerPanicked,

    /// The render was cancelled before every tile finished.
    #[error("render interrupted after {finished}/{total} tiles")]
    Interrupted { finished: usize, total: usize },
}

/// Result type for rendering operations.
pub type Result<T> = std::result::Result<T, RenderError>;
