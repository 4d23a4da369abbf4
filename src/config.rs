use crate::constants::DEFAULT_MAX_LEAF_SIZE;
use crate::error::{RenderError, Result};

/// Everything that controls a single frame render.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub width: usize,
    pub height: usize,
    /// Camera rays per pixel.
    pub samples: usize,
    /// Shadow rays per non-delta light at every shading point.
    pub area_samples: usize,
    /// Indirect bounces after the camera hit.
    pub max_depth: u32,
    pub max_leaf_size: usize,
    pub tile_size: usize,
    /// Worker count; `None` uses every available core.
    pub threads: Option<usize>,
    /// Base seed. Tile `i` samples from a stream seeded with `seed + i`.
    pub seed: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            samples: 32,
            area_samples: 4,
            max_depth: 4,
            max_leaf_size: DEFAULT_MAX_LEAF_SIZE,
            tile_size: 16,
            threads: None,
            seed: 0,
        }
    }
}

impl RenderSettings {
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1)
        })
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.width, "width"),
            (self.height, "height"),
            (self.samples, "samples"),
            (self.area_samples, "area samples"),
            (self.tile_size, "tile size"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(RenderError::InvalidSettings(format!("{name} must be non-zero")));
            }
        }
        if self.threads == Some(0) {
            return Err(RenderError::InvalidSettings(
                "thread count must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
