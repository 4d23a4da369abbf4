//! Tiled multi-threaded frame rendering.
//!
//! Workers pull tile indices from a shared counter. Each tile samples from its
//! own generator seeded with `settings.seed + tile_index`, so a frame is
//! reproducible for a given seed whatever the thread count.

use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use fastrand::Rng;
use image::{ImageBuffer, Rgb, RgbImage};
use tracing::{debug, info, warn};
use ultraviolet::Vec3;

use crate::error::{RenderError, Result};
use crate::materials::Spectrum;
use crate::pathtracer::Pathtracer;

const GAMMA: f32 = 2.2;

/// Linear radiance for every pixel of a frame, row-major from the top-left.
#[derive(Clone, Debug, PartialEq)]
pub struct Framebuffer {
    width: usize,
    height: usize,
    pixels: Vec<Spectrum>,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![Vec3::zero(); width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> Spectrum {
        self.pixels[y * self.width + x]
    }

    pub fn pixels(&self) -> &[Spectrum] {
        &self.pixels
    }

    fn write_tile(&mut self, tile: &RenderTile, data: &[Spectrum]) {
        for (source_y, target_y) in tile.y_range().enumerate() {
            let target_start = target_y * self.width + tile.pixel_x;
            let source_start = source_y * tile.pixel_width;
            self.pixels[target_start..target_start + tile.pixel_width]
                .copy_from_slice(&data[source_start..source_start + tile.pixel_width]);
        }
    }

    /// Tone maps to 8-bit sRGB-ish output: clamp to `[0, 1]`, then gamma 2.2.
    pub fn to_image(&self) -> RgbImage {
        ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
            let col = self.get(x as usize, y as usize);
            let encode = |c: f32| (c.clamp(0.0, 1.0).powf(1.0 / GAMMA) * 255.0).round() as u8;
            Rgb([encode(col.x), encode(col.y), encode(col.z)])
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_image()
            .save(path)
            .map_err(|source| RenderError::Image {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct RenderTile {
    index: usize,
    pixel_x: usize,
    pixel_y: usize,
    pixel_width: usize,
    pixel_height: usize,
}

impl RenderTile {
    fn x_range(&self) -> Range<usize> {
        self.pixel_x..self.pixel_x + self.pixel_width
    }

    fn y_range(&self) -> Range<usize> {
        self.pixel_y..self.pixel_y + self.pixel_height
    }
}

/// Tile scheduler and shared output, cloned into every worker.
#[derive(Clone)]
struct RenderImage {
    width: usize,
    height: usize,
    tile_size: usize,
    tile_count_x: usize,
    tile_count_y: usize,
    buffer: Arc<Mutex<Framebuffer>>,
    next_tile: Arc<AtomicUsize>,
    finished_tiles: Arc<AtomicUsize>,
}

impl RenderImage {
    fn new(width: usize, height: usize, tile_size: usize) -> Self {
        Self {
            width,
            height,
            tile_size,
            tile_count_x: width.div_ceil(tile_size),
            tile_count_y: height.div_ceil(tile_size),
            buffer: Arc::new(Mutex::new(Framebuffer::new(width, height))),
            next_tile: Arc::new(AtomicUsize::new(0)),
            finished_tiles: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn tile_count(&self) -> usize {
        self.tile_count_x * self.tile_count_y
    }

    fn get_tile(&self) -> Option<RenderTile> {
        let index = self.next_tile.fetch_add(1, Ordering::Relaxed);
        if index >= self.tile_count() {
            return None;
        }

        let tile_x = index % self.tile_count_x;
        let tile_y = index / self.tile_count_x;

        let pixel_x = tile_x * self.tile_size;
        let pixel_y = tile_y * self.tile_size;

        Some(RenderTile {
            index,
            pixel_x,
            pixel_y,
            pixel_width: (pixel_x + self.tile_size).min(self.width) - pixel_x,
            pixel_height: (pixel_y + self.tile_size).min(self.height) - pixel_y,
        })
    }

    fn write_tile(&self, tile: &RenderTile, data: &[Spectrum]) {
        match self.buffer.lock() {
            Ok(mut buffer) => buffer.write_tile(tile, data),
            Err(_) => warn!(tile = tile.index, "framebuffer poisoned, dropping tile"),
        }
        self.finished_tiles.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Result<Framebuffer> {
        self.buffer
            .lock()
            .map(|buffer| buffer.clone())
            .map_err(|_| RenderError::WorkerPanicked)
    }
}

fn spawn_render_thread(
    render_image: RenderImage,
    pathtracer: Arc<Pathtracer>,
    exit_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let seed = pathtracer.settings().seed;
        let mut tile_buffer = Vec::with_capacity(render_image.tile_size * render_image.tile_size);

        while !exit_flag.load(Ordering::Relaxed) {
            let Some(tile) = render_image.get_tile() else {
                break;
            };

            let rng = Rng::with_seed(seed.wrapping_add(tile.index as u64));
            tile_buffer.clear();
            for y in tile.y_range() {
                for x in tile.x_range() {
                    tile_buffer.push(pathtracer.trace_pixel(x, y, &rng));
                }
            }
            render_image.write_tile(&tile, &tile_buffer);
        }
    })
}

/// A frame being rendered in the background.
pub struct RenderJob {
    image: RenderImage,
    threads: Vec<JoinHandle<()>>,
    started: Instant,
}

impl RenderJob {
    pub fn start(pathtracer: Arc<Pathtracer>, exit_flag: Arc<AtomicBool>) -> Result<Self> {
        let settings = pathtracer.settings();
        settings.validate()?;

        let image = RenderImage::new(settings.width, settings.height, settings.tile_size);
        let thread_count = settings.thread_count();
        info!(
            width = settings.width,
            height = settings.height,
            samples = settings.samples,
            tiles = image.tile_count(),
            threads = thread_count,
            "starting render"
        );

        let threads = (0..thread_count)
            .map(|_| spawn_render_thread(image.clone(), pathtracer.clone(), exit_flag.clone()))
            .collect();

        Ok(Self {
            image,
            threads,
            started: Instant::now(),
        })
    }

    pub fn total_tiles(&self) -> usize {
        self.image.tile_count()
    }

    pub fn finished_tiles(&self) -> usize {
        self.image.finished_tiles.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(|thread| thread.is_finished())
    }

    /// Copy of the frame as rendered so far; unfinished tiles are black.
    pub fn snapshot(&self) -> Result<Framebuffer> {
        self.image.snapshot()
    }

    /// Joins every worker. Fails with [`RenderError::Interrupted`] if the exit
    /// flag stopped the render before all tiles were written.
    pub fn wait(self) -> Result<Framebuffer> {
        let mut panicked = false;
        for thread in self.threads {
            panicked |= thread.join().is_err();
        }
        if panicked {
            return Err(RenderError::WorkerPanicked);
        }

        let finished = self.image.finished_tiles.load(Ordering::Relaxed);
        let total = self.image.tile_count();
        if finished < total {
            return Err(RenderError::Interrupted { finished, total });
        }

        debug!(elapsed = ?self.started.elapsed(), "all tiles finished");
        self.image.snapshot()
    }
}

/// Renders a whole frame, blocking until every tile is done.
pub fn render_frame(
    pathtracer: Arc<Pathtracer>,
    exit_flag: Arc<AtomicBool>,
) -> Result<Framebuffer> {
    RenderJob::start(pathtracer, exit_flag)?.wait()
}
