use std::io::{stdout, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::Parser;
use crossterm::{cursor, terminal, ExecutableCommand, QueueableCommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pathtracer::{scene, Pathtracer, RenderError, RenderJob, RenderSettings};

#[derive(Parser, Debug)]
#[clap(
    about = "Multithreaded Monte Carlo path tracer written in rust",
    disable_help_flag = true
)]
struct CliArguments {
    /// Print help
    #[clap(long, action = clap::ArgAction::Help)]
    help: Option<bool>,

    #[clap(short = 'w', long, default_value = "512")]
    width: usize,

    #[clap(short = 'h', long, default_value = "512")]
    height: usize,

    /// Camera rays per pixel
    #[clap(short = 's', long, default_value = "32")]
    samples: usize,

    /// Shadow rays per area light at every hit
    #[clap(long, default_value = "4")]
    area_samples: usize,

    /// Indirect bounces
    #[clap(short = 'd', long, default_value = "4")]
    max_depth: u32,

    #[clap(long, default_value = "4")]
    leaf_size: usize,

    #[clap(short = 't', long, default_value = "16")]
    tile_size: usize,

    #[clap(long)]
    threads: Option<usize>,

    #[clap(long, default_value = "0")]
    seed: u64,

    /// Built-in scene to render
    #[clap(
        long,
        default_value = "cornell",
        value_parser = PossibleValuesParser::new(scene::SCENE_NAMES.iter().copied())
    )]
    scene: String,

    #[clap(short = 'o', long, default_value = "render.png")]
    output: PathBuf,

    /// Periodically write the partial frame to the output path
    #[clap(long, action)]
    incremental: bool,

    /// Write the leaf boxes of the scene hierarchy as an OBJ file
    #[clap(long)]
    dump_bvh: Option<PathBuf>,
}

impl CliArguments {
    fn settings(&self) -> RenderSettings {
        RenderSettings {
            width: self.width,
            height: self.height,
            samples: self.samples,
            area_samples: self.area_samples,
            max_depth: self.max_depth,
            max_leaf_size: self.leaf_size,
            tile_size: self.tile_size,
            threads: self.threads,
            seed: self.seed,
        }
    }
}

fn draw_progress(completed_tiles: usize, total_tiles: usize, elapsed: f32) -> std::io::Result<()> {
    let mut stdout = stdout();
    let total = (elapsed / completed_tiles.max(1) as f32) * total_tiles as f32;

    let term_width = terminal::size().map(|(w, _)| w).unwrap_or(32) as usize;
    let msg_time = format!("{completed_tiles}/{total_tiles} Tiles in {elapsed:0.2}s / {total:0.2}s");
    let progress_width = term_width.saturating_sub(msg_time.len() + 3).max(8);
    let render_progress =
        (progress_width as f32 * completed_tiles as f32 / total_tiles as f32).ceil() as usize;

    let msg_progress = (0..progress_width)
        .map(|i| if i < render_progress { '#' } else { ' ' })
        .collect::<String>();

    stdout.queue(cursor::SavePosition)?;
    stdout.write_all(format!("{msg_time} [{msg_progress}]").as_bytes())?;
    stdout.queue(cursor::RestorePosition)?;
    stdout.flush()?;
    stdout.queue(terminal::Clear(terminal::ClearType::FromCursorDown))?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArguments::parse();
    let settings = args.settings();
    settings.validate()?;

    let exit_flag = Arc::new(AtomicBool::new(false));
    {
        let handler_exit_flag = exit_flag.clone();
        ctrlc::set_handler(move || {
            let _ = stdout().execute(cursor::Show);
            handler_exit_flag.store(true, Ordering::Relaxed)
        })
        .context("failed to install the interrupt handler")?;
    }

    let scene = scene::by_name(&args.scene, settings.aspect_ratio(), settings.max_leaf_size)?;
    let pathtracer = Arc::new(Pathtracer::new(scene, settings)?);

    if let Some(path) = &args.dump_bvh {
        pathtracer
            .scene()
            .dump_obj(path)
            .with_context(|| format!("failed to dump hierarchy to {}", path.display()))?;
    }

    let start_time = Instant::now();
    let job = RenderJob::start(pathtracer, exit_flag)?;
    let total_tiles = job.total_tiles();

    stdout().execute(cursor::Hide)?;
    let mut counter: usize = 0;
    loop {
        let done = job.is_finished();
        draw_progress(
            job.finished_tiles(),
            total_tiles,
            start_time.elapsed().as_secs_f32(),
        )?;

        if args.incremental && counter % 8 == 0 {
            job.snapshot()?.save(&args.output)?;
        }

        if done {
            break;
        }
        counter += 1;
        std::thread::sleep(Duration::from_millis(250));
    }
    stdout().execute(cursor::Show)?;

    let frame = match job.wait() {
        Ok(frame) => frame,
        Err(RenderError::Interrupted { finished, total }) => {
            warn!(finished, total, "render interrupted, nothing saved");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    info!(
        tiles = total_tiles,
        seconds = start_time.elapsed().as_secs_f32(),
        "render finished"
    );
    frame.save(&args.output)?;
    info!(path = %args.output.display(), "image saved");
    Ok(())
}
