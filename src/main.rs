use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use farfield_chunk::{NoiseGenerator, Tile};
use farfield_io::{DirStorage, encode_tile};
use farfield_runtime::{
    GenerationMode, GenerationQueue, LocalEngine, RequestSummary, ResultSink, Watchdog,
};
use farfield_world::{GenerationConfig, Level, Stage, TilePos, load_config_from_path};
use log::{error, info, warn};

mod logging;
mod watch;

#[derive(Parser, Debug)]
#[command(name = "farfield")]
#[command(about = "Generate terrain tiles in batched background requests")]
struct Args {
    /// Generator config (TOML); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of persisted tile records (`<x>.<z>.nbt`) to resume from
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Tile X of the first request's lower corner
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    x: i32,

    /// Tile Z of the first request's lower corner
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    z: i32,

    /// Side of each request's region in tiles (even)
    #[arg(short, long, default_value_t = 4)]
    width: usize,

    /// Requests per side; the area covered is (grid * width)^2 tiles
    #[arg(long, default_value_t = 1)]
    grid: usize,

    /// Stage every region tile should reach
    #[arg(short, long, default_value = "features")]
    target: Stage,

    /// standalone or delegated
    #[arg(short, long, default_value = "standalone")]
    mode: GenerationMode,

    /// Write every delivered tile to this directory as a record
    #[arg(long)]
    out: Option<PathBuf>,

    /// Regenerate the area whenever the config file changes
    #[arg(long)]
    watch: bool,

    /// Overrides `[logging] level`
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("farfield: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    let cfg = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => GenerationConfig::default(),
    };
    let level_name = args.log_level.as_deref().unwrap_or(&cfg.logging.level);
    logging::init(level_name, cfg.logging.file.as_deref())?;

    if args.width == 0 || args.width % 2 != 0 {
        return Err(format!("width must be even and positive, got {}", args.width).into());
    }
    if args.grid == 0 {
        return Err("grid must be at least 1".into());
    }

    let level = Arc::new(Level::from_config(&cfg));
    let params = cfg.generator_params();
    info!(
        "level '{}' seed {} y {}..{}, {} workers",
        level.name,
        level.seed,
        level.min_y,
        level.max_y(),
        params.worker_threads
    );

    let mut builder = GenerationQueue::builder(Arc::clone(&level), params);
    if let Some(dir) = &args.storage {
        builder = builder.storage(Arc::new(DirStorage::open(dir)?));
    }
    if args.mode == GenerationMode::EngineDelegated {
        let engine = LocalEngine::new(Arc::clone(&level), Arc::new(NoiseGenerator))
            .with_parallel_generation(true);
        builder = builder.engine(Arc::new(engine));
    }
    let queue = builder.build()?;
    let mut watchdog = Watchdog::spawn(&queue)?;

    let export = match &args.out {
        Some(dir) => Some(Arc::new(DirStorage::open(dir)?)),
        None => None,
    };

    let watcher = match (&args.config, args.watch) {
        (Some(path), true) => Some(watch::ConfigWatcher::new(path)?),
        (None, true) => return Err("--watch needs --config".into()),
        _ => None,
    };

    let mut ok = run_batch(&queue, &args, export.clone());
    if let (Some(watcher), Some(path)) = (&watcher, &args.config) {
        info!("watching {} for changes", path.display());
        while watcher.wait_for_change() {
            if let Err(e) = watch::reload(path, &queue) {
                warn!("config reload failed, keeping previous settings: {e}");
                continue;
            }
            ok = run_batch(&queue, &args, export.clone());
        }
    }

    watchdog.stop();
    queue.close();
    Ok(ok)
}

/// Submits one request per grid cell, waits for all of them and prints a
/// summary. Returns false if any request failed.
fn run_batch(queue: &Arc<GenerationQueue>, args: &Args, export: Option<Arc<DirStorage>>) -> bool {
    let exporting = export.is_some();
    let exported = Arc::new(AtomicUsize::new(0));
    let sink: ResultSink = {
        let exported = Arc::clone(&exported);
        Arc::new(move |tile: Tile| {
            let Some(dir) = &export else {
                return;
            };
            match encode_tile(&tile) {
                Ok(bytes) => match dir.write(tile.pos, &bytes) {
                    Ok(()) => {
                        exported.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!("failed to write {}: {e}", tile.pos),
                },
                Err(e) => warn!("failed to encode {}: {e}", tile.pos),
            }
        })
    };

    let step = args.width as i32;
    let mut handles = Vec::with_capacity(args.grid * args.grid);
    for gz in 0..args.grid as i32 {
        for gx in 0..args.grid as i32 {
            let origin = TilePos::new(args.x + gx * step, args.z + gz * step);
            let handle = queue.submit(origin, args.width, args.target, args.mode, sink.clone());
            handles.push((origin, handle));
        }
    }

    let mut total = RequestSummary::default();
    let mut failed = 0usize;
    for (origin, handle) in handles {
        match handle.join() {
            Ok(summary) => {
                println!(
                    "{origin}: {} tiles, {} stage runs, {} skipped, {} faults ({:.0?})",
                    summary.delivered,
                    summary.stage_runs,
                    summary.skipped,
                    summary.faults,
                    handle.age()
                );
                total.absorb(&summary);
            }
            Err(e) => {
                failed += 1;
                error!("request at {origin} failed: {e}");
            }
        }
    }
    queue.update_all_futures();

    let cache = queue.session().tiles().stats();
    let (built, reused) = queue.session().contexts().stats();
    println!(
        "done: {} tiles delivered, {} stage runs, {} faults, {} failed requests",
        total.delivered, total.stage_runs, total.faults, failed
    );
    println!(
        "tile cache: {} entries, {} hits, {} misses, {} evictions; contexts built {built}, reused {reused}",
        cache.entries, cache.hits, cache.misses, cache.evictions
    );
    if exporting {
        println!("exported {} tiles", exported.load(Ordering::Relaxed));
    }
    failed == 0
}
