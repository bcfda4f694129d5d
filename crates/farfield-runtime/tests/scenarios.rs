use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use farfield_chunk::{GenerationLibrary, LibraryFault, NoiseGenerator, Tile, TileOrigin, Window};
use farfield_io::{MemoryStorage, encode_tile};
use farfield_lighting::{FloodLightEngine, LightingEngine};
use farfield_runtime::{CompletionHandle, GenError, GenerationMode, GenerationQueue, ResultSink};
use farfield_world::{GenCtx, GeneratorParams, Level, Stage, TerrainParams, TilePos};
use hashbrown::HashMap;

fn level() -> Arc<Level> {
    Arc::new(Level::new("scenario", 2024, -16, 160, true, TerrainParams::default()))
}

fn params() -> GeneratorParams {
    GeneratorParams {
        worker_threads: 2,
        ..GeneratorParams::default()
    }
}

fn collector() -> (ResultSink, Arc<Mutex<Vec<Tile>>>) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink_out = Arc::clone(&out);
    let sink: ResultSink = Arc::new(move |t| sink_out.lock().unwrap().push(t));
    (sink, out)
}

fn region(width: usize) -> Vec<TilePos> {
    let mut v: Vec<_> = TilePos::new(0, 0).square(width).collect();
    v.sort();
    v
}

fn sorted_positions(tiles: &[Tile]) -> Vec<TilePos> {
    let mut v: Vec<_> = tiles.iter().map(|t| t.pos).collect();
    v.sort();
    v
}

fn wait_until(deadline: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    f()
}

/// Counts stage invocations per stage.
#[derive(Default)]
struct Counting {
    calls: Mutex<HashMap<Stage, usize>>,
}

impl Counting {
    fn count(&self, stage: Stage) -> usize {
        self.calls.lock().unwrap().get(&stage).copied().unwrap_or(0)
    }
}

impl GenerationLibrary for Counting {
    fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut GenCtx,
        window: &Window,
        tile: &mut Tile,
    ) -> Result<(), LibraryFault> {
        *self.calls.lock().unwrap().entry(stage).or_insert(0) += 1;
        NoiseGenerator.run_stage(stage, ctx, window, tile)
    }
}

/// Fails one stage for one tile.
struct Faulty {
    stage: Stage,
    at: TilePos,
    panic: bool,
}

impl GenerationLibrary for Faulty {
    fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut GenCtx,
        window: &Window,
        tile: &mut Tile,
    ) -> Result<(), LibraryFault> {
        if stage == self.stage && tile.pos == self.at {
            if self.panic {
                panic!("injected panic at {}", tile.pos);
            }
            return Err(LibraryFault::ConcurrentModification("injected".into()));
        }
        NoiseGenerator.run_stage(stage, ctx, window, tile)
    }
}

/// Bakes normally, then cancels the request once its last pass is lit.
struct CancelAfterLastPass {
    passes: usize,
    baked: AtomicUsize,
    handle: Mutex<Option<CompletionHandle>>,
}

impl LightingEngine for CancelAfterLastPass {
    fn bake_lighting(&self, tiles: &mut [Tile], max_sky_light: u8) {
        FloodLightEngine.bake_lighting(tiles, max_sky_light);
        if self.baked.fetch_add(1, Ordering::SeqCst) + 1 < self.passes {
            return;
        }
        loop {
            if let Some(h) = self.handle.lock().unwrap().as_ref() {
                h.cancel();
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn surface_request_on_empty_storage_yields_full_region() {
    let q = GenerationQueue::builder(level(), params()).build().unwrap();
    let (sink, out) = collector();
    let summary = q
        .submit(TilePos::new(0, 0), 4, Stage::Surface, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    let tiles = out.lock().unwrap();
    assert_eq!(summary.delivered, 16);
    assert_eq!(summary.passes, 4);
    assert_eq!(sorted_positions(&tiles), region(4));
    for t in tiles.iter() {
        assert!(t.is_at_least(Stage::Surface), "{} at {}", t.pos, t.stage());
        assert!(t.biomes.is_some());
        assert!(t.has_heightmaps());
        assert!(t.has_blocks());
        assert!(t.is_light_correct());
    }
}

#[test]
fn second_request_skips_finished_structure_starts() {
    let lib = Arc::new(Counting::default());
    let q = GenerationQueue::builder(level(), params())
        .library(lib.clone())
        .build()
        .unwrap();

    let (sink, out) = collector();
    let first = q
        .submit(TilePos::new(0, 0), 4, Stage::StructureStart, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    assert_eq!(lib.count(Stage::StructureStart), 16);
    assert_eq!(lib.count(Stage::StructureReference), 0);
    // below the delivery floor
    assert_eq!(first.delivered, 0);
    assert!(out.lock().unwrap().is_empty());

    let (sink, out) = collector();
    let second = q
        .submit(TilePos::new(0, 0), 4, Stage::Features, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    assert_eq!(lib.count(Stage::StructureStart), 16);
    for stage in [
        Stage::StructureReference,
        Stage::Biomes,
        Stage::Noise,
        Stage::Surface,
        Stage::Features,
    ] {
        assert_eq!(lib.count(stage), 16, "{stage}");
    }
    assert_eq!(second.delivered, 16);
    assert!(out.lock().unwrap().iter().all(|t| t.stage() == Stage::Features));
}

#[test]
fn one_faulty_tile_does_not_block_the_rest() {
    let bad = TilePos::new(1, 2);
    let lib = Arc::new(Faulty {
        stage: Stage::Features,
        at: bad,
        panic: false,
    });
    let q = GenerationQueue::builder(level(), params())
        .library(lib)
        .build()
        .unwrap();
    let (sink, out) = collector();
    let summary = q
        .submit(TilePos::new(0, 0), 4, Stage::Features, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    assert_eq!(summary.faults, 1);
    let tiles = out.lock().unwrap();
    assert_eq!(sorted_positions(&tiles), region(4));
    for t in tiles.iter() {
        assert!(t.is_light_correct());
        assert!(t.has_light());
        if t.pos == bad {
            assert_eq!(t.stage(), Stage::Surface);
        } else {
            assert_eq!(t.stage(), Stage::Features);
        }
    }
}

#[test]
fn panicking_stage_is_contained() {
    let bad = TilePos::new(3, 3);
    let lib = Arc::new(Faulty {
        stage: Stage::Noise,
        at: bad,
        panic: true,
    });
    let q = GenerationQueue::builder(level(), params())
        .library(lib)
        .build()
        .unwrap();
    let (sink, out) = collector();
    let summary = q
        .submit(TilePos::new(0, 0), 4, Stage::Surface, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    // the failed tile still runs the surface stage afterwards
    assert_eq!(summary.faults, 1);
    let tiles = out.lock().unwrap();
    assert_eq!(tiles.len(), 16);
    let t = tiles.iter().find(|t| t.pos == bad).unwrap();
    assert_eq!(t.stage(), Stage::Surface);
}

#[test]
fn persisted_tiles_past_the_target_are_left_alone() {
    let lvl = level();
    let storage = Arc::new(MemoryStorage::new());
    let done_at = TilePos::new(2, 1);
    let mut done = Tile::empty(done_at, lvl.min_y, lvl.height);
    done.set_block(4, 0, 4, farfield_chunk::Block::GLOWSTONE);
    done.advance_to(Stage::Full);
    storage.insert(done_at, encode_tile(&done).unwrap());

    let lib = Arc::new(Counting::default());
    let q = GenerationQueue::builder(Arc::clone(&lvl), params())
        .library(lib.clone())
        .storage(storage)
        .build()
        .unwrap();
    let (sink, out) = collector();
    q.submit(TilePos::new(0, 0), 4, Stage::Surface, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    assert_eq!(lib.count(Stage::StructureStart), 15);
    let tiles = out.lock().unwrap();
    let t = tiles.iter().find(|t| t.pos == done_at).unwrap();
    assert_eq!(t.stage(), Stage::Full);
    assert_eq!(t.block(4, 0, 4), farfield_chunk::Block::GLOWSTONE);
    assert!(t.is_light_correct());
    for t in tiles.iter() {
        assert!(t.is_at_least(Stage::Surface));
    }
}

#[test]
fn repeating_a_finished_request_does_no_stage_work() {
    let q = GenerationQueue::builder(level(), params()).build().unwrap();
    let (sink, _) = collector();
    q.submit(TilePos::new(-4, 6), 2, Stage::Features, GenerationMode::Standalone, sink.clone())
        .join()
        .unwrap();
    let again = q
        .submit(TilePos::new(-4, 6), 2, Stage::Features, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    assert_eq!(again.stage_runs, 0);
    assert_eq!(again.faults, 0);
    assert_eq!(again.delivered, 4);
}

#[test]
fn concurrent_requests_all_complete() {
    let q = GenerationQueue::builder(level(), params()).build().unwrap();
    let (sink, out) = collector();
    let handles: Vec<_> = (0..6)
        .map(|i| {
            q.submit(
                TilePos::new(i * 2, 0),
                2,
                Stage::Noise,
                GenerationMode::Standalone,
                sink.clone(),
            )
        })
        .collect();
    for h in &handles {
        let r: Result<_, GenError> = h.join();
        assert!(r.is_ok());
    }
    assert_eq!(out.lock().unwrap().len(), 24);
    q.update_all_futures();
    assert_eq!(q.active_count(), 0);
}

#[test]
fn carvers_target_delivers_featured_tiles() {
    let lib = Arc::new(Counting::default());
    let q = GenerationQueue::builder(level(), params())
        .library(lib.clone())
        .build()
        .unwrap();
    let (sink, out) = collector();
    let summary = q
        .submit(TilePos::new(0, 0), 2, Stage::Carvers, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    assert_eq!(summary.delivered, 4);
    assert_eq!(lib.count(Stage::Features), 4);
    let tiles = out.lock().unwrap();
    assert_eq!(tiles.len(), 4);
    for t in tiles.iter() {
        assert!(t.is_at_least(Stage::Carvers), "{} at {}", t.pos, t.stage());
        assert_eq!(t.stage(), Stage::Features);
    }
}

#[test]
fn border_tiles_do_not_shadow_persisted_neighbours() {
    let lvl = level();
    let storage = Arc::new(MemoryStorage::new());
    let done_at = TilePos::new(2, 0);
    let mut done = Tile::empty(done_at, lvl.min_y, lvl.height);
    done.set_block(4, 0, 4, farfield_chunk::Block::GLOWSTONE);
    done.advance_to(Stage::Full);
    storage.insert(done_at, encode_tile(&done).unwrap());

    let params = GeneratorParams {
        structure_reference_border: 1,
        ..params()
    };
    let q = GenerationQueue::builder(Arc::clone(&lvl), params)
        .storage(storage)
        .build()
        .unwrap();
    // (2, 0) sits in this request's border ring
    let (sink, _) = collector();
    q.submit(TilePos::new(0, 0), 2, Stage::Surface, GenerationMode::Standalone, sink)
        .join()
        .unwrap();

    let (sink, out) = collector();
    q.submit(TilePos::new(2, 0), 2, Stage::Surface, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    let tiles = out.lock().unwrap();
    let t = tiles.iter().find(|t| t.pos == done_at).unwrap();
    assert_eq!(t.stage(), Stage::Full);
    assert_eq!(t.origin, TileOrigin::Persisted);
    assert_eq!(t.block(4, 0, 4), farfield_chunk::Block::GLOWSTONE);
}

#[test]
fn fast_lighting_follows_config_updates() {
    let q = GenerationQueue::builder(level(), params()).build().unwrap();
    let (sink, out) = collector();
    q.submit(TilePos::new(0, 0), 2, Stage::Surface, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    assert!(out.lock().unwrap().iter().all(|t| t.is_light_correct() && t.has_light()));

    q.session().config().update(GeneratorParams {
        fast_lighting: true,
        ..params()
    });
    let (sink, out) = collector();
    q.submit(TilePos::new(8, 8), 2, Stage::Surface, GenerationMode::Standalone, sink)
        .join()
        .unwrap();
    let tiles = out.lock().unwrap();
    assert_eq!(tiles.len(), 4);
    for t in tiles.iter() {
        assert!(t.is_light_correct());
        assert!(!t.has_light(), "{} was baked", t.pos);
    }
}

#[test]
fn request_cancelled_after_its_last_pass_delivers_nothing() {
    let light = Arc::new(CancelAfterLastPass {
        passes: 4,
        baked: AtomicUsize::new(0),
        handle: Mutex::new(None),
    });
    let q = GenerationQueue::builder(level(), params())
        .lighting(light.clone())
        .build()
        .unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&delivered);
    let sink: ResultSink = Arc::new(move |_| {
        d.fetch_add(1, Ordering::SeqCst);
    });
    let h = q.submit(TilePos::new(0, 0), 2, Stage::Surface, GenerationMode::Standalone, sink);
    *light.handle.lock().unwrap() = Some(h.clone());

    assert!(matches!(h.join(), Err(GenError::Interrupted)));
    assert!(wait_until(Duration::from_secs(5), || q.session().workers().active_count() == 0));
    assert_eq!(light.baked.load(Ordering::SeqCst), 4);
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
}
