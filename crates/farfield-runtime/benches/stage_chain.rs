use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use farfield_chunk::{NoiseGenerator, Tile, Window};
use farfield_lighting::FloodLightEngine;
use farfield_runtime::{GenerationMode, GenerationQueue, LightPolicy, StageRunner, WorkerContext};
use farfield_world::{GeneratorParams, Level, LogOnce, Stage, StageChain, TerrainParams, TilePos};

fn fresh_window(level: &Level, side: usize) -> Window {
    let mut w = Window::new(TilePos::new(0, 0), side);
    let positions: Vec<_> = w.positions().collect();
    for p in positions {
        let _ = w.put(Tile::empty(p, level.min_y, level.height));
    }
    w
}

fn bench_runner_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage_runner_3x3");
    let level = Level::new("bench", 1337, -64, 384, true, TerrainParams::default());
    let once = LogOnce::new();
    let worker = WorkerContext::detached();
    for (name, fast) in [("flood_light", false), ("fast_light", true)] {
        let runner = StageRunner::new(
            Arc::new(NoiseGenerator),
            Arc::new(FloodLightEngine),
            StageChain::default(),
        );
        let light = LightPolicy {
            max_sky_light: 15,
            fast,
        };
        group.bench_function(name, |b| {
            let mut ctx = level.make_gen_ctx();
            b.iter(|| {
                let mut w = fresh_window(&level, 3);
                let s = runner.run(&mut w, Stage::Features, &mut ctx, &worker, &once, light);
                black_box((s, w));
            })
        });
    }
    group.finish();
}

fn bench_queue_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_request");
    let level = Arc::new(Level::new("bench", 1337, -64, 384, true, TerrainParams::default()));
    let params = GeneratorParams {
        worker_threads: 1,
        tile_cache_capacity: 0,
        ..GeneratorParams::default()
    };
    let Ok(q) = GenerationQueue::builder(level, params).build() else {
        return;
    };
    group.bench_function("4x4_features", |b| {
        b.iter(|| {
            let h = q.submit(
                TilePos::new(0, 0),
                4,
                Stage::Features,
                GenerationMode::Standalone,
                Arc::new(|t| {
                    black_box(t);
                }),
            );
            black_box(h.join())
        })
    });
    group.finish();
}

fn short_config() -> Criterion {
    Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(2))
        .sample_size(20)
}

criterion_group! {
    name = benches;
    config = short_config();
    targets =
        bench_runner_window,
        bench_queue_request
}
criterion_main!(benches);
